pub mod assign_op;
pub(crate) mod callable;
pub(crate) mod class_resolution;
pub mod engine;
pub(crate) mod error_construction;
pub(crate) mod exception;
pub mod executor;
pub mod frame;
pub mod generator;
pub mod inc_dec;
pub mod opcode;
pub mod opcode_executor;
pub(crate) mod opcodes;
pub(crate) mod operand;
pub(crate) mod type_conversion;
pub(crate) mod variable_ops;
pub(crate) mod visibility;
