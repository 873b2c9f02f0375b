//! Bytecode interpreter core for a dynamically-typed, PHP-like language.
//!
//! An external compiler hands over a [`compiler::chunk::Program`]; the
//! [`vm::engine::VM`] executes it against pluggable collaborators: a
//! builtin-function registry, a class registry, an output sink, an error
//! handler and, for include/eval, a source compiler.

pub mod builtins;
pub mod compiler;
pub mod core;
pub mod runtime;
pub mod vm;
