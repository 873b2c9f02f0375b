//! Bitwise and logical operations
//!
//! ## PHP Semantics
//!
//! Bitwise operators work on integers, except that `&`, `|` and `^` on two
//! strings operate byte by byte and `~` on a string inverts every byte.
//! Shifts by a negative amount are errors; shifting by 64 or more yields 0
//! (or -1 for a negative left operand shifted right).
//!
//! Logical operators coerce both operands to bool.
//!
//! ## References
//!
//! - Zend: `$PHP_SRC_PATH/Zend/zend_operators.c` - bitwise_*_function, boolean_xor_function
//! - PHP Manual: https://www.php.net/manual/en/language.operators.bitwise.php

use crate::core::value::Val;
use crate::vm::assign_op::BinaryOp;
use crate::vm::engine::{VM, VmError};
use crate::vm::frame::ExecutionContext;
use crate::vm::opcode::{Instruction, OpCode};

impl VM {
    /// BW_AND, BW_OR, BW_XOR, SL, SR
    pub(crate) fn exec_bitwise(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
        op: BinaryOp,
    ) -> Result<(), VmError> {
        let a = self.op1(ctx, &inst);
        let b = self.op2(ctx, &inst);
        let result = self.binary_op(op, &a, &b)?;
        self.set_result(ctx, &inst, result)
    }

    /// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - bitwise_not_function
    pub(crate) fn exec_bw_not(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let result = match self.op1(ctx, &inst) {
            Val::Int(i) => Val::Int(!i),
            Val::Float(f) => Val::Int(!Val::Float(f).to_int()),
            Val::String(s) => Val::string(s.iter().map(|b| !b).collect::<Vec<u8>>()),
            other => {
                return Err(VmError::type_error(
                    "int|float|string",
                    other.type_name(),
                    "Cannot perform bitwise not",
                ));
            }
        };
        self.set_result(ctx, &inst, result)
    }

    pub(crate) fn exec_bool_not(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let val = self.op1(ctx, &inst);
        self.set_result(ctx, &inst, Val::Bool(!val.to_bool()))
    }

    pub(crate) fn exec_bool(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let val = self.op1(ctx, &inst);
        self.set_result(ctx, &inst, Val::Bool(val.to_bool()))
    }

    /// BOOL_XOR, BOOL_AND, BOOL_OR on boolean-coerced operands
    pub(crate) fn exec_logical(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let a = self.op1(ctx, &inst).to_bool();
        let b = self.op2(ctx, &inst).to_bool();
        let result = match inst.opcode {
            OpCode::BoolXor => a ^ b,
            OpCode::BoolAnd => a && b,
            OpCode::BoolOr => a || b,
            other => return Err(VmError::UnsupportedOpcode(other)),
        };
        self.set_result(ctx, &inst, Val::Bool(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::chunk::CodeChunk;
    use crate::vm::opcode::{Operand, OperandKind};
    use std::rc::Rc;

    fn run(op: OpCode, a: Val, b: Val) -> Val {
        let mut vm = VM::default();
        let mut ctx = ExecutionContext::new(Rc::new(CodeChunk {
            constants: vec![a, b],
            ..Default::default()
        }));
        let inst = Instruction::new(op)
            .op1(Operand::Const(0))
            .op2(Operand::Const(1))
            .result(Operand::Tmp(0));
        vm.execute_instruction(&mut ctx, inst).unwrap();
        vm.get(&ctx, OperandKind::TmpVar, 0)
    }

    #[test]
    fn test_logical_ops_coerce_to_bool() {
        assert_eq!(run(OpCode::BoolXor, Val::Int(1), Val::string("")), Val::Bool(true));
        assert_eq!(run(OpCode::BoolAnd, Val::Int(1), Val::string("0")), Val::Bool(false));
        assert_eq!(run(OpCode::BoolOr, Val::Null, Val::Float(0.1)), Val::Bool(true));
    }

    #[test]
    fn test_bitwise_ops() {
        assert_eq!(run(OpCode::BwXor, Val::Int(5), Val::Int(3)), Val::Int(6));
        assert_eq!(run(OpCode::Sr, Val::Int(16), Val::Int(2)), Val::Int(4));
        assert_eq!(run(OpCode::BwNot, Val::Int(0), Val::Null), Val::Int(-1));
    }
}
