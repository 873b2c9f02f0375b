//! Arithmetic operations
//!
//! Implements PHP arithmetic operations following Zend engine semantics.
//!
//! ## PHP Semantics
//!
//! PHP arithmetic operations perform automatic type juggling:
//! - Numeric strings are converted to integers/floats
//! - Booleans: true=1, false=0
//! - null converts to 0
//! - Arrays/Objects are unsupported operands (only `array + array` is a union)
//!
//! Integer results wrap on overflow. Division yields an int when the
//! quotient is exact and a float otherwise. Division or modulo by zero is
//! an error and leaves the result slot untouched.
//!
//! ## References
//!
//! - Zend: `$PHP_SRC_PATH/Zend/zend_operators.c` - arithmetic functions
//! - PHP Manual: https://www.php.net/manual/en/language.operators.arithmetic.php

use crate::vm::assign_op::BinaryOp;
use crate::vm::engine::{VM, VmError};
use crate::vm::frame::ExecutionContext;
use crate::vm::opcode::Instruction;

impl VM {
    /// ADD, SUB, MUL, DIV, MOD, POW
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_ADD
    pub(crate) fn exec_arith(
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

    /// CONCAT / FAST_CONCAT
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_CONCAT
    pub(crate) fn exec_concat(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let a = self.op1(ctx, &inst);
        let b = self.op2(ctx, &inst);
        let result = self.binary_op(BinaryOp::Concat, &a, &b)?;
        self.set_result(ctx, &inst, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::chunk::CodeChunk;
    use crate::core::value::Val;
    use crate::vm::opcode::{OpCode, Operand, OperandKind};
    use std::rc::Rc;

    fn ctx(constants: Vec<Val>) -> ExecutionContext {
        ExecutionContext::new(Rc::new(CodeChunk {
            constants,
            ..Default::default()
        }))
    }

    fn binary(op: OpCode) -> Instruction {
        Instruction::new(op)
            .op1(Operand::Const(0))
            .op2(Operand::Const(1))
            .result(Operand::Tmp(0))
    }

    #[test]
    fn test_add_ints() {
        let mut vm = VM::default();
        let mut ctx = ctx(vec![Val::Int(10), Val::Int(20)]);
        vm.exec_arith(&mut ctx, binary(OpCode::Add), BinaryOp::Add).unwrap();
        assert_eq!(vm.get(&ctx, OperandKind::TmpVar, 0), Val::Int(30));
    }

    #[test]
    fn test_float_operand_promotes() {
        let mut vm = VM::default();
        let mut ctx = ctx(vec![Val::Int(3), Val::Float(0.5)]);
        vm.exec_arith(&mut ctx, binary(OpCode::Mul), BinaryOp::Mul).unwrap();
        assert_eq!(vm.get(&ctx, OperandKind::TmpVar, 0), Val::Float(1.5));
    }

    #[test]
    fn test_division_by_zero_leaves_result_unwritten() {
        let mut vm = VM::default();
        let mut ctx = ctx(vec![Val::Int(1), Val::Int(0)]);
        let err = vm
            .exec_arith(&mut ctx, binary(OpCode::Div), BinaryOp::Div)
            .unwrap_err();
        assert!(matches!(err, VmError::DivisionByZero));
        assert!(!ctx.temps.contains_key(&0));
    }

    #[test]
    fn test_concat_mixed() {
        let mut vm = VM::default();
        let mut ctx = ctx(vec![Val::string("n="), Val::Int(5)]);
        vm.exec_concat(&mut ctx, binary(OpCode::Concat)).unwrap();
        assert_eq!(vm.get(&ctx, OperandKind::TmpVar, 0), Val::string("n=5"));
    }
}
