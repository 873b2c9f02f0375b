/// Increment/Decrement operations for PHP values
/// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - increment_function/decrement_function
use crate::core::value::{Number, Val, parse_numeric_prefix};
use crate::vm::engine::{ErrorHandler, ErrorLevel, VM, VmError};
use crate::vm::frame::{ExecutionContext, Place};
use crate::vm::opcode::{Instruction, OperandKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncDecOp {
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

impl IncDecOp {
    pub fn is_increment(self) -> bool {
        matches!(self, IncDecOp::PreInc | IncDecOp::PostInc)
    }

    /// Post variants yield the value from before the update
    pub fn is_post(self) -> bool {
        matches!(self, IncDecOp::PostInc | IncDecOp::PostDec)
    }

    fn apply(self, val: Val, error_handler: &mut dyn ErrorHandler) -> Val {
        if self.is_increment() {
            increment_value(val, error_handler)
        } else {
            decrement_value(val, error_handler)
        }
    }
}

/// Increment a value, following PHP semantics
/// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - increment_function
pub fn increment_value(val: Val, error_handler: &mut dyn ErrorHandler) -> Val {
    match val {
        // INT: increment by 1, overflow to float
        Val::Int(i) => match i.checked_add(1) {
            Some(n) => Val::Int(n),
            None => Val::Float(i as f64 + 1.0),
        },
        Val::Float(f) => Val::Float(f + 1.0),
        Val::Null => Val::Int(1),
        Val::String(s) => step_string(&s, 1),
        Val::Bool(_) => {
            error_handler.report(
                ErrorLevel::Warning,
                "Increment on type bool has no effect, this will change in the next major version of PHP",
            );
            val
        }
        // Arrays, objects and closures are left untouched
        other => other,
    }
}

/// Decrement a value, following PHP semantics
/// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - decrement_function
pub fn decrement_value(val: Val, error_handler: &mut dyn ErrorHandler) -> Val {
    match val {
        Val::Int(i) => match i.checked_sub(1) {
            Some(n) => Val::Int(n),
            None => Val::Float(i as f64 - 1.0),
        },
        Val::Float(f) => Val::Float(f - 1.0),
        // Undefined/null counts down from zero
        Val::Null => Val::Int(-1),
        Val::String(s) => step_string(&s, -1),
        Val::Bool(_) => {
            error_handler.report(
                ErrorLevel::Warning,
                "Decrement on type bool has no effect, this will change in the next major version of PHP",
            );
            val
        }
        other => other,
    }
}

/// Strings step as numbers: a spelling with a decimal point becomes
/// float, anything else int (non-numeric text counts as 0).
fn step_string(s: &[u8], delta: i64) -> Val {
    if s.contains(&b'.') {
        return Val::Float(parse_numeric_prefix(s).0.to_f64() + delta as f64);
    }
    let i = match parse_numeric_prefix(s).0 {
        Number::Int(i) => i,
        Number::Float(f) => Val::Float(f).to_int(),
    };
    match i.checked_add(delta) {
        Some(n) => Val::Int(n),
        None => Val::Float(i as f64 + delta as f64),
    }
}

impl VM {
    /// ZEND_PRE_INC / ZEND_PRE_DEC / ZEND_POST_INC / ZEND_POST_DEC
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_PRE_INC
    pub(crate) fn exec_inc_dec(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
        op: IncDecOp,
    ) -> Result<(), VmError> {
        let kind = inst.op1_kind();
        if kind == OperandKind::Cv && !self.is_defined(ctx, kind, inst.op1) {
            let name = ctx.chunk.var_name(inst.op1).unwrap_or("?").to_string();
            self.report_error(ErrorLevel::Warning, &format!("Undefined variable ${}", name));
        }
        let Some(place) = Self::place_of(ctx, kind, inst.op1) else {
            return Err(VmError::runtime("Cannot increment or decrement a constant"));
        };
        let result = self.inc_dec_place(ctx, &place, op)?;
        self.set_result(ctx, &inst, result)
    }

    /// Update the value at a place and return what the expression evaluates to
    pub(crate) fn inc_dec_place(
        &mut self,
        ctx: &mut ExecutionContext,
        place: &Place,
        op: IncDecOp,
    ) -> Result<Val, VmError> {
        let old = self.read_place(ctx, place);
        let new = op.apply(old.clone(), self.error_handler.as_mut());
        self.write_place(ctx, place, new.clone())?;
        Ok(if op.is_post() { old } else { new })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::chunk::CodeChunk;
    use crate::vm::opcode::{OpCode, Operand};
    use std::cell::RefCell;
    use std::rc::Rc;

    // Mock error handler for testing
    struct MockErrorHandler {
        warnings: RefCell<Vec<String>>,
    }

    impl MockErrorHandler {
        fn new() -> Self {
            Self {
                warnings: RefCell::new(Vec::new()),
            }
        }

        fn has_warning(&self, msg: &str) -> bool {
            self.warnings.borrow().iter().any(|w| w.contains(msg))
        }
    }

    impl ErrorHandler for MockErrorHandler {
        fn report(&mut self, _level: ErrorLevel, message: &str) {
            self.warnings.borrow_mut().push(message.to_string());
        }
    }

    #[test]
    fn test_increment_int_overflow() {
        let mut handler = MockErrorHandler::new();
        assert_eq!(increment_value(Val::Int(5), &mut handler), Val::Int(6));
        match increment_value(Val::Int(i64::MAX), &mut handler) {
            Val::Float(f) => assert!((f - 9223372036854775808.0).abs() < 1.0),
            other => panic!("Expected float, got {:?}", other),
        }
    }

    #[test]
    fn test_null_steps() {
        let mut handler = MockErrorHandler::new();
        assert_eq!(increment_value(Val::Null, &mut handler), Val::Int(1));
        assert_eq!(decrement_value(Val::Null, &mut handler), Val::Int(-1));
    }

    #[test]
    fn test_strings_step_as_numbers() {
        let mut handler = MockErrorHandler::new();
        assert_eq!(increment_value(Val::string("7"), &mut handler), Val::Int(8));
        assert_eq!(increment_value(Val::string("1.5"), &mut handler), Val::Float(2.5));
        assert_eq!(decrement_value(Val::string("10"), &mut handler), Val::Int(9));
        assert_eq!(decrement_value(Val::string("2.0"), &mut handler), Val::Float(1.0));
    }

    #[test]
    fn test_non_numeric_strings_count_from_zero() {
        let mut handler = MockErrorHandler::new();
        assert_eq!(increment_value(Val::string("abc"), &mut handler), Val::Int(1));
        assert_eq!(decrement_value(Val::string("abc"), &mut handler), Val::Int(-1));
        assert_eq!(increment_value(Val::string(""), &mut handler), Val::Int(1));
        assert_eq!(decrement_value(Val::string("3 apples"), &mut handler), Val::Int(2));
    }

    #[test]
    fn test_bool_unchanged_with_warning() {
        let mut handler = MockErrorHandler::new();
        assert_eq!(increment_value(Val::Bool(true), &mut handler), Val::Bool(true));
        assert!(handler.has_warning("no effect"));
    }

    #[test]
    fn test_post_increment_returns_old_value() {
        let mut vm = VM::default();
        let mut ctx = ExecutionContext::new(Rc::new(CodeChunk::default()));
        vm.set(&mut ctx, OperandKind::Cv, 0, Val::Int(7)).unwrap();

        let inst = Instruction::new(OpCode::PostInc)
            .op1(Operand::Cv(0))
            .result(Operand::Tmp(0));
        vm.exec_inc_dec(&mut ctx, inst, IncDecOp::PostInc).unwrap();

        assert_eq!(vm.get(&ctx, OperandKind::TmpVar, 0), Val::Int(7));
        assert_eq!(vm.get(&ctx, OperandKind::Cv, 0), Val::Int(8));
    }
}
