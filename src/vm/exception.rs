//! Exception protocol
//!
//! `CATCH` registers the try/catch/finally region it names from the chunk's
//! catch table. A thrown object travels as [`VmError::Exception`]; the
//! dispatcher hands it to [`VM::handle_exception`], which searches this
//! activation's handlers innermost-first:
//!
//! - a covering handler whose catch types match binds the exception and
//!   resumes at the catch block
//! - a covering handler with only a finally block (or a non-matching catch)
//!   parks the exception and runs the finally block; `FAST_RET` at its end
//!   rethrows it
//! - a throw from inside a catch body whose handler has a finally block also
//!   runs that finally block first
//!
//! When nothing here applies the activation halts and the exception
//! propagates to the caller's loop, where the search repeats.
//!
//! Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_HANDLE_EXCEPTION, ZEND_CATCH, ZEND_FAST_RET

use crate::core::value::Val;
use crate::vm::engine::{VM, VmError};
use crate::vm::frame::{ExceptionHandler, ExecutionContext};
use crate::vm::opcode::{Instruction, OperandKind};

impl VM {
    /// CATCH: op1 raw = catch-table index. Re-entering a try block does not
    /// register its handler twice.
    pub(crate) fn exec_catch(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let entry = inst.op1 as usize;
        if ctx.handlers.iter().any(|h| h.entry == entry) {
            return Ok(());
        }
        let Some(def) = ctx.chunk.catch_table.get(entry) else {
            return Err(VmError::runtime(format!(
                "Malformed bytecode: catch table entry {} does not exist",
                entry
            )));
        };
        let handler = ExceptionHandler::from_entry(entry, def);
        ctx.handlers.push(handler);
        Ok(())
    }

    /// THROW: op1 = exception object
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_THROW
    pub(crate) fn exec_throw(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let value = self.op1(ctx, &inst);
        let Val::Object(obj) = &value else {
            return Err(VmError::runtime("Can only throw objects"));
        };
        let class = obj.borrow().class.clone();
        tracing::debug!(class = %class, ip = ctx.opline, "throw");
        Err(VmError::Exception(value))
    }

    /// Route an exception to a handler of this activation. Returns false
    /// when none applies and the exception must leave the activation.
    pub(crate) fn handle_exception(
        &mut self,
        ctx: &mut ExecutionContext,
        exception: Val,
    ) -> Result<bool, VmError> {
        let ip = ctx.opline;
        let class = match &exception {
            Val::Object(obj) => obj.borrow().class.clone(),
            _ => return Ok(false),
        };

        for index in (0..ctx.handlers.len()).rev() {
            let handler = ctx.handlers[index].clone();

            if handler.covers(ip) {
                if let Some(catch_start) = handler.catch_start {
                    if self.catch_matches(&handler, &class) {
                        tracing::debug!(class = %class, catch_start, "exception caught");
                        // A finally block still guards the catch body
                        let keep = if handler.finally_start.is_some() { index + 1 } else { index };
                        ctx.handlers.truncate(keep);
                        self.abandon_pending_calls(ctx);
                        if let Some(slot) = handler.catch_var {
                            self.set(ctx, OperandKind::Cv, slot, exception)?;
                        }
                        self.jump_to(ctx, catch_start as u32)?;
                        return Ok(true);
                    }
                }
                if let Some(finally_start) = handler.finally_start {
                    return self.enter_finally(ctx, index, finally_start, exception);
                }
                continue;
            }

            if handler.in_catch_body(ip) {
                if let Some(finally_start) = handler.finally_start {
                    return self.enter_finally(ctx, index, finally_start, exception);
                }
            }
        }

        tracing::debug!(class = %class, function = ctx.function_name(), "exception not handled here");
        Ok(false)
    }

    fn catch_matches(&self, handler: &ExceptionHandler, class: &str) -> bool {
        handler.catch_types.is_empty()
            || handler
                .catch_types
                .iter()
                .any(|ty| self.classes.is_subclass_of(class, ty))
    }

    /// Park the exception and run the finally block; FAST_RET rethrows it
    fn enter_finally(
        &mut self,
        ctx: &mut ExecutionContext,
        index: usize,
        finally_start: usize,
        exception: Val,
    ) -> Result<bool, VmError> {
        tracing::debug!(finally_start, "exception deferred to finally");
        ctx.handlers.truncate(index);
        self.abandon_pending_calls(ctx);
        ctx.exception = Some(exception);
        self.jump_to(ctx, finally_start as u32)?;
        Ok(true)
    }

    /// Calls being assembled when the exception hit are never completed
    fn abandon_pending_calls(&self, ctx: &mut ExecutionContext) {
        ctx.current_call = None;
        ctx.call_stack.clear();
    }

    /// FAST_RET: end of a finally block; rethrow a parked exception
    pub(crate) fn exec_fast_ret(&mut self, ctx: &mut ExecutionContext) -> Result<(), VmError> {
        match ctx.exception.take() {
            Some(exception) => Err(VmError::Exception(exception)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::chunk::{CatchEntry, CodeChunk};
    use crate::vm::opcode::{OpCode, Operand};
    use std::rc::Rc;

    /// try { throw new <class>; } catch (<types> $e) { return $e; } finally? { ... }
    fn throwing_chunk(class: &str, types: Vec<Rc<str>>, finally: bool) -> Rc<CodeChunk> {
        let mut code = vec![
            Instruction::new(OpCode::Catch).op1(Operand::Num(0)),
            Instruction::new(OpCode::New)
                .op1(Operand::Const(0))
                .result(Operand::Tmp(0)),
            Instruction::new(OpCode::Throw).op1(Operand::Tmp(0)),
            Instruction::new(OpCode::Return).op1(Operand::Const(1)),
            // catch
            Instruction::new(OpCode::Return).op1(Operand::Cv(0)),
        ];
        if finally {
            code.push(Instruction::new(OpCode::Assign).op1(Operand::Cv(1)).op2(Operand::Const(2)));
            code.push(Instruction::new(OpCode::FastRet));
        }
        Rc::new(CodeChunk {
            code,
            constants: vec![Val::string(class), Val::string("not reached"), Val::Int(1)],
            catch_table: vec![CatchEntry {
                try_start: 1,
                try_end: 4,
                catch_start: Some(4),
                finally_start: finally.then_some(5),
                catch_var: Some(0),
                catch_types: types,
            }],
            ..Default::default()
        })
    }

    #[test]
    fn test_catch_binds_exception_and_resumes() {
        let mut vm = VM::default();
        let chunk = throwing_chunk("RuntimeException", vec![Rc::from("Exception")], false);
        let mut ctx = ExecutionContext::new(chunk);
        vm.run_loop(&mut ctx).unwrap();
        let Val::Object(caught) = ctx.return_value else {
            panic!("expected the exception object");
        };
        assert_eq!(caught.borrow().class.as_ref(), "RuntimeException");
    }

    #[test]
    fn test_non_matching_catch_propagates() {
        let mut vm = VM::default();
        let chunk = throwing_chunk("RuntimeException", vec![Rc::from("TypeError")], false);
        let mut ctx = ExecutionContext::new(chunk);
        let err = vm.run_loop(&mut ctx).unwrap_err();
        assert!(err.to_string().contains("Uncaught exception 'RuntimeException'"));
    }

    #[test]
    fn test_finally_runs_before_rethrow() {
        let mut vm = VM::default();
        let chunk = throwing_chunk("LogicException", vec![Rc::from("TypeError")], true);
        let mut ctx = ExecutionContext::new(chunk);
        let err = vm.run_loop(&mut ctx).unwrap_err();
        assert!(err.is_exception());
        assert_eq!(vm.get(&ctx, OperandKind::Cv, 1), Val::Int(1));
    }

    #[test]
    fn test_throw_requires_object() {
        let mut vm = VM::default();
        let mut ctx = ExecutionContext::new(Rc::new(CodeChunk {
            constants: vec![Val::Int(3)],
            ..Default::default()
        }));
        let err = vm
            .exec_throw(&mut ctx, Instruction::new(OpCode::Throw).op1(Operand::Const(0)))
            .unwrap_err();
        assert!(err.to_string().contains("Can only throw objects"));
    }

    #[test]
    fn test_catch_registration_is_idempotent() {
        let mut vm = VM::default();
        let chunk = throwing_chunk("Exception", Vec::new(), false);
        let mut ctx = ExecutionContext::new(chunk.clone());
        vm.exec_catch(&mut ctx, chunk.code[0]).unwrap();
        vm.exec_catch(&mut ctx, chunk.code[0]).unwrap();
        assert_eq!(ctx.handlers.len(), 1);
    }
}
