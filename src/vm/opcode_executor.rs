//! Opcode executor trait
//!
//! Single-instruction execution for tooling and tests: a debugger or a
//! profiler can step an [`ExecutionContext`] one instruction at a time
//! without going through the dispatch loop.
//!
//! The `Instruction` implementation is a thin wrapper over the VM's own
//! dispatcher, so there is no second opcode-to-handler mapping to maintain.

use crate::vm::engine::{VM, VmError};
use crate::vm::frame::ExecutionContext;
use crate::vm::opcode::Instruction;

/// Executes itself against a VM and an activation
pub trait OpcodeExecutor {
    /// Run one step. `ctx.ip` must already point past the instruction,
    /// as it does inside the dispatch loop.
    ///
    /// # Errors
    ///
    /// Whatever the handler raises, language exceptions included; no
    /// handler search happens here.
    fn execute(&self, vm: &mut VM, ctx: &mut ExecutionContext) -> Result<(), VmError>;
}

impl OpcodeExecutor for Instruction {
    fn execute(&self, vm: &mut VM, ctx: &mut ExecutionContext) -> Result<(), VmError> {
        vm.execute_instruction(ctx, *self)
    }
}

/// Step the instruction at `ctx.ip` the way the dispatch loop would
pub fn step(vm: &mut VM, ctx: &mut ExecutionContext) -> Result<bool, VmError> {
    let Some(&inst) = ctx.chunk.code.get(ctx.ip) else {
        ctx.halted = true;
        return Ok(false);
    };
    ctx.opline = ctx.ip;
    ctx.ip += 1;
    inst.execute(vm, ctx)?;
    Ok(!ctx.halted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::chunk::CodeChunk;
    use crate::core::value::Val;
    use crate::vm::opcode::{OpCode, Operand, OperandKind};
    use std::rc::Rc;

    fn ctx(code: Vec<Instruction>, constants: Vec<Val>) -> ExecutionContext {
        ExecutionContext::new(Rc::new(CodeChunk {
            code,
            constants,
            ..Default::default()
        }))
    }

    #[test]
    fn test_instruction_executes_via_trait() {
        let mut vm = VM::default();
        let add = Instruction::new(OpCode::Add)
            .op1(Operand::Const(0))
            .op2(Operand::Const(1))
            .result(Operand::Tmp(0));
        let mut ctx = ctx(vec![add], vec![Val::Int(5), Val::Int(3)]);
        add.execute(&mut vm, &mut ctx).unwrap();
        assert_eq!(vm.get(&ctx, OperandKind::TmpVar, 0), Val::Int(8));
    }

    #[test]
    fn test_step_walks_to_halt() {
        let mut vm = VM::default();
        let mut ctx = ctx(
            vec![
                Instruction::new(OpCode::IsSmaller)
                    .op1(Operand::Const(0))
                    .op2(Operand::Const(1))
                    .result(Operand::Tmp(0)),
                Instruction::new(OpCode::Return).op1(Operand::Tmp(0)),
            ],
            vec![Val::Int(10), Val::Int(20)],
        );
        assert!(step(&mut vm, &mut ctx).unwrap());
        assert!(!step(&mut vm, &mut ctx).unwrap());
        assert_eq!(ctx.return_value, Val::Bool(true));
        assert_eq!(vm.opcodes_executed(), 0);
    }
}
