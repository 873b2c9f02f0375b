//! Bytecode assembly
//!
//! `ChunkEmitter` builds a [`CodeChunk`] instruction by instruction. It is
//! not a front end: hosts and tests use it to lay out bytecode by hand
//! without tracking constant indices, slot numbers or forward jump targets
//! themselves.
//!
//! - scalar constants are pooled once per distinct value
//! - compiled variables get one slot per name
//! - forward jumps are emitted with a placeholder and patched once the
//!   target is known

use crate::compiler::chunk::{CatchEntry, CodeChunk, FuncParam, JumpTable, UserFunc};
use crate::core::value::Val;
use crate::vm::opcode::{Instruction, OpCode, Operand};
use std::collections::HashMap;
use std::rc::Rc;

/// Pool key for constants that can be shared
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(Vec<u8>),
}

impl ConstKey {
    fn of(val: &Val) -> Option<Self> {
        Some(match val {
            Val::Null => ConstKey::Null,
            Val::Bool(b) => ConstKey::Bool(*b),
            Val::Int(i) => ConstKey::Int(*i),
            Val::Float(f) => ConstKey::Float(f.to_bits()),
            Val::String(s) => ConstKey::Str(s.as_ref().clone()),
            _ => return None,
        })
    }
}

/// Which operand of a jump instruction carries the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetField {
    Op1,
    Op2,
}

/// A forward jump waiting for its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Jump {
    at: usize,
    field: TargetField,
}

#[derive(Debug, Default)]
pub struct ChunkEmitter {
    chunk: CodeChunk,
    constant_pool: HashMap<ConstKey, u32>,
    next_temp: u32,
}

impl ChunkEmitter {
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        let mut emitter = Self::default();
        emitter.chunk.name = name.into();
        emitter
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.chunk.file_path = Some(path.into());
        self
    }

    /// Constant operand; scalars are deduplicated
    pub fn constant(&mut self, val: impl Into<Val>) -> Operand {
        let val = val.into();
        let key = ConstKey::of(&val);
        if let Some(index) = key.as_ref().and_then(|k| self.constant_pool.get(k)) {
            return Operand::Const(*index);
        }
        let index = self.chunk.constants.len() as u32;
        self.chunk.constants.push(val);
        if let Some(key) = key {
            self.constant_pool.insert(key, index);
        }
        Operand::Const(index)
    }

    /// Compiled-variable slot for `name`, allocated on first use
    pub fn var(&mut self, name: &str) -> Operand {
        let slot = match self.chunk.var_names.iter().position(|n| n.as_ref() == name) {
            Some(slot) => slot,
            None => {
                self.chunk.var_names.push(Rc::from(name));
                self.chunk.var_names.len() - 1
            }
        };
        Operand::Cv(slot as u32)
    }

    /// A fresh temporary
    pub fn temp(&mut self) -> Operand {
        let temp = Operand::Tmp(self.next_temp);
        self.next_temp += 1;
        temp
    }

    /// Index the next emitted instruction will get
    pub fn offset(&self) -> usize {
        self.chunk.code.len()
    }

    pub fn emit(&mut self, inst: Instruction) -> usize {
        self.chunk.code.push(inst);
        self.chunk.code.len() - 1
    }

    /// `JMP` to a known target
    pub fn jump_to(&mut self, target: usize) -> usize {
        self.emit(Instruction::new(OpCode::Jmp).op1(Operand::Num(target as u32)))
    }

    /// Forward `JMP`
    pub fn jump(&mut self) -> Jump {
        let at = self.emit(Instruction::new(OpCode::Jmp));
        Jump { at, field: TargetField::Op1 }
    }

    /// Forward conditional jump (`JMPZ`, `JMPNZ`, `COALESCE`, ...) testing `subject`
    pub fn jump_if(&mut self, opcode: OpCode, subject: Operand) -> Jump {
        let at = self.emit(Instruction::new(opcode).op1(subject));
        Jump { at, field: TargetField::Op2 }
    }

    /// Like [`jump_if`](Self::jump_if), also writing the result
    pub fn jump_if_into(&mut self, opcode: OpCode, subject: Operand, result: Operand) -> Jump {
        let at = self.emit(Instruction::new(opcode).op1(subject).result(result));
        Jump { at, field: TargetField::Op2 }
    }

    /// `OP_DATA` carrying a forward target, as `FE_FETCH` expects
    pub fn exit_target(&mut self) -> Jump {
        let at = self.emit(Instruction::new(OpCode::OpData));
        Jump { at, field: TargetField::Op1 }
    }

    /// Point a forward jump at the next instruction
    pub fn patch(&mut self, jump: Jump) {
        let target = self.offset();
        self.patch_to(jump, target);
    }

    pub fn patch_to(&mut self, jump: Jump, target: usize) {
        if let Some(inst) = self.chunk.code.get_mut(jump.at) {
            let target = Operand::Num(target as u32);
            *inst = match jump.field {
                TargetField::Op1 => inst.op1(target),
                TargetField::Op2 => inst.op2(target),
            };
        }
    }

    /// Register a try region; returns the operand `CATCH` takes
    pub fn catch_entry(&mut self, entry: CatchEntry) -> Operand {
        self.chunk.catch_table.push(entry);
        Operand::Num(self.chunk.catch_table.len() as u32 - 1)
    }

    /// Mutable access to a registered try region, for filling in offsets
    /// once the catch and finally blocks have been laid out
    pub fn catch_entry_mut(&mut self, index: Operand) -> Option<&mut CatchEntry> {
        match index {
            Operand::Num(i) => self.chunk.catch_table.get_mut(i as usize),
            _ => None,
        }
    }

    /// Register a switch/match table; returns the operand the dispatch takes
    pub fn jump_table(&mut self, table: JumpTable) -> Operand {
        self.chunk.jump_tables.push(table);
        Operand::Num(self.chunk.jump_tables.len() as u32 - 1)
    }

    pub fn finish(self) -> CodeChunk {
        self.chunk
    }

    /// Finish as the body of a user function
    pub fn finish_function(self, name: &str, params: Vec<FuncParam>) -> UserFunc {
        let mut chunk = self.chunk;
        chunk.name = Rc::from(name);
        let mut func = UserFunc::new(name, Rc::new(chunk));
        func.params = params;
        func
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::opcode::OperandKind;

    #[test]
    fn test_scalar_constants_are_pooled() {
        let mut e = ChunkEmitter::new("main");
        let a = e.constant(Val::Int(1));
        let b = e.constant(Val::string("x"));
        let c = e.constant(Val::Int(1));
        let d = e.constant(Val::Float(1.0));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_ne!(a, d);
        assert_eq!(e.finish().constants.len(), 3);
    }

    #[test]
    fn test_vars_get_stable_slots() {
        let mut e = ChunkEmitter::new("main");
        assert_eq!(e.var("a"), Operand::Cv(0));
        assert_eq!(e.var("b"), Operand::Cv(1));
        assert_eq!(e.var("a"), Operand::Cv(0));
        assert_eq!(e.temp(), Operand::Tmp(0));
        assert_eq!(e.temp(), Operand::Tmp(1));
        let chunk = e.finish();
        assert_eq!(chunk.var_names.len(), 2);
    }

    #[test]
    fn test_forward_jumps_are_patched() {
        let mut e = ChunkEmitter::new("main");
        let cond = e.var("c");
        let skip = e.jump_if(OpCode::Jmpz, cond);
        let out = e.jump();
        e.patch(skip);
        e.emit(Instruction::new(OpCode::Nop));
        e.patch(out);
        let chunk = e.finish();

        assert_eq!(chunk.code[0].op1_kind(), OperandKind::Cv);
        assert_eq!(chunk.code[0].op2_kind(), OperandKind::Unused);
        assert_eq!(chunk.code[0].op2, 2);
        assert_eq!(chunk.code[1].op1, 3);
    }
}
