//! Control flow operations
//!
//! Implements control flow opcodes for jumps, conditionals, switch/match
//! dispatch and foreach iteration.
//!
//! ## Operations
//!
//! - **Jmp**: Unconditional jump to an absolute target (op1)
//! - **Jmpz / Jmpnz**: Jump on the truthiness of op1 to the target in op2
//! - **JmpzEx / JmpnzEx**: Same, also storing the tested boolean in the result
//! - **JmpSet** (`?:`), **Coalesce** (`??`), **JmpNull** (`?->`): store op1
//!   (or null) in the result and jump
//! - **SwitchLong / SwitchString / Match**: jump-table dispatch
//! - **FeReset / FeFetch / FeFree**: the foreach protocol
//!
//! ## Implementation Notes
//!
//! Jump targets are absolute instruction indices carried inline in an
//! `Unused` operand. Jump tables live in [`CodeChunk::jump_tables`]; string
//! cases are keyed by their raw bytes so `"1"` never matches `1`.
//!
//! Conditional jumps use PHP's truthiness rules:
//! - Falsy: false, 0, 0.0, "", "0", null, empty arrays
//! - Truthy: everything else
//!
//! ## References
//!
//! - Zend: `$PHP_SRC_PATH/Zend/zend_vm_def.h` - ZEND_JMP*, ZEND_SWITCH_*, ZEND_MATCH, ZEND_FE_*
//!
//! [`CodeChunk::jump_tables`]: crate::compiler::chunk::CodeChunk::jump_tables

use crate::core::value::{ArrayKey, Val};
use crate::vm::engine::{ErrorLevel, VM, VmError};
use crate::vm::frame::{ExecutionContext, ForeachIterator, IterSource, Place};
use crate::vm::generator::generator_of;
use crate::vm::opcode::{Instruction, OpCode, OperandKind};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondJump {
    IfFalse,
    IfTrue,
    IfFalseEx,
    IfTrueEx,
    Set,
    Coalesce,
    Null,
}

impl VM {
    /// Execute unconditional jump
    #[inline]
    pub(crate) fn exec_jmp(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        self.jump_to(ctx, inst.op1)
    }

    /// JMPZ, JMPNZ, JMPZ_EX, JMPNZ_EX, JMP_SET, COALESCE, JMP_NULL
    pub(crate) fn exec_cond_jump(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
        mode: CondJump,
    ) -> Result<(), VmError> {
        let val = self.op1(ctx, &inst);
        let target = inst.op2;
        match mode {
            CondJump::IfFalse => {
                if !val.to_bool() {
                    self.jump_to(ctx, target)?;
                }
            }
            CondJump::IfTrue => {
                if val.to_bool() {
                    self.jump_to(ctx, target)?;
                }
            }
            CondJump::IfFalseEx | CondJump::IfTrueEx => {
                let truthy = val.to_bool();
                self.set_result(ctx, &inst, Val::Bool(truthy))?;
                if truthy == (mode == CondJump::IfTrueEx) {
                    self.jump_to(ctx, target)?;
                }
            }
            CondJump::Set => {
                if val.to_bool() {
                    self.set_result(ctx, &inst, val)?;
                    self.jump_to(ctx, target)?;
                }
            }
            CondJump::Coalesce => {
                if !val.is_null() {
                    self.set_result(ctx, &inst, val)?;
                    self.jump_to(ctx, target)?;
                }
            }
            CondJump::Null => {
                if val.is_null() {
                    self.set_result(ctx, &inst, Val::Null)?;
                    self.jump_to(ctx, target)?;
                }
            }
        }
        Ok(())
    }

    /// SWITCH_LONG / SWITCH_STRING: subjects of another type fall through to
    /// the CASE chain that follows
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_SWITCH_LONG
    pub(crate) fn exec_switch(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let subject = self.op1(ctx, &inst);
        let key = match (inst.opcode, &subject) {
            (OpCode::SwitchLong, Val::Int(i)) => ArrayKey::Int(*i),
            (OpCode::SwitchString, Val::String(s)) => ArrayKey::Str(s.clone()),
            _ => return Ok(()),
        };
        if let Some(target) = self.lookup_jump(ctx, inst.op2, &key)? {
            self.jump_to(ctx, target)?;
        }
        Ok(())
    }

    /// MATCH: strict lookup, UnhandledMatchError when nothing applies
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_MATCH
    pub(crate) fn exec_match(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let subject = self.op1(ctx, &inst);
        let key = match &subject {
            Val::Int(i) => Some(ArrayKey::Int(*i)),
            Val::String(s) => Some(ArrayKey::Str(s.clone())),
            _ => None,
        };
        let target = match key {
            Some(key) => self.lookup_jump(ctx, inst.op2, &key)?,
            None => self.jump_table(ctx, inst.op2)?.default,
        };
        match target {
            Some(target) => self.jump_to(ctx, target),
            None => Err(self.unhandled_match(&subject)),
        }
    }

    /// MATCH_ERROR: raised when no arm of a non-table match applies
    pub(crate) fn exec_match_error(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let subject = self.op1(ctx, &inst);
        Err(self.unhandled_match(&subject))
    }

    fn unhandled_match(&mut self, subject: &Val) -> VmError {
        let shown = match subject {
            Val::Int(i) => i.to_string(),
            Val::String(s) => format!("'{}'", String::from_utf8_lossy(s)),
            other => format!("of type {}", other.type_name()),
        };
        self.throw_error("UnhandledMatchError", &format!("Unhandled match case {}", shown))
    }

    fn jump_table(
        &self,
        ctx: &ExecutionContext,
        index: u32,
    ) -> Result<crate::compiler::chunk::JumpTable, VmError> {
        ctx.chunk
            .jump_tables
            .get(index as usize)
            .cloned()
            .ok_or_else(|| VmError::runtime(format!("Jump table {} not found", index)))
    }

    /// Case target for a key, else the default
    fn lookup_jump(
        &self,
        ctx: &ExecutionContext,
        index: u32,
        key: &ArrayKey,
    ) -> Result<Option<u32>, VmError> {
        let table = ctx
            .chunk
            .jump_tables
            .get(index as usize)
            .ok_or_else(|| VmError::runtime(format!("Jump table {} not found", index)))?;
        Ok(table.cases.get(key).copied().or(table.default))
    }

    /// FE_RESET_R / FE_RESET_RW: op1 = subject, result = temp that will name
    /// the iterator. Arrays are snapshotted; by-reference iteration keeps only
    /// the keys and reaches values through the variable.
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_FE_RESET_R
    pub(crate) fn exec_fe_reset(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
        by_ref: bool,
    ) -> Result<(), VmError> {
        let subject = self.op1(ctx, &inst);
        let iterator = match &subject {
            Val::Array(arr) => {
                let keys = arr.iteration_keys();
                match Self::place_of(ctx, inst.op1_kind(), inst.op1) {
                    Some(place) if by_ref => ForeachIterator::new(IterSource::ByRef { place, keys }),
                    _ => {
                        let entries = keys
                            .into_iter()
                            .filter_map(|k| {
                                let v = arr.get(&k).map(|v| self.arena.deref(v).clone())?;
                                Some((k, v))
                            })
                            .collect();
                        ForeachIterator::new(IterSource::Snapshot(entries))
                    }
                }
            }
            Val::Object(obj) => match generator_of(&subject) {
                Some(generator) => {
                    self.generator_start(&generator)?;
                    ForeachIterator::new(IterSource::Generator(generator))
                }
                None => {
                    let entries = obj
                        .borrow()
                        .properties
                        .iter()
                        .map(|(name, v)| {
                            (ArrayKey::from_bytes(name.as_bytes()), self.arena.deref(v).clone())
                        })
                        .collect();
                    ForeachIterator::new(IterSource::Snapshot(entries))
                }
            },
            other => {
                self.report_error(
                    ErrorLevel::Warning,
                    &format!(
                        "foreach() argument must be of type array|object, {} given",
                        other.type_name()
                    ),
                );
                ForeachIterator::empty()
            }
        };

        let slot = inst.result;
        ctx.iterators.insert(slot, iterator);
        self.set_result(ctx, &inst, Val::Int(slot as i64))
    }

    /// FE_FETCH_R / FE_FETCH_RW: op1 = iterator slot, op2 = value target,
    /// result = key target (optional), OP_DATA op1 = exit target
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_FE_FETCH_R
    pub(crate) fn exec_fe_fetch(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
        by_ref: bool,
    ) -> Result<(), VmError> {
        let exit = self.op_data(ctx)?.op1;
        let slot = inst.op1;
        let Some(mut iter) = ctx.iterators.remove(&slot) else {
            return self.jump_to(ctx, exit);
        };
        let result = self.advance_iterator(ctx, &mut iter, &inst, by_ref);
        let more = iter.has_more;
        ctx.iterators.insert(slot, iter);
        result?;
        if !more {
            self.jump_to(ctx, exit)?;
        }
        Ok(())
    }

    fn advance_iterator(
        &mut self,
        ctx: &mut ExecutionContext,
        iter: &mut ForeachIterator,
        inst: &Instruction,
        by_ref: bool,
    ) -> Result<(), VmError> {
        if !iter.has_more {
            return self.finish_iteration(ctx, iter, inst);
        }
        let entry = match &iter.source {
            IterSource::Snapshot(entries) => entries.get(iter.index).cloned(),
            IterSource::ByRef { place, keys } => {
                // Elements removed during the loop are skipped
                let container = self.read_place(ctx, place);
                let mut found = None;
                while let Some(key) = keys.get(iter.index) {
                    if container.array_get(key).is_some() {
                        found = Some((key.clone(), Val::Null));
                        break;
                    }
                    iter.index += 1;
                }
                found
            }
            IterSource::Generator(generator) => {
                let generator = generator.clone();
                if iter.index > 0 {
                    self.generator_resume(&generator, Val::Null)?;
                }
                let data = generator.borrow();
                if data.is_finished() {
                    None
                } else {
                    let key = data.current_key.to_array_key().unwrap_or(ArrayKey::Int(0));
                    Some((key, data.current_val.clone()))
                }
            }
        };

        let Some((key, value)) = entry else {
            iter.has_more = false;
            return self.finish_iteration(ctx, iter, inst);
        };
        iter.index += 1;

        let key_val = match &iter.source {
            IterSource::Generator(generator) => generator.borrow().current_key.clone(),
            _ => key.to_val(),
        };
        match (&iter.source, by_ref) {
            (IterSource::ByRef { place, .. }, true) => {
                let element = Place::Dim(Box::new(place.clone()), Some(key));
                let handle = self.ref_place(ctx, &element)?;
                self.bind_ref(ctx, inst.op2_kind(), inst.op2, handle)?;
            }
            _ => self.store_target(ctx, inst.op2_kind(), inst.op2, value)?,
        }
        if inst.op2_kind() == OperandKind::TmpVar {
            iter.value_temp = Some(inst.op2);
        }
        if inst.has_result() {
            self.store_target(ctx, inst.result_kind(), inst.result, key_val)?;
            if inst.result_kind() == OperandKind::TmpVar {
                iter.key_temp = Some(inst.result);
            }
        }
        Ok(())
    }

    /// Exhausted: temporaries read as null, named variables keep their last value
    fn finish_iteration(
        &mut self,
        ctx: &mut ExecutionContext,
        iter: &mut ForeachIterator,
        inst: &Instruction,
    ) -> Result<(), VmError> {
        iter.has_more = false;
        if inst.op2_kind() == OperandKind::TmpVar {
            self.store_target(ctx, OperandKind::TmpVar, inst.op2, Val::Null)?;
        }
        if inst.result_kind() == OperandKind::TmpVar {
            self.store_target(ctx, OperandKind::TmpVar, inst.result, Val::Null)?;
        }
        Ok(())
    }

    /// Write a fresh value to a loop target; temporaries never write back
    fn store_target(
        &mut self,
        ctx: &mut ExecutionContext,
        kind: OperandKind,
        raw: u32,
        val: Val,
    ) -> Result<(), VmError> {
        if kind == OperandKind::TmpVar {
            ctx.places.remove(&raw);
            ctx.temps.insert(raw, val);
            return Ok(());
        }
        self.set(ctx, kind, raw, val)
    }

    /// FE_FREE: op1 = iterator slot
    pub(crate) fn exec_fe_free(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        if let Some(iter) = ctx.iterators.remove(&inst.op1) {
            for temp in [iter.value_temp, iter.key_temp].into_iter().flatten() {
                ctx.temps.remove(&temp);
                ctx.places.remove(&temp);
            }
        }
        ctx.temps.remove(&inst.op1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::chunk::{CodeChunk, JumpTable};
    use crate::core::value::ArrayData;
    use crate::vm::opcode::Operand;

    fn table_ctx(table: JumpTable) -> ExecutionContext {
        let mut code = Vec::new();
        for _ in 0..10 {
            code.push(Instruction::new(OpCode::Nop));
        }
        ExecutionContext::new(Rc::new(CodeChunk {
            code,
            constants: vec![Val::Int(2), Val::string("1"), Val::Float(1.0)],
            jump_tables: vec![table],
            ..Default::default()
        }))
    }

    #[test]
    fn test_switch_long_ignores_other_types() {
        let mut table = JumpTable::default();
        table.cases.insert(ArrayKey::Int(2), 7);
        table.default = Some(9);
        let mut vm = VM::default();
        let mut ctx = table_ctx(table);

        let hit = Instruction::new(OpCode::SwitchLong)
            .op1(Operand::Const(0))
            .op2(Operand::Num(0));
        vm.exec_switch(&mut ctx, hit).unwrap();
        assert_eq!(ctx.ip, 7);

        ctx.ip = 1;
        let mismatch = Instruction::new(OpCode::SwitchLong)
            .op1(Operand::Const(1))
            .op2(Operand::Num(0));
        vm.exec_switch(&mut ctx, mismatch).unwrap();
        assert_eq!(ctx.ip, 1);
    }

    #[test]
    fn test_match_is_strict() {
        let mut table = JumpTable::default();
        table.cases.insert(ArrayKey::Int(1), 4);
        let mut vm = VM::default();
        let mut ctx = table_ctx(table);

        let inst = Instruction::new(OpCode::Match)
            .op1(Operand::Const(1))
            .op2(Operand::Num(0));
        let err = vm.exec_match(&mut ctx, inst).unwrap_err();
        match err {
            VmError::Exception(Val::Object(obj)) => {
                assert_eq!(obj.borrow().class.as_ref(), "UnhandledMatchError");
            }
            other => panic!("expected UnhandledMatchError, got {:?}", other),
        }
    }

    #[test]
    fn test_coalesce_stores_and_jumps() {
        let mut vm = VM::default();
        let mut ctx = table_ctx(JumpTable::default());
        let inst = Instruction::new(OpCode::Coalesce)
            .op1(Operand::Const(0))
            .op2(Operand::Num(5))
            .result(Operand::Tmp(0));
        vm.exec_cond_jump(&mut ctx, inst, CondJump::Coalesce).unwrap();
        assert_eq!(ctx.ip, 5);
        assert_eq!(vm.get(&ctx, OperandKind::TmpVar, 0), Val::Int(2));
    }

    #[test]
    fn test_foreach_snapshot_order_and_exhaustion() {
        let mut vm = VM::default();
        let fetch = Instruction::new(OpCode::FeFetchR)
            .op1(Operand::Num(0))
            .op2(Operand::Cv(0))
            .result(Operand::Cv(1));
        let code = vec![
            Instruction::new(OpCode::FeResetR)
                .op1(Operand::Cv(2))
                .result(Operand::Tmp(0)),
            fetch,
            Instruction::new(OpCode::OpData).op1(Operand::Num(4)),
            Instruction::new(OpCode::Nop),
            Instruction::new(OpCode::Nop),
        ];
        let mut ctx = ExecutionContext::new(Rc::new(CodeChunk {
            code,
            ..Default::default()
        }));
        let mut arr = ArrayData::new();
        arr.insert(ArrayKey::from_bytes(b"x"), Val::Int(1));
        arr.insert(ArrayKey::Int(5), Val::Int(2));
        vm.set(&mut ctx, OperandKind::Cv, 2, Val::Array(Rc::new(arr))).unwrap();

        let reset = ctx.chunk.code[0];
        vm.exec_fe_reset(&mut ctx, reset, false).unwrap();

        ctx.ip = 2;
        vm.exec_fe_fetch(&mut ctx, fetch, false).unwrap();
        assert_eq!(vm.get(&ctx, OperandKind::Cv, 1), Val::Int(5));
        assert_eq!(ctx.ip, 3);

        ctx.ip = 2;
        vm.exec_fe_fetch(&mut ctx, fetch, false).unwrap();
        assert_eq!(vm.get(&ctx, OperandKind::Cv, 1), Val::string("x"));

        ctx.ip = 2;
        vm.exec_fe_fetch(&mut ctx, fetch, false).unwrap();
        assert_eq!(ctx.ip, 4);
        assert_eq!(vm.get(&ctx, OperandKind::Cv, 0), Val::Int(1));
    }
}
