//! Operand resolution
//!
//! Reads and writes values by operand kind. Reads always see through
//! reference cells; writes into a slot that holds a reference update the
//! shared cell so every alias observes them.
//!
//! Nested writes (`$a['x']['y'] = 1`, `$o->list[] = 2`) go through a
//! [`Place`]: W/RW fetches record where their result temporary came from, and
//! later writes to that temporary are applied to the root location instead.
//!
//! Reference: $PHP_SRC_PATH/Zend/zend_execute.c - _get_zval_ptr_*, zend_fetch_dimension_address_W

use crate::core::heap::Handle;
use crate::core::value::{ArrayData, ArrayKey, Val};
use crate::vm::engine::{VM, VmError};
use crate::vm::frame::{ExecutionContext, Place};
use crate::vm::opcode::{Instruction, OpCode, OperandKind};
use std::rc::Rc;

impl VM {
    /// Resolve an operand to a plain value; absent slots read as null
    pub(crate) fn get(&self, ctx: &ExecutionContext, kind: OperandKind, raw: u32) -> Val {
        let stored = match kind {
            OperandKind::Unused => return Val::Null,
            OperandKind::Const => return ctx.chunk.constants.get(raw as usize).cloned().unwrap_or_default(),
            OperandKind::TmpVar => ctx.temps.get(&raw),
            OperandKind::Var | OperandKind::Cv => ctx.vars.get(&raw),
        };
        match stored {
            Some(val) => self.arena.deref(val).clone(),
            None => Val::Null,
        }
    }

    pub(crate) fn op1(&self, ctx: &ExecutionContext, inst: &Instruction) -> Val {
        self.get(ctx, inst.op1_kind(), inst.op1)
    }

    pub(crate) fn op2(&self, ctx: &ExecutionContext, inst: &Instruction) -> Val {
        self.get(ctx, inst.op2_kind(), inst.op2)
    }

    /// Whether a variable or temporary slot holds anything at all
    pub(crate) fn is_defined(&self, ctx: &ExecutionContext, kind: OperandKind, raw: u32) -> bool {
        match kind {
            OperandKind::Unused => false,
            OperandKind::Const => (raw as usize) < ctx.chunk.constants.len(),
            OperandKind::TmpVar => ctx.temps.contains_key(&raw),
            OperandKind::Var | OperandKind::Cv => ctx.vars.contains_key(&raw),
        }
    }

    /// Assign to an operand as a target. Constants and unused operands
    /// ignore the write.
    pub(crate) fn set(
        &mut self,
        ctx: &mut ExecutionContext,
        kind: OperandKind,
        raw: u32,
        val: Val,
    ) -> Result<(), VmError> {
        let val = self.arena.deref(&val).clone();
        match kind {
            OperandKind::Unused | OperandKind::Const => Ok(()),
            OperandKind::Var | OperandKind::Cv => {
                self.write_slot(ctx, raw, val);
                Ok(())
            }
            OperandKind::TmpVar => match ctx.places.get(&raw).cloned() {
                Some(place) => {
                    self.write_place(ctx, &place, val.clone())?;
                    ctx.temps.insert(raw, val);
                    Ok(())
                }
                None => {
                    ctx.temps.insert(raw, val);
                    Ok(())
                }
            },
        }
    }

    /// Store an instruction's result. Temporaries keep references as-is so a
    /// by-reference return can be bound later; other targets get a copy.
    pub(crate) fn set_result(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: &Instruction,
        val: Val,
    ) -> Result<(), VmError> {
        match inst.result_kind() {
            OperandKind::Unused | OperandKind::Const => Ok(()),
            OperandKind::TmpVar => {
                ctx.places.remove(&inst.result);
                ctx.temps.insert(inst.result, val);
                Ok(())
            }
            kind => self.set(ctx, kind, inst.result, val),
        }
    }

    /// Store a W/RW fetch result together with the location it came from
    pub(crate) fn set_result_place(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: &Instruction,
        place: Place,
    ) -> Result<(), VmError> {
        let current = self.read_place(ctx, &place);
        self.set_result(ctx, inst, current)?;
        if inst.result_kind() == OperandKind::TmpVar {
            ctx.places.insert(inst.result, place);
        }
        Ok(())
    }

    fn write_slot(&mut self, ctx: &mut ExecutionContext, slot: u32, val: Val) {
        match ctx.vars.get_mut(&slot) {
            Some(Val::Reference(h)) => {
                let h = *h;
                self.arena.set(h, val);
            }
            Some(existing) => *existing = val,
            None => {
                ctx.vars.insert(slot, val);
            }
        }
    }

    /// The writable location an operand names, if any
    pub(crate) fn place_of(ctx: &ExecutionContext, kind: OperandKind, raw: u32) -> Option<Place> {
        match kind {
            OperandKind::Var | OperandKind::Cv => Some(Place::Var(raw)),
            OperandKind::TmpVar => Some(
                ctx.places
                    .get(&raw)
                    .cloned()
                    .unwrap_or(Place::Temp(raw)),
            ),
            OperandKind::Const | OperandKind::Unused => None,
        }
    }

    /// Current value at a place, dereferenced
    pub(crate) fn read_place(&self, ctx: &ExecutionContext, place: &Place) -> Val {
        let val = match place {
            Place::Var(slot) => ctx.vars.get(slot).cloned().unwrap_or_default(),
            Place::Temp(slot) => ctx.temps.get(slot).cloned().unwrap_or_default(),
            Place::Cell(h) => self.arena.get(*h).clone(),
            Place::Prop(obj, name) => obj.borrow().get(name).cloned().unwrap_or_default(),
            Place::Dim(base, key) => {
                let container = self.read_place(ctx, base);
                match (key, &container) {
                    (Some(key), Val::Array(arr)) => arr.get(key).cloned().unwrap_or_default(),
                    (Some(ArrayKey::Int(i)), Val::String(s)) => string_offset(s, *i),
                    _ => Val::Null,
                }
            }
        };
        self.arena.deref(&val).clone()
    }

    /// Remove the value at a place, leaving null behind. The caller puts a
    /// value back with [`write_place`](Self::write_place); taking first keeps
    /// the container uniquely owned so the update does not copy it.
    fn take_place(&mut self, ctx: &mut ExecutionContext, place: &Place) -> Val {
        let slot = match place {
            Place::Var(slot) => ctx.vars.get_mut(slot),
            Place::Temp(slot) => ctx.temps.get_mut(slot),
            Place::Cell(h) => self.arena.get_mut(*h),
            Place::Prop(obj, name) => {
                let cell = match obj.borrow().get(name) {
                    Some(Val::Reference(h)) => Some(*h),
                    _ => None,
                };
                if let Some(h) = cell {
                    return self.take_cell(h);
                }
                return obj
                    .borrow_mut()
                    .properties
                    .get_mut(name)
                    .map(std::mem::take)
                    .unwrap_or_default();
            }
            Place::Dim(base, key) => {
                let mut container = self.take_place(ctx, base);
                let elem = match &mut container {
                    Val::Array(arr) => match key {
                        Some(key) => match Rc::make_mut(arr).map.get_mut(key) {
                            Some(Val::Reference(h)) => {
                                let h = *h;
                                self.take_cell(h)
                            }
                            Some(v) => std::mem::take(v),
                            None => Val::Null,
                        },
                        None => Val::Null,
                    },
                    Val::String(s) => match key {
                        Some(ArrayKey::Int(i)) => string_offset(s, *i),
                        _ => Val::Null,
                    },
                    _ => Val::Null,
                };
                // Writing back cannot fail: the container is unchanged in kind
                let _ = self.write_place(ctx, base, container);
                return elem;
            }
        };
        match slot {
            Some(Val::Reference(h)) => {
                let h = *h;
                self.take_cell(h)
            }
            Some(v) => std::mem::take(v),
            None => Val::Null,
        }
    }

    fn take_cell(&mut self, h: Handle) -> Val {
        self.arena.get_mut(h).map(std::mem::take).unwrap_or_default()
    }

    /// Store a value at a place, creating intermediate arrays as needed
    /// Reference: $PHP_SRC_PATH/Zend/zend_execute.c - zend_assign_to_variable, zend_fetch_dimension_address
    pub(crate) fn write_place(
        &mut self,
        ctx: &mut ExecutionContext,
        place: &Place,
        val: Val,
    ) -> Result<(), VmError> {
        let val = self.arena.deref(&val).clone();
        match place {
            Place::Var(slot) => {
                self.write_slot(ctx, *slot, val);
                Ok(())
            }
            Place::Temp(slot) => {
                ctx.temps.insert(*slot, val);
                Ok(())
            }
            Place::Cell(h) => {
                self.arena.set(*h, val);
                Ok(())
            }
            Place::Prop(obj, name) => {
                let existing = obj.borrow().get(name).cloned();
                match existing {
                    Some(Val::Reference(h)) => self.arena.set(h, val),
                    _ => obj.borrow_mut().set(name.clone(), val),
                }
                Ok(())
            }
            Place::Dim(base, key) => {
                let mut container = self.take_place(ctx, base);
                let result = self.store_element(&mut container, key.clone(), val);
                self.write_place(ctx, base, container)?;
                result
            }
        }
    }

    /// Set one element of a container in place
    fn store_element(
        &mut self,
        container: &mut Val,
        key: Option<ArrayKey>,
        val: Val,
    ) -> Result<(), VmError> {
        if container_autovivifies(container) {
            *container = Val::empty_array();
        }
        match container {
            Val::Array(arr) => {
                let data = Rc::make_mut(arr);
                match key {
                    Some(key) => match data.map.get(&key) {
                        Some(Val::Reference(h)) => {
                            let h = *h;
                            self.arena.set(h, val);
                        }
                        _ => {
                            data.insert(key, val);
                        }
                    },
                    None => data.push(val),
                }
                Ok(())
            }
            Val::String(s) => {
                let Some(ArrayKey::Int(offset)) = key else {
                    return Err(VmError::runtime("[] operator not supported for strings"));
                };
                let bytes = Rc::make_mut(s);
                let index = if offset < 0 {
                    let from_end = bytes.len() as i64 + offset;
                    if from_end < 0 {
                        return Err(VmError::runtime(format!(
                            "Illegal string offset {}",
                            offset
                        )));
                    }
                    from_end as usize
                } else {
                    offset as usize
                };
                if index >= bytes.len() {
                    bytes.resize(index + 1, b' ');
                }
                bytes[index] = val.to_php_string_bytes().first().copied().unwrap_or(b' ');
                Ok(())
            }
            Val::Object(obj) => Err(VmError::runtime(format!(
                "Cannot use object of type {} as array",
                obj.borrow().class
            ))),
            _ => Err(VmError::runtime("Cannot use a scalar value as an array")),
        }
    }

    /// Remove an element at a place; missing containers and keys are ignored
    pub(crate) fn unset_place_element(
        &mut self,
        ctx: &mut ExecutionContext,
        base: &Place,
        key: &ArrayKey,
    ) -> Result<(), VmError> {
        let current = self.read_place(ctx, base);
        match current {
            Val::Array(arr) if arr.get(key).is_some() => {
                let mut container = self.take_place(ctx, base);
                container.array_unset(key);
                self.write_place(ctx, base, container)
            }
            Val::String(_) => Err(VmError::runtime("Cannot unset string offsets")),
            _ => Ok(()),
        }
    }

    /// Turn the location into a shared reference cell and return its handle
    pub(crate) fn ref_place(
        &mut self,
        ctx: &mut ExecutionContext,
        place: &Place,
    ) -> Result<Handle, VmError> {
        match place {
            Place::Var(slot) => Ok(self.ref_var(ctx, *slot)),
            Place::Temp(slot) => {
                if let Some(Val::Reference(h)) = ctx.temps.get(slot) {
                    return Ok(*h);
                }
                let val = ctx.temps.remove(slot).unwrap_or_default();
                let h = self.arena.alloc(val);
                ctx.temps.insert(*slot, Val::Reference(h));
                Ok(h)
            }
            Place::Cell(h) => Ok(*h),
            Place::Prop(obj, name) => {
                let existing = obj.borrow().get(name).cloned();
                if let Some(Val::Reference(h)) = existing {
                    return Ok(h);
                }
                let h = self.arena.alloc(existing.unwrap_or_default());
                obj.borrow_mut().set(name.clone(), Val::Reference(h));
                Ok(h)
            }
            Place::Dim(base, key) => {
                let mut container = self.take_place(ctx, base);
                if container_autovivifies(&container) {
                    container = Val::empty_array();
                }
                let handle = match &mut container {
                    Val::Array(arr) => Some(self.element_ref(Rc::make_mut(arr), key.as_ref())),
                    _ => None,
                };
                self.write_place(ctx, base, container)?;
                handle.ok_or_else(|| {
                    VmError::runtime("Cannot create references to elements of a non-array")
                })
            }
        }
    }

    /// Reference cell for one array element, converting the element if needed
    fn element_ref(&mut self, data: &mut ArrayData, key: Option<&ArrayKey>) -> Handle {
        let Some(key) = key else {
            let h = self.arena.alloc(Val::Null);
            data.push(Val::Reference(h));
            return h;
        };
        if let Some(Val::Reference(h)) = data.get(key) {
            return *h;
        }
        let current = data.get(key).cloned().unwrap_or_default();
        let h = self.arena.alloc(current);
        data.insert(key.clone(), Val::Reference(h));
        h
    }

    /// Make a variable slot a reference (if it is not one already)
    pub(crate) fn ref_var(&mut self, ctx: &mut ExecutionContext, slot: u32) -> Handle {
        if let Some(Val::Reference(h)) = ctx.vars.get(&slot) {
            return *h;
        }
        let val = ctx.vars.remove(&slot).unwrap_or_default();
        let h = self.arena.alloc(val);
        ctx.vars.insert(slot, Val::Reference(h));
        h
    }

    /// Reference cell behind an operand; constants get a fresh cell
    pub(crate) fn make_ref(
        &mut self,
        ctx: &mut ExecutionContext,
        kind: OperandKind,
        raw: u32,
    ) -> Result<Handle, VmError> {
        match Self::place_of(ctx, kind, raw) {
            Some(place) => self.ref_place(ctx, &place),
            None => {
                let val = self.get(ctx, kind, raw);
                Ok(self.arena.alloc(val))
            }
        }
    }

    /// Rebind a target to an existing cell without writing through the old one
    pub(crate) fn bind_ref(
        &mut self,
        ctx: &mut ExecutionContext,
        kind: OperandKind,
        raw: u32,
        handle: Handle,
    ) -> Result<(), VmError> {
        match kind {
            OperandKind::Var | OperandKind::Cv => {
                ctx.vars.insert(raw, Val::Reference(handle));
                Ok(())
            }
            OperandKind::TmpVar => match ctx.places.get(&raw).cloned() {
                Some(place) => self.bind_place_ref(ctx, &place, handle),
                None => {
                    ctx.temps.insert(raw, Val::Reference(handle));
                    Ok(())
                }
            },
            OperandKind::Const | OperandKind::Unused => {
                Err(VmError::runtime("Cannot assign reference to a non-variable"))
            }
        }
    }

    pub(crate) fn bind_place_ref(
        &mut self,
        ctx: &mut ExecutionContext,
        place: &Place,
        handle: Handle,
    ) -> Result<(), VmError> {
        match place {
            Place::Var(slot) => {
                ctx.vars.insert(*slot, Val::Reference(handle));
                Ok(())
            }
            Place::Temp(slot) => {
                ctx.temps.insert(*slot, Val::Reference(handle));
                Ok(())
            }
            Place::Cell(_) => Err(VmError::runtime(
                "Cannot rebind a reference-backed static property",
            )),
            Place::Prop(obj, name) => {
                obj.borrow_mut().set(name.clone(), Val::Reference(handle));
                Ok(())
            }
            Place::Dim(base, key) => {
                let mut container = self.take_place(ctx, base);
                if container_autovivifies(&container) {
                    container = Val::empty_array();
                }
                let ok = container.array_set(key.clone(), Val::Reference(handle));
                self.write_place(ctx, base, container)?;
                if ok {
                    Ok(())
                } else {
                    Err(VmError::runtime("Cannot use a scalar value as an array"))
                }
            }
        }
    }

    /// Consume the OP_DATA instruction that follows the current one
    pub(crate) fn op_data(&self, ctx: &mut ExecutionContext) -> Result<Instruction, VmError> {
        match ctx.chunk.code.get(ctx.ip) {
            Some(data) if data.opcode == OpCode::OpData => {
                let data = *data;
                ctx.ip += 1;
                Ok(data)
            }
            _ => Err(VmError::runtime(format!(
                "Malformed bytecode: missing OP_DATA after instruction {}",
                ctx.opline
            ))),
        }
    }

    /// Value carried by an OP_DATA instruction's first operand
    pub(crate) fn op_data_value(&self, ctx: &mut ExecutionContext) -> Result<Val, VmError> {
        let data = self.op_data(ctx)?;
        Ok(self.get(ctx, data.op1_kind(), data.op1))
    }

    /// Redirect control to an absolute instruction index
    pub(crate) fn jump_to(&self, ctx: &mut ExecutionContext, target: u32) -> Result<(), VmError> {
        let target = target as usize;
        if target > ctx.chunk.code.len() {
            return Err(VmError::runtime(format!(
                "Jump target {} out of range in {}",
                target,
                ctx.function_name()
            )));
        }
        ctx.ip = target;
        Ok(())
    }

    /// Constant-pool string operand as UTF-8 text
    pub(crate) fn name_operand(&self, ctx: &ExecutionContext, kind: OperandKind, raw: u32) -> String {
        String::from_utf8_lossy(&self.get(ctx, kind, raw).to_php_string_bytes()).into_owned()
    }
}

/// Null, false and "" silently become arrays on first dimension write
fn container_autovivifies(val: &Val) -> bool {
    match val {
        Val::Null => true,
        Val::Bool(false) => true,
        Val::String(s) => s.is_empty(),
        _ => false,
    }
}

fn string_offset(s: &[u8], offset: i64) -> Val {
    let index = if offset < 0 {
        s.len() as i64 + offset
    } else {
        offset
    };
    if index < 0 {
        return Val::Null;
    }
    match s.get(index as usize) {
        Some(b) => Val::string(vec![*b]),
        None => Val::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::chunk::CodeChunk;

    fn ctx_with_constants(constants: Vec<Val>) -> ExecutionContext {
        let chunk = CodeChunk {
            constants,
            ..Default::default()
        };
        ExecutionContext::new(Rc::new(chunk))
    }

    #[test]
    fn test_absent_operands_read_as_null() {
        let vm = VM::default();
        let ctx = ctx_with_constants(vec![Val::Int(1)]);
        assert_eq!(vm.get(&ctx, OperandKind::Const, 5), Val::Null);
        assert_eq!(vm.get(&ctx, OperandKind::TmpVar, 3), Val::Null);
        assert_eq!(vm.get(&ctx, OperandKind::Cv, 0), Val::Null);
        assert_eq!(vm.get(&ctx, OperandKind::Const, 0), Val::Int(1));
    }

    #[test]
    fn test_write_through_reference_updates_alias() {
        let mut vm = VM::default();
        let mut ctx = ctx_with_constants(vec![]);
        vm.set(&mut ctx, OperandKind::Cv, 0, Val::Int(1)).unwrap();
        let h = vm.ref_var(&mut ctx, 0);
        vm.bind_ref(&mut ctx, OperandKind::Cv, 1, h).unwrap();

        vm.set(&mut ctx, OperandKind::Cv, 1, Val::Int(9)).unwrap();
        assert_eq!(vm.get(&ctx, OperandKind::Cv, 0), Val::Int(9));
        assert!(matches!(ctx.vars.get(&0), Some(Val::Reference(_))));
    }

    #[test]
    fn test_constant_writes_are_ignored() {
        let mut vm = VM::default();
        let mut ctx = ctx_with_constants(vec![Val::Int(1)]);
        vm.set(&mut ctx, OperandKind::Const, 0, Val::Int(2)).unwrap();
        assert_eq!(vm.get(&ctx, OperandKind::Const, 0), Val::Int(1));
    }

    #[test]
    fn test_nested_dim_place_autovivifies() {
        let mut vm = VM::default();
        let mut ctx = ctx_with_constants(vec![]);
        let place = Place::Dim(
            Box::new(Place::Dim(
                Box::new(Place::Var(0)),
                Some(ArrayKey::from_bytes(b"a")),
            )),
            None,
        );
        vm.write_place(&mut ctx, &place, Val::Int(5)).unwrap();
        vm.write_place(&mut ctx, &place, Val::Int(6)).unwrap();

        let root = vm.get(&ctx, OperandKind::Cv, 0);
        let inner = root.array_get(&ArrayKey::from_bytes(b"a")).cloned().unwrap();
        assert_eq!(inner.array_count(), 2);
        assert_eq!(inner.array_get(&ArrayKey::Int(1)), Some(&Val::Int(6)));
    }

    #[test]
    fn test_scalar_container_write_fails_and_preserves_value() {
        let mut vm = VM::default();
        let mut ctx = ctx_with_constants(vec![]);
        vm.set(&mut ctx, OperandKind::Cv, 0, Val::Int(3)).unwrap();
        let place = Place::Dim(Box::new(Place::Var(0)), Some(ArrayKey::Int(0)));
        assert!(vm.write_place(&mut ctx, &place, Val::Int(1)).is_err());
        assert_eq!(vm.get(&ctx, OperandKind::Cv, 0), Val::Int(3));
    }

    #[test]
    fn test_element_reference_is_shared() {
        let mut vm = VM::default();
        let mut ctx = ctx_with_constants(vec![]);
        let arr = ArrayData::from(vec![Val::Int(1), Val::Int(2)]);
        vm.set(&mut ctx, OperandKind::Cv, 0, Val::Array(Rc::new(arr))).unwrap();

        let place = Place::Dim(Box::new(Place::Var(0)), Some(ArrayKey::Int(1)));
        let h = vm.ref_place(&mut ctx, &place).unwrap();
        vm.arena.set(h, Val::Int(20));

        assert_eq!(vm.read_place(&ctx, &place), Val::Int(20));
    }
}
