//! Array operations
//!
//! Implements PHP array manipulation operations following Zend semantics.
//!
//! ## PHP Semantics
//!
//! PHP arrays are ordered hash maps supporting both integer and string keys:
//! - Automatic integer key assignment for append operations
//! - Canonical numeric string keys ("0", "123") are stored as integers
//! - Elements may be reference cells shared with variables
//! - Copy-on-write for value assignments
//!
//! ## Operations
//!
//! - **InitArray / AddArrayElement / AddArrayUnpack**: array literals
//! - **FetchDimR / FetchDimIs**: `$arr[$key]` for reading
//! - **FetchDimW**: `$arr[$key]` as the container of a nested write
//! - **AssignDim / AssignDimOp**: `$arr[$key] = $val`, `$arr[] = $val`, `$arr[$key] op= $val`
//! - **UnsetDim / IssetIsemptyDimObj**: `unset($arr[$key])`, `isset(...)`, `empty(...)`
//! - **InArray / ArrayKeyExists**: specialised `in_array` / `array_key_exists`
//!
//! ## ArrayAccess
//!
//! Objects whose class defines `offsetGet` and friends are indexed through
//! those methods; any other object used as an array is an Error.
//!
//! ## References
//!
//! - Zend: `$PHP_SRC_PATH/Zend/zend_vm_def.h` - ZEND_ASSIGN_DIM, ZEND_FETCH_DIM_*
//! - Zend: `$PHP_SRC_PATH/Zend/zend_execute.c` - zend_fetch_dimension_address_inner

use crate::core::value::{ArrayData, ArrayKey, ObjectRef, Val};
use crate::vm::engine::{ErrorLevel, VM, VmError};
use crate::vm::frame::{ExecutionContext, Place};
use crate::vm::generator::generator_of;
use crate::vm::opcode::{ADD_BY_REF, IN_ARRAY_STRICT, ISEMPTY, Instruction, OperandKind};
use crate::vm::opcodes::comparison::{loose_equals, strict_equals};
use crate::vm::variable_ops::binary_op_of;
use smallvec::smallvec;
use std::rc::Rc;

impl VM {
    /// INIT_ARRAY: result = new array, optionally seeded with op1 under key op2
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_INIT_ARRAY
    pub(crate) fn exec_init_array(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let mut data = ArrayData::new();
        if inst.op1_kind() != OperandKind::Unused {
            self.add_element(ctx, &inst, &mut data)?;
        }
        self.set_result(ctx, &inst, Val::Array(Rc::new(data)))
    }

    /// ADD_ARRAY_ELEMENT: result = array being built, op1 = value, op2 = key
    pub(crate) fn exec_add_array_element(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let mut array = self.take_literal(ctx, &inst);
        self.add_element(ctx, &inst, Rc::make_mut(&mut array))?;
        self.set_result(ctx, &inst, Val::Array(array))
    }

    /// ADD_ARRAY_UNPACK: `[...$iterable]`. Integer keys are renumbered,
    /// string keys overwrite.
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_ADD_ARRAY_UNPACK
    pub(crate) fn exec_add_array_unpack(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let source = self.op1(ctx, &inst);
        let entries = self.unpack_entries(&source)?;
        let mut array = self.take_literal(ctx, &inst);
        let data = Rc::make_mut(&mut array);
        for (key, value) in entries {
            match key {
                Val::String(s) => {
                    data.insert(ArrayKey::from_bytes(&s), value);
                }
                _ => data.push(value),
            }
        }
        self.set_result(ctx, &inst, Val::Array(array))
    }

    /// Key/value pairs of an array or generator being spread
    pub(crate) fn unpack_entries(&mut self, source: &Val) -> Result<Vec<(Val, Val)>, VmError> {
        match source {
            Val::Array(arr) => Ok(arr
                .map
                .iter()
                .map(|(k, v)| (k.to_val(), self.arena.deref(v).clone()))
                .collect()),
            Val::Object(_) => match generator_of(source) {
                Some(generator) => self.collect_generator(&generator),
                None => Err(self.throw_error("Error", "Only arrays and Traversables can be unpacked")),
            },
            _ => Err(self.throw_error("Error", "Only arrays and Traversables can be unpacked")),
        }
    }

    /// The array literal under construction in the result temporary
    fn take_literal(&mut self, ctx: &mut ExecutionContext, inst: &Instruction) -> Rc<ArrayData> {
        match ctx.temps.remove(&inst.result) {
            Some(Val::Array(arr)) => arr,
            _ => Rc::new(ArrayData::new()),
        }
    }

    fn add_element(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: &Instruction,
        data: &mut ArrayData,
    ) -> Result<(), VmError> {
        let value = if inst.extended & ADD_BY_REF != 0 {
            Val::Reference(self.make_ref(ctx, inst.op1_kind(), inst.op1)?)
        } else {
            self.op1(ctx, inst)
        };
        if inst.op2_kind() == OperandKind::Unused {
            data.push(value);
        } else {
            let key = self.op2(ctx, inst);
            let key = self.dim_key(&key, "array")?;
            data.insert(key, value);
        }
        Ok(())
    }

    /// Offset value as an array key
    /// Reference: $PHP_SRC_PATH/Zend/zend_execute.c - zend_illegal_array_offset
    pub(crate) fn dim_key(&mut self, dim: &Val, container: &str) -> Result<ArrayKey, VmError> {
        if let Val::Float(f) = dim {
            if f.fract() != 0.0 && f.is_finite() {
                self.report_error(
                    ErrorLevel::Deprecated,
                    &format!(
                        "Implicit conversion from float {} to int loses precision",
                        crate::core::value::format_float(*f)
                    ),
                );
            }
        }
        match dim.to_array_key() {
            Some(key) => Ok(key),
            None => Err(self.throw_error(
                "TypeError",
                &format!(
                    "Cannot access offset of type {} on {}",
                    dim.type_name(),
                    container
                ),
            )),
        }
    }

    /// FETCH_DIM_R / FETCH_DIM_IS / FETCH_LIST_R: op1 = container, op2 = offset
    /// Reference: $PHP_SRC_PATH/Zend/zend_execute.c - zend_fetch_dimension_address_read_R
    pub(crate) fn exec_fetch_dim_r(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
        quiet: bool,
    ) -> Result<(), VmError> {
        if inst.op2_kind() == OperandKind::Unused {
            return Err(self.throw_error("Error", "Cannot use [] for reading"));
        }
        let container = self.op1(ctx, &inst);
        let dim = self.op2(ctx, &inst);
        let value = self.read_dim(&container, &dim, quiet)?;
        self.set_result(ctx, &inst, value)
    }

    fn read_dim(&mut self, container: &Val, dim: &Val, quiet: bool) -> Result<Val, VmError> {
        match container {
            Val::Array(arr) => {
                let key = self.dim_key(dim, "array")?;
                match arr.get(&key) {
                    Some(v) => Ok(self.arena.deref(v).clone()),
                    None => {
                        if !quiet {
                            let shown = match &key {
                                ArrayKey::Int(i) => i.to_string(),
                                ArrayKey::Str(s) => format!("\"{}\"", String::from_utf8_lossy(s)),
                            };
                            self.report_error(
                                ErrorLevel::Warning,
                                &format!("Undefined array key {}", shown),
                            );
                        }
                        Ok(Val::Null)
                    }
                }
            }
            Val::String(s) => {
                let offset = match dim {
                    Val::Int(i) => *i,
                    Val::String(d) if ArrayKey::from_bytes(d) != ArrayKey::Str(d.clone()) => {
                        dim.to_int()
                    }
                    _ if quiet => return Ok(Val::Null),
                    other => {
                        return Err(self.throw_error(
                            "TypeError",
                            &format!("Cannot access offset of type {} on string", other.type_name()),
                        ));
                    }
                };
                let len = s.len() as i64;
                let index = if offset < 0 { len + offset } else { offset };
                match usize::try_from(index).ok().and_then(|i| s.get(i)) {
                    Some(b) => Ok(Val::string(vec![*b])),
                    None => {
                        if !quiet {
                            self.report_error(
                                ErrorLevel::Warning,
                                &format!("Uninitialized string offset {}", offset),
                            );
                        }
                        Ok(Val::Null)
                    }
                }
            }
            Val::Object(obj) => {
                if let Some(obj) = self.array_access(obj) {
                    if quiet {
                        let exists = self.call_method(&obj, "offsetExists", smallvec![dim.clone()])?;
                        if !self.arena.deref(&exists).to_bool() {
                            return Ok(Val::Null);
                        }
                    }
                    let value = self.call_method(&obj, "offsetGet", smallvec![dim.clone()])?;
                    return Ok(self.arena.deref(&value).clone());
                }
                let class = obj.borrow().class.clone();
                Err(self.throw_error(
                    "Error",
                    &format!("Cannot use object of type {} as array", class),
                ))
            }
            other => {
                if !quiet {
                    self.report_error(
                        ErrorLevel::Warning,
                        &format!(
                            "Trying to access array offset on value of type {}",
                            other.type_name()
                        ),
                    );
                }
                Ok(Val::Null)
            }
        }
    }

    /// The object if its class implements ArrayAccess-style offset methods
    fn array_access(&self, obj: &ObjectRef) -> Option<ObjectRef> {
        let class = obj.borrow().class.clone();
        self.classes
            .has_method(&class, "offsetGet")
            .then(|| obj.clone())
    }

    /// Place for `container[dim]`; an unused op2 appends
    fn dim_place(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: &Instruction,
    ) -> Result<Place, VmError> {
        let Some(base) = Self::place_of(ctx, inst.op1_kind(), inst.op1) else {
            return Err(VmError::runtime("Cannot use temporary expression in write context"));
        };
        let key = if inst.op2_kind() == OperandKind::Unused {
            None
        } else {
            let dim = self.op2(ctx, inst);
            Some(self.dim_key(&dim, "array")?)
        };
        Ok(Place::Dim(Box::new(base), key))
    }

    /// FETCH_DIM_W / FETCH_DIM_RW / FETCH_DIM_UNSET / FETCH_DIM_FUNC_ARG:
    /// the result temporary stands for the element location
    /// Reference: $PHP_SRC_PATH/Zend/zend_execute.c - zend_fetch_dimension_address_W
    pub(crate) fn exec_fetch_dim_w(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let place = self.dim_place(ctx, &inst)?;
        self.set_result_place(ctx, &inst, place)
    }

    /// ASSIGN_DIM: op1 = container, op2 = offset (unused appends), OP_DATA op1 = value
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_ASSIGN_DIM
    pub(crate) fn exec_assign_dim(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let value = self.op_data_value(ctx)?;
        if let Val::Object(obj) = self.op1(ctx, &inst) {
            return self.assign_offset_object(ctx, &inst, &obj, value);
        }
        let place = self.dim_place(ctx, &inst)?;
        if let (Val::String(_), Place::Dim(_, None)) = (self.op1(ctx, &inst), &place) {
            return Err(self.throw_error("Error", "[] operator not supported for strings"));
        }
        self.write_place(ctx, &place, value.clone())?;
        self.set_result(ctx, &inst, value)
    }

    fn assign_offset_object(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: &Instruction,
        obj: &ObjectRef,
        value: Val,
    ) -> Result<(), VmError> {
        let Some(obj) = self.array_access(obj) else {
            let class = obj.borrow().class.clone();
            return Err(self.throw_error(
                "Error",
                &format!("Cannot use object of type {} as array", class),
            ));
        };
        let offset = self.op2(ctx, inst);
        self.call_method(&obj, "offsetSet", smallvec![offset, value.clone()])?;
        self.set_result(ctx, inst, value)
    }

    /// ASSIGN_DIM_OP: `$a[k] op= v`, operator in `extended`
    pub(crate) fn exec_assign_dim_op(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let op = binary_op_of(&inst)?;
        let rhs = self.op_data_value(ctx)?;
        let place = self.dim_place(ctx, &inst)?;
        let current = self.read_place(ctx, &place);
        let result = self.binary_op(op, &current, &rhs)?;
        self.write_place(ctx, &place, result.clone())?;
        self.set_result(ctx, &inst, result)
    }

    /// UNSET_DIM: op1 = container, op2 = offset
    pub(crate) fn exec_unset_dim(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let dim = self.op2(ctx, &inst);
        if let Val::Object(obj) = self.op1(ctx, &inst) {
            if let Some(obj) = self.array_access(&obj) {
                self.call_method(&obj, "offsetUnset", smallvec![dim])?;
                return Ok(());
            }
            let class = obj.borrow().class.clone();
            return Err(self.throw_error(
                "Error",
                &format!("Cannot use object of type {} as array", class),
            ));
        }
        let Some(base) = Self::place_of(ctx, inst.op1_kind(), inst.op1) else {
            return Ok(());
        };
        let key = self.dim_key(&dim, "array")?;
        self.unset_place_element(ctx, &base, &key)
    }

    /// ISSET_ISEMPTY_DIM_OBJ: op1 = container, op2 = offset, `extended` = ISSET/ISEMPTY
    /// Reference: $PHP_SRC_PATH/Zend/zend_execute.c - zend_isset_dim_slow
    pub(crate) fn exec_isset_isempty_dim(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let container = self.op1(ctx, &inst);
        let dim = self.op2(ctx, &inst);
        let empty_check = inst.extended == ISEMPTY;
        let value = match &container {
            Val::Object(obj) if self.array_access(obj).is_some() => {
                let exists = self.call_method(obj, "offsetExists", smallvec![dim.clone()])?;
                let exists = self.arena.deref(&exists).to_bool();
                if exists && empty_check {
                    let v = self.call_method(obj, "offsetGet", smallvec![dim])?;
                    Some(self.arena.deref(&v).clone())
                } else if exists {
                    Some(Val::Bool(true))
                } else {
                    None
                }
            }
            Val::Array(_) | Val::String(_) => match dim.to_array_key() {
                Some(_) => Some(self.read_dim(&container, &dim, true)?),
                None => None,
            },
            _ => None,
        };
        let result = match value {
            Some(v) if empty_check => !v.to_bool(),
            Some(v) => !v.is_null(),
            None => empty_check,
        };
        self.set_result(ctx, &inst, Val::Bool(result))
    }

    /// IN_ARRAY: op1 = needle, op2 = haystack, `extended` = strict flag
    pub(crate) fn exec_in_array(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let needle = self.op1(ctx, &inst);
        let haystack = self.op2(ctx, &inst);
        let strict = inst.extended & IN_ARRAY_STRICT != 0;
        let found = match &haystack {
            Val::Array(arr) => arr.map.values().any(|v| {
                if strict {
                    strict_equals(&self.arena, v, &needle)
                } else {
                    loose_equals(&self.arena, v, &needle)
                }
            }),
            other => {
                return Err(self.throw_error(
                    "TypeError",
                    &format!(
                        "in_array(): Argument #2 ($haystack) must be of type array, {} given",
                        other.type_name()
                    ),
                ));
            }
        };
        self.set_result(ctx, &inst, Val::Bool(found))
    }

    /// ARRAY_KEY_EXISTS: op1 = key, op2 = array
    pub(crate) fn exec_array_key_exists(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let key = self.op1(ctx, &inst);
        let subject = self.op2(ctx, &inst);
        let Val::Array(arr) = &subject else {
            return Err(self.throw_error(
                "TypeError",
                &format!(
                    "array_key_exists(): Argument #2 ($array) must be of type array, {} given",
                    subject.type_name()
                ),
            ));
        };
        let key = self.dim_key(&key, "array")?;
        self.set_result(ctx, &inst, Val::Bool(arr.get(&key).is_some()))
    }
}
