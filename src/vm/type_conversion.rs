//! PHP type juggling and conversion
//!
//! Scalar coercions live on [`Val`]; this module adds the conversions that
//! need the VM: `__toString` dispatch, object/array casts and the CAST opcode.
//!
//! ### To String
//! - Integers/floats: standard representation
//! - true → "1", false → ""
//! - null → ""
//! - Arrays → "Array" (with warning)
//! - Objects → __toString() or error
//!
//! ### To Array
//! - null → `[]`
//! - scalars → `[0 => value]`
//! - objects → their properties keyed by name
//!
//! ## References
//!
//! - Zend: `$PHP_SRC_PATH/Zend/zend_operators.c` - conversion functions
//! - PHP Manual: https://www.php.net/manual/en/language.types.type-juggling.php

use crate::core::value::{ArrayData, ArrayKey, ObjectData, Val};
use crate::vm::engine::{ErrorLevel, VM, VmError};
use crate::vm::frame::{ArgList, ExecutionContext};
use crate::vm::opcode::{CastKind, Instruction};
use std::cell::RefCell;
use std::rc::Rc;

impl VM {
    /// Convert value to string with full error handling
    /// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - _zval_get_string_func
    pub(crate) fn to_string_bytes(&mut self, val: &Val) -> Result<Vec<u8>, VmError> {
        match val {
            Val::Object(obj) => {
                let class = obj.borrow().class.clone();
                if self.classes.has_method(&class, "__toString") {
                    let result = self.call_method(obj, "__toString", ArgList::new())?;
                    let result = self.arena.deref(&result).clone();
                    match result {
                        Val::String(s) => Ok(s.to_vec()),
                        other => Err(VmError::runtime(format!(
                            "{}::__toString(): Return value must be of type string, {} returned",
                            class,
                            other.type_name()
                        ))),
                    }
                } else {
                    Err(VmError::runtime(format!(
                        "Object of class {} could not be converted to string",
                        class
                    )))
                }
            }
            Val::Array(_) => {
                self.report_error(ErrorLevel::Warning, "Array to string conversion");
                Ok(b"Array".to_vec())
            }
            Val::Reference(_) => {
                let inner = self.arena.deref(val).clone();
                self.to_string_bytes(&inner)
            }
            other => Ok(other.to_php_string_bytes()),
        }
    }

    /// `(array)` cast
    /// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - convert_to_array
    pub(crate) fn to_array_value(&self, val: &Val) -> Val {
        match val {
            Val::Null => Val::empty_array(),
            Val::Array(_) => val.clone(),
            Val::Object(obj) => {
                let obj = obj.borrow();
                let mut data = ArrayData::with_capacity(obj.properties.len());
                for (name, value) in &obj.properties {
                    let value = self.arena.deref(value).clone();
                    data.insert(ArrayKey::from_bytes(name.as_bytes()), value);
                }
                Val::Array(Rc::new(data))
            }
            Val::Reference(_) => self.to_array_value(self.arena.deref(val)),
            other => Val::Array(Rc::new(ArrayData::from(vec![other.clone()]))),
        }
    }

    /// `(object)` cast
    /// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - convert_to_object
    pub(crate) fn to_object_value(&self, val: &Val) -> Val {
        match val {
            Val::Object(_) | Val::Closure(_) => val.clone(),
            Val::Reference(_) => self.to_object_value(self.arena.deref(val)),
            other => {
                let mut obj = ObjectData::new(Rc::from("stdClass"));
                match other {
                    Val::Null => {}
                    Val::Array(arr) => {
                        for (key, value) in arr.map.iter() {
                            let name: Rc<str> = Rc::from(key.to_display());
                            obj.set(name, self.arena.deref(value).clone());
                        }
                    }
                    scalar => obj.set(Rc::from("scalar"), scalar.clone()),
                }
                Val::Object(Rc::new(RefCell::new(obj)))
            }
        }
    }

    /// Convert a value for a CAST instruction
    pub(crate) fn cast_value(&mut self, val: &Val, kind: CastKind) -> Result<Val, VmError> {
        Ok(match kind {
            CastKind::Int => Val::Int(val.to_int()),
            CastKind::Bool => Val::Bool(val.to_bool()),
            CastKind::Float => Val::Float(val.to_float()),
            CastKind::String => Val::string(self.to_string_bytes(val)?),
            CastKind::Array => self.to_array_value(val),
            CastKind::Object => self.to_object_value(val),
            CastKind::Unset => Val::Null,
        })
    }

    /// ZEND_CAST: `extended` selects the target type
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_CAST
    pub(crate) fn exec_cast(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let kind = CastKind::from_u8(inst.extended).ok_or_else(|| {
            VmError::runtime(format!("Invalid cast kind {}", inst.extended))
        })?;
        let val = self.op1(ctx, &inst);
        let result = self.cast_value(&val, kind)?;
        self.set_result(ctx, &inst, result)
    }
}
