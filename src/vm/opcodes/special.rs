//! Special language constructs
//!
//! Implements PHP-specific language constructs that don't fit other categories.
//!
//! ## Operations
//!
//! - **Echo**: Output a value through the VM's output writer
//! - **Exit**: Stop the whole VM; an int argument is the exit status, a
//!   string argument is printed first
//! - **RopeInit / RopeAdd / RopeEnd**: interpolated strings built in one buffer
//! - **DeclareConst / FetchConstant**: global constants
//! - **Strlen, Count, GetClass, GetCalledClass, GetType, Instanceof,
//!   FuncNumArgs, FuncGetArgs**: specialised builtins compiled to opcodes
//! - **IncludeOrEval**: include/require/eval, see [`crate::runtime::include`]
//!
//! ## String Conversion
//!
//! Values are converted to strings following PHP rules:
//! - Integers/floats: standard string representation
//! - Booleans: "1" for true, "" for false
//! - null: ""
//! - Arrays: "Array" (with warning)
//! - Objects: __toString() method or Error
//!
//! ## References
//!
//! - Zend: `$PHP_SRC_PATH/Zend/zend_vm_def.h` - ZEND_ECHO, ZEND_EXIT, ZEND_ROPE_*
//! - Zend: `$PHP_SRC_PATH/Zend/zend_constants.c` - zend_get_constant_ex

use crate::core::value::{ArrayData, Val};
use crate::vm::engine::{ErrorLevel, VM, VmError};
use crate::vm::frame::ExecutionContext;
use crate::vm::opcode::{IncludeKind, Instruction, OperandKind};
use smallvec::smallvec;
use std::rc::Rc;

impl VM {
    /// ZEND_ECHO
    pub(crate) fn exec_echo(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let val = self.op1(ctx, &inst);
        let bytes = self.to_string_bytes(&val)?;
        self.echo(&bytes)
    }

    /// ZEND_EXIT: halts every activation, not just the current one
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_EXIT
    pub(crate) fn exec_exit(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let status = match self.op1(ctx, &inst) {
            Val::Int(code) => i32::try_from(code).unwrap_or(255),
            Val::Null => 0,
            other => {
                let bytes = self.to_string_bytes(&other)?;
                self.echo(&bytes)?;
                0
            }
        };
        tracing::debug!(status, function = ctx.function_name(), "exit");
        self.exit_status = Some(status);
        ctx.halted = true;
        Ok(())
    }

    /// ROPE_INIT: result = buffer id, op2 = first part
    pub(crate) fn exec_rope_init(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let part = self.op2(ctx, &inst);
        let bytes = self.to_string_bytes(&part)?;
        ctx.ropes.insert(inst.result, bytes);
        Ok(())
    }

    /// ROPE_ADD: op1 = buffer id, op2 = next part
    pub(crate) fn exec_rope_add(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let part = self.op2(ctx, &inst);
        let bytes = self.to_string_bytes(&part)?;
        let mut rope = ctx.ropes.remove(&inst.op1).unwrap_or_default();
        rope.extend_from_slice(&bytes);
        ctx.ropes.insert(inst.result, rope);
        Ok(())
    }

    /// ROPE_END: op1 = buffer id, op2 = last part, result = the string
    pub(crate) fn exec_rope_end(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let part = self.op2(ctx, &inst);
        let bytes = self.to_string_bytes(&part)?;
        let mut rope = ctx.ropes.remove(&inst.op1).unwrap_or_default();
        rope.extend_from_slice(&bytes);
        self.set_result(ctx, &inst, Val::string(rope))
    }

    /// DECLARE_CONST: op1 = name, op2 = value
    pub(crate) fn exec_declare_const(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let name = self.name_operand(ctx, inst.op1_kind(), inst.op1);
        let value = self.op2(ctx, &inst);
        self.define_constant(&name, value);
        Ok(())
    }

    /// Define a global constant; redefinition warns and keeps the first value
    pub(crate) fn define_constant(&mut self, name: &str, value: Val) -> bool {
        if self.constants.contains_key(name) || core_constant(name).is_some() {
            self.report_error(
                ErrorLevel::Warning,
                &format!("Constant {} already defined", name),
            );
            return false;
        }
        self.constants.insert(name.to_string(), value);
        true
    }

    /// FETCH_CONSTANT: op2 = name. A namespaced name that is not defined
    /// falls back to the global constant of the same short name.
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_FETCH_CONSTANT
    pub(crate) fn exec_fetch_constant(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let name = self.name_operand(ctx, inst.op2_kind(), inst.op2);
        let value = match self.lookup_constant(&name) {
            Some(v) => v,
            None => {
                return Err(self.throw_error("Error", &format!("Undefined constant \"{}\"", name)));
            }
        };
        self.set_result(ctx, &inst, value)
    }

    pub(crate) fn lookup_constant(&self, name: &str) -> Option<Val> {
        let name = name.strip_prefix('\\').unwrap_or(name);
        if let Some(v) = self.constants.get(name) {
            return Some(v.clone());
        }
        if let Some(v) = core_constant(name) {
            return Some(v);
        }
        let short = name.rsplit('\\').next()?;
        if short.len() == name.len() {
            return None;
        }
        self.constants.get(short).cloned().or_else(|| core_constant(short))
    }

    /// ZEND_STRLEN
    pub(crate) fn exec_strlen(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let val = self.op1(ctx, &inst);
        let len = match &val {
            Val::String(s) => s.len(),
            Val::Null => {
                self.report_error(
                    ErrorLevel::Deprecated,
                    "strlen(): Passing null to parameter #1 ($string) of type string is deprecated",
                );
                0
            }
            Val::Array(_) | Val::Object(_) | Val::Closure(_) => {
                return Err(self.throw_error(
                    "TypeError",
                    &format!(
                        "strlen(): Argument #1 ($string) must be of type string, {} given",
                        val.type_name()
                    ),
                ));
            }
            other => other.to_php_string_bytes().len(),
        };
        self.set_result(ctx, &inst, Val::Int(len as i64))
    }

    /// ZEND_COUNT: arrays count elements, strings their bytes, Countable
    /// objects answer through `count()`, anything else counts as 0
    pub(crate) fn exec_count(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let val = self.op1(ctx, &inst);
        let count = self.count_value(&val)?;
        self.set_result(ctx, &inst, Val::Int(count))
    }

    pub(crate) fn count_value(&mut self, val: &Val) -> Result<i64, VmError> {
        Ok(match val {
            Val::Array(arr) => arr.len() as i64,
            Val::String(s) => s.len() as i64,
            Val::Object(obj) => {
                let class = obj.borrow().class.clone();
                if self.classes.has_method(&class, "count") {
                    let n = self.call_method(obj, "count", smallvec![])?;
                    self.arena.deref(&n).to_int()
                } else {
                    0
                }
            }
            _ => 0,
        })
    }

    /// ZEND_GET_CLASS: op1 unused means the current class scope
    pub(crate) fn exec_get_class(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let name = if inst.op1_kind() == OperandKind::Unused {
            match &ctx.class_scope {
                Some(scope) => scope.clone(),
                None => {
                    return Err(self.throw_error(
                        "Error",
                        "get_class() without arguments must be called from within a class",
                    ));
                }
            }
        } else {
            match self.op1(ctx, &inst) {
                Val::Object(obj) => obj.borrow().class.clone(),
                Val::Closure(_) => Rc::from("Closure"),
                other => {
                    return Err(self.throw_error(
                        "TypeError",
                        &format!(
                            "get_class(): Argument #1 ($object) must be of type object, {} given",
                            other.type_name()
                        ),
                    ));
                }
            }
        };
        self.set_result(ctx, &inst, Val::string(name.as_bytes()))
    }

    /// ZEND_GET_CALLED_CLASS: the late static binding class
    pub(crate) fn exec_get_called_class(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let Some(called) = ctx.called_scope.clone().or_else(|| ctx.class_scope.clone()) else {
            return Err(self.throw_error(
                "Error",
                "get_called_class() must be called from within a class",
            ));
        };
        self.set_result(ctx, &inst, Val::string(called.as_bytes()))
    }

    /// ZEND_GET_TYPE: gettype() spelling
    pub(crate) fn exec_get_type(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let val = self.op1(ctx, &inst);
        self.set_result(ctx, &inst, Val::string(val.gettype_name()))
    }

    /// ZEND_INSTANCEOF: op1 = value, op2 = class name (self/parent/static allowed)
    /// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - instanceof_function
    pub(crate) fn exec_instanceof(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let val = self.op1(ctx, &inst);
        let target = match self.op2(ctx, &inst) {
            Val::Object(obj) => obj.borrow().class.clone(),
            other => {
                let name = String::from_utf8_lossy(&other.to_php_string_bytes()).into_owned();
                self.resolve_class_name(ctx, &name)?
            }
        };
        let result = match &val {
            Val::Object(obj) => {
                let class = obj.borrow().class.clone();
                self.classes.is_subclass_of(&class, &target)
            }
            Val::Closure(_) => target.eq_ignore_ascii_case("Closure"),
            _ => false,
        };
        self.set_result(ctx, &inst, Val::Bool(result))
    }

    /// ZEND_FUNC_NUM_ARGS
    pub(crate) fn exec_func_num_args(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        if ctx.func.is_none() {
            return Err(self.throw_error(
                "Error",
                "func_num_args() must be called from a function context",
            ));
        }
        let count = ctx.args.len() as i64;
        self.set_result(ctx, &inst, Val::Int(count))
    }

    /// ZEND_FUNC_GET_ARGS: op1 raw = number of leading arguments to skip
    pub(crate) fn exec_func_get_args(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        if ctx.func.is_none() {
            return Err(self.throw_error(
                "Error",
                "func_get_args() cannot be called from the global scope",
            ));
        }
        let skip = if inst.op1_kind() == OperandKind::Unused {
            inst.op1 as usize
        } else {
            0
        };
        let values: Vec<Val> = ctx
            .args
            .iter()
            .skip(skip)
            .map(|v| self.arena.deref(v).clone())
            .collect();
        self.set_result(ctx, &inst, Val::Array(Rc::new(ArrayData::from(values))))
    }

    /// INCLUDE_OR_EVAL: op1 = path or code, `extended` = kind
    pub(crate) fn exec_include_or_eval(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let kind = IncludeKind::from_u8(inst.extended).ok_or_else(|| {
            VmError::runtime(format!("Invalid include kind {}", inst.extended))
        })?;
        let operand = self.op1(ctx, &inst);
        let result = self.include_or_eval(ctx, kind, &operand)?;
        self.set_result(ctx, &inst, result)
    }
}

/// Predefined constants the engine answers without a registry
/// Reference: $PHP_SRC_PATH/main/main.c - php_register_internal_constants
fn core_constant(name: &str) -> Option<Val> {
    Some(match name {
        "PHP_EOL" => Val::string("\n"),
        "PHP_INT_MAX" => Val::Int(i64::MAX),
        "PHP_INT_MIN" => Val::Int(i64::MIN),
        "PHP_INT_SIZE" => Val::Int(8),
        "PHP_FLOAT_EPSILON" => Val::Float(f64::EPSILON),
        "PHP_FLOAT_MAX" => Val::Float(f64::MAX),
        "PHP_VERSION" => Val::string("8.3.0"),
        "PHP_OS" => Val::string(std::env::consts::OS),
        "NAN" => Val::Float(f64::NAN),
        "INF" => Val::Float(f64::INFINITY),
        "M_PI" => Val::Float(std::f64::consts::PI),
        "E_ERROR" => Val::Int(ErrorLevel::Error.to_bitmask() as i64),
        "E_WARNING" => Val::Int(ErrorLevel::Warning.to_bitmask() as i64),
        "E_NOTICE" => Val::Int(ErrorLevel::Notice.to_bitmask() as i64),
        "E_DEPRECATED" => Val::Int(ErrorLevel::Deprecated.to_bitmask() as i64),
        "E_ALL" => Val::Int(32767),
        _ => match name.to_ascii_lowercase().as_str() {
            "true" => Val::Bool(true),
            "false" => Val::Bool(false),
            "null" => Val::Null,
            _ => return None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::chunk::CodeChunk;
    use crate::vm::engine::CapturingOutputWriter;
    use crate::vm::opcode::{OpCode, Operand};
    use std::cell::RefCell;

    fn capturing_vm() -> (VM, Rc<RefCell<Vec<u8>>>) {
        let buffer = Rc::new(RefCell::new(Vec::new()));
        let sink = buffer.clone();
        let vm = VM::default().with_output(Box::new(CapturingOutputWriter::new(
            move |bytes: &[u8]| sink.borrow_mut().extend_from_slice(bytes),
        )));
        (vm, buffer)
    }

    fn ctx(constants: Vec<Val>) -> ExecutionContext {
        ExecutionContext::new(Rc::new(CodeChunk {
            constants,
            ..Default::default()
        }))
    }

    #[test]
    fn test_echo_scalars() {
        let (mut vm, out) = capturing_vm();
        let mut ctx = ctx(vec![Val::Int(42), Val::Float(1.5), Val::Bool(false), Val::Null]);
        for i in 0..4 {
            let inst = Instruction::new(OpCode::Echo).op1(Operand::Const(i));
            vm.exec_echo(&mut ctx, inst).unwrap();
        }
        assert_eq!(out.borrow().as_slice(), b"421.5");
    }

    #[test]
    fn test_rope_concatenates_parts() {
        let mut vm = VM::default();
        let mut ctx = ctx(vec![Val::string("a="), Val::Int(1), Val::string("!")]);
        vm.exec_rope_init(
            &mut ctx,
            Instruction::new(OpCode::RopeInit)
                .op2(Operand::Const(0))
                .result(Operand::Tmp(0)),
        )
        .unwrap();
        vm.exec_rope_add(
            &mut ctx,
            Instruction::new(OpCode::RopeAdd)
                .op1(Operand::Tmp(0))
                .op2(Operand::Const(1))
                .result(Operand::Tmp(0)),
        )
        .unwrap();
        vm.exec_rope_end(
            &mut ctx,
            Instruction::new(OpCode::RopeEnd)
                .op1(Operand::Tmp(0))
                .op2(Operand::Const(2))
                .result(Operand::Tmp(1)),
        )
        .unwrap();
        assert_eq!(vm.get(&ctx, OperandKind::TmpVar, 1), Val::string("a=1!"));
        assert!(ctx.ropes.is_empty());
    }

    #[test]
    fn test_count_of_strings_and_scalars() {
        let mut vm = VM::default();
        assert_eq!(vm.count_value(&Val::empty_array()).unwrap(), 0);
        assert_eq!(vm.count_value(&Val::string("hello")).unwrap(), 5);
        assert_eq!(vm.count_value(&Val::Int(42)).unwrap(), 0);
    }

    #[test]
    fn test_exit_echoes_message_and_halts() {
        let (mut vm, out) = capturing_vm();
        let mut ctx = ctx(vec![Val::string("bye")]);
        vm.exec_exit(&mut ctx, Instruction::new(OpCode::Exit).op1(Operand::Const(0)))
            .unwrap();
        assert!(ctx.halted);
        assert_eq!(vm.exit_status, Some(0));
        assert_eq!(out.borrow().as_slice(), b"bye");
    }

    #[test]
    fn test_constants_and_namespace_fallback() {
        let mut vm = VM::default();
        assert!(vm.define_constant("GREETING", Val::string("hi")));
        assert!(!vm.define_constant("GREETING", Val::string("again")));
        assert_eq!(vm.lookup_constant("GREETING"), Some(Val::string("hi")));
        assert_eq!(vm.lookup_constant("App\\GREETING"), Some(Val::string("hi")));
        assert_eq!(vm.lookup_constant("TRUE"), Some(Val::Bool(true)));
        assert_eq!(vm.lookup_constant("MISSING"), None);
    }
}
