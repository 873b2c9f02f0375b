//! Variable handling functions
//!
//! Reference: $PHP_SRC_PATH/ext/standard/var.c, type.c

use crate::builtins::string::expect_args;
use crate::core::value::Val;
use crate::vm::engine::{ErrorLevel, VM, VmError};

pub fn php_gettype(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    expect_args(vm, "gettype", args, 1)?;
    Ok(Val::string(args[0].gettype_name()))
}

pub fn php_is_array(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    expect_args(vm, "is_array", args, 1)?;
    Ok(Val::Bool(matches!(args[0], Val::Array(_))))
}

/// define(name, value): false (with a warning) when already defined
pub fn php_define(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    expect_args(vm, "define", args, 2)?;
    let name = String::from_utf8_lossy(&args[0].to_php_string_bytes()).into_owned();
    if args.get(2).is_some_and(Val::to_bool) {
        vm.report_error(
            ErrorLevel::Warning,
            "define(): Argument #3 ($case_insensitive) is ignored since declaration of case-insensitive constants is no longer supported",
        );
    }
    Ok(Val::Bool(vm.define_constant(&name, args[1].clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gettype_names() {
        let mut vm = VM::default();
        let cases = [
            (Val::Null, "NULL"),
            (Val::Bool(true), "boolean"),
            (Val::Int(1), "integer"),
            (Val::Float(1.5), "double"),
            (Val::string("s"), "string"),
            (Val::empty_array(), "array"),
        ];
        for (val, expected) in cases {
            assert_eq!(php_gettype(&mut vm, &[val]).unwrap(), Val::string(expected));
        }
    }

    #[test]
    fn test_define_once() {
        let mut vm = VM::default();
        let args = [Val::string("ANSWER"), Val::Int(42)];
        assert_eq!(php_define(&mut vm, &args).unwrap(), Val::Bool(true));
        assert_eq!(php_define(&mut vm, &args).unwrap(), Val::Bool(false));
        assert_eq!(vm.lookup_constant("ANSWER"), Some(Val::Int(42)));
    }

    #[test]
    fn test_is_array() {
        let mut vm = VM::default();
        assert_eq!(php_is_array(&mut vm, &[Val::empty_array()]).unwrap(), Val::Bool(true));
        assert_eq!(php_is_array(&mut vm, &[Val::string("a")]).unwrap(), Val::Bool(false));
    }
}
