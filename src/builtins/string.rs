//! String functions
//!
//! Reference: $PHP_SRC_PATH/ext/standard/string.c

use crate::core::value::Val;
use crate::vm::engine::{VM, VmError};

/// Fail like PHP 8 does when a builtin gets too few arguments
pub(crate) fn expect_args(vm: &VM, name: &str, args: &[Val], min: usize) -> Result<(), VmError> {
    if args.len() < min {
        return Err(vm.throw_error(
            "ArgumentCountError",
            &format!(
                "{}() expects at least {} argument{}, {} given",
                name,
                min,
                if min == 1 { "" } else { "s" },
                args.len()
            ),
        ));
    }
    Ok(())
}

/// String parameter: scalars coerce, arrays are a TypeError
fn string_arg(vm: &mut VM, name: &str, position: usize, val: &Val) -> Result<Vec<u8>, VmError> {
    match val {
        Val::Array(_) => Err(vm.throw_error(
            "TypeError",
            &format!(
                "{}(): Argument #{} must be of type string, array given",
                name, position
            ),
        )),
        other => vm.to_string_bytes(other),
    }
}

pub fn php_strlen(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    expect_args(vm, "strlen", args, 1)?;
    let s = string_arg(vm, "strlen", 1, &args[0])?;
    Ok(Val::Int(s.len() as i64))
}

pub fn php_str_repeat(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    expect_args(vm, "str_repeat", args, 2)?;
    let s = string_arg(vm, "str_repeat", 1, &args[0])?;
    let times = args[1].to_int();
    if times < 0 {
        return Err(vm.throw_error(
            "ValueError",
            "str_repeat(): Argument #2 ($times) must be greater than or equal to 0",
        ));
    }
    Ok(Val::string(s.repeat(times as usize)))
}

pub fn php_strtoupper(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    expect_args(vm, "strtoupper", args, 1)?;
    let s = string_arg(vm, "strtoupper", 1, &args[0])?;
    Ok(Val::string(s.to_ascii_uppercase()))
}

/// implode(separator, array) or implode(array)
pub fn php_implode(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    expect_args(vm, "implode", args, 1)?;
    let (separator, pieces) = match args {
        [Val::Array(arr)] => (Vec::new(), arr.clone()),
        [sep, Val::Array(arr), ..] => (string_arg(vm, "implode", 1, sep)?, arr.clone()),
        [Val::Array(arr), sep, ..] => (string_arg(vm, "implode", 2, sep)?, arr.clone()),
        _ => {
            return Err(vm.throw_error(
                "TypeError",
                "implode(): Argument #2 ($array) must be of type ?array",
            ));
        }
    };

    let mut result = Vec::new();
    for (i, value) in pieces.map.values().enumerate() {
        if i > 0 {
            result.extend_from_slice(&separator);
        }
        let value = vm.arena.deref(value).clone();
        result.extend_from_slice(&vm.to_string_bytes(&value)?);
    }
    Ok(Val::string(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::ArrayData;
    use std::rc::Rc;

    #[test]
    fn test_strlen_counts_bytes() {
        let mut vm = VM::default();
        assert_eq!(php_strlen(&mut vm, &[Val::string("héllo")]).unwrap(), Val::Int(6));
        assert_eq!(php_strlen(&mut vm, &[Val::Int(12345)]).unwrap(), Val::Int(5));
        assert!(php_strlen(&mut vm, &[]).unwrap_err().is_exception());
    }

    #[test]
    fn test_str_repeat_and_upper() {
        let mut vm = VM::default();
        assert_eq!(
            php_str_repeat(&mut vm, &[Val::string("ab"), Val::Int(3)]).unwrap(),
            Val::string("ababab")
        );
        assert_eq!(
            php_strtoupper(&mut vm, &[Val::string("php-vm")]).unwrap(),
            Val::string("PHP-VM")
        );
        assert!(php_str_repeat(&mut vm, &[Val::string("x"), Val::Int(-1)]).is_err());
    }

    #[test]
    fn test_implode_accepts_both_orders() {
        let mut vm = VM::default();
        let parts = Val::Array(Rc::new(ArrayData::from(vec![
            Val::Int(1),
            Val::string("b"),
            Val::Float(2.5),
        ])));
        let sep = Val::string(", ");
        assert_eq!(
            php_implode(&mut vm, &[sep.clone(), parts.clone()]).unwrap(),
            Val::string("1, b, 2.5")
        );
        assert_eq!(
            php_implode(&mut vm, &[parts.clone(), sep]).unwrap(),
            Val::string("1, b, 2.5")
        );
        assert_eq!(php_implode(&mut vm, &[parts]).unwrap(), Val::string("1b2.5"));
    }
}
