//! Array functions
//!
//! Reference: $PHP_SRC_PATH/ext/standard/array.c

use crate::builtins::string::expect_args;
use crate::core::value::{ArrayData, ArrayKey, Val};
use crate::vm::engine::{VM, VmError};
use std::rc::Rc;

fn array_arg<'a>(
    vm: &VM,
    name: &str,
    position: usize,
    val: &'a Val,
) -> Result<&'a Rc<ArrayData>, VmError> {
    match val {
        Val::Array(arr) => Ok(arr),
        other => Err(vm.throw_error(
            "TypeError",
            &format!(
                "{}(): Argument #{} ($array) must be of type array, {} given",
                name,
                position,
                other.type_name()
            ),
        )),
    }
}

/// count() follows the COUNT opcode
pub fn php_count(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    expect_args(vm, "count", args, 1)?;
    Ok(Val::Int(vm.count_value(&args[0])?))
}

/// Integer keys are renumbered from 0; later string keys overwrite earlier ones
pub fn php_array_merge(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    let mut merged = ArrayData::new();
    for (i, arg) in args.iter().enumerate() {
        let arr = array_arg(vm, "array_merge", i + 1, arg)?;
        for (key, value) in arr.map.iter() {
            let value = vm.arena.deref(value).clone();
            match key {
                ArrayKey::Int(_) => merged.push(value),
                ArrayKey::Str(_) => {
                    merged.insert(key.clone(), value);
                }
            }
        }
    }
    Ok(Val::Array(Rc::new(merged)))
}

pub fn php_array_keys(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    expect_args(vm, "array_keys", args, 1)?;
    let arr = array_arg(vm, "array_keys", 1, &args[0])?;
    let keys: Vec<Val> = arr.map.keys().map(ArrayKey::to_val).collect();
    Ok(Val::Array(Rc::new(ArrayData::from(keys))))
}

pub fn php_array_values(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    expect_args(vm, "array_values", args, 1)?;
    let arr = array_arg(vm, "array_values", 1, &args[0])?;
    let values: Vec<Val> = arr.map.values().map(|v| vm.arena.deref(v).clone()).collect();
    Ok(Val::Array(Rc::new(ArrayData::from(values))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn str_key(s: &str) -> ArrayKey {
        ArrayKey::Str(Rc::new(s.as_bytes().to_vec()))
    }

    #[test]
    fn test_array_merge_renumbers_int_keys() {
        let mut vm = VM::default();
        let first = Val::Array(Rc::new(ArrayData::from(vec![Val::string("a"), Val::string("b")])));
        let mut second = ArrayData::from(vec![Val::string("c")]);
        second.insert(str_key("key"), Val::string("d"));

        let merged = php_array_merge(&mut vm, &[first, Val::Array(Rc::new(second))]).unwrap();
        let Val::Array(arr) = merged else {
            panic!("expected array");
        };
        assert_eq!(arr.len(), 4);
        assert_eq!(arr.get(&ArrayKey::Int(2)), Some(&Val::string("c")));
        assert_eq!(arr.get(&str_key("key")), Some(&Val::string("d")));
    }

    #[test]
    fn test_array_merge_rejects_scalars() {
        let mut vm = VM::default();
        let err = php_array_merge(&mut vm, &[Val::empty_array(), Val::Int(1)]).unwrap_err();
        assert!(err.is_exception());
    }

    #[test]
    fn test_keys_and_values() {
        let mut vm = VM::default();
        let mut data = ArrayData::new();
        data.insert(str_key("x"), Val::Int(1));
        data.insert(ArrayKey::Int(7), Val::Int(2));
        let arr = Val::Array(Rc::new(data));

        let keys = php_array_keys(&mut vm, &[arr.clone()]).unwrap();
        assert_eq!(keys.array_get(&ArrayKey::Int(0)), Some(&Val::string("x")));
        assert_eq!(keys.array_get(&ArrayKey::Int(1)), Some(&Val::Int(7)));

        let values = php_array_values(&mut vm, &[arr]).unwrap();
        assert_eq!(values.array_count(), 2);
        assert_eq!(values.array_get(&ArrayKey::Int(1)), Some(&Val::Int(2)));
    }

    #[test]
    fn test_count_matches_opcode_rules() {
        let mut vm = VM::default();
        let arr = Val::Array(Rc::new(ArrayData::from(vec![Val::Int(1), Val::Int(2)])));
        assert_eq!(php_count(&mut vm, &[arr]).unwrap(), Val::Int(2));
        assert_eq!(php_count(&mut vm, &[Val::Null]).unwrap(), Val::Int(0));
    }
}
