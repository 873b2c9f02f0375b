//! Function handling functions
//!
//! Reference: $PHP_SRC_PATH/Zend/zend_builtin_functions.c

use crate::builtins::string::expect_args;
use crate::core::value::Val;
use crate::vm::engine::{VM, VmError};

/// True for builtins and for user functions defined so far
pub fn php_function_exists(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    expect_args(vm, "function_exists", args, 1)?;
    let name = String::from_utf8_lossy(&args[0].to_php_string_bytes()).into_owned();
    let exists = vm.builtins.has_function(name.as_bytes()) || vm.find_function(&name).is_some();
    Ok(Val::Bool(exists))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::chunk::{CodeChunk, UserFunc};
    use std::rc::Rc;

    #[test]
    fn test_sees_builtins_and_user_functions() {
        let mut vm = VM::default();
        let exists = |vm: &mut VM, name: &str| php_function_exists(vm, &[Val::string(name)]).unwrap();

        assert_eq!(exists(&mut vm, "STRLEN"), Val::Bool(true));
        assert_eq!(exists(&mut vm, "helper"), Val::Bool(false));
        vm.define_function(Rc::new(UserFunc::new("Helper", Rc::new(CodeChunk::default()))));
        assert_eq!(exists(&mut vm, "helper"), Val::Bool(true));
    }
}
