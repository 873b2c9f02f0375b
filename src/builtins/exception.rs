//! Throwable methods shared by Exception and Error
//!
//! Reference: $PHP_SRC_PATH/Zend/zend_exceptions.c

use crate::core::value::{ObjectRef, Val};
use crate::vm::engine::{VM, VmError};
use std::rc::Rc;

fn this_object<'a>(vm: &VM, this: Option<&'a ObjectRef>, method: &str) -> Result<&'a ObjectRef, VmError> {
    this.ok_or_else(|| {
        vm.throw_error(
            "Error",
            &format!("Non-static method Exception::{}() cannot be called statically", method),
        )
    })
}

fn property(vm: &VM, this: Option<&ObjectRef>, method: &str, name: &str) -> Result<Val, VmError> {
    let obj = this_object(vm, this, method)?;
    let value = obj.borrow().get(name).cloned().unwrap_or(Val::Null);
    Ok(vm.arena.deref(&value).clone())
}

/// __construct($message = "", $code = 0, ?Throwable $previous = null)
pub fn construct(vm: &mut VM, this: Option<&ObjectRef>, args: &[Val]) -> Result<Val, VmError> {
    let obj = this_object(vm, this, "__construct")?;
    let mut data = obj.borrow_mut();
    if let Some(message) = args.first() {
        data.set(Rc::from("message"), Val::string(message.to_php_string_bytes()));
    }
    if let Some(code) = args.get(1) {
        data.set(Rc::from("code"), Val::Int(code.to_int()));
    }
    if let Some(previous) = args.get(2) {
        data.set(Rc::from("previous"), previous.clone());
    }
    Ok(Val::Null)
}

pub fn get_message(vm: &mut VM, this: Option<&ObjectRef>, _args: &[Val]) -> Result<Val, VmError> {
    property(vm, this, "getMessage", "message")
}

pub fn get_code(vm: &mut VM, this: Option<&ObjectRef>, _args: &[Val]) -> Result<Val, VmError> {
    property(vm, this, "getCode", "code")
}

pub fn get_previous(vm: &mut VM, this: Option<&ObjectRef>, _args: &[Val]) -> Result<Val, VmError> {
    property(vm, this, "getPrevious", "previous")
}
