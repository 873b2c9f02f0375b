/// Call protocol: staging, argument passing, invocation and closures.
///
/// A call is assembled in three steps, mirroring the Zend VM:
/// - `INIT_*`: resolve the target and push a [`CallContext`]
/// - `SEND_*`: append arguments; by-reference parameters receive cells
/// - `DO_*CALL`: pop the context and run it, storing the return value
///
/// Nested calls (`f(g(1))`) push the outer context while the inner one is
/// assembled, so contexts complete in LIFO order.
///
/// This module also resolves the various forms of PHP callables:
/// - Direct function symbols: `foo()`
/// - String callables: `$var = 'strlen'; $var('hello');`, `'Class::method'`
/// - Closures: `function() { ... }()`
/// - Object __invoke: `$obj()`
/// - Array callables: `[$obj, 'method']` or `['Class', 'method']`
///
/// PHP Reference: $PHP_SRC_PATH/Zend/zend_execute.c - zend_call_function, zend_call_method
/// PHP Reference: $PHP_SRC_PATH/Zend/zend_closures.c - closure invocation
use crate::compiler::chunk::UserFunc;
use crate::core::value::{ArrayData, BoundVar, ClosureData, ObjectRef, Val};
use crate::runtime::context::{MethodBody, MethodEntry};
use crate::vm::engine::{VM, VmError};
use crate::vm::frame::{ArgList, CallContext, CallTarget, ExecutionContext};
use crate::vm::opcode::{BIND_REF, Instruction, OpCode, OperandKind};
use crate::vm::visibility::MemberKind;
use std::rc::Rc;

impl VM {
    /// INIT_FCALL / INIT_FCALL_BY_NAME / INIT_NS_FCALL_BY_NAME:
    /// op1 raw = arity, op2 = function name
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_INIT_FCALL_BY_NAME
    pub(crate) fn exec_init_fcall(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let name = self.name_operand(ctx, inst.op2_kind(), inst.op2);
        let call = self.function_call_context(&name, inst.op1)?;
        ctx.begin_call(call);
        Ok(())
    }

    /// Builtins shadow user functions; an unqualified lookup falls back from
    /// `Ns\foo` to `foo`
    fn function_call_context(&self, name: &str, arity: u32) -> Result<CallContext, VmError> {
        let name = name.strip_prefix('\\').unwrap_or(name);
        let short = name.rsplit('\\').next().unwrap_or(name);
        for candidate in [name, short] {
            if let Some(handler) = self.builtins.get_function(candidate.as_bytes()) {
                return Ok(CallContext::new(
                    Rc::from(candidate),
                    CallTarget::Builtin(handler),
                    arity,
                ));
            }
            if let Some(func) = self.find_function(candidate) {
                return Ok(CallContext::new(func.name.clone(), CallTarget::User(func), arity));
            }
        }
        Err(VmError::undefined_function(name))
    }

    /// INIT_DYNAMIC_CALL / INIT_USER_CALL: op1 raw = arity, op2 = callable value
    pub(crate) fn exec_init_dynamic_call(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let callable = self.op2(ctx, &inst);
        let mut call = self.resolve_callable_in(ctx, &callable)?;
        call.arity = inst.op1;
        ctx.begin_call(call);
        Ok(())
    }

    /// INIT_METHOD_CALL: op1 = object, op2 = method name, result raw = arity
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_INIT_METHOD_CALL
    pub(crate) fn exec_init_method_call(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let receiver = self.op1(ctx, &inst);
        let method = self.name_operand(ctx, inst.op2_kind(), inst.op2);
        let mut call = match &receiver {
            Val::Object(obj) => self.instance_call_context(ctx.class_scope.as_deref(), obj, &method)?,
            Val::Closure(closure) if method.eq_ignore_ascii_case("__invoke") => CallContext::new(
                Rc::from("{closure}"),
                CallTarget::Closure(closure.clone()),
                0,
            ),
            other => {
                return Err(self.throw_error(
                    "Error",
                    &format!(
                        "Call to a member function {}() on {}",
                        method,
                        other.type_name()
                    ),
                ));
            }
        };
        call.arity = inst.result;
        ctx.begin_call(call);
        Ok(())
    }

    /// Call context for `$obj->method()`, falling back to `__call`
    fn instance_call_context(
        &mut self,
        scope: Option<&str>,
        obj: &ObjectRef,
        method: &str,
    ) -> Result<CallContext, VmError> {
        let class = obj.borrow().class.clone();
        match self.classes.find_method(&class, method) {
            Some(entry) => {
                self.check_method_visibility(&entry, &class, scope)?;
                let this = (!entry.is_static).then(|| obj.clone());
                Ok(method_call_context(entry, this, class))
            }
            None => match self.classes.find_method(&class, "__call") {
                Some(MethodEntry {
                    body: MethodBody::User(func),
                    ..
                }) => {
                    let mut call = CallContext::new(
                        Rc::from(format!("{}::{}", class, method)),
                        CallTarget::Magic {
                            func,
                            method: Rc::from(method),
                        },
                        0,
                    );
                    call.this = Some(obj.clone());
                    call.class_scope = Some(class.clone());
                    call.called_scope = Some(class);
                    call.is_method = true;
                    Ok(call)
                }
                _ => Err(VmError::undefined_method(class.as_ref(), method)),
            },
        }
    }

    /// INIT_STATIC_METHOD_CALL: op1 = class (name, self/parent/static or
    /// object), op2 = method name, result raw = arity
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_INIT_STATIC_METHOD_CALL
    pub(crate) fn exec_init_static_method_call(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let class_operand = self.op1(ctx, &inst);
        let (class, forwarding) = match &class_operand {
            Val::Object(obj) => (obj.borrow().class.clone(), false),
            other => {
                let raw = String::from_utf8_lossy(&other.to_php_string_bytes()).into_owned();
                let forwarding = ["self", "parent", "static"]
                    .iter()
                    .any(|kw| raw.eq_ignore_ascii_case(kw));
                (self.resolve_class_name(ctx, &raw)?, forwarding)
            }
        };
        let method = self.name_operand(ctx, inst.op2_kind(), inst.op2);
        let mut call = self.static_call_context(ctx, &class, &method, forwarding)?;
        call.arity = inst.result;
        ctx.begin_call(call);
        Ok(())
    }

    fn static_call_context(
        &mut self,
        ctx: &ExecutionContext,
        class: &Rc<str>,
        method: &str,
        forwarding: bool,
    ) -> Result<CallContext, VmError> {
        if !self.classes.has_class(class) {
            return Err(VmError::undefined_class(class.as_ref()));
        }
        // self::/parent::/static:: keep the late static binding class
        let called = match (&ctx.called_scope, forwarding) {
            (Some(called), true) => called.clone(),
            _ => class.clone(),
        };
        let Some(entry) = self.classes.find_method(class, method) else {
            return match self.classes.find_method(class, "__callStatic") {
                Some(MethodEntry {
                    body: MethodBody::User(func),
                    ..
                }) => {
                    let mut call = CallContext::new(
                        Rc::from(format!("{}::{}", class, method)),
                        CallTarget::Magic {
                            func,
                            method: Rc::from(method),
                        },
                        0,
                    );
                    call.class_scope = Some(class.clone());
                    call.called_scope = Some(called);
                    call.is_method = true;
                    Ok(call)
                }
                _ => Err(VmError::undefined_method(class.as_ref(), method)),
            };
        };
        self.check_method_visibility(&entry, class, ctx.class_scope.as_deref())?;

        if entry.is_static {
            return Ok(method_call_context(entry, None, called));
        }
        // An instance method reached through Class::m() runs on the current
        // object when that object is an instance of the class
        let this = ctx.this.clone().filter(|this| {
            let this_class = this.borrow().class.clone();
            self.classes.is_subclass_of(&this_class, class)
        });
        match this {
            Some(this) => {
                let this_class = this.borrow().class.clone();
                Ok(method_call_context(entry, Some(this), this_class))
            }
            None => Err(self.throw_error(
                "Error",
                &format!(
                    "Non-static method {}::{}() cannot be called statically",
                    entry.declaring_class, entry.name
                ),
            )),
        }
    }

    fn check_method_visibility(
        &self,
        entry: &MethodEntry,
        class: &str,
        scope: Option<&str>,
    ) -> Result<(), VmError> {
        self.check_member_visibility(
            MemberKind::Method,
            class,
            &entry.name,
            &entry.declaring_class,
            entry.visibility,
            scope,
        )
    }

    /// INIT_CTOR_CALL: op1 = freshly created object, result raw = arity
    pub(crate) fn exec_init_ctor_call(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let Val::Object(obj) = self.op1(ctx, &inst) else {
            return Err(VmError::runtime("INIT_CTOR_CALL expects an object operand"));
        };
        let class = obj.borrow().class.clone();
        let mut call = match self.classes.find_method(&class, "__construct") {
            Some(entry) => {
                self.check_method_visibility(&entry, &class, ctx.class_scope.as_deref())?;
                method_call_context(entry, Some(obj.clone()), class)
            }
            None => CallContext::new(
                Rc::from(format!("{}::__construct", class)),
                CallTarget::Nothing,
                0,
            ),
        };
        call.arity = inst.result;
        call.ctor_object = Some(obj);
        ctx.begin_call(call);
        Ok(())
    }

    fn pending_call<'a>(&self, ctx: &'a mut ExecutionContext) -> Result<&'a mut CallContext, VmError> {
        ctx.current_call
            .as_mut()
            .ok_or_else(|| VmError::runtime("SEND without a pending call"))
    }

    /// SEND_VAL / SEND_VAL_EX: op1 = value
    pub(crate) fn exec_send_val(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let val = self.op1(ctx, &inst);
        self.pending_call(ctx)?.args.push(val);
        Ok(())
    }

    /// SEND_VAR / SEND_VAR_NO_REF / SEND_VAR_EX: op1 = variable. With
    /// `check_by_ref` the callee's signature decides whether a cell is passed.
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_SEND_VAR_EX
    pub(crate) fn exec_send_var(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
        check_by_ref: bool,
    ) -> Result<(), VmError> {
        let by_ref = check_by_ref && {
            let call = self.pending_call(ctx)?;
            call.param_by_ref(call.args.len())
        };
        let arg = if by_ref {
            Val::Reference(self.make_ref(ctx, inst.op1_kind(), inst.op1)?)
        } else {
            self.op1(ctx, &inst)
        };
        self.pending_call(ctx)?.args.push(arg);
        Ok(())
    }

    /// SEND_REF: op1 = variable, always passed as a shared cell
    pub(crate) fn exec_send_ref(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let handle = self.make_ref(ctx, inst.op1_kind(), inst.op1)?;
        self.pending_call(ctx)?.args.push(Val::Reference(handle));
        Ok(())
    }

    /// SEND_UNPACK: `f(...$args)`
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_SEND_UNPACK
    pub(crate) fn exec_send_unpack(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let source = self.op1(ctx, &inst);
        let entries = self.unpack_entries(&source)?;
        let call = self.pending_call(ctx)?;
        for (_, value) in entries {
            call.args.push(value);
        }
        Ok(())
    }

    /// DO_FCALL / DO_ICALL / DO_UCALL / DO_FCALL_BY_NAME / CALL_CTOR
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_DO_FCALL
    pub(crate) fn exec_do_call(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let Some(call) = ctx.finish_call() else {
            return Err(VmError::runtime(format!(
                "{:?} without a pending call",
                inst.opcode
            )));
        };
        let ctor_object = call.ctor_object.clone();
        let result = self.dispatch_call(call)?;
        let result = match (inst.opcode, ctor_object) {
            (OpCode::CallCtor, Some(obj)) => Val::Object(obj),
            _ => result,
        };
        self.set_result(ctx, &inst, result)
    }

    /// Run an assembled call to completion and return its result. A
    /// by-reference user function returns its cell unresolved.
    pub(crate) fn dispatch_call(&mut self, call: CallContext) -> Result<Val, VmError> {
        tracing::debug!(function = %call.name, args = call.args.len(), depth = self.depth, "call");
        let result = match call.target.clone() {
            CallTarget::User(func) => self.invoke_user(func, call, &[]),
            CallTarget::Builtin(handler) => {
                self.function_calls += 1;
                let args: Vec<Val> = call.args.iter().map(|a| self.arena.deref(a).clone()).collect();
                handler(self, &args)
            }
            CallTarget::Native(method) => {
                self.function_calls += 1;
                let args: Vec<Val> = call.args.iter().map(|a| self.arena.deref(a).clone()).collect();
                method(self, call.this.as_ref(), &args)
            }
            CallTarget::Closure(closure) => {
                let mut call = call;
                call.this = closure.this.clone();
                call.class_scope = closure.scope.clone();
                call.called_scope = match &closure.this {
                    Some(this) => Some(this.borrow().class.clone()),
                    None => closure.scope.clone(),
                };
                self.invoke_user(closure.func.clone(), call, &closure.bound)
            }
            CallTarget::Magic { func, method } => {
                let values: Vec<Val> = call.args.iter().map(|a| self.arena.deref(a).clone()).collect();
                let mut magic = call;
                magic.args = ArgList::new();
                magic.args.push(Val::string(method.as_bytes()));
                magic.args.push(Val::Array(Rc::new(ArrayData::from(values))));
                self.invoke_user(func, magic, &[])
            }
            CallTarget::Nothing => Ok(Val::Null),
        };
        tracing::debug!(ok = result.is_ok(), depth = self.depth, "return");
        result
    }

    /// Execute a user function body in a fresh activation
    /// Reference: $PHP_SRC_PATH/Zend/zend_execute.c - i_init_func_execute_data
    pub(crate) fn invoke_user(
        &mut self,
        func: Rc<UserFunc>,
        call: CallContext,
        bound: &[BoundVar],
    ) -> Result<Val, VmError> {
        self.function_calls += 1;
        let mut ctx = ExecutionContext::for_function(func.clone());
        ctx.class_scope = call.class_scope.clone();
        ctx.called_scope = call.called_scope.clone();
        ctx.this = call.this.clone();
        if func.is_method {
            if let Some(this) = &call.this {
                ctx.vars.insert(0, Val::Object(this.clone()));
            }
        }

        self.bind_params(&func, &call, &mut ctx)?;
        ctx.args = call.args;
        for var in bound {
            ctx.vars.insert(var.slot, var.value.clone());
        }

        if func.is_generator {
            return Ok(self.create_generator(ctx));
        }

        self.run_loop(&mut ctx)?;
        if func.returns_ref {
            Ok(ctx.return_value)
        } else {
            Ok(self.arena.deref(&ctx.return_value).clone())
        }
    }

    /// Positional binding with defaults and a variadic tail
    fn bind_params(
        &mut self,
        func: &UserFunc,
        call: &CallContext,
        ctx: &mut ExecutionContext,
    ) -> Result<(), VmError> {
        let base = func.param_base();
        for (index, param) in func.params.iter().enumerate() {
            let slot = base + index as u32;
            if param.is_variadic {
                let rest: Vec<Val> = call
                    .args
                    .iter()
                    .skip(index)
                    .map(|arg| self.pass_arg(arg, param.by_ref))
                    .collect();
                ctx.vars.insert(slot, Val::Array(Rc::new(ArrayData::from(rest))));
                break;
            }
            let value = match call.args.get(index) {
                Some(arg) => self.pass_arg(arg, param.by_ref),
                None => match &param.default_value {
                    Some(default) => default.clone(),
                    None => {
                        return Err(VmError::missing_argument(
                            call.name.as_ref(),
                            call.args.len(),
                            func.required_params(),
                        ));
                    }
                },
            };
            ctx.vars.insert(slot, value);
        }
        Ok(())
    }

    /// References reach the callee only for by-reference parameters
    fn pass_arg(&self, arg: &Val, by_ref: bool) -> Val {
        match arg {
            Val::Reference(_) if by_ref => arg.clone(),
            other => self.arena.deref(other).clone(),
        }
    }

    /// RETURN / RETURN_BY_REF / GENERATOR_RETURN: op1 = value
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_RETURN
    pub(crate) fn exec_return(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
        by_ref: bool,
    ) -> Result<(), VmError> {
        let value = if by_ref && inst.op1_kind() != OperandKind::Const {
            Val::Reference(self.make_ref(ctx, inst.op1_kind(), inst.op1)?)
        } else {
            self.op1(ctx, &inst)
        };
        ctx.return_value = value;
        ctx.returned = true;
        ctx.halted = true;
        Ok(())
    }

    /// DECLARE_LAMBDA_FUNCTION: op1 = name of the compiled body, result = closure.
    /// Non-static closures capture the current `$this` and class scope.
    pub(crate) fn exec_declare_lambda(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let name = self.name_operand(ctx, inst.op1_kind(), inst.op1);
        let func = self
            .find_function(&name)
            .ok_or_else(|| VmError::undefined_function(name.as_str()))?;
        let this = if func.is_static { None } else { ctx.this.clone() };
        let closure = ClosureData {
            func,
            bound: Vec::new(),
            this,
            scope: ctx.class_scope.clone(),
        };
        self.set_result(ctx, &inst, Val::Closure(Rc::new(closure)))
    }

    /// BIND_LEXICAL: op1 = closure temporary, op2 = captured variable,
    /// result raw = slot in the closure body, `extended` = BIND_REF for `use (&$x)`
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_BIND_LEXICAL
    pub(crate) fn exec_bind_lexical(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let value = if inst.extended & BIND_REF != 0 {
            Val::Reference(self.make_ref(ctx, inst.op2_kind(), inst.op2)?)
        } else {
            self.op2(ctx, &inst)
        };
        let Some(Val::Closure(mut closure)) = ctx.temps.remove(&inst.op1) else {
            return Err(VmError::runtime("BIND_LEXICAL expects a closure operand"));
        };
        let data = Rc::make_mut(&mut closure);
        data.bound.retain(|b| b.slot != inst.result);
        data.bound.push(BoundVar {
            slot: inst.result,
            value,
        });
        ctx.temps.insert(inst.op1, Val::Closure(closure));
        Ok(())
    }

    /// Call a method on an object from native code
    pub(crate) fn call_method(
        &mut self,
        obj: &ObjectRef,
        method: &str,
        args: ArgList,
    ) -> Result<Val, VmError> {
        let class = obj.borrow().class.clone();
        let mut call = self.instance_call_context(Some(&class), obj, method)?;
        call.arity = args.len() as u32;
        call.args = args;
        let result = self.dispatch_call(call)?;
        Ok(self.arena.deref(&result).clone())
    }

    /// Call a static method from native code
    pub(crate) fn call_static_method(
        &mut self,
        class: &str,
        method: &str,
        args: ArgList,
    ) -> Result<Val, VmError> {
        let ctx = ExecutionContext::new(Rc::default());
        let class: Rc<str> = match self.classes.get_class(class) {
            Some(def) => def.name.clone(),
            None => return Err(VmError::undefined_class(class)),
        };
        let mut call = self.static_call_context(&ctx, &class, method, false)?;
        call.args = args;
        let result = self.dispatch_call(call)?;
        Ok(self.arena.deref(&result).clone())
    }

    /// Resolve any callable value to a ready-to-fill call context
    pub fn resolve_callable(&mut self, callable: &Val) -> Result<CallContext, VmError> {
        let ctx = ExecutionContext::new(Rc::default());
        self.resolve_callable_in(&ctx, callable)
    }

    fn resolve_callable_in(
        &mut self,
        ctx: &ExecutionContext,
        callable: &Val,
    ) -> Result<CallContext, VmError> {
        let scope = ctx.class_scope.clone();
        match callable {
            Val::Closure(closure) => Ok(CallContext::new(
                Rc::from("{closure}"),
                CallTarget::Closure(closure.clone()),
                0,
            )),
            Val::String(name) => {
                let name = String::from_utf8_lossy(name).into_owned();
                match name.split_once("::") {
                    Some((class, method)) => {
                        let class = self.resolve_class_name(ctx, class)?;
                        self.static_call_context(ctx, &class, method, false)
                    }
                    None => self.function_call_context(&name, 0),
                }
            }
            Val::Array(arr) if arr.len() == 2 => {
                let target = arr.map.get_index(0).map(|(_, v)| self.arena.deref(v).clone());
                let method = arr.map.get_index(1).map(|(_, v)| self.arena.deref(v).clone());
                match (target, method) {
                    (Some(Val::Object(obj)), Some(Val::String(m))) => {
                        let m = String::from_utf8_lossy(&m).into_owned();
                        self.instance_call_context(scope.as_deref(), &obj, &m)
                    }
                    (Some(Val::String(class)), Some(Val::String(m))) => {
                        let class = String::from_utf8_lossy(&class).into_owned();
                        let m = String::from_utf8_lossy(&m).into_owned();
                        let class = self.resolve_class_name(ctx, &class)?;
                        self.static_call_context(ctx, &class, &m, false)
                    }
                    _ => Err(self.throw_error("Error", "Array callback must have exactly two elements")),
                }
            }
            Val::Object(obj) => {
                let class = obj.borrow().class.clone();
                if self.classes.has_method(&class, "__invoke") {
                    self.instance_call_context(scope.as_deref(), obj, "__invoke")
                } else {
                    Err(self.throw_error("Error", &format!("Object of type {} is not callable", class)))
                }
            }
            _ => Err(self.throw_error("Error", "Value not callable")),
        }
    }

    /// Invoke any callable value with the given arguments
    pub fn call_callable(&mut self, callable: &Val, args: ArgList) -> Result<Val, VmError> {
        let mut call = self.resolve_callable(callable)?;
        call.arity = args.len() as u32;
        call.args = args;
        let result = self.dispatch_call(call)?;
        Ok(self.arena.deref(&result).clone())
    }
}

/// Call context for a resolved method entry
fn method_call_context(entry: MethodEntry, this: Option<ObjectRef>, called: Rc<str>) -> CallContext {
    let name: Rc<str> = Rc::from(format!("{}::{}", entry.declaring_class, entry.name));
    let target = match entry.body {
        MethodBody::User(func) => CallTarget::User(func),
        MethodBody::Native(method) => CallTarget::Native(method),
    };
    let mut call = CallContext::new(name, target, 0);
    call.this = this;
    call.class_scope = Some(entry.declaring_class);
    call.called_scope = Some(called);
    call.is_method = true;
    call
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::chunk::{CodeChunk, FuncParam};
    use crate::vm::opcode::Operand;
    use smallvec::smallvec;

    /// fn(a, b = 10) { return a + b; }
    fn adder() -> Rc<UserFunc> {
        let chunk = CodeChunk {
            code: vec![
                Instruction::new(OpCode::Add)
                    .op1(Operand::Cv(0))
                    .op2(Operand::Cv(1))
                    .result(Operand::Tmp(0)),
                Instruction::new(OpCode::Return).op1(Operand::Tmp(0)),
            ],
            var_names: vec![Rc::from("a"), Rc::from("b")],
            ..Default::default()
        };
        let mut func = UserFunc::new("add", Rc::new(chunk));
        func.params = vec![
            FuncParam::required("a"),
            FuncParam::optional("b", Val::Int(10)),
        ];
        Rc::new(func)
    }

    #[test]
    fn test_defaults_fill_missing_arguments() {
        let mut vm = VM::default();
        vm.define_function(adder());
        let result = vm
            .call_callable(&Val::string("add"), smallvec![Val::Int(5)])
            .unwrap();
        assert_eq!(result, Val::Int(15));
        assert_eq!(vm.function_calls(), 1);
    }

    #[test]
    fn test_missing_required_argument_is_fatal() {
        let mut vm = VM::default();
        vm.define_function(adder());
        let err = vm.call_callable(&Val::string("add"), ArgList::new()).unwrap_err();
        assert!(matches!(err, VmError::MissingArgument { passed: 0, expected: 1, .. }));
    }

    #[test]
    fn test_variadic_collects_rest() {
        let chunk = CodeChunk {
            code: vec![Instruction::new(OpCode::Return).op1(Operand::Cv(1))],
            ..Default::default()
        };
        let mut func = UserFunc::new("rest", Rc::new(chunk));
        func.params = vec![FuncParam::required("first"), FuncParam::variadic("others")];
        let mut vm = VM::default();
        vm.define_function(Rc::new(func));

        let result = vm
            .call_callable(
                &Val::string("rest"),
                smallvec![Val::Int(1), Val::Int(2), Val::Int(3)],
            )
            .unwrap();
        assert_eq!(result.array_count(), 2);
    }

    #[test]
    fn test_builtins_take_precedence() {
        let mut vm = VM::default();
        let mut shadow = UserFunc::new("strlen", Rc::new(CodeChunk::default()));
        shadow.params = vec![FuncParam::required("s")];
        vm.define_function(Rc::new(shadow));
        let result = vm
            .call_callable(&Val::string("strlen"), smallvec![Val::string("abcd")])
            .unwrap();
        assert_eq!(result, Val::Int(4));
    }

    #[test]
    fn test_undefined_function() {
        let mut vm = VM::default();
        let err = vm.call_callable(&Val::string("nope"), ArgList::new()).unwrap_err();
        assert!(matches!(err, VmError::UndefinedFunction { .. }));
    }
}
