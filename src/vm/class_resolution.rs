//! Class and object resolution
//!
//! Object creation, property access, static properties and class constants.
//! Class lookups go through the [`ClassRegistry`](crate::runtime::context::ClassRegistry)
//! collaborator; the VM only resolves `self`/`parent`/`static` and owns the
//! static-property cells.
//!
//! ## Static properties
//!
//! Cells are created lazily on first access, keyed by the lowercase name of
//! the class that declares the property. A subclass that does not redeclare
//! a static property shares its parent's cell.
//!
//! Reference: $PHP_SRC_PATH/Zend/zend_inheritance.c, Zend/zend_object_handlers.c

use crate::core::heap::Handle;
use crate::core::value::{ObjectData, ObjectRef, Val};
use crate::runtime::context::PropertyEntry;
use crate::vm::engine::{ErrorLevel, VM, VmError};
use crate::vm::frame::{ArgList, ExecutionContext, Place};
use crate::vm::inc_dec::IncDecOp;
use crate::vm::opcode::{ISEMPTY, Instruction, OperandKind};
use crate::vm::variable_ops::binary_op_of;
use crate::vm::visibility::MemberKind;
use smallvec::smallvec;
use std::cell::RefCell;
use std::rc::Rc;

impl VM {
    /// Resolve `self`, `parent` and `static` against the running context;
    /// other names map to the registered spelling when the class is known.
    /// Reference: $PHP_SRC_PATH/Zend/zend_execute.c - zend_fetch_class
    pub(crate) fn resolve_class_name(
        &self,
        ctx: &ExecutionContext,
        name: &str,
    ) -> Result<Rc<str>, VmError> {
        let name = name.strip_prefix('\\').unwrap_or(name);
        if name.eq_ignore_ascii_case("self") {
            return ctx.class_scope.clone().ok_or_else(|| {
                self.throw_error("Error", "Cannot use \"self\" when no class scope is active")
            });
        }
        if name.eq_ignore_ascii_case("static") {
            return ctx
                .called_scope
                .clone()
                .or_else(|| ctx.class_scope.clone())
                .ok_or_else(|| {
                    self.throw_error("Error", "Cannot use \"static\" when no class scope is active")
                });
        }
        if name.eq_ignore_ascii_case("parent") {
            let Some(scope) = &ctx.class_scope else {
                return Err(
                    self.throw_error("Error", "Cannot use \"parent\" when no class scope is active")
                );
            };
            return self
                .classes
                .get_class(scope)
                .and_then(|def| def.parent.clone())
                .ok_or_else(|| {
                    self.throw_error(
                        "Error",
                        "Cannot use \"parent\" when current class scope has no parent",
                    )
                });
        }
        Ok(match self.classes.get_class(name) {
            Some(def) => def.name.clone(),
            None => Rc::from(name),
        })
    }

    /// Build an exception object of `class` (falling back to `Error`) and
    /// return it ready to be thrown
    pub(crate) fn throw_error(&self, class: &str, message: &str) -> VmError {
        let class = if self.classes.has_class(class) { class } else { "Error" };
        let obj = self.instantiate(class);
        {
            let mut data = obj.borrow_mut();
            data.set(Rc::from("message"), Val::string(message));
            data.set(Rc::from("code"), Val::Int(0));
        }
        VmError::Exception(Val::Object(obj))
    }

    /// Create an object with every declared property at its default,
    /// ancestors first so redeclarations win
    /// Reference: $PHP_SRC_PATH/Zend/zend_objects.c - zend_object_std_init
    pub(crate) fn instantiate(&self, class: &str) -> ObjectRef {
        let lineage = self.classes.lineage(class);
        let name = lineage
            .first()
            .map(|def| def.name.clone())
            .unwrap_or_else(|| Rc::from(class));
        let mut obj = ObjectData::new(name);
        for def in lineage.iter().rev() {
            for (prop, entry) in &def.properties {
                obj.set(prop.clone(), entry.default_value.clone());
            }
        }
        Rc::new(RefCell::new(obj))
    }

    /// NEW: op1 = class name, result = object. The constructor runs through a
    /// following INIT_CTOR_CALL / CALL_CTOR pair.
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_NEW
    pub(crate) fn exec_new(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let raw = self.name_operand(ctx, inst.op1_kind(), inst.op1);
        let name = self.resolve_class_name(ctx, &raw)?;
        let Some(def) = self.classes.get_class(&name) else {
            return Err(VmError::undefined_class(name.as_ref()));
        };
        if def.is_interface {
            return Err(self.throw_error(
                "Error",
                &format!("Cannot instantiate interface {}", def.name),
            ));
        }
        if def.is_abstract {
            return Err(self.throw_error(
                "Error",
                &format!("Cannot instantiate abstract class {}", def.name),
            ));
        }
        let obj = self.instantiate(&def.name);
        tracing::debug!(class = %def.name, "new object");
        self.set_result(ctx, &inst, Val::Object(obj))
    }

    /// CLONE: shallow copy of the property table, then `__clone` on the copy
    /// Reference: $PHP_SRC_PATH/Zend/zend_objects.c - zend_objects_clone_obj
    pub(crate) fn exec_clone(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let Val::Object(source) = self.op1(ctx, &inst) else {
            return Err(self.throw_error("Error", "__clone method called on non-object"));
        };
        let copy = {
            let source = source.borrow();
            let mut copy = ObjectData::new(source.class.clone());
            for (name, value) in &source.properties {
                // References stay shared, as in PHP
                copy.set(name.clone(), value.clone());
            }
            copy.internal = source.internal.clone();
            Rc::new(RefCell::new(copy))
        };
        let class = copy.borrow().class.clone();
        if self.classes.has_method(&class, "__clone") {
            self.call_method(&copy, "__clone", ArgList::new())?;
        }
        self.set_result(ctx, &inst, Val::Object(copy))
    }

    /// Object operand; an unused op1 means `$this`
    fn object_operand(&self, ctx: &ExecutionContext, inst: &Instruction) -> Val {
        match inst.op1_kind() {
            OperandKind::Unused => ctx.this.clone().map(Val::Object).unwrap_or_default(),
            _ => self.op1(ctx, inst),
        }
    }

    /// Declared property entry and its declaring class, most-derived first
    fn find_property(&self, class: &str, prop: &str) -> Option<(Rc<str>, PropertyEntry)> {
        self.classes.lineage(class).into_iter().find_map(|def| {
            def.properties
                .get(prop)
                .map(|entry| (def.name.clone(), entry.clone()))
        })
    }

    fn check_property_access(
        &self,
        ctx: &ExecutionContext,
        class: &str,
        prop: &str,
    ) -> Result<(), VmError> {
        match self.find_property(class, prop) {
            Some((declaring, entry)) => self.check_member_visibility(
                MemberKind::Property,
                class,
                prop,
                &declaring,
                entry.visibility,
                ctx.class_scope.as_deref(),
            ),
            None => Ok(()),
        }
    }

    /// Read a property, consulting `__get` when it is missing
    pub(crate) fn read_property(
        &mut self,
        ctx: &ExecutionContext,
        obj: &ObjectRef,
        prop: &str,
        quiet: bool,
    ) -> Result<Val, VmError> {
        let class = obj.borrow().class.clone();
        self.check_property_access(ctx, &class, prop)?;
        let existing = obj.borrow().get(prop).cloned();
        match existing {
            Some(value) => Ok(self.arena.deref(&value).clone()),
            None if self.classes.has_method(&class, "__get") => {
                self.call_method(obj, "__get", smallvec![Val::string(prop)])
            }
            None => {
                if !quiet {
                    self.report_error(
                        ErrorLevel::Warning,
                        &format!("Undefined property: {}::${}", class, prop),
                    );
                }
                Ok(Val::Null)
            }
        }
    }

    /// FETCH_OBJ_R / FETCH_OBJ_IS: op1 = object (unused for `$this`), op2 = name
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_FETCH_OBJ_R
    pub(crate) fn exec_fetch_obj_r(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
        quiet: bool,
    ) -> Result<(), VmError> {
        let target = self.object_operand(ctx, &inst);
        let prop = self.name_operand(ctx, inst.op2_kind(), inst.op2);
        let value = match &target {
            Val::Object(obj) => self.read_property(ctx, obj, &prop, quiet)?,
            other => {
                if !quiet {
                    self.report_error(
                        ErrorLevel::Warning,
                        &format!(
                            "Attempt to read property \"{}\" on {}",
                            prop,
                            other.type_name()
                        ),
                    );
                }
                Val::Null
            }
        };
        self.set_result(ctx, &inst, value)
    }

    /// Writable property place for W/RW fetches and assignments
    fn property_place(
        &mut self,
        ctx: &ExecutionContext,
        inst: &Instruction,
        action: &str,
    ) -> Result<Place, VmError> {
        let target = self.object_operand(ctx, inst);
        let prop = self.name_operand(ctx, inst.op2_kind(), inst.op2);
        match target {
            Val::Object(obj) => {
                let class = obj.borrow().class.clone();
                self.check_property_access(ctx, &class, &prop)?;
                Ok(Place::Prop(obj, Rc::from(prop)))
            }
            other => Err(self.throw_error(
                "Error",
                &format!(
                    "Attempt to {} property \"{}\" on {}",
                    action,
                    prop,
                    other.type_name()
                ),
            )),
        }
    }

    /// FETCH_OBJ_W / FETCH_OBJ_RW / FETCH_OBJ_FUNC_ARG
    pub(crate) fn exec_fetch_obj_w(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let place = self.property_place(ctx, &inst, "modify")?;
        self.set_result_place(ctx, &inst, place)
    }

    /// ASSIGN_OBJ: op1 = object, op2 = name, OP_DATA op1 = value.
    /// Undeclared properties go through `__set` when the class has one.
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_ASSIGN_OBJ
    pub(crate) fn exec_assign_obj(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let value = self.op_data_value(ctx)?;
        let place = self.property_place(ctx, &inst, "assign")?;
        if let Place::Prop(obj, prop) = &place {
            let class = obj.borrow().class.clone();
            let missing = obj.borrow().get(prop).is_none();
            if missing && self.classes.has_method(&class, "__set") {
                self.call_method(obj, "__set", smallvec![Val::string(prop.as_bytes()), value.clone()])?;
                return self.set_result(ctx, &inst, value);
            }
        }
        self.write_place(ctx, &place, value.clone())?;
        self.set_result(ctx, &inst, value)
    }

    /// ASSIGN_OBJ_OP: `$o->p op= v`, operator in `extended`, OP_DATA op1 = value
    pub(crate) fn exec_assign_obj_op(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let op = binary_op_of(&inst)?;
        let rhs = self.op_data_value(ctx)?;
        let place = self.property_place(ctx, &inst, "assign")?;
        let current = match &place {
            Place::Prop(obj, prop) => self.read_property(ctx, obj, prop, false)?,
            other => self.read_place(ctx, other),
        };
        let result = self.binary_op(op, &current, &rhs)?;
        self.write_place(ctx, &place, result.clone())?;
        self.set_result(ctx, &inst, result)
    }

    /// PRE/POST_INC/DEC_OBJ
    pub(crate) fn exec_inc_dec_obj(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
        op: IncDecOp,
    ) -> Result<(), VmError> {
        let place = self.property_place(ctx, &inst, "increment/decrement")?;
        let result = self.inc_dec_place(ctx, &place, op)?;
        self.set_result(ctx, &inst, result)
    }

    /// UNSET_OBJ: missing properties and non-objects are ignored
    pub(crate) fn exec_unset_obj(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let target = self.object_operand(ctx, &inst);
        let prop = self.name_operand(ctx, inst.op2_kind(), inst.op2);
        let Val::Object(obj) = target else {
            return Ok(());
        };
        let class = obj.borrow().class.clone();
        self.check_property_access(ctx, &class, &prop)?;
        if obj.borrow_mut().unset(&prop).is_none() && self.classes.has_method(&class, "__unset") {
            self.call_method(&obj, "__unset", smallvec![Val::string(prop)])?;
        }
        Ok(())
    }

    /// ISSET_ISEMPTY_PROP_OBJ: never faults; `__isset` answers for missing
    /// properties
    pub(crate) fn exec_isset_isempty_prop(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let target = self.object_operand(ctx, &inst);
        let prop = self.name_operand(ctx, inst.op2_kind(), inst.op2);
        let value = match &target {
            Val::Object(obj) => {
                let class = obj.borrow().class.clone();
                let visible = match self.find_property(&class, &prop) {
                    Some((declaring, entry)) => self.is_visible_from(
                        &declaring,
                        entry.visibility,
                        ctx.class_scope.as_deref(),
                    ),
                    None => true,
                };
                let existing = obj.borrow().get(&prop).cloned();
                match existing {
                    Some(v) if visible => Some(self.arena.deref(&v).clone()),
                    _ if self.classes.has_method(&class, "__isset") => {
                        let isset = self.call_method(obj, "__isset", smallvec![Val::string(prop.as_bytes())])?;
                        match (isset.to_bool(), inst.extended == ISEMPTY) {
                            (false, _) => None,
                            (true, false) => Some(Val::Bool(true)),
                            (true, true) => Some(self.read_property(ctx, obj, &prop, true)?),
                        }
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        let result = match (value, inst.extended == ISEMPTY) {
            (Some(v), false) => !v.is_null(),
            (Some(v), true) => !v.to_bool(),
            (None, false) => false,
            (None, true) => true,
        };
        self.set_result(ctx, &inst, Val::Bool(result))
    }

    /// FETCH_THIS
    pub(crate) fn exec_fetch_this(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        match ctx.this.clone() {
            Some(this) => self.set_result(ctx, &inst, Val::Object(this)),
            None => Err(self.throw_error("Error", "Using $this when not in object context")),
        }
    }

    /// FETCH_CLASS_NAME: op1 = `self`/`parent`/`static`, a class name or an
    /// object; result = the resolved name as a string (`X::class`)
    pub(crate) fn exec_fetch_class_name(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let name = match self.op1(ctx, &inst) {
            Val::Object(obj) => obj.borrow().class.clone(),
            Val::Null if inst.op1_kind() == OperandKind::Unused => {
                self.resolve_class_name(ctx, "self")?
            }
            other => {
                let raw = String::from_utf8_lossy(&other.to_php_string_bytes()).into_owned();
                self.resolve_class_name(ctx, &raw)?
            }
        };
        self.set_result(ctx, &inst, Val::string(name.as_bytes()))
    }

    /// Class named by op1 of a static-member instruction
    fn static_class_operand(
        &self,
        ctx: &ExecutionContext,
        inst: &Instruction,
    ) -> Result<Rc<str>, VmError> {
        let class = match self.op1(ctx, inst) {
            Val::Object(obj) => obj.borrow().class.clone(),
            other => {
                let raw = String::from_utf8_lossy(&other.to_php_string_bytes()).into_owned();
                self.resolve_class_name(ctx, &raw)?
            }
        };
        if !self.classes.has_class(&class) {
            return Err(VmError::undefined_class(class.as_ref()));
        }
        Ok(class)
    }

    /// Cell for `class::$prop`. Declared properties resolve to the declaring
    /// class's cell; with `create` an undeclared property gets a cell on the
    /// named class, otherwise `None`.
    /// Reference: $PHP_SRC_PATH/Zend/zend_object_handlers.c - zend_std_get_static_property
    pub(crate) fn static_prop_cell(
        &mut self,
        class: &str,
        prop: &str,
        create: bool,
    ) -> Option<Handle> {
        let declared = self.classes.lineage(class).into_iter().find_map(|def| {
            def.static_properties
                .get(prop)
                .map(|entry| (def.name.to_ascii_lowercase(), entry.default_value.clone()))
        });
        let (key, default) = match declared {
            Some(found) => found,
            None => {
                let key = class.to_ascii_lowercase();
                let existing = self.static_props.get(&key).and_then(|props| props.get(prop));
                if let Some(handle) = existing {
                    return Some(*handle);
                }
                if !create {
                    return None;
                }
                (key, Val::Null)
            }
        };
        if let Some(handle) = self.static_props.get(&key).and_then(|props| props.get(prop)) {
            return Some(*handle);
        }
        let handle = self.arena.alloc(default);
        self.static_props
            .entry(key)
            .or_default()
            .insert(Rc::from(prop), handle);
        Some(handle)
    }

    /// Resolve the class and property of a static-member instruction:
    /// op1 = class, op2 = property name
    fn static_prop_target(
        &mut self,
        ctx: &ExecutionContext,
        inst: &Instruction,
        create: bool,
    ) -> Result<Option<Handle>, VmError> {
        let class = self.static_class_operand(ctx, inst)?;
        let prop = self.name_operand(ctx, inst.op2_kind(), inst.op2);
        let declared = self.classes.lineage(&class).into_iter().find_map(|def| {
            def.static_properties
                .get(prop.as_str())
                .map(|entry| (def.name.clone(), entry.visibility))
        });
        if let Some((declaring, visibility)) = declared {
            self.check_member_visibility(
                MemberKind::Property,
                &class,
                &prop,
                &declaring,
                visibility,
                ctx.class_scope.as_deref(),
            )?;
        }
        Ok(self.static_prop_cell(&class, &prop, create))
    }

    fn undeclared_static(&self, ctx: &ExecutionContext, inst: &Instruction) -> VmError {
        let class = self.name_operand(ctx, inst.op1_kind(), inst.op1);
        let prop = self.name_operand(ctx, inst.op2_kind(), inst.op2);
        self.throw_error(
            "Error",
            &format!("Access to undeclared static property {}::${}", class, prop),
        )
    }

    /// FETCH_STATIC_PROP_R / FETCH_STATIC_PROP_IS
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_FETCH_STATIC_PROP_R
    pub(crate) fn exec_fetch_static_prop_r(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
        quiet: bool,
    ) -> Result<(), VmError> {
        let cell = match self.static_prop_target(ctx, &inst, false) {
            Ok(cell) => cell,
            Err(_) if quiet => None,
            Err(e) => return Err(e),
        };
        let value = match cell {
            Some(handle) => self.arena.get(handle).clone(),
            None if quiet => Val::Null,
            None => return Err(self.undeclared_static(ctx, &inst)),
        };
        let value = self.arena.deref(&value).clone();
        self.set_result(ctx, &inst, value)
    }

    /// FETCH_STATIC_PROP_W / RW / FUNC_ARG
    pub(crate) fn exec_fetch_static_prop_w(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let handle = self.writable_static(ctx, &inst)?;
        self.set_result_place(ctx, &inst, Place::Cell(handle))
    }

    fn writable_static(
        &mut self,
        ctx: &ExecutionContext,
        inst: &Instruction,
    ) -> Result<Handle, VmError> {
        match self.static_prop_target(ctx, inst, true)? {
            Some(handle) => Ok(handle),
            None => Err(self.undeclared_static(ctx, inst)),
        }
    }

    /// ASSIGN_STATIC_PROP: op1 = class, op2 = property, OP_DATA op1 = value
    pub(crate) fn exec_assign_static_prop(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let value = self.op_data_value(ctx)?;
        let handle = self.writable_static(ctx, &inst)?;
        self.write_place(ctx, &Place::Cell(handle), value.clone())?;
        self.set_result(ctx, &inst, value)
    }

    /// ASSIGN_STATIC_PROP_OP: operator in `extended`, OP_DATA op1 = value
    pub(crate) fn exec_assign_static_prop_op(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let op = binary_op_of(&inst)?;
        let rhs = self.op_data_value(ctx)?;
        let handle = self.writable_static(ctx, &inst)?;
        let place = Place::Cell(handle);
        let current = self.read_place(ctx, &place);
        let result = self.binary_op(op, &current, &rhs)?;
        self.write_place(ctx, &place, result.clone())?;
        self.set_result(ctx, &inst, result)
    }

    /// PRE/POST_INC/DEC_STATIC_PROP
    pub(crate) fn exec_inc_dec_static_prop(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
        op: IncDecOp,
    ) -> Result<(), VmError> {
        let handle = self.writable_static(ctx, &inst)?;
        let result = self.inc_dec_place(ctx, &Place::Cell(handle), op)?;
        self.set_result(ctx, &inst, result)
    }

    /// ISSET_ISEMPTY_STATIC_PROP: unknown classes and properties answer
    /// "not set" instead of faulting
    pub(crate) fn exec_isset_isempty_static_prop(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let value = match self.static_prop_target(ctx, &inst, false) {
            Ok(Some(handle)) => Some(self.arena.deref(self.arena.get(handle)).clone()),
            _ => None,
        };
        let result = match (value, inst.extended == ISEMPTY) {
            (Some(v), false) => !v.is_null(),
            (Some(v), true) => !v.to_bool(),
            (None, empty) => empty,
        };
        self.set_result(ctx, &inst, Val::Bool(result))
    }

    /// FETCH_CLASS_CONSTANT: op1 = class, op2 = constant name. `X::class`
    /// yields the resolved name. The search walks parents, then interfaces.
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_FETCH_CLASS_CONSTANT
    pub(crate) fn exec_fetch_class_constant(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
    ) -> Result<(), VmError> {
        let class = self.static_class_operand(ctx, &inst)?;
        let name = self.name_operand(ctx, inst.op2_kind(), inst.op2);
        if name.eq_ignore_ascii_case("class") {
            return self.set_result(ctx, &inst, Val::string(class.as_bytes()));
        }
        let value = self.find_class_constant(&class, &name, ctx.class_scope.as_deref())?;
        self.set_result(ctx, &inst, value)
    }

    pub(crate) fn find_class_constant(
        &self,
        class: &str,
        name: &str,
        scope: Option<&str>,
    ) -> Result<Val, VmError> {
        let lineage = self.classes.lineage(class);
        let mut interfaces = Vec::new();
        for def in &lineage {
            if let Some(constant) = def.constants.get(name) {
                self.check_member_visibility(
                    MemberKind::Constant,
                    class,
                    name,
                    &def.name,
                    constant.visibility,
                    scope,
                )?;
                return Ok(constant.value.clone());
            }
            interfaces.extend(def.interfaces.iter().cloned());
        }
        while let Some(iface) = interfaces.pop() {
            if let Some(def) = self.classes.get_class(&iface) {
                if let Some(constant) = def.constants.get(name) {
                    return Ok(constant.value.clone());
                }
                interfaces.extend(def.interfaces.iter().cloned());
            }
        }
        Err(self.throw_error(
            "Error",
            &format!("Undefined constant {}::{}", class, name),
        ))
    }
}
