use crate::builtins::exception;
use crate::compiler::chunk::UserFunc;
use crate::core::value::{ObjectRef, Val};
use crate::vm::engine::{VM, VmError};
use crate::vm::generator;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::rc::Rc;

/// Builtin function: receives dereferenced argument values
pub type NativeHandler = fn(&mut VM, args: &[Val]) -> Result<Val, VmError>;

/// Native class method: receives the bound object (absent for static calls)
pub type NativeMethod =
    fn(&mut VM, this: Option<&ObjectRef>, args: &[Val]) -> Result<Val, VmError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

#[derive(Debug, Clone)]
pub enum MethodBody {
    User(Rc<UserFunc>),
    Native(NativeMethod),
}

#[derive(Debug, Clone)]
pub struct MethodEntry {
    pub name: Rc<str>,
    pub body: MethodBody,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_abstract: bool,
    pub declaring_class: Rc<str>,
}

impl MethodEntry {
    pub fn user(class: &Rc<str>, func: Rc<UserFunc>) -> Self {
        Self {
            name: func.name.clone(),
            is_static: func.is_static,
            body: MethodBody::User(func),
            visibility: Visibility::Public,
            is_abstract: false,
            declaring_class: class.clone(),
        }
    }

    pub fn native(class: &Rc<str>, name: &str, handler: NativeMethod) -> Self {
        Self {
            name: Rc::from(name),
            body: MethodBody::Native(handler),
            visibility: Visibility::Public,
            is_static: false,
            is_abstract: false,
            declaring_class: class.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PropertyEntry {
    pub default_value: Val,
    pub visibility: Visibility,
}

impl PropertyEntry {
    pub fn public(default_value: Val) -> Self {
        Self {
            default_value,
            visibility: Visibility::Public,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassConstant {
    pub value: Val,
    pub visibility: Visibility,
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: Rc<str>,
    pub parent: Option<Rc<str>>,
    pub is_interface: bool,
    pub is_abstract: bool,
    pub interfaces: Vec<Rc<str>>,
    /// Keyed by lowercase method name
    pub methods: HashMap<String, MethodEntry>,
    pub properties: IndexMap<Rc<str>, PropertyEntry>,
    pub static_properties: IndexMap<Rc<str>, PropertyEntry>,
    pub constants: IndexMap<Rc<str>, ClassConstant>,
}

impl ClassDef {
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            is_interface: false,
            is_abstract: false,
            interfaces: Vec::new(),
            methods: HashMap::new(),
            properties: IndexMap::new(),
            static_properties: IndexMap::new(),
            constants: IndexMap::new(),
        }
    }

    pub fn extends(mut self, parent: impl Into<Rc<str>>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn add_method(&mut self, entry: MethodEntry) {
        self.methods.insert(entry.name.to_ascii_lowercase(), entry);
    }

    pub fn add_user_method(&mut self, func: Rc<UserFunc>) {
        let entry = MethodEntry::user(&self.name, func);
        self.add_method(entry);
    }

    pub fn add_property(&mut self, name: &str, default_value: Val) {
        self.properties
            .insert(Rc::from(name), PropertyEntry::public(default_value));
    }

    pub fn add_static_property(&mut self, name: &str, default_value: Val) {
        self.static_properties
            .insert(Rc::from(name), PropertyEntry::public(default_value));
    }

    pub fn add_constant(&mut self, name: &str, value: Val) {
        self.constants.insert(
            Rc::from(name),
            ClassConstant {
                value,
                visibility: Visibility::Public,
            },
        );
    }
}

/// Class table collaborator. Lookups are case-insensitive.
///
/// Only `get_class` and `register_class` are required; the hierarchy walks are
/// provided on top of them.
pub trait ClassRegistry {
    fn get_class(&self, name: &str) -> Option<Rc<ClassDef>>;

    fn register_class(&mut self, class: ClassDef);

    fn has_class(&self, name: &str) -> bool {
        self.get_class(name).is_some()
    }

    /// Find a method on the class or its ancestors
    /// Reference: $PHP_SRC_PATH/Zend/zend_object_handlers.c - zend_std_get_method
    fn find_method(&self, class: &str, method: &str) -> Option<MethodEntry> {
        let key = method.to_ascii_lowercase();
        let mut current = self.get_class(class);
        while let Some(def) = current {
            if let Some(entry) = def.methods.get(&key) {
                return Some(entry.clone());
            }
            current = def.parent.as_deref().and_then(|p| self.get_class(p));
        }
        None
    }

    fn has_method(&self, class: &str, method: &str) -> bool {
        self.find_method(class, method).is_some()
    }

    /// Class and ancestors, most-derived first
    fn lineage(&self, class: &str) -> Vec<Rc<ClassDef>> {
        let mut chain = Vec::new();
        let mut current = self.get_class(class);
        while let Some(def) = current {
            current = def.parent.as_deref().and_then(|p| self.get_class(p));
            chain.push(def);
            if chain.len() > 256 {
                break;
            }
        }
        chain
    }

    /// `class instanceof target`, following parents and interfaces
    /// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - instanceof_function
    fn is_subclass_of(&self, class: &str, target: &str) -> bool {
        if class.eq_ignore_ascii_case(target) {
            return true;
        }
        for def in self.lineage(class) {
            if def.name.eq_ignore_ascii_case(target) {
                return true;
            }
            for iface in &def.interfaces {
                if self.is_subclass_of(iface, target) {
                    return true;
                }
            }
        }
        false
    }
}

/// Default registry: a flat case-insensitive map
#[derive(Debug, Default)]
pub struct InMemoryClassRegistry {
    classes: HashMap<String, Rc<ClassDef>>,
}

impl InMemoryClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the classes the engine itself relies on
    pub fn with_core_classes() -> Self {
        let mut registry = Self::new();

        registry.register_class(ClassDef::new("stdClass"));

        let mut throwable = ClassDef::new("Throwable");
        throwable.is_interface = true;
        registry.register_class(throwable);

        for base in ["Exception", "Error"] {
            let mut def = ClassDef::new(base);
            def.interfaces.push(Rc::from("Throwable"));
            def.add_property("message", Val::string(""));
            def.add_property("code", Val::Int(0));
            def.add_property("previous", Val::Null);
            def.add_property("file", Val::string(""));
            def.add_property("line", Val::Int(0));
            let name = def.name.clone();
            def.add_method(MethodEntry::native(&name, "__construct", exception::construct));
            def.add_method(MethodEntry::native(&name, "getMessage", exception::get_message));
            def.add_method(MethodEntry::native(&name, "getCode", exception::get_code));
            def.add_method(MethodEntry::native(&name, "getPrevious", exception::get_previous));
            registry.register_class(def);
        }

        for (name, parent) in [
            ("ErrorException", "Exception"),
            ("RuntimeException", "Exception"),
            ("LogicException", "Exception"),
            ("InvalidArgumentException", "LogicException"),
            ("TypeError", "Error"),
            ("ArgumentCountError", "TypeError"),
            ("ValueError", "Error"),
            ("ArithmeticError", "Error"),
            ("DivisionByZeroError", "ArithmeticError"),
            ("UnhandledMatchError", "Error"),
            ("CompileError", "Error"),
            ("ParseError", "CompileError"),
        ] {
            registry.register_class(ClassDef::new(name).extends(parent));
        }

        registry.register_class(ClassDef::new("Closure"));

        let mut gen_class = ClassDef::new("Generator");
        gen_class.interfaces.push(Rc::from("Traversable"));
        let name = gen_class.name.clone();
        let methods: [(&str, NativeMethod); 7] = [
            ("current", generator::current),
            ("key", generator::key),
            ("next", generator::next),
            ("send", generator::send),
            ("valid", generator::valid),
            ("rewind", generator::rewind),
            ("getReturn", generator::get_return),
        ];
        for (method, handler) in methods {
            gen_class.add_method(MethodEntry::native(&name, method, handler));
        }
        registry.register_class(gen_class);

        let mut traversable = ClassDef::new("Traversable");
        traversable.is_interface = true;
        registry.register_class(traversable);

        registry
    }
}

impl ClassRegistry for InMemoryClassRegistry {
    fn get_class(&self, name: &str) -> Option<Rc<ClassDef>> {
        let name = name.strip_prefix('\\').unwrap_or(name);
        self.classes.get(&name.to_ascii_lowercase()).cloned()
    }

    fn register_class(&mut self, class: ClassDef) {
        self.classes
            .insert(class.name.to_ascii_lowercase(), Rc::new(class));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_hierarchy() {
        let registry = InMemoryClassRegistry::with_core_classes();
        assert!(registry.has_class("exception"));
        assert!(registry.is_subclass_of("InvalidArgumentException", "Exception"));
        assert!(registry.is_subclass_of("TypeError", "Throwable"));
        assert!(!registry.is_subclass_of("TypeError", "Exception"));
    }

    #[test]
    fn test_method_lookup_walks_parents() {
        let registry = InMemoryClassRegistry::with_core_classes();
        assert!(registry.has_method("RuntimeException", "GETMESSAGE"));
        assert!(!registry.has_method("stdClass", "getMessage"));

        let entry = registry
            .find_method("LogicException", "getCode")
            .expect("inherited method");
        assert_eq!(entry.declaring_class.as_ref(), "Exception");
    }

    #[test]
    fn test_lineage_order() {
        let registry = InMemoryClassRegistry::with_core_classes();
        let names: Vec<String> = registry
            .lineage("InvalidArgumentException")
            .iter()
            .map(|d| d.name.to_string())
            .collect();
        assert_eq!(
            names,
            vec!["InvalidArgumentException", "LogicException", "Exception"]
        );
    }
}
