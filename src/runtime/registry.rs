use super::context::NativeHandler;
use crate::builtins::{array, function, string, variable};
use std::collections::HashMap;

/// Builtin-function collaborator consulted by the call protocol before user
/// functions. Names are matched case-insensitively.
pub trait BuiltinRegistry {
    fn get_function(&self, name: &[u8]) -> Option<NativeHandler>;

    fn has_function(&self, name: &[u8]) -> bool {
        self.get_function(name).is_some()
    }
}

/// Extension registry - native function handlers keyed by lowercase name
///
/// Built once per engine and shared between VMs behind an `Arc`.
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    functions: HashMap<Vec<u8>, NativeHandler>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the builtins the core ships with
    pub fn with_core_functions() -> Self {
        let mut registry = Self::new();

        registry.register_function(b"strlen", string::php_strlen);
        registry.register_function(b"str_repeat", string::php_str_repeat);
        registry.register_function(b"strtoupper", string::php_strtoupper);
        registry.register_function(b"implode", string::php_implode);

        registry.register_function(b"count", array::php_count);
        registry.register_function(b"array_merge", array::php_array_merge);
        registry.register_function(b"array_keys", array::php_array_keys);
        registry.register_function(b"array_values", array::php_array_values);

        registry.register_function(b"gettype", variable::php_gettype);
        registry.register_function(b"is_array", variable::php_is_array);
        registry.register_function(b"define", variable::php_define);

        registry.register_function(b"function_exists", function::php_function_exists);

        registry
    }

    /// Register a native function handler, replacing any previous one
    pub fn register_function(&mut self, name: &[u8], handler: NativeHandler) {
        self.functions.insert(name.to_ascii_lowercase(), handler);
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl BuiltinRegistry for ExtensionRegistry {
    fn get_function(&self, name: &[u8]) -> Option<NativeHandler> {
        let name = name.strip_prefix(b"\\").unwrap_or(name);
        self.functions.get(&name.to_ascii_lowercase()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = ExtensionRegistry::with_core_functions();
        assert!(registry.has_function(b"strlen"));
        assert!(registry.has_function(b"StrLen"));
        assert!(registry.has_function(b"\\array_merge"));
        assert!(!registry.has_function(b"no_such_function"));
    }

    #[test]
    fn test_register_overrides() {
        let mut registry = ExtensionRegistry::new();
        assert!(registry.is_empty());
        registry.register_function(b"Foo", string::php_strlen);
        registry.register_function(b"foo", string::php_strtoupper);
        assert_eq!(registry.len(), 1);
    }
}
