//! Error construction helpers
//!
//! Provides convenient methods for creating specific VmError variants,
//! making error handling more ergonomic throughout the codebase.

use crate::vm::engine::VmError;

impl VmError {
    /// Create a type error
    pub fn type_error(
        expected: impl Into<String>,
        got: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        VmError::TypeError {
            expected: expected.into(),
            got: got.into(),
            operation,
        }
    }

    /// Create an undefined variable error
    pub fn undefined_variable(name: impl Into<String>) -> Self {
        VmError::UndefinedVariable { name: name.into() }
    }

    /// Create an undefined function error
    pub fn undefined_function(name: impl Into<String>) -> Self {
        VmError::UndefinedFunction { name: name.into() }
    }

    pub fn undefined_class(name: impl Into<String>) -> Self {
        VmError::UndefinedClass { name: name.into() }
    }

    /// Create an undefined method error
    pub fn undefined_method(class: impl Into<String>, method: impl Into<String>) -> Self {
        VmError::UndefinedMethod {
            class: class.into(),
            method: method.into(),
        }
    }

    pub fn undefined_property(class: impl Into<String>, property: impl Into<String>) -> Self {
        VmError::UndefinedProperty {
            class: class.into(),
            property: property.into(),
        }
    }

    pub fn undefined_constant(name: impl Into<String>) -> Self {
        VmError::UndefinedConstant { name: name.into() }
    }

    /// Create a division by zero error
    pub fn division_by_zero() -> Self {
        VmError::DivisionByZero
    }

    pub fn modulo_by_zero() -> Self {
        VmError::ModuloByZero
    }

    pub fn missing_argument(function: impl Into<String>, passed: usize, expected: usize) -> Self {
        VmError::MissingArgument {
            function: function.into(),
            passed,
            expected,
        }
    }

    pub fn not_implemented(what: impl Into<String>) -> Self {
        VmError::NotImplemented(what.into())
    }

    /// Create a generic runtime error
    pub fn runtime(message: impl Into<String>) -> Self {
        VmError::RuntimeError(message.into())
    }

    /// True for a language-level exception that handlers may still catch
    pub fn is_exception(&self) -> bool {
        matches!(self, VmError::Exception(_))
    }
}
