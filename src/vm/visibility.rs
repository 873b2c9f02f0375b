//! Visibility checking and access control
//!
//! Implements PHP visibility rules for class members (properties, methods, constants).
//! Following Zend engine semantics for public, protected, and private access.
//!
//! ## PHP Visibility Rules
//!
//! - **Public**: Accessible from anywhere
//! - **Protected**: Accessible from the same class hierarchy
//! - **Private**: Accessible only from the declaring class
//!
//! Violations are thrown as `Error` exceptions so scripts can catch them.
//!
//! ## References
//!
//! - Zend: `$PHP_SRC_PATH/Zend/zend_compile.c` - zend_check_visibility
//! - PHP Manual: https://www.php.net/manual/en/language.oop5.visibility.php

use crate::runtime::context::Visibility;
use crate::vm::engine::{VM, VmError};

/// Member kinds for error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MemberKind {
    Method,
    Property,
    Constant,
}

impl VM {
    /// Unified visibility check following Zend rules
    /// Reference: $PHP_SRC_PATH/Zend/zend_object_handlers.c - zend_check_protected
    pub(crate) fn is_visible_from(
        &self,
        declaring_class: &str,
        visibility: Visibility,
        scope: Option<&str>,
    ) -> bool {
        match (visibility, scope) {
            (Visibility::Public, _) => true,
            (_, None) => false,
            (Visibility::Private, Some(scope)) => scope.eq_ignore_ascii_case(declaring_class),
            (Visibility::Protected, Some(scope)) => {
                self.classes.is_subclass_of(scope, declaring_class)
                    || self.classes.is_subclass_of(declaring_class, scope)
            }
        }
    }

    /// Throw `Error` when the member is not visible from `scope`
    pub(crate) fn check_member_visibility(
        &self,
        kind: MemberKind,
        class: &str,
        member: &str,
        declaring_class: &str,
        visibility: Visibility,
        scope: Option<&str>,
    ) -> Result<(), VmError> {
        if self.is_visible_from(declaring_class, visibility, scope) {
            return Ok(());
        }
        let vis = match visibility {
            Visibility::Private => "private",
            _ => "protected",
        };
        let message = match kind {
            MemberKind::Method => {
                let from = match scope {
                    Some(scope) => format!("scope {}", scope),
                    None => "global scope".to_string(),
                };
                format!("Call to {} method {}::{}() from {}", vis, class, member, from)
            }
            MemberKind::Property => format!("Cannot access {} property {}::${}", vis, class, member),
            MemberKind::Constant => format!("Cannot access {} constant {}::{}", vis, class, member),
        };
        Err(self.throw_error("Error", &message))
    }
}
