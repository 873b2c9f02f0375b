//! Native functions and methods shipped with the core
//!
//! A small set that exercises the collaborator seams; hosts register more
//! through [`crate::runtime::registry::ExtensionRegistry`].

pub mod array;
pub mod exception;
pub mod function;
pub mod string;
pub mod variable;
