//! Comparison operations
//!
//! Implements PHP comparison operations following Zend semantics.
//!
//! ## PHP Semantics
//!
//! PHP supports two types of equality:
//! - **Loose equality** (`==`): Compares after type juggling
//! - **Strict equality** (`===`): Compares types and values
//!
//! Type juggling rules for comparisons:
//! - Numeric strings compared as numbers
//! - A number against a non-numeric string compares as strings
//! - Boolean comparisons convert to bool first
//! - null equals "" and is less than any truthy value
//! - Arrays compared by length, then key-by-key
//!
//! ## Operations
//!
//! - **Equal** / **NotEqual**: `==`, `!=`, and `CASE` in switch
//! - **Identical** / **NotIdentical**: `===`, `!==`, and `CASE_STRICT` in match
//! - **Less**, **LessOrEqual**, **Greater**, **GreaterOrEqual**: via a single three-way compare
//! - **Spaceship**: `$a <=> $b` - Three-way comparison (-1, 0, 1)
//!
//! ## References
//!
//! - Zend: `$PHP_SRC_PATH/Zend/zend_operators.c` - zend_compare, zend_is_identical
//! - PHP Manual: https://www.php.net/manual/en/language.operators.comparison.php

use crate::core::heap::Arena;
use crate::core::value::{Number, Val, parse_numeric_prefix};
use crate::vm::engine::{VM, VmError};
use crate::vm::frame::ExecutionContext;
use crate::vm::opcode::Instruction;
use std::cmp::Ordering;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Identical,
    NotIdentical,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Spaceship,
}

impl VM {
    /// IS_EQUAL, IS_NOT_EQUAL, IS_IDENTICAL, IS_NOT_IDENTICAL, IS_SMALLER,
    /// IS_SMALLER_OR_EQUAL, CASE, CASE_STRICT and SPACESHIP
    /// Reference: $PHP_SRC_PATH/Zend/zend_vm_def.h - ZEND_IS_EQUAL, ZEND_SPACESHIP
    pub(crate) fn exec_compare(
        &mut self,
        ctx: &mut ExecutionContext,
        inst: Instruction,
        op: CompareOp,
    ) -> Result<(), VmError> {
        let a = self.op1(ctx, &inst);
        let b = self.op2(ctx, &inst);
        let arena = &self.arena;
        let result = match op {
            CompareOp::Equal => Val::Bool(loose_equals(arena, &a, &b)),
            CompareOp::NotEqual => Val::Bool(!loose_equals(arena, &a, &b)),
            CompareOp::Identical => Val::Bool(strict_equals(arena, &a, &b)),
            CompareOp::NotIdentical => Val::Bool(!strict_equals(arena, &a, &b)),
            CompareOp::Less => Val::Bool(compare_values(arena, &a, &b) < 0),
            CompareOp::LessOrEqual => Val::Bool(compare_values(arena, &a, &b) <= 0),
            CompareOp::Greater => Val::Bool(compare_values(arena, &a, &b) > 0),
            CompareOp::GreaterOrEqual => Val::Bool(compare_values(arena, &a, &b) >= 0),
            CompareOp::Spaceship => Val::Int(compare_values(arena, &a, &b)),
        };
        self.set_result(ctx, &inst, result)
    }
}

/// Strict (type + value) equality, seeing through reference cells inside arrays
/// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - zend_is_identical
pub fn strict_equals(arena: &Arena, a: &Val, b: &Val) -> bool {
    let (a, b) = (arena.deref(a), arena.deref(b));
    match (a, b) {
        (Val::Array(x), Val::Array(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            // Same key/value pairs in the same order
            x.len() == y.len()
                && x.map.iter().zip(y.map.iter()).all(|((ka, va), (kb, vb))| {
                    ka == kb && strict_equals(arena, va, vb)
                })
        }
        _ => a == b,
    }
}

/// PHP loose equality (==) with type juggling
/// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - zend_compare
pub fn loose_equals(arena: &Arena, a: &Val, b: &Val) -> bool {
    let (a, b) = (arena.deref(a), arena.deref(b));
    match (a, b) {
        (Val::Null, Val::Null) => true,
        (Val::Bool(x), _) => *x == b.to_bool(),
        (_, Val::Bool(y)) => a.to_bool() == *y,
        (Val::Null, Val::String(s)) | (Val::String(s), Val::Null) => s.is_empty(),
        (Val::Null, _) => !b.to_bool(),
        (_, Val::Null) => !a.to_bool(),
        (Val::String(x), Val::String(y)) => match (numeric(x), numeric(y)) {
            (Some(m), Some(n)) => m.to_f64() == n.to_f64(),
            _ => x == y,
        },
        (Val::Array(x), Val::Array(y)) => {
            x.len() == y.len()
                && x.map.iter().all(|(k, va)| match y.get(k) {
                    Some(vb) => loose_equals(arena, va, vb),
                    None => false,
                })
        }
        (Val::Object(x), Val::Object(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.class == y.class
                && x.properties.len() == y.properties.len()
                && x.properties.iter().all(|(k, va)| match y.properties.get(k) {
                    Some(vb) => loose_equals(arena, va, vb),
                    None => false,
                })
        }
        (Val::Closure(x), Val::Closure(y)) => Rc::ptr_eq(x, y),
        _ => compare_values(arena, a, b) == 0 && is_comparable_scalar(a) && is_comparable_scalar(b),
    }
}

fn is_comparable_scalar(v: &Val) -> bool {
    matches!(v, Val::Int(_) | Val::Float(_) | Val::String(_))
}

fn numeric(s: &[u8]) -> Option<Number> {
    let (n, whole) = parse_numeric_prefix(s);
    whole.then_some(n)
}

fn ordering_to_int(ord: Option<Ordering>) -> i64 {
    match ord {
        Some(Ordering::Less) => -1,
        Some(Ordering::Equal) => 0,
        // NaN and incomparable values order as "greater"
        Some(Ordering::Greater) | None => 1,
    }
}

fn compare_numbers(a: Number, b: Number) -> i64 {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => ordering_to_int(Some(x.cmp(&y))),
        _ => ordering_to_int(a.to_f64().partial_cmp(&b.to_f64())),
    }
}

fn compare_bytes(a: &[u8], b: &[u8]) -> i64 {
    ordering_to_int(Some(a.cmp(b)))
}

/// PHP comparison function - returns -1, 0, or 1
/// Reference: $PHP_SRC_PATH/Zend/zend_operators.c - zend_compare
pub fn compare_values(arena: &Arena, a: &Val, b: &Val) -> i64 {
    let (a, b) = (arena.deref(a), arena.deref(b));
    match (a, b) {
        (Val::Int(_) | Val::Float(_), Val::Int(_) | Val::Float(_)) => {
            compare_numbers(a.to_number(), b.to_number())
        }
        (Val::String(x), Val::String(y)) => match (numeric(x), numeric(y)) {
            (Some(m), Some(n)) => compare_numbers(m, n),
            _ => compare_bytes(x, y),
        },
        (Val::Int(_) | Val::Float(_), Val::String(s)) => match numeric(s) {
            Some(n) => compare_numbers(a.to_number(), n),
            None => compare_bytes(&a.to_php_string_bytes(), s),
        },
        (Val::String(s), Val::Int(_) | Val::Float(_)) => match numeric(s) {
            Some(n) => compare_numbers(n, b.to_number()),
            None => compare_bytes(s, &b.to_php_string_bytes()),
        },
        (Val::Null, Val::String(s)) => compare_bytes(b"", s),
        (Val::String(s), Val::Null) => compare_bytes(s, b""),
        (Val::Bool(_) | Val::Null, _) | (_, Val::Bool(_) | Val::Null) => {
            ordering_to_int(Some(a.to_bool().cmp(&b.to_bool())))
        }
        (Val::Array(x), Val::Array(y)) => {
            if x.len() != y.len() {
                return ordering_to_int(Some(x.len().cmp(&y.len())));
            }
            for (k, va) in x.map.iter() {
                match y.get(k) {
                    Some(vb) => {
                        let c = compare_values(arena, va, vb);
                        if c != 0 {
                            return c;
                        }
                    }
                    None => return 1,
                }
            }
            0
        }
        (Val::Array(_), _) => 1,
        (_, Val::Array(_)) => -1,
        (Val::Object(x), Val::Object(y)) => {
            if Rc::ptr_eq(x, y) {
                return 0;
            }
            let (x, y) = (x.borrow(), y.borrow());
            if x.class != y.class {
                return 1;
            }
            for (k, va) in x.properties.iter() {
                match y.properties.get(k) {
                    Some(vb) => {
                        let c = compare_values(arena, va, vb);
                        if c != 0 {
                            return c;
                        }
                    }
                    None => return 1,
                }
            }
            0
        }
        // Objects are greater than any scalar
        (Val::Object(_) | Val::Closure(_), _) => 1,
        (_, Val::Object(_) | Val::Closure(_)) => -1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::ArrayData;

    #[test]
    fn test_loose_vs_strict() {
        let arena = Arena::new();
        assert!(loose_equals(&arena, &Val::Int(1), &Val::string("1")));
        assert!(!strict_equals(&arena, &Val::Int(1), &Val::string("1")));
        assert!(loose_equals(&arena, &Val::Null, &Val::string("")));
        assert!(loose_equals(&arena, &Val::string("1e1"), &Val::string("10")));
        assert!(!loose_equals(&arena, &Val::Int(0), &Val::string("a")));
        assert!(loose_equals(&arena, &Val::Bool(true), &Val::string("a")));
    }

    #[test]
    fn test_three_way() {
        let arena = Arena::new();
        assert_eq!(compare_values(&arena, &Val::Int(1), &Val::Int(2)), -1);
        assert_eq!(compare_values(&arena, &Val::Float(2.5), &Val::Int(2)), 1);
        assert_eq!(compare_values(&arena, &Val::string("abc"), &Val::string("abd")), -1);
        assert_eq!(compare_values(&arena, &Val::string("10"), &Val::string("9")), 1);
        assert_eq!(compare_values(&arena, &Val::Null, &Val::Int(0)), 0);
    }

    #[test]
    fn test_arrays_compare_by_size_then_values() {
        let arena = Arena::new();
        let small = Val::Array(Rc::new(ArrayData::from(vec![Val::Int(5)])));
        let large = Val::Array(Rc::new(ArrayData::from(vec![Val::Int(1), Val::Int(2)])));
        assert_eq!(compare_values(&arena, &small, &large), -1);

        let loose = Val::Array(Rc::new(ArrayData::from(vec![Val::string("5")])));
        assert!(loose_equals(&arena, &small, &loose));
        assert!(!strict_equals(&arena, &small, &loose));
    }

    #[test]
    fn test_references_are_seen_through() {
        let mut arena = Arena::new();
        let h = arena.alloc(Val::Int(3));
        assert!(strict_equals(&arena, &Val::Reference(h), &Val::Int(3)));
    }
}
