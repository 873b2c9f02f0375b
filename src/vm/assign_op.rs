use crate::core::value::{Number, Val, parse_numeric_prefix};
use crate::vm::engine::{ErrorLevel, VM, VmError};
use std::rc::Rc;

/// Binary operator shared by the plain arithmetic/bitwise opcodes and every
/// compound assignment (`ASSIGN_OP`, `ASSIGN_DIM_OP`, `ASSIGN_OBJ_OP`,
/// `ASSIGN_STATIC_PROP_OP`), whose `extended` byte carries the discriminant.
/// Ref: Zend/zend_vm_opcodes.h in PHP source (ZEND_ADD through ZEND_POW, minus 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BinaryOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
    Mod = 4,
    Sl = 5,
    Sr = 6,
    Concat = 7,
    BwOr = 8,
    BwAnd = 9,
    BwXor = 10,
    Pow = 11,
}

impl BinaryOp {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(Self::Add),
            1 => Some(Self::Sub),
            2 => Some(Self::Mul),
            3 => Some(Self::Div),
            4 => Some(Self::Mod),
            5 => Some(Self::Sl),
            6 => Some(Self::Sr),
            7 => Some(Self::Concat),
            8 => Some(Self::BwOr),
            9 => Some(Self::BwAnd),
            10 => Some(Self::BwXor),
            11 => Some(Self::Pow),
            _ => None,
        }
    }

    /// Operator as written in source, for error messages
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Sl => "<<",
            Self::Sr => ">>",
            Self::Concat => ".",
            Self::BwOr => "|",
            Self::BwAnd => "&",
            Self::BwXor => "^",
            Self::Pow => "**",
        }
    }

    /// Perform the operation with PHP-like type coercion. Objects reach here
    /// already converted when the operator is `.`.
    /// Ref: Zend/zend_operators.c - zend_binary_op()
    pub fn apply(self, left: &Val, right: &Val) -> Result<Val, VmError> {
        match self {
            Self::Concat => {
                let mut bytes = left.to_php_string_bytes();
                bytes.extend_from_slice(&right.to_php_string_bytes());
                Ok(Val::string(bytes))
            }
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Mod | Self::Pow => {
                self.arithmetic(left, right)
            }
            Self::Sl | Self::Sr | Self::BwOr | Self::BwAnd | Self::BwXor => {
                self.bitwise(left, right)
            }
        }
    }

    fn unsupported(self, left: &Val, right: &Val) -> VmError {
        VmError::type_error(
            "int|float",
            format!(
                "{} {} {}",
                left.type_name(),
                self.symbol(),
                right.type_name()
            ),
            "Unsupported operand types",
        )
    }

    fn arithmetic(self, left: &Val, right: &Val) -> Result<Val, VmError> {
        if let (Self::Add, Val::Array(a), Val::Array(b)) = (self, left, right) {
            // Array union: left-hand keys win
            let mut result = (**a).clone();
            for (k, v) in b.map.iter() {
                if !result.map.contains_key(k) {
                    result.insert(k.clone(), v.clone());
                }
            }
            return Ok(Val::Array(Rc::new(result)));
        }
        if !is_arithmetic_operand(left) || !is_arithmetic_operand(right) {
            return Err(self.unsupported(left, right));
        }

        let (a, b) = (left.to_number(), right.to_number());
        match self {
            Self::Mod => {
                let divisor = right.to_int();
                if divisor == 0 {
                    return Err(VmError::modulo_by_zero());
                }
                Ok(Val::Int(left.to_int().wrapping_rem(divisor)))
            }
            Self::Div => {
                if b.to_f64() == 0.0 {
                    return Err(VmError::division_by_zero());
                }
                match (a, b) {
                    (Number::Int(x), Number::Int(y)) if x.wrapping_rem(y) == 0 => {
                        match x.checked_div(y) {
                            Some(q) => Ok(Val::Int(q)),
                            None => Ok(Val::Float(x as f64 / y as f64)),
                        }
                    }
                    _ => Ok(Val::Float(a.to_f64() / b.to_f64())),
                }
            }
            Self::Pow => match (a, b) {
                (Number::Int(x), Number::Int(y)) if y >= 0 => {
                    match u32::try_from(y).ok().and_then(|e| x.checked_pow(e)) {
                        Some(p) => Ok(Val::Int(p)),
                        None => Ok(Val::Float((x as f64).powf(y as f64))),
                    }
                }
                _ => Ok(Val::Float(a.to_f64().powf(b.to_f64()))),
            },
            _ => Ok(match (a, b) {
                (Number::Int(x), Number::Int(y)) => Val::Int(match self {
                    Self::Add => x.wrapping_add(y),
                    Self::Sub => x.wrapping_sub(y),
                    _ => x.wrapping_mul(y),
                }),
                _ => {
                    let (x, y) = (a.to_f64(), b.to_f64());
                    Val::Float(match self {
                        Self::Add => x + y,
                        Self::Sub => x - y,
                        _ => x * y,
                    })
                }
            }),
        }
    }

    /// Ref: Zend/zend_operators.c - bitwise_or_function, shift_left_function
    fn bitwise(self, left: &Val, right: &Val) -> Result<Val, VmError> {
        if let (Val::String(a), Val::String(b)) = (left, right) {
            if matches!(self, Self::BwOr | Self::BwAnd | Self::BwXor) {
                return Ok(Val::string(bytewise(self, a, b)));
            }
        }
        if !is_arithmetic_operand(left) || !is_arithmetic_operand(right) {
            return Err(self.unsupported(left, right));
        }

        let (a, b) = (left.to_int(), right.to_int());
        let result = match self {
            Self::BwOr => a | b,
            Self::BwAnd => a & b,
            Self::BwXor => a ^ b,
            Self::Sl => {
                if b < 0 {
                    return Err(VmError::runtime("Bit shift by negative number"));
                }
                if b >= 64 { 0 } else { a.wrapping_shl(b as u32) }
            }
            _ => {
                if b < 0 {
                    return Err(VmError::runtime("Bit shift by negative number"));
                }
                // Arithmetic shift saturates at the sign bit
                a >> b.min(63)
            }
        };
        Ok(Val::Int(result))
    }
}

fn is_arithmetic_operand(val: &Val) -> bool {
    !matches!(val, Val::Array(_) | Val::Object(_) | Val::Closure(_))
}

fn bytewise(op: BinaryOp, a: &[u8], b: &[u8]) -> Vec<u8> {
    match op {
        BinaryOp::BwOr => {
            let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
            let mut out = long.to_vec();
            for (i, byte) in short.iter().enumerate() {
                out[i] |= byte;
            }
            out
        }
        BinaryOp::BwAnd => a.iter().zip(b).map(|(x, y)| x & y).collect(),
        _ => a.iter().zip(b).map(|(x, y)| x ^ y).collect(),
    }
}

impl VM {
    /// Apply a binary operator to dereferenced operands, converting objects
    /// through `__toString` for concatenation and warning about strings that
    /// are not fully numeric.
    pub(crate) fn binary_op(
        &mut self,
        op: BinaryOp,
        left: &Val,
        right: &Val,
    ) -> Result<Val, VmError> {
        if op == BinaryOp::Concat {
            let mut bytes = self.to_string_bytes(left)?;
            bytes.extend_from_slice(&self.to_string_bytes(right)?);
            return Ok(Val::string(bytes));
        }
        let both_strings = matches!((left, right), (Val::String(_), Val::String(_)));
        let bytewise = both_strings && matches!(op, BinaryOp::BwOr | BinaryOp::BwAnd | BinaryOp::BwXor);
        if !bytewise {
            self.warn_non_numeric(left);
            self.warn_non_numeric(right);
        }
        op.apply(left, right)
    }

    fn warn_non_numeric(&mut self, val: &Val) {
        if let Val::String(s) = val {
            if !parse_numeric_prefix(s).1 {
                self.report_error(ErrorLevel::Warning, "A non-numeric value encountered");
            }
        }
    }
}
