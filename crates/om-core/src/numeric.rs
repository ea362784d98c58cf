//! Numeric promotion, arithmetic, comparison and conversion
//!
//! Operand pairs are first promoted to a common kind: same-kind pairs keep
//! their native width, mixed byte/char/short pairs meet at `int`, and any
//! other mixed numeric pair widens to the larger of the two kinds along
//! `byte/char/short < int < long < double`.

use crate::value::Value;
use crate::{VmError, VmResult};
use om_bytecode::ConvertKind;
use std::cmp::Ordering;

/// Binary arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    /// `add`
    Add,
    /// `sub`
    Sub,
    /// `mul`
    Mul,
    /// `div`
    Div,
    /// `mod`
    Mod,
}

/// Comparison operator shared by `c*` and fused `jc*` opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Less than
    Lt,
    /// Less or equal
    Le,
    /// Greater than
    Gt,
    /// Greater or equal
    Ge,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }

    fn is_equality(self) -> bool {
        matches!(self, CompareOp::Eq | CompareOp::Ne)
    }
}

/// A pair of numeric operands promoted to one kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Promoted {
    /// Both bytes
    Byte(u8, u8),
    /// Both chars
    Char(u16, u16),
    /// Both shorts
    Short(i16, i16),
    /// Int
    Int(i32, i32),
    /// Long
    Long(i64, i64),
    /// Double
    Double(f64, f64),
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Small,
    Int,
    Long,
    Double,
}

fn rank(value: &Value) -> Option<Rank> {
    match value {
        Value::Byte(_) | Value::Char(_) | Value::Short(_) => Some(Rank::Small),
        Value::Int(_) => Some(Rank::Int),
        Value::Long(_) => Some(Rank::Long),
        Value::Double(_) => Some(Rank::Double),
        _ => None,
    }
}

fn as_f64(value: &Value) -> f64 {
    match *value {
        Value::Double(v) => v,
        ref other => other.as_integral().unwrap_or(0) as f64,
    }
}

/// Promote two operands to a common numeric kind
pub fn promote(a: &Value, b: &Value) -> Option<Promoted> {
    match (a, b) {
        (Value::Byte(x), Value::Byte(y)) => return Some(Promoted::Byte(*x, *y)),
        (Value::Char(x), Value::Char(y)) => return Some(Promoted::Char(*x, *y)),
        (Value::Short(x), Value::Short(y)) => return Some(Promoted::Short(*x, *y)),
        _ => {}
    }
    let rank = rank(a)?.max(rank(b)?);
    Some(match rank {
        Rank::Small | Rank::Int => Promoted::Int(a.as_integral()? as i32, b.as_integral()? as i32),
        Rank::Long => Promoted::Long(a.as_integral()?, b.as_integral()?),
        Rank::Double => Promoted::Double(as_f64(a), as_f64(b)),
    })
}

fn type_error(op: &str, a: &Value, b: &Value) -> VmError {
    VmError::TypeError(format!(
        "cannot apply {} to {} and {}",
        op,
        a.type_name(),
        b.type_name()
    ))
}

macro_rules! integral_arith {
    ($op:expr, $x:expr, $y:expr, $variant:ident) => {
        match $op {
            ArithOp::Add => Value::$variant($x.wrapping_add($y)),
            ArithOp::Sub => Value::$variant($x.wrapping_sub($y)),
            ArithOp::Mul => Value::$variant($x.wrapping_mul($y)),
            ArithOp::Div => {
                if $y == 0 {
                    return Err(VmError::DivisionByZero);
                }
                Value::$variant($x.wrapping_div($y))
            }
            ArithOp::Mod => {
                if $y == 0 {
                    return Err(VmError::DivisionByZero);
                }
                Value::$variant($x.wrapping_rem($y))
            }
        }
    };
}

/// Numeric arithmetic; string concatenation is handled by the caller
pub fn arith(op: ArithOp, a: &Value, b: &Value) -> VmResult<Value> {
    let pair = promote(a, b).ok_or_else(|| type_error(arith_name(op), a, b))?;
    Ok(match pair {
        Promoted::Byte(x, y) => integral_arith!(op, x, y, Byte),
        Promoted::Char(x, y) => integral_arith!(op, x, y, Char),
        Promoted::Short(x, y) => integral_arith!(op, x, y, Short),
        Promoted::Int(x, y) => integral_arith!(op, x, y, Int),
        Promoted::Long(x, y) => integral_arith!(op, x, y, Long),
        Promoted::Double(x, y) => Value::Double(match op {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
            ArithOp::Div => x / y,
            ArithOp::Mod => x % y,
        }),
    })
}

fn arith_name(op: ArithOp) -> &'static str {
    match op {
        ArithOp::Add => "add",
        ArithOp::Sub => "sub",
        ArithOp::Mul => "mul",
        ArithOp::Div => "div",
        ArithOp::Mod => "mod",
    }
}

/// Arithmetic negation
pub fn negate(value: &Value) -> VmResult<Value> {
    Ok(match *value {
        Value::Byte(v) => Value::Byte(v.wrapping_neg()),
        Value::Char(v) => Value::Char(v.wrapping_neg()),
        Value::Short(v) => Value::Short(v.wrapping_neg()),
        Value::Int(v) => Value::Int(v.wrapping_neg()),
        Value::Long(v) => Value::Long(v.wrapping_neg()),
        Value::Double(v) => Value::Double(-v),
        ref other => {
            return Err(VmError::TypeError(format!(
                "cannot negate {}",
                other.type_name()
            )))
        }
    })
}

/// Logical not on bools, bitwise not on integers
pub fn not(value: &Value) -> VmResult<Value> {
    Ok(match *value {
        Value::Bool(b) => Value::Bool(!b),
        Value::Byte(v) => Value::Byte(!v),
        Value::Char(v) => Value::Char(!v),
        Value::Short(v) => Value::Short(!v),
        Value::Int(v) => Value::Int(!v),
        Value::Long(v) => Value::Long(!v),
        ref other => {
            return Err(VmError::TypeError(format!(
                "cannot apply not to {}",
                other.type_name()
            )))
        }
    })
}

fn ordering(pair: Promoted) -> Option<Ordering> {
    match pair {
        Promoted::Byte(x, y) => Some(x.cmp(&y)),
        Promoted::Char(x, y) => Some(x.cmp(&y)),
        Promoted::Short(x, y) => Some(x.cmp(&y)),
        Promoted::Int(x, y) => Some(x.cmp(&y)),
        Promoted::Long(x, y) => Some(x.cmp(&y)),
        Promoted::Double(x, y) => x.partial_cmp(&y),
    }
}

/// Evaluate a comparison
///
/// Equality against null is defined for every kind. Ordering needs two
/// numbers or two strings. References compare by identity.
pub fn compare(op: CompareOp, a: &Value, b: &Value) -> VmResult<bool> {
    if let Some(pair) = promote(a, b) {
        // NaN is unordered: only `cne` holds
        return Ok(match ordering(pair) {
            Some(ord) => op.holds(ord),
            None => op == CompareOp::Ne,
        });
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(op.holds(x.as_ref().cmp(y.as_ref()))),
        _ if op.is_equality() => {
            let equal = match (a, b) {
                (Value::Null, Value::Null) => true,
                (Value::Null, _) | (_, Value::Null) => false,
                (Value::Bool(x), Value::Bool(y)) => x == y,
                (Value::Array(_), Value::Array(_))
                | (Value::Object(_), Value::Object(_))
                | (Value::Class(_), Value::Class(_)) => a.same_ref(b),
                _ => return Err(type_error("comparison", a, b)),
            };
            Ok(equal == (op == CompareOp::Eq))
        }
        _ => Err(type_error("comparison", a, b)),
    }
}

fn conversion_failed(value: &Value, target: &'static str) -> VmError {
    VmError::ConversionFailed {
        value: value.to_string(),
        target,
    }
}

/// `convert` to a primitive kind; string conversion is handled by the caller
pub fn convert(value: &Value, kind: ConvertKind) -> VmResult<Value> {
    if let Value::Str(s) = value {
        return parse(value, s.trim(), kind);
    }
    let target = kind_name(kind);
    let integral = match value {
        Value::Double(d) => Some(*d as i64),
        Value::Bool(b) => Some(*b as i64),
        other => other.as_integral(),
    };
    let Some(n) = integral else {
        return Err(conversion_failed(value, target));
    };
    Ok(match kind {
        ConvertKind::Byte => Value::Byte(n as u8),
        ConvertKind::Char => Value::Char(n as u16),
        ConvertKind::Short => Value::Short(n as i16),
        ConvertKind::Int => Value::Int(n as i32),
        ConvertKind::Long => Value::Long(n),
        ConvertKind::Double => match value {
            Value::Double(d) => Value::Double(*d),
            _ => Value::Double(n as f64),
        },
        ConvertKind::Bool => match value {
            Value::Double(d) => Value::Bool(*d != 0.0),
            _ => Value::Bool(n != 0),
        },
        ConvertKind::String => Value::string(value.to_string()),
    })
}

fn parse(value: &Value, text: &str, kind: ConvertKind) -> VmResult<Value> {
    let target = kind_name(kind);
    let failed = || conversion_failed(value, target);
    Ok(match kind {
        ConvertKind::Byte => Value::Byte(text.parse().map_err(|_| failed())?),
        ConvertKind::Char => Value::Char(text.encode_utf16().next().ok_or_else(failed)?),
        ConvertKind::Short => Value::Short(text.parse().map_err(|_| failed())?),
        ConvertKind::Int => Value::Int(text.parse().map_err(|_| failed())?),
        ConvertKind::Long => Value::Long(text.parse().map_err(|_| failed())?),
        ConvertKind::Double => Value::Double(text.parse().map_err(|_| failed())?),
        ConvertKind::Bool => Value::Bool(text.parse().map_err(|_| failed())?),
        ConvertKind::String => value.clone(),
    })
}

fn kind_name(kind: ConvertKind) -> &'static str {
    match kind {
        ConvertKind::Byte => "byte",
        ConvertKind::Char => "char",
        ConvertKind::Short => "short",
        ConvertKind::Int => "int",
        ConvertKind::Long => "long",
        ConvertKind::Double => "double",
        ConvertKind::Bool => "bool",
        ConvertKind::String => "string",
    }
}
