//! SQL values exchanged with the record store
//!
//! The store's scalar model is narrower than full SQL: whole numbers, floats,
//! money-style decimals, strings, dates and timestamps, guids and raw bytes.
//! String comparison follows the store's case-insensitive collation; the
//! single point implementing that fold is [`Value::fold_case`].

use crate::error::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A row of values, laid out per the compiled query's output column order.
pub type Row = Vec<Value>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Decimal(Decimal),
    Str(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Uuid(Uuid),
    Bytea(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::I64(_) | Value::F64(_) | Value::Decimal(_))
    }

    /// Convert to boolean for predicate evaluation. NULL is falsy, which is
    /// the correct WHERE-clause treatment of UNKNOWN.
    pub fn to_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Null => Ok(false),
            Value::I64(n) => Ok(*n != 0),
            other => Err(Error::TypeMismatch {
                expected: "boolean".into(),
                found: format!("{:?}", other),
            }),
        }
    }

    pub fn to_f64(&self) -> Result<f64> {
        match self {
            Value::I64(n) => Ok(*n as f64),
            Value::F64(n) => Ok(*n),
            Value::Decimal(d) => d
                .to_f64()
                .ok_or_else(|| Error::InvalidValue("decimal out of f64 range".into())),
            other => Err(Error::TypeMismatch {
                expected: "numeric".into(),
                found: format!("{:?}", other),
            }),
        }
    }

    /// The store compares and groups strings case-insensitively. Folding with
    /// an uppercase map is how the client mirrors that; finer collation rules
    /// stay on the store side.
    pub fn fold_case(&self) -> Value {
        match self {
            Value::Str(s) => Value::Str(s.to_uppercase()),
            other => other.clone(),
        }
    }

    // Arithmetic. Callers are expected to have handled NULL operands already
    // (three-valued logic is applied once, in the scalar compiler), so a NULL
    // reaching these is an internal error surfaced as a type mismatch.

    pub fn add(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::I64(a), Value::I64(b)) => a
                .checked_add(*b)
                .map(Value::I64)
                .ok_or_else(|| Error::InvalidValue("integer overflow in addition".into())),
            (Value::Decimal(a), Value::Decimal(b)) => Ok(Value::Decimal(a + b)),
            (Value::Decimal(a), Value::I64(b)) => Ok(Value::Decimal(a + Decimal::from(*b))),
            (Value::I64(a), Value::Decimal(b)) => Ok(Value::Decimal(Decimal::from(*a) + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
            (a, b) if a.is_numeric() && b.is_numeric() => Ok(Value::F64(a.to_f64()? + b.to_f64()?)),
            (a, b) => Err(Self::binary_mismatch("+", a, b)),
        }
    }

    pub fn subtract(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::I64(a), Value::I64(b)) => a
                .checked_sub(*b)
                .map(Value::I64)
                .ok_or_else(|| Error::InvalidValue("integer overflow in subtraction".into())),
            (Value::Decimal(a), Value::Decimal(b)) => Ok(Value::Decimal(a - b)),
            (Value::Decimal(a), Value::I64(b)) => Ok(Value::Decimal(a - Decimal::from(*b))),
            (Value::I64(a), Value::Decimal(b)) => Ok(Value::Decimal(Decimal::from(*a) - b)),
            (a, b) if a.is_numeric() && b.is_numeric() => Ok(Value::F64(a.to_f64()? - b.to_f64()?)),
            (a, b) => Err(Self::binary_mismatch("-", a, b)),
        }
    }

    pub fn multiply(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::I64(a), Value::I64(b)) => a
                .checked_mul(*b)
                .map(Value::I64)
                .ok_or_else(|| Error::InvalidValue("integer overflow in multiplication".into())),
            (Value::Decimal(a), Value::Decimal(b)) => Ok(Value::Decimal(a * b)),
            (Value::Decimal(a), Value::I64(b)) => Ok(Value::Decimal(a * Decimal::from(*b))),
            (Value::I64(a), Value::Decimal(b)) => Ok(Value::Decimal(Decimal::from(*a) * b)),
            (a, b) if a.is_numeric() && b.is_numeric() => Ok(Value::F64(a.to_f64()? * b.to_f64()?)),
            (a, b) => Err(Self::binary_mismatch("*", a, b)),
        }
    }

    pub fn divide(&self, other: &Value) -> Result<Value> {
        if let (Value::I64(a), Value::I64(b)) = (self, other) {
            // Whole-number division truncates, as the source dialect does.
            return if *b == 0 {
                Err(Error::InvalidValue("division by zero".into()))
            } else {
                Ok(Value::I64(a / b))
            };
        }
        match (self, other) {
            (Value::Decimal(a), Value::Decimal(b)) => {
                if b.is_zero() {
                    Err(Error::InvalidValue("division by zero".into()))
                } else {
                    Ok(Value::Decimal(a / b))
                }
            }
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let d = b.to_f64()?;
                if d == 0.0 {
                    Err(Error::InvalidValue("division by zero".into()))
                } else {
                    Ok(Value::F64(a.to_f64()? / d))
                }
            }
            (a, b) => Err(Self::binary_mismatch("/", a, b)),
        }
    }

    pub fn remainder(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::I64(a), Value::I64(b)) => {
                if *b == 0 {
                    Err(Error::InvalidValue("division by zero".into()))
                } else {
                    Ok(Value::I64(a % b))
                }
            }
            (a, b) => Err(Self::binary_mismatch("%", a, b)),
        }
    }

    pub fn concat(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
            (a, b) => Err(Self::binary_mismatch("||", a, b)),
        }
    }

    pub fn negate(&self) -> Result<Value> {
        match self {
            Value::Null => Ok(Value::Null),
            Value::I64(n) => n
                .checked_neg()
                .map(Value::I64)
                .ok_or_else(|| Error::InvalidValue("integer overflow in negation".into())),
            Value::F64(n) => Ok(Value::F64(-n)),
            Value::Decimal(d) => Ok(Value::Decimal(-d)),
            other => Err(Error::TypeMismatch {
                expected: "numeric".into(),
                found: format!("{:?}", other),
            }),
        }
    }

    fn binary_mismatch(op: &str, a: &Value, b: &Value) -> Error {
        Error::TypeMismatch {
            expected: "compatible operand types".into(),
            found: format!("{:?} {} {:?}", a, op, b),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I64(i) => write!(f, "{}", i),
            Value::F64(v) => write!(f, "{}", v),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Str(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%dT%H:%M:%S")),
            Value::Uuid(u) => write!(f, "{}", u),
            Value::Bytea(b) => write!(f, "0x{}", hex::encode(b)),
        }
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Bool(b) => b.hash(state),
            Value::I64(i) => i.hash(state),
            Value::F64(v) => v.to_bits().hash(state),
            Value::Decimal(d) => d.hash(state),
            Value::Str(s) => s.hash(state),
            Value::Date(d) => d.hash(state),
            Value::Timestamp(ts) => ts.hash(state),
            Value::Uuid(u) => u.hash(state),
            Value::Bytea(b) => b.hash(state),
        }
    }
}

impl Eq for Value {}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;

        match (self, other) {
            // NULL sorts before everything, equal to itself
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,

            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::I64(a), Value::I64(b)) => a.cmp(b),
            (Value::F64(a), Value::F64(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Decimal(a), Value::Decimal(b)) => a.cmp(b),

            // Mixed numerics compare through f64
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.to_f64(), b.to_f64()) {
                (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            },

            // Case-insensitive, per the store's collation
            (Value::Str(a), Value::Str(b)) => a.to_uppercase().cmp(&b.to_uppercase()),

            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Date(a), Value::Timestamp(b)) => {
                a.and_hms_opt(0, 0, 0).map(|t| t.cmp(b)).unwrap_or(Ordering::Equal)
            }
            (Value::Timestamp(a), Value::Date(b)) => {
                b.and_hms_opt(0, 0, 0).map(|t| a.cmp(&t)).unwrap_or(Ordering::Equal)
            }
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (Value::Bytea(a), Value::Bytea(b)) => a.cmp(b),

            // Different, incomparable types: equal, keeping the order total
            _ => Ordering::Equal,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
