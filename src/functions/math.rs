//! Numeric functions

use crate::error::{Error, Result};
use crate::types::Value;

pub(super) fn abs(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::I64(n) => Ok(Value::I64(n.abs())),
        Value::F64(n) => Ok(Value::F64(n.abs())),
        Value::Decimal(d) => Ok(Value::Decimal(d.abs())),
        other => numeric_mismatch(other),
    }
}

pub(super) fn round(args: &[Value]) -> Result<Value> {
    let digits = match &args[1] {
        Value::I64(n) => *n,
        other => return numeric_mismatch(other),
    };
    match &args[0] {
        Value::I64(n) => Ok(Value::I64(*n)),
        Value::F64(n) => {
            let factor = 10f64.powi(digits as i32);
            Ok(Value::F64((n * factor).round() / factor))
        }
        Value::Decimal(d) => Ok(Value::Decimal(
            d.round_dp(digits.clamp(0, u32::MAX as i64) as u32),
        )),
        other => numeric_mismatch(other),
    }
}

pub(super) fn floor(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::I64(n) => Ok(Value::I64(*n)),
        Value::F64(n) => Ok(Value::F64(n.floor())),
        Value::Decimal(d) => Ok(Value::Decimal(d.floor())),
        other => numeric_mismatch(other),
    }
}

pub(super) fn ceiling(args: &[Value]) -> Result<Value> {
    match &args[0] {
        Value::I64(n) => Ok(Value::I64(*n)),
        Value::F64(n) => Ok(Value::F64(n.ceil())),
        Value::Decimal(d) => Ok(Value::Decimal(d.ceil())),
        other => numeric_mismatch(other),
    }
}

fn numeric_mismatch(found: &Value) -> Result<Value> {
    Err(Error::TypeMismatch {
        expected: "numeric".into(),
        found: format!("{:?}", found),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn round_to_digits() {
        assert_eq!(
            round(&[Value::F64(2.346), Value::I64(2)]).unwrap(),
            Value::F64(2.35)
        );
        assert_eq!(
            round(&[Value::Decimal(Decimal::new(2345, 3)), Value::I64(1)]).unwrap(),
            Value::Decimal(Decimal::new(23, 1))
        );
    }
}
