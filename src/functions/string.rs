//! String functions

use crate::error::{Error, Result};
use crate::types::Value;

fn as_str(value: &Value) -> Result<&str> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(Error::TypeMismatch {
            expected: "string".into(),
            found: format!("{:?}", other),
        }),
    }
}

fn as_i64(value: &Value) -> Result<i64> {
    match value {
        Value::I64(n) => Ok(*n),
        other => Err(Error::TypeMismatch {
            expected: "integer".into(),
            found: format!("{:?}", other),
        }),
    }
}

pub(super) fn len(args: &[Value]) -> Result<Value> {
    // LEN ignores trailing spaces, matching the source dialect.
    Ok(Value::I64(as_str(&args[0])?.trim_end().chars().count() as i64))
}

pub(super) fn upper(args: &[Value]) -> Result<Value> {
    Ok(Value::Str(as_str(&args[0])?.to_uppercase()))
}

pub(super) fn lower(args: &[Value]) -> Result<Value> {
    Ok(Value::Str(as_str(&args[0])?.to_lowercase()))
}

pub(super) fn trim(args: &[Value]) -> Result<Value> {
    Ok(Value::Str(as_str(&args[0])?.trim().to_string()))
}

pub(super) fn ltrim(args: &[Value]) -> Result<Value> {
    Ok(Value::Str(as_str(&args[0])?.trim_start().to_string()))
}

pub(super) fn rtrim(args: &[Value]) -> Result<Value> {
    Ok(Value::Str(as_str(&args[0])?.trim_end().to_string()))
}

pub(super) fn left(args: &[Value]) -> Result<Value> {
    let s = as_str(&args[0])?;
    let n = as_i64(&args[1])?.max(0) as usize;
    Ok(Value::Str(s.chars().take(n).collect()))
}

pub(super) fn right(args: &[Value]) -> Result<Value> {
    let s = as_str(&args[0])?;
    let n = as_i64(&args[1])?.max(0) as usize;
    let chars: Vec<char> = s.chars().collect();
    let start = chars.len().saturating_sub(n);
    Ok(Value::Str(chars[start..].iter().collect()))
}

pub(super) fn substring(args: &[Value]) -> Result<Value> {
    let s = as_str(&args[0])?;
    // One-based start, as in the source dialect; out-of-range yields empty.
    let start = as_i64(&args[1])?;
    let length = as_i64(&args[2])?.max(0) as usize;
    let skip = (start - 1).max(0) as usize;
    Ok(Value::Str(s.chars().skip(skip).take(length).collect()))
}

pub(super) fn replace(args: &[Value]) -> Result<Value> {
    let s = as_str(&args[0])?;
    let from = as_str(&args[1])?;
    let to = as_str(&args[2])?;
    if from.is_empty() {
        return Ok(Value::Str(s.to_string()));
    }
    Ok(Value::Str(s.replace(from, to)))
}

pub(super) fn charindex(args: &[Value]) -> Result<Value> {
    let needle = as_str(&args[0])?.to_uppercase();
    let haystack = as_str(&args[1])?.to_uppercase();
    // One-based; zero means not found.
    Ok(Value::I64(match haystack.find(&needle) {
        Some(byte_idx) => haystack[..byte_idx].chars().count() as i64 + 1,
        None => 0,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_is_one_based() {
        let out = substring(&[
            Value::Str("hello".into()),
            Value::I64(2),
            Value::I64(3),
        ])
        .unwrap();
        assert_eq!(out, Value::Str("ell".into()));
    }

    #[test]
    fn len_ignores_trailing_spaces() {
        assert_eq!(len(&[Value::Str("ab  ".into())]).unwrap(), Value::I64(2));
    }

    #[test]
    fn charindex_is_case_insensitive() {
        let out = charindex(&[Value::Str("LO".into()), Value::Str("hello".into())]).unwrap();
        assert_eq!(out, Value::I64(4));
    }
}
