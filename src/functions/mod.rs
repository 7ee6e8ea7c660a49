//! The scalar function allow-list
//!
//! The compiler only accepts function calls whose names appear here; anything
//! else is an `UnknownFunction` diagnostic at compile time, not a runtime
//! surprise. Each entry carries its arity so call sites are validated before
//! a closure is ever built.
//!
//! Date-part functions (`DATEPART`, `DATEADD`, `DATEDIFF`) are not in this
//! table: their part-keyword argument is a compile-time literal, so the
//! scalar compiler special-cases them and calls into [`datetime`] directly.

mod datetime;
mod math;
mod string;

pub use datetime::{date_add, date_diff, date_part, DatePart};

use crate::error::{Error, Result};
use crate::types::Value;

struct FunctionDef {
    name: &'static str,
    min_args: usize,
    max_args: usize,
    /// Whether NULL arguments short-circuit to NULL before evaluation.
    null_propagates: bool,
    eval: fn(&[Value]) -> Result<Value>,
}

static FUNCTIONS: &[FunctionDef] = &[
    // String
    FunctionDef { name: "LEN", min_args: 1, max_args: 1, null_propagates: true, eval: string::len },
    FunctionDef { name: "UPPER", min_args: 1, max_args: 1, null_propagates: true, eval: string::upper },
    FunctionDef { name: "LOWER", min_args: 1, max_args: 1, null_propagates: true, eval: string::lower },
    FunctionDef { name: "TRIM", min_args: 1, max_args: 1, null_propagates: true, eval: string::trim },
    FunctionDef { name: "LTRIM", min_args: 1, max_args: 1, null_propagates: true, eval: string::ltrim },
    FunctionDef { name: "RTRIM", min_args: 1, max_args: 1, null_propagates: true, eval: string::rtrim },
    FunctionDef { name: "LEFT", min_args: 2, max_args: 2, null_propagates: true, eval: string::left },
    FunctionDef { name: "RIGHT", min_args: 2, max_args: 2, null_propagates: true, eval: string::right },
    FunctionDef { name: "SUBSTRING", min_args: 3, max_args: 3, null_propagates: true, eval: string::substring },
    FunctionDef { name: "REPLACE", min_args: 3, max_args: 3, null_propagates: true, eval: string::replace },
    FunctionDef { name: "CHARINDEX", min_args: 2, max_args: 2, null_propagates: true, eval: string::charindex },
    // Math
    FunctionDef { name: "ABS", min_args: 1, max_args: 1, null_propagates: true, eval: math::abs },
    FunctionDef { name: "ROUND", min_args: 2, max_args: 2, null_propagates: true, eval: math::round },
    FunctionDef { name: "FLOOR", min_args: 1, max_args: 1, null_propagates: true, eval: math::floor },
    FunctionDef { name: "CEILING", min_args: 1, max_args: 1, null_propagates: true, eval: math::ceiling },
    // Null handling
    FunctionDef { name: "ISNULL", min_args: 2, max_args: 2, null_propagates: false, eval: first_non_null },
    FunctionDef { name: "COALESCE", min_args: 1, max_args: usize::MAX, null_propagates: false, eval: first_non_null },
    // Date/time
    FunctionDef { name: "GETDATE", min_args: 0, max_args: 0, null_propagates: false, eval: datetime::getdate },
    FunctionDef { name: "GETUTCDATE", min_args: 0, max_args: 0, null_propagates: false, eval: datetime::getdate },
    FunctionDef { name: "YEAR", min_args: 1, max_args: 1, null_propagates: true, eval: datetime::year },
    FunctionDef { name: "MONTH", min_args: 1, max_args: 1, null_propagates: true, eval: datetime::month },
    FunctionDef { name: "DAY", min_args: 1, max_args: 1, null_propagates: true, eval: datetime::day },
];

fn lookup(name: &str) -> Option<&'static FunctionDef> {
    FUNCTIONS.iter().find(|f| f.name.eq_ignore_ascii_case(name))
}

/// Compile-time validation of a call site. Unknown names and bad arities are
/// fatal here, before any closure is built.
pub fn check(name: &str, arg_count: usize) -> Result<()> {
    let def = lookup(name).ok_or_else(|| Error::UnknownFunction(name.to_string()))?;
    if arg_count < def.min_args || arg_count > def.max_args {
        return Err(Error::InvalidValue(format!(
            "{} takes {} argument(s), got {}",
            def.name, def.min_args, arg_count
        )));
    }
    Ok(())
}

pub fn is_known(name: &str) -> bool {
    lookup(name).is_some()
}

/// Evaluate an allow-listed function over already-evaluated arguments.
pub fn call(name: &str, args: &[Value]) -> Result<Value> {
    let def = lookup(name).ok_or_else(|| Error::UnknownFunction(name.to_string()))?;
    if def.null_propagates && args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }
    (def.eval)(args)
}

fn first_non_null(args: &[Value]) -> Result<Value> {
    Ok(args
        .iter()
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_function_is_rejected_up_front() {
        assert!(matches!(check("FROBNICATE", 1), Err(Error::UnknownFunction(_))));
        assert!(check("UPPER", 1).is_ok());
        assert!(check("UPPER", 2).is_err());
    }

    #[test]
    fn null_propagates_through_most_functions() {
        assert_eq!(call("UPPER", &[Value::Null]).unwrap(), Value::Null);
        assert_eq!(
            call("ISNULL", &[Value::Null, Value::I64(7)]).unwrap(),
            Value::I64(7)
        );
    }

    #[test]
    fn coalesce_takes_first_non_null() {
        assert_eq!(
            call("COALESCE", &[Value::Null, Value::Null, Value::Str("x".into())]).unwrap(),
            Value::Str("x".into())
        );
    }
}
