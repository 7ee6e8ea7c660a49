//! Date and time functions
//!
//! The part-keyword argument of `DATEPART`/`DATEADD`/`DATEDIFF` is parsed at
//! compile time into [`DatePart`]; only the date operand flows through a
//! compiled closure.

use crate::error::{Error, Result};
use crate::types::Value;
use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, Timelike, Utc};

/// Date parts accepted by the part-keyword functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatePart {
    Year,
    Quarter,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
}

impl DatePart {
    pub fn from_keyword(part: &str) -> Option<Self> {
        match part.to_ascii_lowercase().as_str() {
            "year" | "yy" | "yyyy" => Some(DatePart::Year),
            "quarter" | "qq" | "q" => Some(DatePart::Quarter),
            "month" | "mm" | "m" => Some(DatePart::Month),
            "week" | "wk" | "ww" => Some(DatePart::Week),
            "day" | "dd" | "d" => Some(DatePart::Day),
            "hour" | "hh" => Some(DatePart::Hour),
            "minute" | "mi" | "n" => Some(DatePart::Minute),
            "second" | "ss" | "s" => Some(DatePart::Second),
            _ => None,
        }
    }
}

fn as_timestamp(value: &Value) -> Result<NaiveDateTime> {
    match value {
        Value::Date(d) => d
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| Error::InvalidValue("date out of range".into())),
        Value::Timestamp(ts) => Ok(*ts),
        other => Err(Error::TypeMismatch {
            expected: "date or timestamp".into(),
            found: format!("{:?}", other),
        }),
    }
}

pub fn date_part(part: DatePart, value: &Value) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let ts = as_timestamp(value)?;
    let out = match part {
        DatePart::Year => ts.year() as i64,
        DatePart::Quarter => ((ts.month0() / 3) + 1) as i64,
        DatePart::Month => ts.month() as i64,
        DatePart::Week => ts.iso_week().week() as i64,
        DatePart::Day => ts.day() as i64,
        DatePart::Hour => ts.hour() as i64,
        DatePart::Minute => ts.minute() as i64,
        DatePart::Second => ts.second() as i64,
    };
    Ok(Value::I64(out))
}

pub fn date_add(part: DatePart, amount: &Value, value: &Value) -> Result<Value> {
    if amount.is_null() || value.is_null() {
        return Ok(Value::Null);
    }
    let n = match amount {
        Value::I64(n) => *n,
        other => {
            return Err(Error::TypeMismatch {
                expected: "integer".into(),
                found: format!("{:?}", other),
            })
        }
    };
    let ts = as_timestamp(value)?;
    let shifted = match part {
        DatePart::Year => shift_months(ts, n.checked_mul(12)),
        DatePart::Quarter => shift_months(ts, n.checked_mul(3)),
        DatePart::Month => shift_months(ts, Some(n)),
        DatePart::Week => ts.checked_add_signed(Duration::weeks(n)),
        DatePart::Day => ts.checked_add_signed(Duration::days(n)),
        DatePart::Hour => ts.checked_add_signed(Duration::hours(n)),
        DatePart::Minute => ts.checked_add_signed(Duration::minutes(n)),
        DatePart::Second => ts.checked_add_signed(Duration::seconds(n)),
    };
    let shifted = shifted.ok_or_else(|| Error::InvalidValue("date out of range".into()))?;
    // Preserve the operand's shape: DATE in, DATE out.
    Ok(match value {
        Value::Date(_) => Value::Date(shifted.date()),
        _ => Value::Timestamp(shifted),
    })
}

fn shift_months(ts: NaiveDateTime, months: Option<i64>) -> Option<NaiveDateTime> {
    let months = months?;
    let magnitude = u32::try_from(months.unsigned_abs()).ok()?;
    if months >= 0 {
        ts.checked_add_months(Months::new(magnitude))
    } else {
        ts.checked_sub_months(Months::new(magnitude))
    }
}

/// Boundary-crossing difference, as the source dialect defines it:
/// `DATEDIFF(year, dec 31, jan 1)` is 1 even though barely a day passed.
pub fn date_diff(part: DatePart, start: &Value, end: &Value) -> Result<Value> {
    if start.is_null() || end.is_null() {
        return Ok(Value::Null);
    }
    let a = as_timestamp(start)?;
    let b = as_timestamp(end)?;
    let out = match part {
        DatePart::Year => (b.year() - a.year()) as i64,
        DatePart::Quarter => {
            (b.year() as i64 - a.year() as i64) * 4 + (b.month0() / 3) as i64
                - (a.month0() / 3) as i64
        }
        DatePart::Month => {
            (b.year() as i64 - a.year() as i64) * 12 + b.month() as i64 - a.month() as i64
        }
        DatePart::Week => days_between(a.date(), b.date()) / 7,
        DatePart::Day => days_between(a.date(), b.date()),
        DatePart::Hour => (b - a).num_hours(),
        DatePart::Minute => (b - a).num_minutes(),
        DatePart::Second => (b - a).num_seconds(),
    };
    Ok(Value::I64(out))
}

fn days_between(a: NaiveDate, b: NaiveDate) -> i64 {
    (b - a).num_days()
}

pub(super) fn getdate(_args: &[Value]) -> Result<Value> {
    Ok(Value::Timestamp(Utc::now().naive_utc()))
}

pub(super) fn year(args: &[Value]) -> Result<Value> {
    date_part(DatePart::Year, &args[0])
}

pub(super) fn month(args: &[Value]) -> Result<Value> {
    date_part(DatePart::Month, &args[0])
}

pub(super) fn day(args: &[Value]) -> Result<Value> {
    date_part(DatePart::Day, &args[0])
}
