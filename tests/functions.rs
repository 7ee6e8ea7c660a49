//! Scalar function evaluation through the full pipeline: functions always
//! degrade to calculated fields or residual filters, never to native
//! conditions (the date-window proxies excepted).

mod common;

use chrono::NaiveDate;
use common::{cell, record, TestContext};
use fetch_sql::{ColumnSchema, ColumnType, Error, TableSchema, Value};

fn people() -> TestContext {
    TestContext::new().with_table(
        TableSchema::new(
            "person",
            "personid",
            vec![
                ColumnSchema::new("personid", ColumnType::Integer),
                ColumnSchema::new("name", ColumnType::String),
                ColumnSchema::new("nickname", ColumnType::String),
                ColumnSchema::new("born", ColumnType::Date),
            ],
        ),
        vec![
            record(&[
                ("personid", Value::I64(1)),
                ("name", Value::Str("  Augusta Ada  ".into())),
                ("nickname", Value::Str("Ada".into())),
                ("born", Value::Date(NaiveDate::from_ymd_opt(1815, 12, 10).unwrap())),
            ]),
            record(&[
                ("personid", Value::I64(2)),
                ("name", Value::Str("Grace".into())),
                ("nickname", Value::Null),
                ("born", Value::Date(NaiveDate::from_ymd_opt(1906, 12, 9).unwrap())),
            ]),
        ],
    )
}

#[test]
fn string_functions_project() {
    let ctx = people();
    let result = ctx.query(
        "SELECT UPPER(nickname) AS u, TRIM(name) AS t, LEFT(name, 4) AS l \
         FROM person WHERE personid = 1",
    );
    assert_eq!(cell(&result, 0, "u"), &Value::Str("ADA".into()));
    assert_eq!(cell(&result, 0, "t"), &Value::Str("Augusta Ada".into()));
    assert_eq!(cell(&result, 0, "l"), &Value::Str("  Au".into()));
}

#[test]
fn null_propagates_through_functions() {
    let ctx = people();
    let result = ctx.query("SELECT UPPER(nickname) AS u FROM person WHERE personid = 2");
    assert_eq!(cell(&result, 0, "u"), &Value::Null);
}

#[test]
fn isnull_and_coalesce_substitute() {
    let ctx = people();
    let result = ctx.query(
        "SELECT ISNULL(nickname, 'unknown') AS n, COALESCE(nickname, name) AS c \
         FROM person WHERE personid = 2",
    );
    assert_eq!(cell(&result, 0, "n"), &Value::Str("unknown".into()));
    assert_eq!(cell(&result, 0, "c"), &Value::Str("Grace".into()));
}

#[test]
fn date_parts_extract() {
    let ctx = people();
    let result = ctx.query(
        "SELECT YEAR(born) AS y, MONTH(born) AS m, DATEPART(day, born) AS d \
         FROM person WHERE personid = 1",
    );
    assert_eq!(cell(&result, 0, "y"), &Value::I64(1815));
    assert_eq!(cell(&result, 0, "m"), &Value::I64(12));
    assert_eq!(cell(&result, 0, "d"), &Value::I64(10));
}

#[test]
fn dateadd_and_datediff() {
    let ctx = people();
    let result = ctx.query(
        "SELECT DATEADD(year, 100, born) AS later FROM person WHERE personid = 2",
    );
    assert_eq!(
        cell(&result, 0, "later"),
        &Value::Date(NaiveDate::from_ymd_opt(2006, 12, 9).unwrap())
    );

    let result = ctx.query(
        "SELECT DATEDIFF(year, born, DATEADD(year, 3, born)) AS span \
         FROM person WHERE personid = 1",
    );
    assert_eq!(cell(&result, 0, "span"), &Value::I64(3));
}

#[test]
fn case_expression_projects() {
    let ctx = people();
    let result = ctx.query(
        "SELECT CASE WHEN nickname IS NULL THEN 'anonymous' ELSE nickname END AS tag \
         FROM person ORDER BY personid",
    );
    assert_eq!(cell(&result, 0, "tag"), &Value::Str("Ada".into()));
    assert_eq!(cell(&result, 1, "tag"), &Value::Str("anonymous".into()));
}

#[test]
fn functions_in_where_filter_locally() {
    let ctx = people();
    let result = ctx.query("SELECT personid FROM person WHERE CHARINDEX('Ada', name) > 0");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(cell(&result, 0, "personid"), &Value::I64(1));
}

#[test]
fn unknown_function_is_rejected() {
    let ctx = people();
    let err = ctx.compile("SELECT SOUNDEX(name) FROM person").unwrap_err();
    assert!(matches!(err, Error::UnknownFunction(_)));
}

#[test]
fn wrong_arity_is_rejected_at_compile_time() {
    let ctx = people();
    let err = ctx.compile("SELECT LEFT(name) FROM person").unwrap_err();
    assert!(matches!(err, Error::InvalidValue(_)));
}
