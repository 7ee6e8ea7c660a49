//! Mutation tests: key selection, confirmation, batching and failure
//! reporting for INSERT, UPDATE and DELETE.

mod common;

use common::{record, TestContext};
use fetch_sql::{
    ColumnSchema, ColumnType, Error, MutationKind, Options, TableSchema, Value,
};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

fn contacts() -> TestContext {
    TestContext::new().with_table(
        TableSchema::new(
            "contact",
            "contactid",
            vec![
                ColumnSchema::new("contactid", ColumnType::Integer),
                ColumnSchema::new("fullname", ColumnType::String),
                ColumnSchema::new("city", ColumnType::String),
            ],
        ),
        vec![
            record(&[
                ("contactid", Value::I64(1)),
                ("fullname", Value::Str("Ada".into())),
                ("city", Value::Str("Seattle".into())),
            ]),
            record(&[
                ("contactid", Value::I64(2)),
                ("fullname", Value::Str("Grace".into())),
                ("city", Value::Str("Seattle".into())),
            ]),
            record(&[
                ("contactid", Value::I64(3)),
                ("fullname", Value::Str("Edsger".into())),
                ("city", Value::Str("Austin".into())),
            ]),
        ],
    )
}

#[test]
fn insert_values_creates_records() {
    let ctx = contacts();
    let summary = ctx.mutate(
        "INSERT INTO contact (contactid, fullname, city) VALUES (4, 'Alan', 'London')",
    );
    assert_eq!(summary.kind, MutationKind::Insert);
    assert_eq!(summary.rows, 1);
    assert_eq!(ctx.store.row_count("contact"), 4);
    let rows = ctx.store.rows_of("contact");
    let alan = rows
        .iter()
        .find(|r| r.get("contactid") == Some(&Value::I64(4)))
        .unwrap();
    assert_eq!(alan.get("fullname"), Some(&Value::Str("Alan".into())));
}

#[test]
fn insert_select_copies_rows() {
    let ctx = contacts().with_table(
        TableSchema::new(
            "lead",
            "leadid",
            vec![
                ColumnSchema::new("leadid", ColumnType::Integer),
                ColumnSchema::new("fullname", ColumnType::String),
            ],
        ),
        vec![],
    );
    let summary = ctx.mutate(
        "INSERT INTO lead (leadid, fullname) \
         SELECT contactid, fullname FROM contact WHERE city = 'Seattle'",
    );
    assert_eq!(summary.rows, 2);
    assert_eq!(ctx.store.row_count("lead"), 2);
}

#[test]
fn update_selects_keys_then_applies() {
    let ctx = contacts();
    let summary = ctx.mutate("UPDATE contact SET city = 'Tacoma' WHERE city = 'Seattle'");
    assert_eq!(summary.kind, MutationKind::Update);
    assert_eq!(summary.rows, 2);
    let rows = ctx.store.rows_of("contact");
    assert_eq!(
        rows.iter()
            .filter(|r| r.get("city") == Some(&Value::Str("Tacoma".into())))
            .count(),
        2
    );
    // Edsger untouched.
    assert!(rows
        .iter()
        .any(|r| r.get("city") == Some(&Value::Str("Austin".into()))));
}

#[test]
fn update_assignment_can_read_the_row() {
    let ctx = contacts();
    ctx.mutate("UPDATE contact SET fullname = fullname + '!' WHERE contactid = 1");
    let rows = ctx.store.rows_of("contact");
    let ada = rows
        .iter()
        .find(|r| r.get("contactid") == Some(&Value::I64(1)))
        .unwrap();
    assert_eq!(ada.get("fullname"), Some(&Value::Str("Ada!".into())));
}

#[test]
fn delete_removes_selected_rows() {
    let ctx = contacts();
    let summary = ctx.mutate("DELETE FROM contact WHERE city = 'Austin'");
    assert_eq!(summary.kind, MutationKind::Delete);
    assert_eq!(summary.rows, 1);
    assert_eq!(ctx.store.row_count("contact"), 2);
}

#[test]
fn declined_confirmation_cancels_the_statement() {
    let mut ctx = contacts();
    ctx.options = Options::default().with_confirmation(|_| false);
    let err = ctx
        .try_exec("DELETE FROM contact WHERE city = 'Seattle'")
        .unwrap_err();
    assert!(matches!(err, Error::OperationCancelled));
    // Nothing was touched.
    assert_eq!(ctx.store.row_count("contact"), 3);
}

#[test]
fn confirmation_sees_the_resolved_row_count() {
    let seen = Arc::new(Mutex::new(None));
    let witness = Arc::clone(&seen);
    let mut ctx = contacts();
    ctx.options = Options::default().with_confirmation(move |summary| {
        *witness.lock().unwrap() = Some(summary.clone());
        true
    });
    ctx.mutate("UPDATE contact SET city = 'Tacoma' WHERE city = 'Seattle'");
    let summary = seen.lock().unwrap().clone().unwrap();
    assert_eq!(summary.kind, MutationKind::Update);
    assert_eq!(summary.table, "contact");
    assert_eq!(summary.rows, 2);
}

#[test]
fn batch_failure_reports_partial_progress() {
    let mut ctx = contacts();
    ctx.options.batch_size = 2;
    ctx.store.refuse_batches();
    let err = ctx
        .try_exec("DELETE FROM contact WHERE contactid >= 1")
        .unwrap_err();
    let Error::MutationFailed {
        affected, total, ..
    } = err
    else {
        panic!("expected a mutation failure, got {err}");
    };
    assert_eq!(affected, 0);
    assert_eq!(total, 3);
}

#[test]
fn mutations_apply_in_batches() {
    let mut ctx = contacts();
    ctx.options.batch_size = 1;
    ctx.mutate("DELETE FROM contact WHERE contactid >= 1");
    assert_eq!(ctx.store.batches_run.load(Ordering::Relaxed), 3);
    assert_eq!(ctx.store.row_count("contact"), 0);
}

#[test]
fn progress_is_reported_per_batch() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let witness = Arc::clone(&seen);
    let mut ctx = contacts();
    ctx.options = Options::default().with_progress(move |done, total| {
        witness.lock().unwrap().push((done, total));
    });
    ctx.options.batch_size = 1;
    ctx.mutate("DELETE FROM contact WHERE contactid >= 1");
    assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
}

#[test]
fn unguarded_mutations_can_be_blocked() {
    let mut ctx = contacts();
    ctx.options.block_mutations_without_where = true;
    let err = ctx.try_exec("DELETE FROM contact").unwrap_err();
    assert!(matches!(err, Error::InvalidValue(_)));
    // A WHERE clause gets through.
    ctx.mutate("DELETE FROM contact WHERE city = 'Austin'");
    assert_eq!(ctx.store.row_count("contact"), 2);
}

#[test]
fn residual_where_still_selects_mutation_keys() {
    let ctx = contacts();
    // LEN degrades; key selection filters client-side before batching.
    let summary = ctx.mutate("DELETE FROM contact WHERE LEN(fullname) = 3");
    assert_eq!(summary.rows, 1);
    assert_eq!(ctx.store.row_count("contact"), 2);
}

#[test]
fn update_with_from_clause_is_rejected() {
    let ctx = contacts();
    let err = ctx
        .compile("UPDATE contact SET city = 'X' FROM contact AS c")
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedConstruct { .. }));
}

#[test]
fn insert_arity_mismatch_is_rejected() {
    let ctx = contacts();
    let err = ctx
        .compile("INSERT INTO contact (contactid, fullname) VALUES (9)")
        .unwrap_err();
    assert!(matches!(err, Error::InvalidValue(_)));
}
