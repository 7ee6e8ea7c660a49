//! Block-wise local re-sort
//!
//! When only a prefix of the ORDER BY pushed down natively, the store hands
//! back rows already ordered by that prefix. Rows are then partitioned into
//! runs of equal prefix values and each run is stably re-sorted by the
//! remaining keys, so the native ordering is never disturbed across runs.

use crate::compiler::SortKey;
use crate::error::Result;
use crate::types::{Row, Value};
use std::cmp::Ordering;

/// Sorts `rows` by the residual tail of `keys`, preserving the natively
/// satisfied prefix. A fully satisfied key list is a no-op.
pub fn block_sort(rows: Vec<Row>, keys: &[SortKey]) -> Result<Vec<Row>> {
    let prefix_len = keys.iter().take_while(|k| k.natively_satisfied).count();
    let residual = &keys[prefix_len..];
    if residual.is_empty() {
        return Ok(rows);
    }

    let mut decorated = Vec::with_capacity(rows.len());
    for row in rows {
        let prefix = keys[..prefix_len]
            .iter()
            .map(|k| (k.selector)(&row))
            .collect::<Result<Vec<Value>>>()?;
        let tail = residual
            .iter()
            .map(|k| (k.selector)(&row))
            .collect::<Result<Vec<Value>>>()?;
        decorated.push((prefix, tail, row));
    }

    let mut out = Vec::with_capacity(decorated.len());
    let mut run: Vec<(Vec<Value>, Vec<Value>, Row)> = Vec::new();
    for item in decorated {
        let boundary = run.last().is_some_and(|prev| {
            prev.0
                .iter()
                .zip(&item.0)
                .any(|(a, b)| a.cmp(b) != Ordering::Equal)
        });
        if boundary {
            flush_run(&mut run, residual, &mut out);
        }
        run.push(item);
    }
    flush_run(&mut run, residual, &mut out);
    Ok(out)
}

fn flush_run(
    run: &mut Vec<(Vec<Value>, Vec<Value>, Row)>,
    residual: &[SortKey],
    out: &mut Vec<Row>,
) {
    // Stable, so ties keep their retrieval order.
    run.sort_by(|a, b| {
        for (index, key) in residual.iter().enumerate() {
            let ordering = a.1[index].cmp(&b.1[index]);
            let ordering = if key.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    out.extend(run.drain(..).map(|(_, _, row)| row));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ScalarFn;
    use std::sync::Arc;

    fn selector(index: usize) -> ScalarFn {
        Arc::new(move |row: &Row| Ok(row.get(index).cloned().unwrap_or(Value::Null)))
    }

    fn key(index: usize, satisfied: bool, descending: bool) -> SortKey {
        SortKey {
            natively_satisfied: satisfied,
            selector: selector(index),
            descending,
        }
    }

    #[test]
    fn fully_satisfied_keys_leave_rows_alone() {
        let rows = vec![vec![Value::I64(2)], vec![Value::I64(1)]];
        let out = block_sort(rows.clone(), &[key(0, true, false)]).unwrap();
        assert_eq!(out, rows);
    }

    #[test]
    fn runs_are_sorted_independently() {
        // Prefix column 0 is already store-ordered; column 1 is not.
        let rows = vec![
            vec![Value::I64(1), Value::I64(9)],
            vec![Value::I64(1), Value::I64(3)],
            vec![Value::I64(2), Value::I64(5)],
            vec![Value::I64(2), Value::I64(1)],
        ];
        let out = block_sort(rows, &[key(0, true, false), key(1, false, false)]).unwrap();
        assert_eq!(
            out,
            vec![
                vec![Value::I64(1), Value::I64(3)],
                vec![Value::I64(1), Value::I64(9)],
                vec![Value::I64(2), Value::I64(1)],
                vec![Value::I64(2), Value::I64(5)],
            ]
        );
    }

    #[test]
    fn descending_residual_key() {
        let rows = vec![
            vec![Value::Str("a".into())],
            vec![Value::Str("C".into())],
            vec![Value::Str("b".into())],
        ];
        let out = block_sort(rows, &[key(0, false, true)]).unwrap();
        let names: Vec<_> = out.into_iter().map(|r| r[0].clone()).collect();
        assert_eq!(
            names,
            vec![
                Value::Str("C".into()),
                Value::Str("b".into()),
                Value::Str("a".into())
            ]
        );
    }

    #[test]
    fn equal_residual_keys_keep_retrieval_order() {
        let rows = vec![
            vec![Value::I64(1), Value::Str("first".into())],
            vec![Value::I64(1), Value::Str("second".into())],
        ];
        let out = block_sort(rows, &[key(0, false, false)]).unwrap();
        assert_eq!(out[0][1], Value::Str("first".into()));
        assert_eq!(out[1][1], Value::Str("second".into()));
    }
}
