//! Streaming client-side aggregation
//!
//! The engine consumes source rows pre-sorted by the group keys and emits one
//! output row per run of equal keys, holding exactly one group's accumulators
//! at a time. Key equality is null-aware (NULL groups with NULL) and strings
//! group under the store's case-insensitive collation.

use crate::compiler::{AggregateExpr, ScalarFn};
use crate::error::{Error, Result};
use crate::types::{Row, Value};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The aggregate operations the client can evaluate itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccumulatorKind {
    /// Row count regardless of values.
    Count,
    /// Non-null count of the argument.
    CountColumn,
    /// Distinct non-null count, case-insensitive for strings.
    CountColumnDistinct,
    Sum,
    Average,
    Min,
    Max,
}

/// Running state of one aggregate within one group.
pub enum Accumulator {
    Count(i64),
    CountColumn(i64),
    CountColumnDistinct(HashSet<Value>),
    Sum(Option<Value>),
    Average { total: Option<Value>, count: i64 },
    Min(Option<Value>),
    Max(Option<Value>),
}

impl Accumulator {
    pub fn new(kind: AccumulatorKind) -> Self {
        match kind {
            AccumulatorKind::Count => Accumulator::Count(0),
            AccumulatorKind::CountColumn => Accumulator::CountColumn(0),
            AccumulatorKind::CountColumnDistinct => {
                Accumulator::CountColumnDistinct(HashSet::new())
            }
            AccumulatorKind::Sum => Accumulator::Sum(None),
            AccumulatorKind::Average => Accumulator::Average {
                total: None,
                count: 0,
            },
            AccumulatorKind::Min => Accumulator::Min(None),
            AccumulatorKind::Max => Accumulator::Max(None),
        }
    }

    /// Folds one row's argument value in. `Count` ignores the value entirely;
    /// every other kind skips NULL.
    pub fn update(&mut self, value: &Value) -> Result<()> {
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::CountColumn(n) => {
                if !value.is_null() {
                    *n += 1;
                }
            }
            Accumulator::CountColumnDistinct(seen) => {
                if !value.is_null() {
                    seen.insert(value.fold_case());
                }
            }
            Accumulator::Sum(total) => {
                if !value.is_null() {
                    *total = Some(match total.take() {
                        Some(t) => t.add(value)?,
                        None => value.clone(),
                    });
                }
            }
            Accumulator::Average { total, count } => {
                if !value.is_null() {
                    *total = Some(match total.take() {
                        Some(t) => t.add(value)?,
                        None => value.clone(),
                    });
                    *count += 1;
                }
            }
            Accumulator::Min(best) => {
                if !value.is_null()
                    && best
                        .as_ref()
                        .map_or(true, |b| value.cmp(b) == CmpOrdering::Less)
                {
                    *best = Some(value.clone());
                }
            }
            Accumulator::Max(best) => {
                if !value.is_null()
                    && best
                        .as_ref()
                        .map_or(true, |b| value.cmp(b) == CmpOrdering::Greater)
                {
                    *best = Some(value.clone());
                }
            }
        }
        Ok(())
    }

    /// The finished group's value. Counts of nothing are zero; every other
    /// aggregate of nothing is NULL.
    pub fn value(&self) -> Result<Value> {
        Ok(match self {
            Accumulator::Count(n) | Accumulator::CountColumn(n) => Value::I64(*n),
            Accumulator::CountColumnDistinct(seen) => Value::I64(seen.len() as i64),
            Accumulator::Sum(total) => total.clone().unwrap_or(Value::Null),
            Accumulator::Average { total, count } => match total {
                Some(total) => total.divide(&Value::I64(*count))?,
                None => Value::Null,
            },
            Accumulator::Min(best) | Accumulator::Max(best) => {
                best.clone().unwrap_or(Value::Null)
            }
        })
    }

    pub fn reset(&mut self) {
        match self {
            Accumulator::Count(n) | Accumulator::CountColumn(n) => *n = 0,
            Accumulator::CountColumnDistinct(seen) => seen.clear(),
            Accumulator::Sum(total) => *total = None,
            Accumulator::Average { total, count } => {
                *total = None;
                *count = 0;
            }
            Accumulator::Min(best) | Accumulator::Max(best) => *best = None,
        }
    }
}

struct GroupState {
    /// First-seen key values, emitted with the group.
    raw: Vec<Value>,
    /// Case-folded key values, used for run comparison.
    folded: Vec<Value>,
    accumulators: Vec<Accumulator>,
}

/// Streams groups out of a key-sorted row iterator. Emits `[keys...,
/// aggregates...]` per group; zero input rows produce zero groups.
pub struct StreamingGroupBy<I> {
    input: I,
    keys: Vec<ScalarFn>,
    aggregates: Vec<AggregateExpr>,
    cancelled: Arc<AtomicBool>,
    current: Option<GroupState>,
    done: bool,
    #[cfg(debug_assertions)]
    emitted_keys: HashSet<Row>,
}

impl<I> StreamingGroupBy<I>
where
    I: Iterator<Item = Result<Row>>,
{
    pub fn new(
        input: I,
        keys: Vec<ScalarFn>,
        aggregates: Vec<AggregateExpr>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            input,
            keys,
            aggregates,
            cancelled,
            current: None,
            done: false,
            #[cfg(debug_assertions)]
            emitted_keys: HashSet::new(),
        }
    }

    fn key_of(&self, row: &Row) -> Result<(Vec<Value>, Vec<Value>)> {
        let mut raw = Vec::with_capacity(self.keys.len());
        let mut folded = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            let value = key(row)?;
            folded.push(value.fold_case());
            raw.push(value);
        }
        Ok((raw, folded))
    }

    fn fold_row(&self, state: &mut GroupState, row: &Row) -> Result<()> {
        for (accumulator, spec) in state.accumulators.iter_mut().zip(&self.aggregates) {
            match &spec.arg {
                Some(arg) => accumulator.update(&arg(row)?)?,
                // COUNT(*) counts rows; feed it a placeholder.
                None => accumulator.update(&Value::Bool(true))?,
            }
        }
        Ok(())
    }

    fn emit(&mut self, state: GroupState) -> Result<Row> {
        #[cfg(debug_assertions)]
        {
            // The input contract is key-sorted rows; a key coming back after
            // its run closed means the upstream sort is broken.
            debug_assert!(
                self.emitted_keys.insert(state.folded.clone()),
                "group key reappeared after its run ended"
            );
        }
        let mut row = state.raw;
        for accumulator in &state.accumulators {
            row.push(accumulator.value()?);
        }
        Ok(row)
    }
}

impl<I> Iterator for StreamingGroupBy<I>
where
    I: Iterator<Item = Result<Row>>,
{
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.cancelled.load(Ordering::Relaxed) {
                self.done = true;
                return Some(Err(Error::OperationCancelled));
            }
            let row = match self.input.next() {
                Some(Ok(row)) => row,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return self.current.take().map(|state| self.emit(state));
                }
            };
            let (raw, folded) = match self.key_of(&row) {
                Ok(key) => key,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            match self.current.take() {
                Some(mut state) if state.folded == folded => {
                    if let Err(e) = self.fold_row(&mut state, &row) {
                        self.done = true;
                        return Some(Err(e));
                    }
                    self.current = Some(state);
                }
                previous => {
                    let mut state = GroupState {
                        raw,
                        folded,
                        accumulators: self
                            .aggregates
                            .iter()
                            .map(|a| Accumulator::new(a.kind))
                            .collect(),
                    };
                    if let Err(e) = self.fold_row(&mut state, &row) {
                        self.done = true;
                        return Some(Err(e));
                    }
                    self.current = Some(state);
                    if let Some(previous) = previous {
                        return Some(self.emit(previous));
                    }
                }
            }
        }
    }
}
