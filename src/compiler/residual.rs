//! Compiled query artifacts
//!
//! A compilation produces a native query plus a precise description of the
//! work the client must still do locally. Closures compiled here are owned
//! solely by the bundle that carries them; nothing is shared across
//! statements.

use crate::execution::aggregate::AccumulatorKind;
use crate::fetch::FetchQuery;
use crate::types::{Row, Value};
use std::sync::Arc;

/// A compiled per-row scalar: evaluates one value over a retrieved row laid
/// out per the owning query's column order.
pub type ScalarFn = Arc<dyn Fn(&Row) -> crate::error::Result<Value> + Send + Sync>;

/// One ORDER BY term after compilation.
#[derive(Clone)]
pub struct SortKey {
    /// Whether the store already returns rows sorted by this key. Leading
    /// satisfied keys partition rows into runs; only rows within a run are
    /// reordered locally.
    pub natively_satisfied: bool,
    pub selector: ScalarFn,
    pub descending: bool,
}

/// Residual work the client performs over returned rows. Absent fields mean
/// no residual work of that kind.
#[derive(Default)]
pub struct ResidualWorkBundle {
    /// Predicate not expressible natively; rows failing it are dropped.
    pub post_filter: Option<ScalarFn>,
    /// Full key list when sorting could not be pushed down completely.
    pub post_sort: Vec<SortKey>,
    /// Projection expressions with no native attribute form, by output name.
    pub calculated_fields: Vec<(String, ScalarFn)>,
    /// TOP that must be applied after local filtering/sorting.
    pub post_top: Option<usize>,
}

impl ResidualWorkBundle {
    pub fn is_empty(&self) -> bool {
        self.post_filter.is_none()
            && self.post_sort.is_empty()
            && self.post_top.is_none()
    }
}

/// Where an output column's value comes from.
pub enum ColumnSource {
    /// Index into the retrieved row.
    Row(usize),
    /// Index into `ResidualWorkBundle::calculated_fields`.
    Calculated(usize),
}

pub struct OutputColumn {
    pub name: String,
    pub source: ColumnSource,
}

/// One aggregate to evaluate client-side: the accumulator kind plus the
/// argument selector (`None` for bare `COUNT(*)`).
#[derive(Clone)]
pub struct AggregateExpr {
    pub kind: AccumulatorKind,
    pub arg: Option<ScalarFn>,
}

/// Maps one aggregated-row slot back to the compiled query's column order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackSlot {
    Key(usize),
    Aggregate(usize),
}

/// Client-side aggregation plan. Present whenever a statement aggregates.
pub struct AggregatePlan {
    /// True when the main query aggregates natively; the plan is then only
    /// engaged if the store reports its aggregate result-size limit. False
    /// means native aggregation was impossible up front and the engine always
    /// runs.
    pub native: bool,
    /// Non-aggregate form of the query feeding the engine.
    pub source: FetchQuery,
    /// WHERE residual over source rows, applied before grouping.
    pub pre_filter: Option<ScalarFn>,
    /// Pre-sort requirement of the streaming engine, expressed as sort keys
    /// over source rows (bare-column group keys are pushed natively and
    /// marked satisfied).
    pub sort: Vec<SortKey>,
    pub group_keys: Vec<ScalarFn>,
    pub aggregates: Vec<AggregateExpr>,
    /// Rebuilds engine output rows in the compiled query's column order.
    pub layout: Vec<FallbackSlot>,
}

/// The compiler's output for a SELECT statement.
pub struct CompiledQuery {
    pub query: FetchQuery,
    pub residual: ResidualWorkBundle,
    pub output: Vec<OutputColumn>,
    pub aggregate: Option<AggregatePlan>,
}

impl CompiledQuery {
    pub fn column_names(&self) -> Vec<String> {
        self.output.iter().map(|c| c.name.clone()).collect()
    }
}
