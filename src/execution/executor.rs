//! Statement execution
//!
//! The executor owns the degrade-and-recombine pipeline: it pages native
//! results out of the store, runs whatever residual work the compiler left
//! behind (filter, block re-sort, row cap, calculated fields) and, for
//! aggregate statements, drives the client-side engine when the store cannot
//! or will not aggregate. Mutations select keys first, ask the host for
//! confirmation, then apply all-or-nothing batches.

use super::aggregate::{Accumulator, StreamingGroupBy};
use super::sort::block_sort;
use crate::client::{
    Mutation, MutationKind, MutationSummary, Options, RecordStore, StoreError,
};
use crate::compiler::{
    AggregatePlan, ColumnSource, CompiledQuery, CompiledStatement, DeletePlan, FallbackSlot,
    InsertPlan, InsertRows, ResidualWorkBundle, UpdatePlan,
};
use crate::error::{Error, Result};
use crate::fetch::FetchQuery;
use crate::types::{Row, Value};

/// Rows of a finished SELECT, in the statement's output column order.
#[derive(Debug)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// What running one statement produced.
#[derive(Debug)]
pub enum ExecutionResult {
    Rows(QueryResult),
    Mutation(MutationSummary),
}

pub struct Executor<'a, S: RecordStore + ?Sized> {
    store: &'a S,
    options: &'a Options,
}

impl<'a, S: RecordStore + ?Sized> Executor<'a, S> {
    pub fn new(store: &'a S, options: &'a Options) -> Self {
        Self { store, options }
    }

    pub fn run(&self, statement: &CompiledStatement) -> Result<ExecutionResult> {
        match statement {
            CompiledStatement::Select(query) => Ok(ExecutionResult::Rows(self.execute(query)?)),
            CompiledStatement::Insert(plan) => {
                Ok(ExecutionResult::Mutation(self.execute_insert(plan)?))
            }
            CompiledStatement::Update(plan) => {
                Ok(ExecutionResult::Mutation(self.execute_update(plan)?))
            }
            CompiledStatement::Delete(plan) => {
                Ok(ExecutionResult::Mutation(self.execute_delete(plan)?))
            }
        }
    }

    pub fn execute(&self, compiled: &CompiledQuery) -> Result<QueryResult> {
        let raw = match &compiled.aggregate {
            Some(plan) => self.aggregated_rows(compiled, plan)?,
            None => self.retrieve_all(&compiled.query)?,
        };
        let rows = self.apply_residual(raw, &compiled.residual)?;
        Ok(QueryResult {
            columns: compiled.column_names(),
            rows: self.project(rows, compiled)?,
        })
    }

    /// Pages the whole native result set in. Polls cancellation once per
    /// page; a native TOP stops paging as soon as enough rows arrived.
    fn retrieve_all(&self, query: &FetchQuery) -> Result<Vec<Row>> {
        if let Some(paging) = query.paging {
            self.options.check_cancelled()?;
            let page = self
                .store
                .run_query(query, paging.page_number, paging.page_size)?;
            return Ok(page.rows);
        }
        let mut rows = Vec::new();
        let mut page_number = 1;
        loop {
            self.options.check_cancelled()?;
            let page = self
                .store
                .run_query(query, page_number, self.options.page_size)?;
            rows.extend(page.rows);
            if !page.more {
                break;
            }
            if query.top.is_some_and(|top| rows.len() as u64 >= top) {
                break;
            }
            page_number += 1;
        }
        if let Some(top) = query.top {
            rows.truncate(top as usize);
        }
        Ok(rows)
    }

    fn apply_residual(&self, rows: Vec<Row>, bundle: &ResidualWorkBundle) -> Result<Vec<Row>> {
        let mut rows = rows;
        if let Some(predicate) = &bundle.post_filter {
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows {
                if predicate(&row)?.to_bool()? {
                    kept.push(row);
                }
            }
            rows = kept;
        }
        rows = block_sort(rows, &bundle.post_sort)?;
        if let Some(top) = bundle.post_top {
            rows.truncate(top);
        }
        Ok(rows)
    }

    fn project(&self, rows: Vec<Row>, compiled: &CompiledQuery) -> Result<Vec<Row>> {
        rows.into_iter()
            .map(|row| {
                compiled
                    .output
                    .iter()
                    .map(|column| match &column.source {
                        ColumnSource::Row(index) => {
                            Ok(row.get(*index).cloned().unwrap_or(Value::Null))
                        }
                        ColumnSource::Calculated(index) => {
                            (compiled.residual.calculated_fields[*index].1)(&row)
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// Aggregated rows in the statement's aggregated layout, from the store
    /// when it cooperates and from the client-side engine otherwise.
    fn aggregated_rows(&self, compiled: &CompiledQuery, plan: &AggregatePlan) -> Result<Vec<Row>> {
        if plan.native {
            match self.retrieve_all(&compiled.query) {
                Ok(rows) => return Ok(rows),
                // The store refused to aggregate this many rows; do it here.
                Err(Error::Store(StoreError::AggregateLimit)) => {}
                Err(e) => return Err(e),
            }
        }

        let mut rows = self.retrieve_all(&plan.source)?;
        if let Some(predicate) = &plan.pre_filter {
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows {
                if predicate(&row)?.to_bool()? {
                    kept.push(row);
                }
            }
            rows = kept;
        }
        let rows = block_sort(rows, &plan.sort)?;

        if plan.group_keys.is_empty() {
            // Global aggregation always yields exactly one row, even over
            // nothing.
            let mut accumulators: Vec<Accumulator> = plan
                .aggregates
                .iter()
                .map(|a| Accumulator::new(a.kind))
                .collect();
            for row in &rows {
                self.options.check_cancelled()?;
                for (accumulator, spec) in accumulators.iter_mut().zip(&plan.aggregates) {
                    match &spec.arg {
                        Some(arg) => accumulator.update(&arg(row)?)?,
                        None => accumulator.update(&Value::Bool(true))?,
                    }
                }
            }
            let engine_row: Row = accumulators
                .iter()
                .map(|a| a.value())
                .collect::<Result<_>>()?;
            return Ok(vec![remap(&engine_row, &plan.layout, 0)]);
        }

        let engine = StreamingGroupBy::new(
            rows.into_iter().map(Ok),
            plan.group_keys.clone(),
            plan.aggregates.clone(),
            self.options.cancel_flag(),
        );
        let key_count = plan.group_keys.len();
        engine
            .map(|result| result.map(|row| remap(&row, &plan.layout, key_count)))
            .collect()
    }

    pub fn execute_insert(&self, plan: &InsertPlan) -> Result<MutationSummary> {
        let field_rows: Vec<Vec<(String, Value)>> = match &plan.source {
            InsertRows::Values(tuples) => {
                let empty: Row = Vec::new();
                tuples
                    .iter()
                    .map(|tuple| {
                        plan.columns
                            .iter()
                            .zip(tuple)
                            .map(|(column, value)| Ok((column.clone(), value(&empty)?)))
                            .collect()
                    })
                    .collect::<Result<_>>()?
            }
            InsertRows::Select(query) => {
                let result = self.execute(query)?;
                result
                    .rows
                    .into_iter()
                    .map(|row| plan.columns.iter().cloned().zip(row).collect())
                    .collect()
            }
        };
        let summary = MutationSummary {
            kind: MutationKind::Insert,
            table: plan.table.clone(),
            rows: field_rows.len(),
        };
        let mutations: Vec<Mutation> = field_rows
            .into_iter()
            .map(|fields| Mutation::Create {
                table: plan.table.clone(),
                fields,
            })
            .collect();
        self.apply_batches(mutations)?;
        Ok(summary)
    }

    pub fn execute_update(&self, plan: &UpdatePlan) -> Result<MutationSummary> {
        let rows = self.selected_rows(&plan.select)?;
        let summary = MutationSummary {
            kind: MutationKind::Update,
            table: plan.table.clone(),
            rows: rows.len(),
        };
        if !self.options.confirm_mutation(&summary) {
            return Err(Error::OperationCancelled);
        }
        let mutations = rows
            .iter()
            .map(|row| {
                let id = row.first().cloned().unwrap_or(Value::Null);
                let fields = plan
                    .assignments
                    .iter()
                    .map(|(column, value)| Ok((column.clone(), value(row)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Mutation::Update {
                    table: plan.table.clone(),
                    id,
                    fields,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.apply_batches(mutations)?;
        Ok(summary)
    }

    pub fn execute_delete(&self, plan: &DeletePlan) -> Result<MutationSummary> {
        let rows = self.selected_rows(&plan.select)?;
        let summary = MutationSummary {
            kind: MutationKind::Delete,
            table: plan.table.clone(),
            rows: rows.len(),
        };
        if !self.options.confirm_mutation(&summary) {
            return Err(Error::OperationCancelled);
        }
        let mutations = rows
            .iter()
            .map(|row| Mutation::Delete {
                table: plan.table.clone(),
                id: row.first().cloned().unwrap_or(Value::Null),
            })
            .collect();
        self.apply_batches(mutations)?;
        Ok(summary)
    }

    /// Raw selected rows of a mutation's key-selection query: retrieval plus
    /// residual filter, no projection (assignments read the raw layout).
    fn selected_rows(&self, select: &CompiledQuery) -> Result<Vec<Row>> {
        let rows = self.retrieve_all(&select.query)?;
        self.apply_residual(rows, &select.residual)
    }

    /// Applies mutations in store batches. A failed batch rolls back on the
    /// store side; progress made by earlier batches is reported in the error.
    fn apply_batches(&self, mutations: Vec<Mutation>) -> Result<()> {
        let total = mutations.len();
        let mut affected = 0;
        for batch in mutations.chunks(self.options.batch_size.max(1)) {
            self.options.check_cancelled()?;
            if let Err(source) = self.store.execute_batch(batch) {
                return Err(Error::MutationFailed {
                    affected,
                    total,
                    source,
                });
            }
            affected += batch.len();
            self.options.report_progress(affected, total);
        }
        Ok(())
    }
}

fn remap(engine_row: &Row, layout: &[FallbackSlot], key_count: usize) -> Row {
    layout
        .iter()
        .map(|slot| match slot {
            FallbackSlot::Key(index) => engine_row.get(*index).cloned().unwrap_or(Value::Null),
            FallbackSlot::Aggregate(index) => engine_row
                .get(key_count + *index)
                .cloned()
                .unwrap_or(Value::Null),
        })
        .collect()
}
