//! Statement entry points and assembly
//!
//! [`compile`] parses one T-SQL statement and dispatches to the per-statement
//! compilers. SELECT assembly is where degradation decisions become final:
//! residual fragments are compiled into closures, sort keys are weighed,
//! paging is pushed natively or kept local, and aggregate queries get their
//! client-side plan built against a second, non-aggregated source query.

use super::bindings::{as_column, base_table_name};
use super::residual::{
    AggregateExpr, AggregatePlan, ColumnSource, CompiledQuery, FallbackSlot, OutputColumn,
    ResidualWorkBundle, ScalarFn, SortKey,
};
use super::select::{AggregateParts, GroupSpec, PendingAggregate};
use super::QueryBuilder;
use crate::client::Options;
use crate::error::{Error, Result};
use crate::fetch::{NativePaging, Node};
use crate::functions::date_part;
use crate::types::{MetadataProvider, Value};
use sqlparser::ast::{
    self, Assignment, AssignmentTarget, Delete, Expr, FromTable, Insert, ObjectName, Query,
    SetExpr, Statement, TableFactor, TableWithJoins, TopQuantity,
};
use sqlparser::dialect::MsSqlDialect;
use sqlparser::parser::Parser;
use std::sync::Arc;

/// A compiled statement, ready for the executor.
pub enum CompiledStatement {
    Select(CompiledQuery),
    Insert(InsertPlan),
    Update(UpdatePlan),
    Delete(DeletePlan),
}

impl std::fmt::Debug for CompiledStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompiledStatement::Select(_) => f.write_str("CompiledStatement::Select(..)"),
            CompiledStatement::Insert(_) => f.write_str("CompiledStatement::Insert(..)"),
            CompiledStatement::Update(_) => f.write_str("CompiledStatement::Update(..)"),
            CompiledStatement::Delete(_) => f.write_str("CompiledStatement::Delete(..)"),
        }
    }
}

/// INSERT: target columns plus the row source, matched by position.
pub struct InsertPlan {
    pub table: String,
    pub columns: Vec<String>,
    pub source: InsertRows,
}

pub enum InsertRows {
    /// VALUES tuples, compiled to constant evaluators.
    Values(Vec<Vec<ScalarFn>>),
    /// INSERT ... SELECT.
    Select(Box<CompiledQuery>),
}

/// UPDATE: a key-selection query (primary key is output column 0) plus the
/// per-row assignment evaluators, compiled over the selected row layout.
pub struct UpdatePlan {
    pub table: String,
    pub select: CompiledQuery,
    pub assignments: Vec<(String, ScalarFn)>,
}

/// DELETE: a key-selection query; primary key is output column 0.
pub struct DeletePlan {
    pub table: String,
    pub select: CompiledQuery,
}

/// Parses and compiles exactly one statement.
pub fn compile(
    sql: &str,
    metadata: &dyn MetadataProvider,
    options: &Options,
) -> Result<CompiledStatement> {
    let statements = Parser::parse_sql(&MsSqlDialect {}, sql)
        .map_err(|e| Error::ParseError(e.to_string()))?;
    let mut statements = statements.into_iter();
    let statement = statements
        .next()
        .ok_or_else(|| Error::ParseError("empty statement".into()))?;
    if statements.next().is_some() {
        return Err(Error::unsupported("statement batch", sql));
    }
    compile_statement(&statement, metadata, options)
}

pub fn compile_statement(
    statement: &Statement,
    metadata: &dyn MetadataProvider,
    options: &Options,
) -> Result<CompiledStatement> {
    match statement {
        Statement::Query(query) => Ok(CompiledStatement::Select(compile_query(query, metadata)?)),
        Statement::Insert(insert) => Ok(CompiledStatement::Insert(compile_insert(
            insert, metadata,
        )?)),
        Statement::Update {
            table,
            assignments,
            from,
            selection,
            ..
        } => Ok(CompiledStatement::Update(compile_update(
            table, assignments, from, selection, metadata, options,
        )?)),
        Statement::Delete(delete) => Ok(CompiledStatement::Delete(compile_delete(
            delete, metadata, options,
        )?)),
        other => Err(Error::unsupported("statement", other)),
    }
}

pub fn compile_query(query: &Query, metadata: &dyn MetadataProvider) -> Result<CompiledQuery> {
    if query.with.is_some() {
        return Err(Error::unsupported("common table expression", query));
    }
    let select = match query.body.as_ref() {
        SetExpr::Select(select) => select,
        other => Err(Error::unsupported("set operation", other))?,
    };
    if select.from.len() != 1 {
        return Err(Error::unsupported(
            "FROM clause (exactly one table chain is supported)",
            select,
        ));
    }

    let base = base_table_name(&select.from[0])?;
    let mut builder = QueryBuilder::new(metadata, &base);
    builder.bind_from(&select.from[0])?;
    if let Some(selection) = &select.selection {
        builder.translate_where(selection)?;
    }
    let aggregate_parts = builder.convert_projection(select)?;
    if let Some(order_by) = &query.order_by {
        builder.convert_order_by(&order_by.exprs)?;
    }
    match &select.distinct {
        None => {}
        Some(ast::Distinct::Distinct) if aggregate_parts.is_none() => {
            builder.tree.distinct = true;
        }
        Some(other) => return Err(Error::unsupported("DISTINCT form", format!("{:?}", other))),
    }

    let aggregate = match aggregate_parts {
        Some(parts) => Some(build_aggregate_plan(
            &mut builder,
            parts,
            &select.from[0],
            select.selection.as_ref(),
            metadata,
        )?),
        None => None,
    };

    // Residual bundle. For aggregate queries the WHERE residual is part of
    // the fallback plan (it applies before grouping); only HAVING lands in
    // the post-filter here.
    let post_filter = if aggregate.is_some() {
        None // already folded in by build_aggregate_plan
    } else {
        let fragments = std::mem::take(&mut builder.residual_where);
        compile_conjunction(&mut builder, &fragments)?
    };
    let having_filter = match &aggregate {
        Some(_) => builder.pending_having.take(),
        None => None,
    };
    let mut post_sort = std::mem::take(&mut builder.post_sort);
    if post_sort.iter().all(|k| k.natively_satisfied) {
        post_sort.clear();
    }
    let mut residual = ResidualWorkBundle {
        post_filter: post_filter.or(having_filter),
        post_sort,
        calculated_fields: std::mem::take(&mut builder.calculated),
        post_top: None,
    };

    if builder.tree.distinct && (!residual.is_empty() || !residual.calculated_fields.is_empty()) {
        return Err(Error::unsupported(
            "DISTINCT over a query with local work",
            select,
        ));
    }

    apply_row_limits(query, &mut builder, &mut residual, aggregate.is_some())?;

    builder.tree.finalize();
    let query_tree = match &aggregate {
        Some(plan) if !plan.native => plan.source.clone(),
        _ => builder.tree,
    };
    Ok(CompiledQuery {
        query: query_tree,
        residual,
        output: builder.output,
        aggregate,
    })
}

/// TOP and OFFSET/FETCH. TOP pushes natively only when no local filtering or
/// reordering can change which rows come first; OFFSET is representable only
/// as whole native pages and never mixes with local work.
fn apply_row_limits(
    query: &Query,
    builder: &mut QueryBuilder,
    residual: &mut ResidualWorkBundle,
    aggregating: bool,
) -> Result<()> {
    let top = top_quantity(query)?;
    if let Some(n) = top {
        if aggregating || !residual.is_empty() {
            residual.post_top = Some(n as usize);
        } else {
            builder.tree.top = Some(n);
        }
    }

    match (&query.offset, &query.fetch) {
        (None, None) => Ok(()),
        (Some(offset), Some(fetch)) => {
            if fetch.with_ties || fetch.percent {
                return Err(Error::unsupported("FETCH modifier", query));
            }
            let offset_rows = offset_value(&offset.value)?;
            let fetch_rows = match &fetch.quantity {
                Some(expr) => offset_value(expr)?,
                None => return Err(Error::unsupported("FETCH without a row count", query)),
            };
            if fetch_rows == 0 || offset_rows % fetch_rows != 0 {
                return Err(Error::unsupported(
                    "OFFSET that is not a whole number of FETCH pages",
                    query,
                ));
            }
            if aggregating || !residual.is_empty() {
                return Err(Error::unsupported(
                    "OFFSET/FETCH combined with local filtering or sorting",
                    query,
                ));
            }
            builder.tree.paging = Some(NativePaging {
                page_number: (offset_rows / fetch_rows) as u32 + 1,
                page_size: fetch_rows as u32,
            });
            Ok(())
        }
        _ => Err(Error::unsupported("OFFSET without FETCH", query)),
    }
}

fn top_quantity(query: &Query) -> Result<Option<u64>> {
    let select = match query.body.as_ref() {
        SetExpr::Select(select) => select,
        _ => return Ok(None),
    };
    let Some(top) = &select.top else {
        return Ok(None);
    };
    if top.with_ties || top.percent {
        return Err(Error::unsupported("TOP modifier", select));
    }
    match &top.quantity {
        Some(TopQuantity::Constant(n)) => Ok(Some(*n)),
        Some(TopQuantity::Expr(Expr::Value(ast::Value::Number(text, _)))) => text
            .parse::<u64>()
            .map(Some)
            .map_err(|_| Error::InvalidValue(format!("bad TOP count {}", text))),
        Some(TopQuantity::Expr(other)) => Err(Error::unsupported("TOP expression", other)),
        None => Ok(None),
    }
}

fn offset_value(expr: &Expr) -> Result<u64> {
    match expr {
        Expr::Value(ast::Value::Number(text, _)) => text
            .parse::<u64>()
            .map_err(|_| Error::InvalidValue(format!("bad row count {}", text))),
        other => Err(Error::unsupported("row count expression", other)),
    }
}

/// ANDs residual fragments into one post-filter. UNKNOWN collapses to false
/// at evaluation, matching WHERE semantics.
fn compile_conjunction(
    builder: &mut QueryBuilder,
    fragments: &[Expr],
) -> Result<Option<ScalarFn>> {
    if fragments.is_empty() {
        return Ok(None);
    }
    let compiled = fragments
        .iter()
        .map(|e| builder.compile_scalar(e))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(Arc::new(move |row| {
        for predicate in &compiled {
            if !predicate(row)?.to_bool()? {
                return Ok(Value::Bool(false));
            }
        }
        Ok(Value::Bool(true))
    })))
}

/// Builds the client-side aggregation plan: a non-aggregated source query
/// over the same FROM and WHERE, selectors for keys and aggregate arguments
/// over its row layout, and the mapping back to the aggregated layout.
fn build_aggregate_plan(
    builder: &mut QueryBuilder,
    parts: AggregateParts,
    from: &TableWithJoins,
    selection: Option<&Expr>,
    metadata: &dyn MetadataProvider,
) -> Result<AggregatePlan> {
    let base = base_table_name(from)?;
    let mut source = QueryBuilder::new(metadata, &base);
    source.bind_from(from)?;
    if let Some(selection) = selection {
        source.translate_where(selection)?;
    }
    let fragments = std::mem::take(&mut source.residual_where);
    let pre_filter = compile_conjunction(&mut source, &fragments)?;

    let mut group_keys: Vec<ScalarFn> = Vec::new();
    let mut sort: Vec<SortKey> = Vec::new();
    let mut native_prefix = true;
    for GroupSpec { column, part } in &parts.group_by {
        let (qualifier, name) = as_column(column)
            .ok_or_else(|| Error::Internal("group key lost its column form".into()))?;
        let (node, canonical) = source.bindings.resolve(qualifier, name)?;
        let index = source.attach_column(node, &canonical);
        let selector: ScalarFn = match part {
            None => Arc::new(move |row| Ok(row.get(index).cloned().unwrap_or(Value::Null))),
            Some(part) => {
                let part = *part;
                Arc::new(move |row| {
                    let value = row.get(index).cloned().unwrap_or(Value::Null);
                    date_part(part, &value)
                })
            }
        };
        // Bare-column keys extend the native sort prefix the streaming
        // engine relies on; a date-part key ends it.
        let satisfied = native_prefix && part.is_none();
        if satisfied {
            source.tree.add_child(
                node,
                Node::Order {
                    attribute: canonical,
                    descending: false,
                },
            );
        } else {
            native_prefix = false;
        }
        sort.push(SortKey {
            natively_satisfied: satisfied,
            selector: selector.clone(),
            descending: false,
        });
        group_keys.push(selector);
    }

    let mut aggregates = Vec::with_capacity(parts.aggregates.len());
    for PendingAggregate { kind, arg } in &parts.aggregates {
        let arg = arg
            .as_ref()
            .map(|expr| source.compile_scalar(expr))
            .transpose()?;
        aggregates.push(AggregateExpr { kind: *kind, arg });
    }

    // Columns were laid out keys-first, aggregates after, so the mapping
    // back from engine order is positional.
    let layout: Vec<FallbackSlot> = (0..group_keys.len())
        .map(FallbackSlot::Key)
        .chain((0..aggregates.len()).map(FallbackSlot::Aggregate))
        .collect();

    // HAVING evaluates over aggregated rows; compile it in the main
    // builder's grouping context and stash it for bundle assembly.
    if let Some(having) = &parts.having {
        let compiled = builder.compile_scalar(having)?;
        builder.pending_having = Some(Arc::new(move |row| {
            Ok(Value::Bool(compiled(row)?.to_bool()?))
        }));
    }

    source.tree.finalize();
    Ok(AggregatePlan {
        native: parts.native,
        source: source.tree,
        pre_filter,
        sort,
        group_keys,
        aggregates,
        layout,
    })
}

fn compile_insert(insert: &Insert, metadata: &dyn MetadataProvider) -> Result<InsertPlan> {
    let table = object_last(&insert.table_name);
    let schema = metadata.table_schema(&table)?;

    let columns: Vec<String> = if insert.columns.is_empty() {
        schema.columns.iter().map(|c| c.name.clone()).collect()
    } else {
        insert
            .columns
            .iter()
            .map(|ident| {
                schema
                    .column(&ident.value)
                    .map(|c| c.name.clone())
                    .ok_or_else(|| Error::UnknownIdentifier(ident.value.clone()))
            })
            .collect::<Result<_>>()?
    };

    let source_query = insert
        .source
        .as_ref()
        .ok_or_else(|| Error::unsupported("INSERT without a row source", insert))?;
    let source = match source_query.body.as_ref() {
        SetExpr::Values(values) => {
            let mut rows = Vec::with_capacity(values.rows.len());
            // VALUES tuples may not reference columns; an unbound builder
            // rejects any identifier.
            let mut builder = QueryBuilder::new(metadata, schema.name.as_str());
            for tuple in &values.rows {
                if tuple.len() != columns.len() {
                    return Err(Error::InvalidValue(format!(
                        "INSERT expects {} values per row, got {}",
                        columns.len(),
                        tuple.len()
                    )));
                }
                let row = tuple
                    .iter()
                    .map(|e| builder.compile_scalar(e))
                    .collect::<Result<Vec<_>>>()?;
                rows.push(row);
            }
            InsertRows::Values(rows)
        }
        SetExpr::Select(_) => {
            let compiled = compile_query(source_query, metadata)?;
            if compiled.output.len() != columns.len() {
                return Err(Error::InvalidValue(format!(
                    "INSERT expects {} columns, the SELECT produces {}",
                    columns.len(),
                    compiled.output.len()
                )));
            }
            InsertRows::Select(Box::new(compiled))
        }
        other => return Err(Error::unsupported("INSERT source", other)),
    };

    Ok(InsertPlan {
        table: schema.name.clone(),
        columns,
        source,
    })
}

fn compile_update(
    table: &TableWithJoins,
    assignments: &[Assignment],
    from: &Option<TableWithJoins>,
    selection: &Option<Expr>,
    metadata: &dyn MetadataProvider,
    options: &Options,
) -> Result<UpdatePlan> {
    if from.is_some() {
        return Err(Error::unsupported("UPDATE ... FROM", "FROM"));
    }
    let (mut builder, schema) = mutation_target(table, selection, metadata, options, "UPDATE")?;

    let mut compiled_assignments = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let name = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_last(name),
            AssignmentTarget::Tuple(_) => {
                return Err(Error::unsupported("tuple assignment", assignment))
            }
        };
        let canonical = schema
            .column(&name)
            .map(|c| c.name.clone())
            .ok_or_else(|| Error::UnknownIdentifier(name))?;
        let value = builder.compile_scalar(&assignment.value)?;
        compiled_assignments.push((canonical, value));
    }

    Ok(UpdatePlan {
        table: schema.name.clone(),
        select: finish_key_select(builder)?,
        assignments: compiled_assignments,
    })
}

fn compile_delete(
    delete: &Delete,
    metadata: &dyn MetadataProvider,
    options: &Options,
) -> Result<DeletePlan> {
    let tables = match &delete.from {
        FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
    };
    if tables.len() != 1 {
        return Err(Error::unsupported("multi-table DELETE", delete));
    }
    let (builder, schema) =
        mutation_target(&tables[0], &delete.selection, metadata, options, "DELETE")?;
    Ok(DeletePlan {
        table: schema.name.clone(),
        select: finish_key_select(builder)?,
    })
}

/// Shared front half of UPDATE/DELETE: bind the single target table, attach
/// the primary key as output column 0 and translate the WHERE clause.
fn mutation_target<'a>(
    table: &TableWithJoins,
    selection: &Option<Expr>,
    metadata: &'a dyn MetadataProvider,
    options: &Options,
    verb: &str,
) -> Result<(QueryBuilder<'a>, std::sync::Arc<crate::types::TableSchema>)> {
    if !table.joins.is_empty() {
        return Err(Error::unsupported("join in a mutation target", verb));
    }
    if selection.is_none() && options.block_mutations_without_where {
        return Err(Error::InvalidValue(format!(
            "{} without a WHERE clause is blocked by session options",
            verb
        )));
    }
    if !matches!(table.relation, TableFactor::Table { .. }) {
        return Err(Error::unsupported("mutation target", &table.relation));
    }
    let base = base_table_name(table)?;
    let mut builder = QueryBuilder::new(metadata, &base);
    builder.bind_from(table)?;
    let schema = metadata.table_schema(&base)?;

    let root = builder.tree.root();
    let pk = schema.primary_key.clone();
    let index = builder.attach_column(root, &pk);
    builder.output.push(OutputColumn {
        name: pk,
        source: ColumnSource::Row(index),
    });

    if let Some(selection) = selection {
        builder.translate_where(selection)?;
    }
    Ok((builder, schema))
}

/// Finishes a key-selection query for a mutation: residual filter compiled,
/// tree finalized, no sorting or paging.
fn finish_key_select(mut builder: QueryBuilder) -> Result<CompiledQuery> {
    let fragments = std::mem::take(&mut builder.residual_where);
    let post_filter = compile_conjunction(&mut builder, &fragments)?;
    builder.tree.finalize();
    Ok(CompiledQuery {
        query: builder.tree,
        residual: ResidualWorkBundle {
            post_filter,
            post_sort: Vec::new(),
            calculated_fields: std::mem::take(&mut builder.calculated),
            post_top: None,
        },
        output: builder.output,
        aggregate: None,
    })
}

fn object_last(name: &ObjectName) -> String {
    name.0
        .last()
        .map(|ident| ident.value.clone())
        .unwrap_or_default()
}
