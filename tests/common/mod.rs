//! Common test utilities: an in-memory record store that interprets native
//! query trees, plus a context that wires metadata, store and options
//! together behind simple `query`/`exec` helpers.
#![allow(dead_code)]

use fetch_sql::fetch::{
    AggregateKind, ConditionOp, DateGrouping, FetchQuery, LinkKind, LogicalOp, Node, NodeId,
};
use fetch_sql::{
    compile, CompiledStatement, ExecutionResult, Executor, Mutation, MutationSummary, Options,
    Page, QueryResult, RecordStore, StaticMetadata, StoreError, TableSchema, Value,
};
use chrono::{Datelike, Duration, Utc};
use regex::RegexBuilder;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;

/// One stored record: column name (lowercase) to value.
pub type Record = HashMap<String, Value>;

struct Table {
    primary_key: String,
    rows: Vec<Record>,
}

/// In-memory store that interprets [`FetchQuery`] trees over plain vectors
/// of records. Joins are nested loops, sorting and paging follow the store
/// contract, and aggregate queries can be made to fail with the store's
/// aggregate limit to exercise the client-side fallback.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Table>>,
    pub queries_run: AtomicUsize,
    pub batches_run: AtomicUsize,
    fail_aggregates: AtomicBool,
    fail_batches: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&self, name: &str, primary_key: &str, rows: Vec<Record>) {
        let mut tables = self.tables.lock().unwrap();
        tables.insert(
            name.to_lowercase(),
            Table {
                primary_key: primary_key.to_lowercase(),
                rows,
            },
        );
    }

    /// Makes every subsequent native aggregate query fail with
    /// [`StoreError::AggregateLimit`].
    pub fn refuse_aggregates(&self) {
        self.fail_aggregates.store(true, AtomicOrdering::Relaxed);
    }

    pub fn refuse_batches(&self) {
        self.fail_batches.store(true, AtomicOrdering::Relaxed);
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.lock().unwrap()[&table.to_lowercase()].rows.len()
    }

    pub fn rows_of(&self, table: &str) -> Vec<Record> {
        self.tables.lock().unwrap()[&table.to_lowercase()].rows.clone()
    }

    fn join_rows(
        &self,
        tables: &HashMap<String, Table>,
        query: &FetchQuery,
        node: NodeId,
        entity: &str,
    ) -> Vec<HashMap<NodeId, Record>> {
        let table = tables
            .get(&entity.to_lowercase())
            .unwrap_or_else(|| panic!("no such table in the test store: {entity}"));
        let mut records: Vec<HashMap<NodeId, Record>> = table
            .rows
            .iter()
            .filter(|row| self.passes_filters(query, node, row))
            .map(|row| HashMap::from([(node, row.clone())]))
            .collect();
        self.expand_links(tables, query, node, &mut records);
        records
    }

    fn expand_links(
        &self,
        tables: &HashMap<String, Table>,
        query: &FetchQuery,
        node: NodeId,
        records: &mut Vec<HashMap<NodeId, Record>>,
    ) {
        for &child in query.children(node) {
            let Node::Link {
                entity,
                kind,
                from,
                to,
                ..
            } = query.node(child)
            else {
                continue;
            };
            let right = tables
                .get(&entity.to_lowercase())
                .unwrap_or_else(|| panic!("no such table in the test store: {entity}"));
            let mut joined = Vec::new();
            for record in records.drain(..) {
                let left_key = record
                    .get(&node)
                    .and_then(|r| r.get(&from.to_lowercase()))
                    .cloned()
                    .unwrap_or(Value::Null);
                let matches: Vec<&Record> = right
                    .rows
                    .iter()
                    .filter(|row| {
                        let right_key = row.get(&to.to_lowercase()).cloned().unwrap_or(Value::Null);
                        !left_key.is_null()
                            && !right_key.is_null()
                            && left_key.cmp(&right_key) == Ordering::Equal
                            && self.passes_filters(query, child, row)
                    })
                    .collect();
                if matches.is_empty() {
                    if *kind == LinkKind::Outer {
                        joined.push(record);
                    }
                } else {
                    for m in matches {
                        let mut r = record.clone();
                        r.insert(child, m.clone());
                        joined.push(r);
                    }
                }
            }
            *records = joined;
            self.expand_links(tables, query, child, records);
        }
    }

    fn passes_filters(&self, query: &FetchQuery, node: NodeId, row: &Record) -> bool {
        query.children(node).iter().all(|&child| {
            if matches!(query.node(child), Node::Filter { .. }) {
                self.eval_filter(query, child, row)
            } else {
                true
            }
        })
    }

    fn eval_filter(&self, query: &FetchQuery, filter: NodeId, row: &Record) -> bool {
        let Node::Filter { op, children } = query.node(filter) else {
            panic!("not a filter node");
        };
        let results = children.iter().map(|&child| match query.node(child) {
            Node::Filter { .. } => self.eval_filter(query, child, row),
            Node::Condition { .. } => eval_condition(query.node(child), row),
            other => panic!("unexpected filter child: {other:?}"),
        });
        match op {
            LogicalOp::And => results.into_iter().all(|b| b),
            LogicalOp::Or => results.into_iter().any(|b| b),
            LogicalOp::Undetermined => panic!("undetermined filter reached the store"),
        }
    }
}

fn eval_condition(node: &Node, row: &Record) -> bool {
    let Node::Condition {
        attribute,
        op,
        values,
        value_of,
    } = node
    else {
        panic!("not a condition node");
    };
    let left = row
        .get(&attribute.to_lowercase())
        .cloned()
        .unwrap_or(Value::Null);
    match op {
        ConditionOp::Null => return left.is_null(),
        ConditionOp::NotNull => return !left.is_null(),
        _ => {}
    }
    if left.is_null() {
        return false;
    }
    if let Some(other) = value_of {
        let right = row.get(&other.to_lowercase()).cloned().unwrap_or(Value::Null);
        if right.is_null() {
            return false;
        }
        return ordered(*op, left.cmp(&right));
    }
    match op {
        ConditionOp::Eq
        | ConditionOp::Ne
        | ConditionOp::Lt
        | ConditionOp::Le
        | ConditionOp::Gt
        | ConditionOp::Ge => match values.first() {
            Some(v) if !v.is_null() => ordered(*op, left.cmp(v)),
            _ => false,
        },
        ConditionOp::In => values
            .iter()
            .any(|v| !v.is_null() && left.cmp(v) == Ordering::Equal),
        ConditionOp::NotIn => !values
            .iter()
            .any(|v| !v.is_null() && left.cmp(v) == Ordering::Equal),
        ConditionOp::Like | ConditionOp::NotLike => {
            let (Value::Str(s), Some(Value::Str(pattern))) = (&left, values.first()) else {
                return false;
            };
            let matched = like_matches(pattern, s);
            if *op == ConditionOp::Like {
                matched
            } else {
                !matched
            }
        }
        other => date_window(*other, &left, values),
    }
}

fn ordered(op: ConditionOp, ordering: Ordering) -> bool {
    match op {
        ConditionOp::Eq => ordering == Ordering::Equal,
        ConditionOp::Ne => ordering != Ordering::Equal,
        ConditionOp::Lt => ordering == Ordering::Less,
        ConditionOp::Le => ordering != Ordering::Greater,
        ConditionOp::Gt => ordering == Ordering::Greater,
        ConditionOp::Ge => ordering != Ordering::Less,
        other => panic!("{other:?} is not a comparison"),
    }
}

fn like_matches(pattern: &str, s: &str) -> bool {
    let mut regex = String::from("^");
    for c in pattern.chars() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    RegexBuilder::new(&regex)
        .case_insensitive(true)
        .build()
        .map(|re| re.is_match(s))
        .unwrap_or(false)
}

fn date_window(op: ConditionOp, value: &Value, values: &[Value]) -> bool {
    let date = match value {
        Value::Date(d) => *d,
        Value::Timestamp(t) => t.date(),
        _ => return false,
    };
    let today = Utc::now().date_naive();
    let argument = || match values.first() {
        Some(Value::I64(n)) => *n,
        other => panic!("date window needs an integer argument, got {other:?}"),
    };
    match op {
        ConditionOp::LastXDays => date >= today - Duration::days(argument()) && date <= today,
        ConditionOp::NextXDays => date >= today && date <= today + Duration::days(argument()),
        ConditionOp::OlderThanXDays => date < today - Duration::days(argument()),
        ConditionOp::OlderThanXMonths => {
            let months = argument() as i32;
            let total = today.year() * 12 + today.month0() as i32 - months;
            let boundary = chrono::NaiveDate::from_ymd_opt(
                total.div_euclid(12),
                total.rem_euclid(12) as u32 + 1,
                today.day().min(28),
            )
            .unwrap();
            date < boundary
        }
        ConditionOp::Today => date == today,
        ConditionOp::Yesterday => date == today - Duration::days(1),
        ConditionOp::Tomorrow => date == today + Duration::days(1),
        ConditionOp::ThisMonth => date.year() == today.year() && date.month() == today.month(),
        ConditionOp::ThisYear => date.year() == today.year(),
        other => panic!("{other:?} is not a date window"),
    }
}

/// Grouped-attribute bucketing as the store applies it natively.
fn bucket(value: &Value, grouping: Option<DateGrouping>) -> Value {
    let Some(grouping) = grouping else {
        return value.clone();
    };
    let date = match value {
        Value::Date(d) => *d,
        Value::Timestamp(t) => t.date(),
        _ => return Value::Null,
    };
    let n = match grouping {
        DateGrouping::Year => date.year() as i64,
        DateGrouping::Quarter => (date.month0() / 3) as i64 + 1,
        DateGrouping::Month => date.month() as i64,
        DateGrouping::Week => date.iso_week().week() as i64,
        DateGrouping::Day => date.day() as i64,
    };
    Value::I64(n)
}

struct KeySpec {
    node: NodeId,
    name: String,
    alias: String,
    grouping: Option<DateGrouping>,
}

struct AggSpec {
    node: NodeId,
    name: String,
    alias: String,
    kind: AggregateKind,
    distinct: bool,
}

fn aggregate_specs(query: &FetchQuery) -> (Vec<KeySpec>, Vec<AggSpec>) {
    let mut keys = Vec::new();
    let mut aggs = Vec::new();
    for owner in query.entity_nodes() {
        for &child in query.children(owner) {
            if let Node::Attribute {
                name,
                alias,
                aggregate,
                distinct,
                date_grouping,
                group_by,
            } = query.node(child)
            {
                let alias = alias.clone().unwrap_or_else(|| name.clone());
                if *group_by {
                    keys.push(KeySpec {
                        node: owner,
                        name: name.clone(),
                        alias,
                        grouping: *date_grouping,
                    });
                } else if let Some(kind) = aggregate {
                    aggs.push(AggSpec {
                        node: owner,
                        name: name.clone(),
                        alias,
                        kind: *kind,
                        distinct: *distinct,
                    });
                }
            }
        }
    }
    (keys, aggs)
}

fn attribute_of(record: &HashMap<NodeId, Record>, node: NodeId, name: &str) -> Value {
    record
        .get(&node)
        .and_then(|r| r.get(&name.to_lowercase()))
        .cloned()
        .unwrap_or(Value::Null)
}

fn aggregate_groups(
    query: &FetchQuery,
    records: &[HashMap<NodeId, Record>],
) -> Vec<HashMap<String, Value>> {
    let (keys, aggs) = aggregate_specs(query);
    let mut order: Vec<Vec<Value>> = Vec::new();
    let mut groups: HashMap<Vec<Value>, (HashMap<String, Value>, Vec<Vec<Value>>)> = HashMap::new();
    for record in records {
        let folded: Vec<Value> = keys
            .iter()
            .map(|k| bucket(&attribute_of(record, k.node, &k.name), k.grouping).fold_case())
            .collect();
        let entry = groups.entry(folded.clone()).or_insert_with(|| {
            order.push(folded.clone());
            let raw = keys
                .iter()
                .map(|k| {
                    (
                        k.alias.clone(),
                        bucket(&attribute_of(record, k.node, &k.name), k.grouping),
                    )
                })
                .collect();
            (raw, Vec::new())
        });
        entry.1.push(
            aggs.iter()
                .map(|a| attribute_of(record, a.node, &a.name))
                .collect(),
        );
    }
    order
        .into_iter()
        .map(|folded| {
            let (mut out, rows) = groups.remove(&folded).unwrap();
            for (i, agg) in aggs.iter().enumerate() {
                let column: Vec<&Value> = rows.iter().map(|r| &r[i]).collect();
                out.insert(agg.alias.clone(), fold_aggregate(agg, &column));
            }
            out
        })
        .collect()
}

fn fold_aggregate(spec: &AggSpec, values: &[&Value]) -> Value {
    let non_null: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();
    match spec.kind {
        AggregateKind::Count => Value::I64(values.len() as i64),
        AggregateKind::CountColumn => {
            if spec.distinct {
                let mut seen = Vec::new();
                for v in &non_null {
                    let folded = v.fold_case();
                    if !seen.contains(&folded) {
                        seen.push(folded);
                    }
                }
                Value::I64(seen.len() as i64)
            } else {
                Value::I64(non_null.len() as i64)
            }
        }
        AggregateKind::Sum | AggregateKind::Avg => {
            let mut total: Option<Value> = None;
            for v in &non_null {
                total = Some(match total.take() {
                    Some(t) => t.add(v).unwrap(),
                    None => (*v).clone(),
                });
            }
            match (spec.kind, total) {
                (_, None) => Value::Null,
                (AggregateKind::Sum, Some(t)) => t,
                (_, Some(t)) => t.divide(&Value::I64(non_null.len() as i64)).unwrap(),
            }
        }
        AggregateKind::Min => non_null.iter().min().map(|v| (*v).clone()).unwrap_or(Value::Null),
        AggregateKind::Max => non_null.iter().max().map(|v| (*v).clone()).unwrap_or(Value::Null),
    }
}

impl RecordStore for MemoryStore {
    fn run_query(
        &self,
        query: &FetchQuery,
        page_number: u32,
        page_size: u32,
    ) -> Result<Page, StoreError> {
        self.queries_run.fetch_add(1, AtomicOrdering::Relaxed);
        let tables = self.tables.lock().unwrap();
        let root = query.root();
        let mut records = self.join_rows(&tables, query, root, query.entity_name(root));

        let rows: Vec<Vec<Value>> = if query.aggregate {
            if self.fail_aggregates.load(AtomicOrdering::Relaxed) {
                return Err(StoreError::AggregateLimit);
            }
            aggregate_groups(query, &records)
                .into_iter()
                .map(|group| {
                    query
                        .columns
                        .iter()
                        .map(|c| group.get(&c.attribute).cloned().unwrap_or(Value::Null))
                        .collect()
                })
                .collect()
        } else {
            let mut sort_keys: Vec<(NodeId, String, bool)> = Vec::new();
            for owner in query.entity_nodes() {
                for &child in query.children(owner) {
                    if let Node::Order {
                        attribute,
                        descending,
                    } = query.node(child)
                    {
                        sort_keys.push((owner, attribute.clone(), *descending));
                    }
                }
            }
            records.sort_by(|a, b| {
                for (node, attribute, descending) in &sort_keys {
                    let ordering = attribute_of(a, *node, attribute)
                        .cmp(&attribute_of(b, *node, attribute));
                    let ordering = if *descending { ordering.reverse() } else { ordering };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
            records
                .iter()
                .map(|record| {
                    query
                        .columns
                        .iter()
                        .map(|c| attribute_of(record, c.node, &c.attribute))
                        .collect()
                })
                .collect()
        };

        let mut rows = rows;
        if let Some(top) = query.top {
            rows.truncate(top as usize);
        }
        let start = (page_number.max(1) as usize - 1) * page_size as usize;
        let end = (start + page_size as usize).min(rows.len());
        let more = end < rows.len();
        let page = if start < rows.len() {
            rows[start..end].to_vec()
        } else {
            Vec::new()
        };
        Ok(Page { rows: page, more })
    }

    fn create(&self, table: &str, fields: &[(String, Value)]) -> Result<Value, StoreError> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables
            .get_mut(&table.to_lowercase())
            .ok_or_else(|| StoreError::Rejected(format!("no such table: {table}")))?;
        let mut row: Record = fields
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect();
        let id = row
            .entry(table.primary_key.clone())
            .or_insert_with(|| Value::Uuid(uuid::Uuid::new_v4()))
            .clone();
        table.rows.push(row);
        Ok(id)
    }

    fn update(&self, table: &str, id: &Value, fields: &[(String, Value)]) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables
            .get_mut(&table.to_lowercase())
            .ok_or_else(|| StoreError::Rejected(format!("no such table: {table}")))?;
        let pk = table.primary_key.clone();
        let row = table
            .rows
            .iter_mut()
            .find(|r| r.get(&pk).is_some_and(|v| v == id))
            .ok_or_else(|| StoreError::Rejected(format!("no record with id {id:?}")))?;
        for (k, v) in fields {
            row.insert(k.to_lowercase(), v.clone());
        }
        Ok(())
    }

    fn delete(&self, table: &str, id: &Value) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables
            .get_mut(&table.to_lowercase())
            .ok_or_else(|| StoreError::Rejected(format!("no such table: {table}")))?;
        let pk = table.primary_key.clone();
        let before = table.rows.len();
        table.rows.retain(|r| r.get(&pk).map(|v| v != id).unwrap_or(true));
        if table.rows.len() == before {
            return Err(StoreError::Rejected(format!("no record with id {id:?}")));
        }
        Ok(())
    }

    fn execute_batch(&self, batch: &[Mutation]) -> Result<(), StoreError> {
        self.batches_run.fetch_add(1, AtomicOrdering::Relaxed);
        if self.fail_batches.load(AtomicOrdering::Relaxed) {
            return Err(StoreError::BatchFailed {
                size: batch.len(),
                message: "simulated store failure".into(),
            });
        }
        for mutation in batch {
            match mutation {
                Mutation::Create { table, fields } => {
                    self.create(table, fields)?;
                }
                Mutation::Update { table, id, fields } => self.update(table, id, fields)?,
                Mutation::Delete { table, id } => self.delete(table, id)?,
            }
        }
        Ok(())
    }
}

/// Test context wiring metadata, store and options together.
pub struct TestContext {
    pub metadata: StaticMetadata,
    pub store: MemoryStore,
    pub options: Options,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            metadata: StaticMetadata::new(),
            store: MemoryStore::new(),
            options: Options::default(),
        }
    }

    pub fn with_table(mut self, schema: TableSchema, rows: Vec<Record>) -> Self {
        self.store.add_table(&schema.name, &schema.primary_key, rows);
        self.metadata = self.metadata.with_table(schema);
        self
    }

    pub fn compile(&self, sql: &str) -> fetch_sql::Result<CompiledStatement> {
        compile(sql, &self.metadata, &self.options)
    }

    pub fn try_exec(&self, sql: &str) -> fetch_sql::Result<ExecutionResult> {
        let statement = self.compile(sql)?;
        Executor::new(&self.store, &self.options).run(&statement)
    }

    pub fn query(&self, sql: &str) -> QueryResult {
        match self.try_exec(sql) {
            Ok(ExecutionResult::Rows(result)) => result,
            Ok(_) => panic!("expected rows from: {sql}"),
            Err(e) => panic!("query failed: {sql} - {e}"),
        }
    }

    pub fn mutate(&self, sql: &str) -> MutationSummary {
        match self.try_exec(sql) {
            Ok(ExecutionResult::Mutation(summary)) => summary,
            Ok(_) => panic!("expected a mutation from: {sql}"),
            Err(e) => panic!("mutation failed: {sql} - {e}"),
        }
    }
}

/// Value of a named output column in one result row.
pub fn cell<'a>(result: &'a QueryResult, row: usize, column: &str) -> &'a Value {
    let index = result
        .columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case(column))
        .unwrap_or_else(|| panic!("no output column {column} in {:?}", result.columns));
    &result.rows[row][index]
}

/// Shorthand record constructor: `record(&[("id", Value::I64(1))])`.
pub fn record(fields: &[(&str, Value)]) -> Record {
    fields
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.clone()))
        .collect()
}
