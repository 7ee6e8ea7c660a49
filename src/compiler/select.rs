//! Projection conversion
//!
//! A plain select list turns into native attributes plus calculated fields;
//! an aggregating one (aggregate functions, GROUP BY or HAVING anywhere)
//! switches the whole statement into aggregate mode, where the native tree
//! carries grouped and aggregated attributes and a client-side plan is
//! prepared in parallel in case the store refuses to aggregate.

use super::bindings::as_column;
use super::scalar::{function_args, is_aggregate_name};
use super::{AggregateRef, ColumnSource, GroupKeyRef, GroupingSet, OutputColumn, QueryBuilder};
use crate::error::{Error, Result};
use crate::execution::aggregate::AccumulatorKind;
use crate::fetch::{AggregateKind, DateGrouping, Node};
use crate::functions::DatePart;
use sqlparser::ast::{
    DuplicateTreatment, Expr, Function, FunctionArg, FunctionArgExpr, FunctionArguments,
    GroupByExpr, Select, SelectItem,
};

/// One aggregate of the statement, kept in AST form until the fallback
/// source query exists to compile its argument against.
pub(crate) struct PendingAggregate {
    pub kind: AccumulatorKind,
    pub arg: Option<Expr>,
}

/// One GROUP BY term in AST form, for rebinding against the fallback source.
pub(crate) struct GroupSpec {
    pub column: Expr,
    pub part: Option<DatePart>,
}

/// Everything statement assembly needs to finish an aggregate query.
pub(crate) struct AggregateParts {
    pub group_by: Vec<GroupSpec>,
    pub aggregates: Vec<PendingAggregate>,
    /// Whether the native tree can be sent as-is. False when WHERE left a
    /// residual (it must apply before grouping) or when any aggregate has no
    /// native attribute form.
    pub native: bool,
    pub having: Option<Expr>,
}

impl<'a> QueryBuilder<'a> {
    /// Converts the select list (and GROUP BY / HAVING, if aggregating).
    /// Returns the aggregate parts when the statement aggregates.
    pub(crate) fn convert_projection(
        &mut self,
        select: &Select,
    ) -> Result<Option<AggregateParts>> {
        let group_exprs = group_by_exprs(&select.group_by)?;
        let aggregating = !group_exprs.is_empty()
            || select.having.is_some()
            || select
                .projection
                .iter()
                .any(|item| item_expr(item).is_some_and(contains_aggregate));

        if aggregating {
            return Ok(Some(self.convert_aggregate(select, group_exprs)?));
        }

        for item in &select.projection {
            self.convert_plain_item(item)?;
        }
        Ok(None)
    }

    fn convert_plain_item(&mut self, item: &SelectItem) -> Result<()> {
        match item {
            SelectItem::Wildcard(_) => {
                let expansions: Vec<_> = self
                    .bindings
                    .iter()
                    .map(|b| {
                        (
                            b.node,
                            b.alias.clone(),
                            b.schema
                                .readable_columns()
                                .map(|c| c.name.clone())
                                .collect::<Vec<_>>(),
                        )
                    })
                    .collect();
                let root = self.tree.root();
                for (node, alias, columns) in expansions {
                    self.tree.set_all_attributes(node, "*")?;
                    for column in columns {
                        let index = self.attach_column(node, &column);
                        let name = if node == root {
                            column
                        } else {
                            format!("{}.{}", alias, column)
                        };
                        self.output.push(OutputColumn {
                            name,
                            source: ColumnSource::Row(index),
                        });
                    }
                }
                Ok(())
            }
            SelectItem::QualifiedWildcard(name, _) => {
                let qualifier = name
                    .0
                    .last()
                    .map(|ident| ident.value.clone())
                    .unwrap_or_default();
                let Some(binding) = self.bindings.by_alias(&qualifier) else {
                    return Err(Error::UnknownIdentifier(qualifier));
                };
                let node = binding.node;
                let alias = binding.alias.clone();
                let columns: Vec<_> = binding
                    .schema
                    .readable_columns()
                    .map(|c| c.name.clone())
                    .collect();
                let root = self.tree.root();
                self.tree
                    .set_all_attributes(node, &format!("{}.*", qualifier))?;
                for column in columns {
                    let index = self.attach_column(node, &column);
                    let name = if node == root {
                        column
                    } else {
                        format!("{}.{}", alias, column)
                    };
                    self.output.push(OutputColumn {
                        name,
                        source: ColumnSource::Row(index),
                    });
                }
                Ok(())
            }
            SelectItem::UnnamedExpr(expr) => self.convert_plain_expr(expr, None),
            SelectItem::ExprWithAlias { expr, alias } => {
                self.convert_plain_expr(expr, Some(alias.value.clone()))
            }
        }
    }

    fn convert_plain_expr(&mut self, expr: &Expr, alias: Option<String>) -> Result<()> {
        // A bare column stays a native attribute; anything else becomes a
        // calculated field evaluated client-side.
        if let Some((qualifier, column)) = as_column(expr) {
            let (node, canonical) = self.bindings.resolve(qualifier, column)?;
            let index = match &alias {
                Some(alias) => self.attach_aliased_column(node, &canonical, alias)?,
                None => self.attach_column(node, &canonical),
            };
            self.output.push(OutputColumn {
                name: alias.unwrap_or(canonical),
                source: ColumnSource::Row(index),
            });
            return Ok(());
        }
        let name = alias.unwrap_or_else(|| format!("Expr{}", self.calculated.len() + 1));
        let compiled = self.compile_scalar(expr)?;
        self.calculated.push((name.clone(), compiled));
        self.output.push(OutputColumn {
            name,
            source: ColumnSource::Calculated(self.calculated.len() - 1),
        });
        Ok(())
    }

    fn convert_aggregate(
        &mut self,
        select: &Select,
        group_exprs: Vec<Expr>,
    ) -> Result<AggregateParts> {
        self.tree.aggregate = true;
        let mut native = self.residual_where.is_empty();

        // Group keys first, so their row indices lead the aggregated layout.
        let mut keys = Vec::new();
        let mut group_by = Vec::new();
        for expr in group_exprs {
            let (column_expr, part) = classify_group_expr(&expr)?;
            let (qualifier, column) = as_column(column_expr)
                .ok_or_else(|| Error::unsupported("GROUP BY expression", &expr))?;
            let (node, canonical) = self.bindings.resolve(qualifier, column)?;
            if !self.is_aggregatable(node, &canonical) {
                native = false;
            }
            let (date_grouping, alias) = match part {
                None => (None, canonical.clone()),
                Some(part) => {
                    let grouping = date_grouping_of(part)
                        .ok_or_else(|| Error::unsupported("GROUP BY date part", &expr))?;
                    (
                        Some(grouping),
                        format!("{}_{}", canonical, grouping.wire_name()),
                    )
                }
            };
            self.tree.check_alias_allowed(node, &alias)?;
            self.tree.add_child(
                node,
                Node::Attribute {
                    name: canonical.clone(),
                    alias: Some(alias.clone()),
                    aggregate: None,
                    distinct: false,
                    date_grouping,
                    group_by: true,
                },
            );
            let row_index = self.tree.add_column(node, &alias, &alias);
            keys.push(GroupKeyRef {
                node,
                column: canonical,
                date_part: part,
                row_index,
                alias,
            });
            group_by.push(GroupSpec {
                column: column_expr.clone(),
                part,
            });
        }

        // Aggregate items next; non-aggregate items wait until the grouping
        // set exists so they can reference keys and aggregate aliases.
        let mut aggregates: Vec<PendingAggregate> = Vec::new();
        let mut aggregate_refs = Vec::new();
        let mut outputs: Vec<Option<OutputColumn>> = Vec::new();
        let mut deferred = Vec::new();
        for item in &select.projection {
            let (expr, alias) = match item {
                SelectItem::UnnamedExpr(expr) => (expr, None),
                SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value.clone())),
                SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                    return Err(Error::unsupported("wildcard in an aggregate query", "*"))
                }
            };
            let function = match expr {
                Expr::Function(f) if is_aggregate_name(&function_name(f)) => f,
                _ => {
                    deferred.push((outputs.len(), expr, alias));
                    outputs.push(None);
                    continue;
                }
            };
            let (kind, arg) = parse_aggregate(function)?;
            let alias = alias.unwrap_or_else(|| format!("agg{}", aggregates.len() + 1));
            let row_index =
                self.add_aggregate_attribute(kind, arg, &alias, &mut native)?;
            aggregate_refs.push(AggregateRef {
                text: function.to_string().to_ascii_uppercase(),
                alias: alias.clone(),
                row_index,
            });
            outputs.push(Some(OutputColumn {
                name: alias,
                source: ColumnSource::Row(row_index),
            }));
            aggregates.push(PendingAggregate {
                kind,
                arg: arg.cloned(),
            });
        }

        self.grouping = Some(GroupingSet {
            keys,
            aggregates: aggregate_refs,
        });

        for (position, expr, alias) in deferred {
            outputs[position] = Some(self.convert_grouped_expr(expr, alias)?);
        }
        for output in outputs {
            match output {
                Some(column) => self.output.push(column),
                None => return Err(Error::Internal("projection slot left unfilled".into())),
            }
        }

        Ok(AggregateParts {
            group_by,
            aggregates,
            native,
            having: select.having.clone(),
        })
    }

    /// Adds the native attribute for one aggregate and registers its output
    /// column. Clears `native` when the store cannot evaluate it.
    fn add_aggregate_attribute(
        &mut self,
        kind: AccumulatorKind,
        arg: Option<&Expr>,
        alias: &str,
        native: &mut bool,
    ) -> Result<usize> {
        let root = self.tree.root();
        let (node, attribute, native_kind, distinct) = match (kind, arg) {
            (AccumulatorKind::Count, None) => {
                // Row count rides on the root primary key.
                let pk = self
                    .bindings
                    .iter()
                    .find(|b| b.node == root)
                    .map(|b| b.schema.primary_key.clone())
                    .ok_or_else(|| Error::Internal("unbound root entity".into()))?;
                (root, pk, AggregateKind::Count, false)
            }
            (kind, Some(expr)) => {
                let native_kind = match kind {
                    AccumulatorKind::Sum => AggregateKind::Sum,
                    AccumulatorKind::Average => AggregateKind::Avg,
                    AccumulatorKind::Min => AggregateKind::Min,
                    AccumulatorKind::Max => AggregateKind::Max,
                    AccumulatorKind::CountColumn | AccumulatorKind::CountColumnDistinct => {
                        AggregateKind::CountColumn
                    }
                    AccumulatorKind::Count => {
                        return Err(Error::Internal("COUNT(*) carries no argument".into()))
                    }
                };
                let distinct = kind == AccumulatorKind::CountColumnDistinct;
                match as_column(expr) {
                    Some((qualifier, column)) => {
                        let (node, canonical) = self.bindings.resolve(qualifier, column)?;
                        if !self.is_aggregatable(node, &canonical) {
                            *native = false;
                        }
                        (node, canonical, native_kind, distinct)
                    }
                    None => {
                        // Aggregating an expression has no native form; the
                        // fallback plan computes it. Park the attribute on
                        // the root key so the tree stays well-formed.
                        *native = false;
                        let pk = self
                            .bindings
                            .iter()
                            .find(|b| b.node == root)
                            .map(|b| b.schema.primary_key.clone())
                            .ok_or_else(|| Error::Internal("unbound root entity".into()))?;
                        (root, pk, native_kind, distinct)
                    }
                }
            }
            (_, None) => {
                return Err(Error::InvalidValue(
                    "aggregate function requires an argument".into(),
                ))
            }
        };

        self.tree.check_alias_allowed(node, alias)?;
        self.tree.add_child(
            node,
            Node::Attribute {
                name: attribute,
                alias: Some(alias.to_string()),
                aggregate: Some(native_kind),
                distinct,
                date_grouping: None,
                group_by: false,
            },
        );
        Ok(self.tree.add_column(node, alias, alias))
    }

    /// A non-aggregate projection item of an aggregate query: either a
    /// grouped column passed through, or an expression over grouped values
    /// and projected aggregates.
    fn convert_grouped_expr(
        &mut self,
        expr: &Expr,
        alias: Option<String>,
    ) -> Result<OutputColumn> {
        if let Some((qualifier, column)) = as_column(expr) {
            if let Some((node, canonical)) = self.bindings.resolve_opt(qualifier, column)? {
                let grouping = self
                    .grouping
                    .as_ref()
                    .ok_or_else(|| Error::Internal("grouping set missing".into()))?;
                let key = grouping.find_column(node, &canonical).ok_or_else(|| {
                    Error::unsupported("column not listed in GROUP BY", expr)
                })?;
                return Ok(OutputColumn {
                    name: alias.unwrap_or(canonical),
                    source: ColumnSource::Row(key.row_index),
                });
            }
        }
        let name = alias.unwrap_or_else(|| format!("Expr{}", self.calculated.len() + 1));
        let compiled = self.compile_scalar(expr)?;
        self.calculated.push((name.clone(), compiled));
        Ok(OutputColumn {
            name,
            source: ColumnSource::Calculated(self.calculated.len() - 1),
        })
    }

    fn is_aggregatable(&self, node: crate::fetch::NodeId, column: &str) -> bool {
        self.bindings
            .iter()
            .find(|b| b.node == node)
            .and_then(|b| b.schema.column(column))
            .map(|c| c.is_aggregatable)
            .unwrap_or(false)
    }
}

fn item_expr(item: &SelectItem) -> Option<&Expr> {
    match item {
        SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => Some(expr),
        _ => None,
    }
}

fn function_name(function: &Function) -> String {
    function
        .name
        .0
        .last()
        .map(|ident| ident.value.clone())
        .unwrap_or_default()
}

/// Deep scan for aggregate calls, to decide whether the statement is an
/// aggregate query at all.
fn contains_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Function(f) => {
            is_aggregate_name(&function_name(f))
                || match &f.args {
                    FunctionArguments::List(list) => list.args.iter().any(|arg| match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => contains_aggregate(e),
                        _ => false,
                    }),
                    _ => false,
                }
        }
        Expr::BinaryOp { left, right, .. } => {
            contains_aggregate(left) || contains_aggregate(right)
        }
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) => contains_aggregate(expr),
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            operand.as_deref().is_some_and(contains_aggregate)
                || conditions.iter().any(contains_aggregate)
                || results.iter().any(contains_aggregate)
                || else_result.as_deref().is_some_and(contains_aggregate)
        }
        _ => false,
    }
}

fn group_by_exprs(group_by: &GroupByExpr) -> Result<Vec<Expr>> {
    match group_by {
        GroupByExpr::Expressions(exprs, modifiers) if modifiers.is_empty() => Ok(exprs.clone()),
        GroupByExpr::Expressions(_, _) => {
            Err(Error::unsupported("GROUP BY modifier", "WITH ROLLUP"))
        }
        GroupByExpr::All(_) => Err(Error::unsupported("GROUP BY ALL", "GROUP BY ALL")),
    }
}

/// A GROUP BY term is a bare column or a date-part extraction over one.
fn classify_group_expr(expr: &Expr) -> Result<(&Expr, Option<DatePart>)> {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => Ok((expr, None)),
        Expr::Function(function) => {
            let name = function_name(function).to_ascii_uppercase();
            let args = function_args(function)?;
            let (part, column) = match name.as_str() {
                "DATEPART" if args.len() == 2 => {
                    let keyword = match args[0] {
                        Expr::Identifier(ident) => ident.value.clone(),
                        other => {
                            return Err(Error::unsupported("date part keyword", other))
                        }
                    };
                    let part = DatePart::from_keyword(&keyword).ok_or_else(|| {
                        Error::InvalidValue(format!("unknown date part {}", keyword))
                    })?;
                    (part, args[1])
                }
                "YEAR" if args.len() == 1 => (DatePart::Year, args[0]),
                "MONTH" if args.len() == 1 => (DatePart::Month, args[0]),
                "DAY" if args.len() == 1 => (DatePart::Day, args[0]),
                _ => return Err(Error::unsupported("GROUP BY expression", expr)),
            };
            Ok((column, Some(part)))
        }
        other => Err(Error::unsupported("GROUP BY expression", other)),
    }
}

fn date_grouping_of(part: DatePart) -> Option<DateGrouping> {
    match part {
        DatePart::Year => Some(DateGrouping::Year),
        DatePart::Quarter => Some(DateGrouping::Quarter),
        DatePart::Month => Some(DateGrouping::Month),
        DatePart::Week => Some(DateGrouping::Week),
        DatePart::Day => Some(DateGrouping::Day),
        _ => None,
    }
}

/// Splits an aggregate call into its accumulator kind and argument.
fn parse_aggregate(function: &Function) -> Result<(AccumulatorKind, Option<&Expr>)> {
    let name = function_name(function).to_ascii_uppercase();
    let (distinct, args) = match &function.args {
        FunctionArguments::List(list) => (
            list.duplicate_treatment == Some(DuplicateTreatment::Distinct),
            list.args.as_slice(),
        ),
        _ => (false, [].as_slice()),
    };
    if args.len() != 1 {
        return Err(Error::InvalidValue(format!(
            "{} takes 1 argument, got {}",
            name,
            args.len()
        )));
    }
    match (&args[0], name.as_str()) {
        (FunctionArg::Unnamed(FunctionArgExpr::Wildcard), "COUNT") => {
            if distinct {
                return Err(Error::unsupported("COUNT(DISTINCT *)", function));
            }
            Ok((AccumulatorKind::Count, None))
        }
        (FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)), name) => {
            let kind = match name {
                "COUNT" if distinct => AccumulatorKind::CountColumnDistinct,
                "COUNT" => AccumulatorKind::CountColumn,
                "SUM" => AccumulatorKind::Sum,
                "AVG" => AccumulatorKind::Average,
                "MIN" => AccumulatorKind::Min,
                "MAX" => AccumulatorKind::Max,
                other => return Err(Error::UnknownFunction(other.to_string())),
            };
            if distinct && kind != AccumulatorKind::CountColumnDistinct {
                return Err(Error::unsupported("DISTINCT aggregate", function));
            }
            Ok((kind, Some(expr)))
        }
        (other, _) => Err(Error::unsupported("aggregate argument", other)),
    }
}
