//! WHERE-clause translation
//!
//! Predicates are pushed into native filter/condition nodes wherever the
//! store can evaluate them; whatever cannot be pushed degrades to a residual
//! fragment the client evaluates after retrieval. Degradation is all-or-
//! nothing per OR: the store has no way to return "rows matching this branch
//! or maybe-matching that one", so an OR with any residual branch rolls back
//! its native half and degrades whole.

use super::bindings::as_column;
use super::scalar::literal_value;
use super::QueryBuilder;
use crate::error::{Error, Result};
use crate::fetch::{ConditionOp, LogicalOp, Node, NodeId};
use crate::types::Value;
use sqlparser::ast::{self, BinaryOperator, Expr, UnaryOperator};

/// How one predicate fragment translated. `Residual` guarantees the native
/// tree is exactly as it was before the attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Native,
    Residual,
}

impl<'a> QueryBuilder<'a> {
    /// Translates the whole WHERE clause against the root entity. Residual
    /// fragments are recorded for post-filter compilation.
    pub fn translate_where(&mut self, expr: &Expr) -> Result<()> {
        let root = self.tree.root();
        let filter = self.tree.ensure_filter(root);
        if self.translate(expr, root, filter, false)? == Outcome::Residual {
            self.residual_where.push(expr.clone());
        }
        Ok(())
    }

    /// Translation with no residual escape hatch, for join predicates.
    pub fn translate_strict(&mut self, expr: &Expr, owner: NodeId, filter: NodeId) -> Result<()> {
        match self.translate(expr, owner, filter, false)? {
            Outcome::Native => Ok(()),
            Outcome::Residual => Err(Error::unsupported(
                "join predicate with no native form",
                expr,
            )),
        }
    }

    fn translate(
        &mut self,
        expr: &Expr,
        owner: NodeId,
        filter: NodeId,
        in_or: bool,
    ) -> Result<Outcome> {
        match expr {
            Expr::Nested(inner) => self.translate(inner, owner, filter, in_or),

            Expr::BinaryOp {
                op: BinaryOperator::And,
                left,
                right,
            } => {
                if in_or {
                    // Inside an OR the AND cannot be split: either the whole
                    // conjunction is native or the whole thing degrades.
                    let checkpoint = self.tree.checkpoint();
                    let target = self.filter_for(filter, LogicalOp::And);
                    if self.translate(left, owner, target, true)? == Outcome::Residual
                        || self.translate(right, owner, target, true)? == Outcome::Residual
                    {
                        self.tree.rollback(checkpoint);
                        return Ok(Outcome::Residual);
                    }
                    return Ok(Outcome::Native);
                }
                // A conjunction degrades per side; residual sides are
                // recorded individually and the native sides stay pushed.
                let target = self.filter_for(filter, LogicalOp::And);
                if self.translate(left, owner, target, false)? == Outcome::Residual {
                    self.residual_where.push((**left).clone());
                }
                if self.translate(right, owner, target, false)? == Outcome::Residual {
                    self.residual_where.push((**right).clone());
                }
                Ok(Outcome::Native)
            }

            Expr::BinaryOp {
                op: BinaryOperator::Or,
                left,
                right,
            } => {
                let checkpoint = self.tree.checkpoint();
                let target = self.filter_for(filter, LogicalOp::Or);
                if self.translate(left, owner, target, true)? == Outcome::Residual
                    || self.translate(right, owner, target, true)? == Outcome::Residual
                {
                    self.tree.rollback(checkpoint);
                    return Ok(Outcome::Residual);
                }
                Ok(Outcome::Native)
            }

            // NOT over an arbitrary predicate has no native form.
            Expr::UnaryOp {
                op: UnaryOperator::Not,
                ..
            } => Ok(Outcome::Residual),

            other => self.translate_leaf(other, owner, filter, in_or),
        }
    }

    fn translate_leaf(
        &mut self,
        expr: &Expr,
        owner: NodeId,
        filter: NodeId,
        in_or: bool,
    ) -> Result<Outcome> {
        match expr {
            Expr::IsNull(inner) | Expr::IsNotNull(inner) => {
                let Some((qualifier, column)) = as_column(inner) else {
                    return Ok(Outcome::Residual);
                };
                let Some((node, canonical)) = self.bindings.resolve_opt(qualifier, column)? else {
                    return Err(Error::UnknownIdentifier(column.to_string()));
                };
                let op = if matches!(expr, Expr::IsNull(_)) {
                    ConditionOp::Null
                } else {
                    ConditionOp::NotNull
                };
                let Some(target) = self.condition_target(node, owner, filter, in_or) else {
                    return Ok(Outcome::Residual);
                };
                self.tree
                    .add_child(target, Node::condition(canonical, op, Vec::new()));
                Ok(Outcome::Native)
            }

            Expr::BinaryOp { left, op, right } => {
                let Some(cond_op) = native_comparison(op) else {
                    return Ok(Outcome::Residual);
                };
                self.translate_comparison(expr, left, cond_op, right, owner, filter, in_or)
            }

            // `LIKE ANY` has no native condition and no residual evaluation;
            // it falls through to the catch-all and degrades.
            Expr::Like {
                negated,
                any: false,
                expr: inner,
                pattern,
                escape_char: None,
            } => {
                let Some((qualifier, column)) = as_column(inner) else {
                    return Ok(Outcome::Residual);
                };
                let Expr::Value(ast::Value::SingleQuotedString(text)) = &**pattern else {
                    return Ok(Outcome::Residual);
                };
                let Some((node, canonical)) = self.bindings.resolve_opt(qualifier, column)? else {
                    return Err(Error::UnknownIdentifier(column.to_string()));
                };
                let Some(target) = self.condition_target(node, owner, filter, in_or) else {
                    return Ok(Outcome::Residual);
                };
                let op = if *negated {
                    ConditionOp::NotLike
                } else {
                    ConditionOp::Like
                };
                self.tree.add_child(
                    target,
                    Node::condition(canonical, op, vec![Value::Str(text.clone())]),
                );
                Ok(Outcome::Native)
            }

            Expr::InList {
                expr: inner,
                list,
                negated,
            } => {
                let Some((qualifier, column)) = as_column(inner) else {
                    return Ok(Outcome::Residual);
                };
                let mut values = Vec::with_capacity(list.len());
                for item in list {
                    match literal_of(item) {
                        Some(v) if !v.is_null() => values.push(v),
                        _ => return Ok(Outcome::Residual),
                    }
                }
                let Some((node, canonical)) = self.bindings.resolve_opt(qualifier, column)? else {
                    return Err(Error::UnknownIdentifier(column.to_string()));
                };
                let Some(target) = self.condition_target(node, owner, filter, in_or) else {
                    return Ok(Outcome::Residual);
                };
                let op = if *negated {
                    ConditionOp::NotIn
                } else {
                    ConditionOp::In
                };
                self.tree
                    .add_child(target, Node::condition(canonical, op, values));
                Ok(Outcome::Native)
            }

            Expr::Between {
                expr: inner,
                negated: false,
                low,
                high,
            } => {
                let (Some((qualifier, column)), Some(lo), Some(hi)) =
                    (as_column(inner), literal_of(low), literal_of(high))
                else {
                    return Ok(Outcome::Residual);
                };
                if lo.is_null() || hi.is_null() {
                    return Ok(Outcome::Residual);
                }
                let Some((node, canonical)) = self.bindings.resolve_opt(qualifier, column)? else {
                    return Err(Error::UnknownIdentifier(column.to_string()));
                };
                let Some(target) = self.condition_target(node, owner, filter, in_or) else {
                    return Ok(Outcome::Residual);
                };
                // Desugars to a bounded range in one And group.
                let group = self.filter_for(target, LogicalOp::And);
                self.tree.add_child(
                    group,
                    Node::condition(canonical.clone(), ConditionOp::Ge, vec![lo]),
                );
                self.tree
                    .add_child(group, Node::condition(canonical, ConditionOp::Le, vec![hi]));
                Ok(Outcome::Native)
            }

            _ => Ok(Outcome::Residual),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn translate_comparison(
        &mut self,
        whole: &Expr,
        left: &Expr,
        op: ConditionOp,
        right: &Expr,
        owner: NodeId,
        filter: NodeId,
        in_or: bool,
    ) -> Result<Outcome> {
        // Normalize so the column is on the left.
        let (column_side, op, other) = match (as_column(left), as_column(right)) {
            (Some(_), _) => (left, op, right),
            (None, Some(_)) => (right, op.flipped(), left),
            (None, None) => return Ok(Outcome::Residual),
        };
        let (qualifier, column) = match as_column(column_side) {
            Some(parts) => parts,
            None => return Ok(Outcome::Residual),
        };
        let Some((node, canonical)) = self.bindings.resolve_opt(qualifier, column)? else {
            return Err(Error::UnknownIdentifier(column.to_string()));
        };

        // Column against column: native only as a same-entity value_of
        // condition, at most one per filter, never under OR.
        if let Some((rq, rc)) = as_column(other) {
            if in_or {
                return Err(Error::unsupported(
                    "column-to-column comparison inside OR",
                    whole,
                ));
            }
            let Some((other_node, other_canonical)) = self.bindings.resolve_opt(rq, rc)? else {
                return Err(Error::UnknownIdentifier(rc.to_string()));
            };
            if other_node != node {
                return Ok(Outcome::Residual);
            }
            let Some(target) = self.condition_target(node, owner, filter, in_or) else {
                return Ok(Outcome::Residual);
            };
            if self.has_value_of_condition(target) {
                return Ok(Outcome::Residual);
            }
            self.tree.add_child(
                target,
                Node::Condition {
                    attribute: canonical,
                    op,
                    values: Vec::new(),
                    value_of: Some(other_canonical),
                },
            );
            return Ok(Outcome::Native);
        }

        // Date-window proxy functions, equality only.
        if let Expr::Function(function) = other {
            if op == ConditionOp::Eq {
                if let Some((proxy_op, values)) = proxy_condition(function)? {
                    let Some(target) = self.condition_target(node, owner, filter, in_or) else {
                        return Ok(Outcome::Residual);
                    };
                    self.tree
                        .add_child(target, Node::condition(canonical, proxy_op, values));
                    return Ok(Outcome::Native);
                }
            }
            return Ok(Outcome::Residual);
        }

        let Some(value) = literal_of(other) else {
            return Ok(Outcome::Residual);
        };
        if value.is_null() {
            // `col = NULL` is UNKNOWN for every row; the residual evaluator
            // preserves that, a native eq-null condition would not.
            return Ok(Outcome::Residual);
        }
        let Some(target) = self.condition_target(node, owner, filter, in_or) else {
            return Ok(Outcome::Residual);
        };
        self.tree
            .add_child(target, Node::condition(canonical, op, vec![value]));
        Ok(Outcome::Native)
    }

    /// Picks the filter a condition on `node` goes into. In a conjunctive
    /// context a condition may move to the owning entity's filter; under OR
    /// every branch must stay in the one filter being built, so conditions on
    /// other entities degrade. Conditions on outer-linked entities also
    /// degrade: their link filters participate in matching, not row
    /// filtering, so unmatched rows would survive a WHERE that should drop
    /// them.
    fn condition_target(
        &mut self,
        node: NodeId,
        owner: NodeId,
        filter: NodeId,
        in_or: bool,
    ) -> Option<NodeId> {
        if node == owner {
            Some(filter)
        } else if in_or || self.tree.under_outer_link(node) {
            None
        } else {
            Some(self.tree.ensure_filter(node))
        }
    }

    /// Returns a filter with the wanted operator at `filter`: claims an
    /// undetermined filter, reuses a matching one, or nests a new one.
    fn filter_for(&mut self, filter: NodeId, wanted: LogicalOp) -> NodeId {
        if let Node::Filter { op, .. } = self.tree.node_mut(filter) {
            if *op == LogicalOp::Undetermined {
                *op = wanted;
                return filter;
            }
            if *op == wanted {
                return filter;
            }
        }
        self.tree.add_child(
            filter,
            Node::Filter {
                op: wanted,
                children: Vec::new(),
            },
        )
    }

    fn has_value_of_condition(&self, filter: NodeId) -> bool {
        self.tree.children(filter).iter().any(|&c| {
            matches!(
                self.tree.node(c),
                Node::Condition {
                    value_of: Some(_),
                    ..
                }
            )
        })
    }
}

fn native_comparison(op: &BinaryOperator) -> Option<ConditionOp> {
    Some(match op {
        BinaryOperator::Eq => ConditionOp::Eq,
        BinaryOperator::NotEq => ConditionOp::Ne,
        BinaryOperator::Lt => ConditionOp::Lt,
        BinaryOperator::LtEq => ConditionOp::Le,
        BinaryOperator::Gt => ConditionOp::Gt,
        BinaryOperator::GtEq => ConditionOp::Ge,
        _ => return None,
    })
}

/// A literal value usable in a native condition: plain literals and negated
/// numbers only.
fn literal_of(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Value(v) => literal_value(v).ok(),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: inner,
        } => match &**inner {
            Expr::Value(v) => literal_value(v).ok().and_then(|v| v.negate().ok()),
            _ => None,
        },
        Expr::Nested(inner) => literal_of(inner),
        _ => None,
    }
}

/// Matches the date-window proxy functions reachable through equality
/// (`createdon = lastxdays(7)`). Argument counts are validated here; the
/// arguments themselves must be whole-number literals.
fn proxy_condition(function: &ast::Function) -> Result<Option<(ConditionOp, Vec<Value>)>> {
    let name = match function.name.0.last() {
        Some(ident) => ident.value.to_ascii_uppercase(),
        None => return Ok(None),
    };
    let (op, arity) = match name.as_str() {
        "LASTXDAYS" => (ConditionOp::LastXDays, 1),
        "NEXTXDAYS" => (ConditionOp::NextXDays, 1),
        "OLDERTHANXDAYS" => (ConditionOp::OlderThanXDays, 1),
        "OLDERTHANXMONTHS" => (ConditionOp::OlderThanXMonths, 1),
        "TODAY" => (ConditionOp::Today, 0),
        "YESTERDAY" => (ConditionOp::Yesterday, 0),
        "TOMORROW" => (ConditionOp::Tomorrow, 0),
        "THISMONTH" => (ConditionOp::ThisMonth, 0),
        "THISYEAR" => (ConditionOp::ThisYear, 0),
        _ => return Ok(None),
    };
    let args = super::scalar::function_args(function)?;
    if args.len() != arity {
        return Err(Error::InvalidValue(format!(
            "{} takes {} argument(s), got {}",
            name,
            arity,
            args.len()
        )));
    }
    let mut values = Vec::with_capacity(arity);
    for arg in args {
        match literal_of(arg) {
            Some(v @ Value::I64(_)) => values.push(v),
            _ => {
                return Err(Error::InvalidValue(format!(
                    "{} requires a whole-number literal argument",
                    name
                )))
            }
        }
    }
    Ok(Some((op, values)))
}
