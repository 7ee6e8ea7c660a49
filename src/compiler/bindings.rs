//! FROM-clause binding
//!
//! Walks the FROM clause, creating one native node per table: the base table
//! becomes the root entity, every JOIN becomes a link. The resulting
//! [`BindingSet`] is the alias→node lookup every other component resolves
//! columns through.
//!
//! Join predicates get no residual fallback: the client cannot join locally,
//! so a predicate that does not reduce to a link key plus natively
//! translatable leftovers fails the statement.

use super::QueryBuilder;
use crate::error::{Error, Result};
use crate::fetch::{LinkKind, Node, NodeId};
use crate::types::TableSchema;
use sqlparser::ast::{
    BinaryOperator, Expr, Join, JoinConstraint, JoinOperator, ObjectName, TableFactor,
    TableWithJoins,
};
use std::sync::Arc;

/// One FROM-clause table or JOIN target, bound to its native node.
pub struct TableBinding {
    /// Alias if given, else the table name. Unique within a statement.
    pub alias: String,
    pub schema: Arc<TableSchema>,
    pub node: NodeId,
}

/// All bindings of one statement, in FROM order.
pub struct BindingSet {
    bindings: Vec<TableBinding>,
}

impl BindingSet {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    pub fn push(&mut self, binding: TableBinding) {
        self.bindings.push(binding);
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableBinding> {
        self.bindings.iter()
    }

    pub fn by_alias(&self, alias: &str) -> Option<&TableBinding> {
        self.bindings
            .iter()
            .find(|b| b.alias.eq_ignore_ascii_case(alias))
    }

    pub fn alias_of(&self, node: NodeId) -> &str {
        self.bindings
            .iter()
            .find(|b| b.node == node)
            .map(|b| b.alias.as_str())
            .unwrap_or("")
    }

    /// Resolves a possibly-qualified column to its owning node and canonical
    /// column name. Unqualified names matching more than one table are
    /// ambiguous; names matching none are unknown.
    pub fn resolve(&self, qualifier: Option<&str>, column: &str) -> Result<(NodeId, String)> {
        self.resolve_opt(qualifier, column)?
            .ok_or_else(|| Error::UnknownIdentifier(display_name(qualifier, column)))
    }

    /// Like [`Self::resolve`] but quiet about unknown names, for probing
    /// join-key candidates. Ambiguity is still an error.
    pub fn resolve_opt(
        &self,
        qualifier: Option<&str>,
        column: &str,
    ) -> Result<Option<(NodeId, String)>> {
        if let Some(qualifier) = qualifier {
            let Some(binding) = self.by_alias(qualifier) else {
                return Ok(None);
            };
            return Ok(binding
                .schema
                .column(column)
                .filter(|c| c.is_valid_for_read)
                .map(|c| (binding.node, c.name.clone())));
        }

        let mut found = None;
        for binding in &self.bindings {
            if let Some(col) = binding.schema.column(column).filter(|c| c.is_valid_for_read) {
                if found.is_some() {
                    return Err(Error::AmbiguousIdentifier(column.to_string()));
                }
                found = Some((binding.node, col.name.clone()));
            }
        }
        Ok(found)
    }
}

fn display_name(qualifier: Option<&str>, column: &str) -> String {
    match qualifier {
        Some(q) => format!("{}.{}", q, column),
        None => column.to_string(),
    }
}

/// Extracts `(qualifier, column)` from a column-reference expression.
/// Multi-part names keep their last two parts; the store has no deeper
/// nesting.
pub(crate) fn as_column(expr: &Expr) -> Option<(Option<&str>, &str)> {
    match expr {
        Expr::Identifier(ident) => Some((None, ident.value.as_str())),
        Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
            let n = parts.len();
            Some((Some(parts[n - 2].value.as_str()), parts[n - 1].value.as_str()))
        }
        _ => None,
    }
}

/// The base-table name of a FROM clause, needed before the builder exists.
pub(crate) fn base_table_name(from: &TableWithJoins) -> Result<String> {
    match &from.relation {
        TableFactor::Table { name, .. } => Ok(object_name(name)),
        other => Err(Error::unsupported("FROM target", other)),
    }
}

fn object_name(name: &ObjectName) -> String {
    // Multi-part names keep only the trailing identifier; the store's tables
    // live in a single flat namespace.
    name.0
        .last()
        .map(|ident| ident.value.clone())
        .unwrap_or_default()
}

/// Splits a predicate into its top-level conjuncts.
fn conjuncts(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::BinaryOp {
            op: BinaryOperator::And,
            left,
            right,
        } => {
            let mut out = conjuncts(left);
            out.extend(conjuncts(right));
            out
        }
        Expr::Nested(inner) => conjuncts(inner),
        other => vec![other],
    }
}

impl<'a> QueryBuilder<'a> {
    /// Binds the whole FROM clause: base table plus each JOIN in order.
    pub fn bind_from(&mut self, from: &TableWithJoins) -> Result<()> {
        let (name, alias) = table_parts(&from.relation)?;
        let schema = self.metadata.table_schema(&name)?;
        let root = self.tree.root();
        // The tree was seeded with the name as written; adopt the canonical
        // spelling from metadata.
        if let Node::Entity { name, .. } = self.tree.node_mut(root) {
            name.clone_from(&schema.name);
        }
        self.bindings.push(TableBinding {
            alias: alias.unwrap_or_else(|| schema.name.clone()),
            schema,
            node: root,
        });

        for join in &from.joins {
            self.bind_join(join)?;
        }
        Ok(())
    }

    fn bind_join(&mut self, join: &Join) -> Result<()> {
        let kind = match &join.join_operator {
            JoinOperator::Inner(_) => LinkKind::Inner,
            JoinOperator::LeftOuter(_) => LinkKind::Outer,
            other => return Err(Error::unsupported("join kind", format!("{:?}", other))),
        };
        let predicate = match &join.join_operator {
            JoinOperator::Inner(JoinConstraint::On(expr))
            | JoinOperator::LeftOuter(JoinConstraint::On(expr)) => expr,
            _ => {
                return Err(Error::unsupported(
                    "join constraint (only ON is supported)",
                    format!("{:?}", join.join_operator),
                ))
            }
        };

        let (name, alias) = table_parts(&join.relation)?;
        let schema = self.metadata.table_schema(&name)?;
        let alias = alias.unwrap_or_else(|| schema.name.clone());
        if self.bindings.by_alias(&alias).is_some() {
            return Err(Error::AmbiguousIdentifier(alias));
        }

        // The join predicate must contain exactly one equality between a
        // column already bound and a column of the new table; that pair
        // becomes the link key. Whatever is left has to translate natively
        // into a filter on the link.
        let parts = conjuncts(predicate);
        let mut key = None;
        let mut leftovers = Vec::new();
        for part in &parts {
            if key.is_none() {
                if let Some(found) = self.match_join_key(part, &alias, &schema)? {
                    key = Some(found);
                    continue;
                }
            }
            leftovers.push(*part);
        }
        let (parent, from_col, to_col) = key.ok_or_else(|| {
            Error::unsupported(
                "join predicate (no equality between the joined tables)",
                predicate,
            )
        })?;

        let link = self.tree.add_child(
            parent,
            Node::Link {
                entity: schema.name.clone(),
                alias: alias.clone(),
                kind,
                from: from_col,
                to: to_col,
                children: Vec::new(),
            },
        );
        self.bindings.push(TableBinding {
            alias,
            schema,
            node: link,
        });

        if !leftovers.is_empty() {
            let filter = self.tree.ensure_filter(link);
            for leftover in leftovers {
                // Strict: residual evaluation cannot reconstruct join
                // semantics, so anything untranslatable here is fatal.
                self.translate_strict(leftover, link, filter)?;
            }
        }
        Ok(())
    }

    /// Checks whether one conjunct is the link-key equality for the table
    /// being joined. One side must resolve against the existing bindings,
    /// the other against the incoming table.
    fn match_join_key(
        &self,
        expr: &Expr,
        new_alias: &str,
        new_schema: &TableSchema,
    ) -> Result<Option<(NodeId, String, String)>> {
        let Expr::BinaryOp {
            op: BinaryOperator::Eq,
            left,
            right,
        } = expr
        else {
            return Ok(None);
        };
        let (Some(l), Some(r)) = (as_column(left), as_column(right)) else {
            return Ok(None);
        };

        let l_new = column_of(new_alias, new_schema, l);
        let r_new = column_of(new_alias, new_schema, r);
        let l_bound = self.bindings.resolve_opt(l.0, l.1)?;
        let r_bound = self.bindings.resolve_opt(r.0, r.1)?;

        match (l_bound, r_new, r_bound, l_new) {
            (Some((node, from)), Some(to), _, _) => Ok(Some((node, from, to))),
            (_, _, Some((node, from)), Some(to)) => Ok(Some((node, from, to))),
            _ => Ok(None),
        }
    }
}

fn column_of(alias: &str, schema: &TableSchema, (qualifier, column): (Option<&str>, &str)) -> Option<String> {
    match qualifier {
        Some(q) if !q.eq_ignore_ascii_case(alias) => None,
        _ => schema.column(column).map(|c| c.name.clone()),
    }
}

fn table_parts(relation: &TableFactor) -> Result<(String, Option<String>)> {
    match relation {
        TableFactor::Table { name, alias, .. } => Ok((
            object_name(name),
            alias.as_ref().map(|a| a.name.value.clone()),
        )),
        TableFactor::Derived { .. } => Err(Error::unsupported("derived table", relation)),
        other => Err(Error::unsupported("FROM target", other)),
    }
}
