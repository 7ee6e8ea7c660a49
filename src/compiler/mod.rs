//! Statement compilation
//!
//! The entry point is [`statement::compile_statement`]; the submodules are
//! the leaf-first components it orchestrates: the FROM binder, the scalar
//! expression compiler, the condition translator and the per-clause
//! converters. All of them share one [`QueryBuilder`], which owns the native
//! tree under construction together with every piece of residual work
//! recorded along the way.

pub mod bindings;
pub mod condition;
pub mod order;
pub mod residual;
pub mod scalar;
pub mod select;
pub mod statement;

pub use residual::{
    AggregateExpr, AggregatePlan, ColumnSource, CompiledQuery, FallbackSlot, OutputColumn,
    ResidualWorkBundle, ScalarFn, SortKey,
};
pub use statement::{
    compile, compile_statement, CompiledStatement, DeletePlan, InsertPlan, InsertRows, UpdatePlan,
};

use crate::error::Result;
use crate::fetch::{FetchQuery, Node, NodeId};
use crate::functions::DatePart;
use crate::types::MetadataProvider;
use bindings::BindingSet;

/// One member of the grouping set: a grouped column (optionally bucketed by a
/// date part) and the aggregated-row index its value lands in.
pub(crate) struct GroupKeyRef {
    pub node: NodeId,
    pub column: String,
    pub date_part: Option<DatePart>,
    pub row_index: usize,
    pub alias: String,
}

/// One aggregate the statement projects, recorded so HAVING and ORDER BY can
/// reference it again by alias or by repeating the call text.
pub(crate) struct AggregateRef {
    /// Uppercased SQL text of the call, for repeat-expression matching.
    pub text: String,
    pub alias: String,
    pub row_index: usize,
}

/// Attributes the statement groups by. While present, the scalar compiler is
/// in aggregate context: column references must hit one of these keys.
pub(crate) struct GroupingSet {
    pub keys: Vec<GroupKeyRef>,
    pub aggregates: Vec<AggregateRef>,
}

impl GroupingSet {
    pub fn find_column(&self, node: NodeId, column: &str) -> Option<&GroupKeyRef> {
        self.keys
            .iter()
            .find(|k| k.node == node && k.date_part.is_none() && k.column.eq_ignore_ascii_case(column))
    }

    pub fn find_date_part(&self, node: NodeId, column: &str, part: DatePart) -> Option<&GroupKeyRef> {
        self.keys.iter().find(|k| {
            k.node == node && k.date_part == Some(part) && k.column.eq_ignore_ascii_case(column)
        })
    }

    pub fn find_aggregate(&self, text: &str) -> Option<usize> {
        let wanted = text.to_ascii_uppercase();
        self.aggregates
            .iter()
            .find(|a| a.text == wanted)
            .map(|a| a.row_index)
    }

    /// Output names visible to HAVING and ORDER BY: grouped-column aliases
    /// and aggregate aliases.
    pub fn find_alias(&self, name: &str) -> Option<usize> {
        self.keys
            .iter()
            .find(|k| k.alias.eq_ignore_ascii_case(name))
            .map(|k| k.row_index)
            .or_else(|| {
                self.aggregates
                    .iter()
                    .find(|a| a.alias.eq_ignore_ascii_case(name))
                    .map(|a| a.row_index)
            })
    }
}

/// Shared state of one statement compilation. Created fresh per statement;
/// nothing in here outlives the compile call except through the artifacts it
/// is dismantled into.
pub(crate) struct QueryBuilder<'a> {
    pub metadata: &'a dyn MetadataProvider,
    pub tree: FetchQuery,
    pub bindings: BindingSet,
    /// Predicate fragments WHERE could not translate natively; ANDed and
    /// compiled into the bundle's post-filter at assembly time.
    pub residual_where: Vec<sqlparser::ast::Expr>,
    pub calculated: Vec<(String, ScalarFn)>,
    pub output: Vec<OutputColumn>,
    pub post_sort: Vec<SortKey>,
    /// Set while converting the projection/HAVING of an aggregate query.
    pub grouping: Option<GroupingSet>,
    /// HAVING, compiled over aggregated rows, parked until bundle assembly.
    pub pending_having: Option<ScalarFn>,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(metadata: &'a dyn MetadataProvider, root_entity: &str) -> Self {
        Self {
            metadata,
            tree: FetchQuery::new(root_entity),
            bindings: BindingSet::new(),
            residual_where: Vec::new(),
            calculated: Vec::new(),
            output: Vec::new(),
            post_sort: Vec::new(),
            grouping: None,
            pending_having: None,
        }
    }

    /// Attaches a column to its owning node and registers it in the row
    /// layout, returning the row index.
    pub fn attach_column(&mut self, node: NodeId, column: &str) -> usize {
        self.tree.add_attribute(node, column);
        let qualified = format!("{}.{}", self.bindings.alias_of(node), column);
        self.tree.add_column(node, column, &qualified)
    }

    /// Attaches a column under an explicit attribute alias. The row layout
    /// still keys the raw column; the alias lives on the attribute node,
    /// where it conflicts with an all-attributes marker.
    pub fn attach_aliased_column(
        &mut self,
        node: NodeId,
        column: &str,
        alias: &str,
    ) -> Result<usize> {
        self.tree.check_alias_allowed(node, alias)?;
        self.tree.add_child(
            node,
            Node::Attribute {
                name: column.to_string(),
                alias: Some(alias.to_string()),
                aggregate: None,
                distinct: false,
                date_grouping: None,
                group_by: false,
            },
        );
        let qualified = format!("{}.{}", self.bindings.alias_of(node), column);
        Ok(self.tree.add_column(node, column, &qualified))
    }
}
