//! The native query tree
//!
//! The store understands a single, constrained query shape: one root entity
//! owning attributes, filters, orders and (recursively) links. Nodes live in
//! a per-statement arena indexed by [`NodeId`]; child lists are index vectors
//! appended in compilation order and rebuilt once during finalization.
//! Nothing in the arena is shared between statements.

use crate::error::{Error, Result};
use crate::types::Value;
use serde::{Deserialize, Serialize};

pub type NodeId = usize;

/// Native aggregate kinds the store evaluates itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateKind {
    /// Row count, including rows where the column is null.
    Count,
    /// Non-null count of one column.
    CountColumn,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateKind {
    pub fn wire_name(&self) -> &'static str {
        match self {
            AggregateKind::Count => "count",
            AggregateKind::CountColumn => "countcolumn",
            AggregateKind::Sum => "sum",
            AggregateKind::Avg => "avg",
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
        }
    }
}

/// Date-part bucketing for grouped attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateGrouping {
    Year,
    Quarter,
    Month,
    Week,
    Day,
}

impl DateGrouping {
    pub fn wire_name(&self) -> &'static str {
        match self {
            DateGrouping::Year => "year",
            DateGrouping::Quarter => "quarter",
            DateGrouping::Month => "month",
            DateGrouping::Week => "week",
            DateGrouping::Day => "day",
        }
    }

    pub fn from_keyword(part: &str) -> Option<Self> {
        match part.to_ascii_lowercase().as_str() {
            "year" | "yy" | "yyyy" => Some(DateGrouping::Year),
            "quarter" | "qq" | "q" => Some(DateGrouping::Quarter),
            "month" | "mm" | "m" => Some(DateGrouping::Month),
            "week" | "wk" | "ww" => Some(DateGrouping::Week),
            "day" | "dd" | "d" => Some(DateGrouping::Day),
            _ => None,
        }
    }
}

/// Native condition operators. The comparison group has an infix SQL
/// spelling; the date-window group is reached through proxy functions
/// (`createdon = lastxdays(7)`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
    In,
    NotIn,
    Null,
    NotNull,
    LastXDays,
    NextXDays,
    OlderThanXDays,
    OlderThanXMonths,
    Today,
    Yesterday,
    Tomorrow,
    ThisMonth,
    ThisYear,
}

impl ConditionOp {
    /// Mirror image for operand normalization: `1 < col` is stored as
    /// `col > 1`.
    pub fn flipped(self) -> Self {
        match self {
            ConditionOp::Lt => ConditionOp::Gt,
            ConditionOp::Le => ConditionOp::Ge,
            ConditionOp::Gt => ConditionOp::Lt,
            ConditionOp::Ge => ConditionOp::Le,
            other => other,
        }
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            ConditionOp::Eq => "eq",
            ConditionOp::Ne => "ne",
            ConditionOp::Lt => "lt",
            ConditionOp::Le => "le",
            ConditionOp::Gt => "gt",
            ConditionOp::Ge => "ge",
            ConditionOp::Like => "like",
            ConditionOp::NotLike => "not-like",
            ConditionOp::In => "in",
            ConditionOp::NotIn => "not-in",
            ConditionOp::Null => "null",
            ConditionOp::NotNull => "not-null",
            ConditionOp::LastXDays => "last-x-days",
            ConditionOp::NextXDays => "next-x-days",
            ConditionOp::OlderThanXDays => "olderthan-x-days",
            ConditionOp::OlderThanXMonths => "olderthan-x-months",
            ConditionOp::Today => "today",
            ConditionOp::Yesterday => "yesterday",
            ConditionOp::Tomorrow => "tomorrow",
            ConditionOp::ThisMonth => "this-month",
            ConditionOp::ThisYear => "this-year",
        }
    }
}

/// A filter's logical operator. `Undetermined` exists only while a filter is
/// being built; the first AND/OR seen inside it decides the operator, and
/// finalization resolves anything still undetermined to And. An
/// `Undetermined` filter must never reach the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    Undetermined,
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkKind {
    Inner,
    Outer,
}

impl LinkKind {
    pub fn wire_name(&self) -> &'static str {
        match self {
            LinkKind::Inner => "inner",
            LinkKind::Outer => "outer",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Entity {
        name: String,
        children: Vec<NodeId>,
    },
    Link {
        entity: String,
        alias: String,
        kind: LinkKind,
        /// Join key on the already-bound side.
        from: String,
        /// Join key on this link's entity.
        to: String,
        children: Vec<NodeId>,
    },
    Attribute {
        name: String,
        alias: Option<String>,
        aggregate: Option<AggregateKind>,
        distinct: bool,
        date_grouping: Option<DateGrouping>,
        group_by: bool,
    },
    /// The all-attributes marker; conflicts with aliased attributes on the
    /// same node.
    AllAttributes,
    Filter {
        op: LogicalOp,
        children: Vec<NodeId>,
    },
    Condition {
        attribute: String,
        op: ConditionOp,
        values: Vec<Value>,
        /// Same-entity column comparison: compare `attribute` against this
        /// column instead of `values`.
        value_of: Option<String>,
    },
    Order {
        attribute: String,
        descending: bool,
    },
}

impl Node {
    pub fn attribute(name: impl Into<String>) -> Node {
        Node::Attribute {
            name: name.into(),
            alias: None,
            aggregate: None,
            distinct: false,
            date_grouping: None,
            group_by: false,
        }
    }

    pub fn condition(attribute: impl Into<String>, op: ConditionOp, values: Vec<Value>) -> Node {
        Node::Condition {
            attribute: attribute.into(),
            op,
            values,
            value_of: None,
        }
    }

    fn children(&self) -> Option<&Vec<NodeId>> {
        match self {
            Node::Entity { children, .. }
            | Node::Link { children, .. }
            | Node::Filter { children, .. } => Some(children),
            _ => None,
        }
    }

    fn children_mut(&mut self) -> Option<&mut Vec<NodeId>> {
        match self {
            Node::Entity { children, .. }
            | Node::Link { children, .. }
            | Node::Filter { children, .. } => Some(children),
            _ => None,
        }
    }
}

/// One output column: where the value comes from in the tree and the name it
/// carries in result rows. The store contract is that result rows are laid
/// out exactly in `FetchQuery::columns` order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FetchColumn {
    /// Entity or link node owning the attribute.
    pub node: NodeId,
    /// Attribute logical name (for aggregate queries, the attribute alias).
    pub attribute: String,
    pub output_name: String,
}

/// Native paging request for OFFSET/FETCH. Native paging is page-indexed, so
/// an offset is representable only as a whole number of pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativePaging {
    pub page_number: u32,
    pub page_size: u32,
}

/// A complete native query: the node arena plus query-level flags.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FetchQuery {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
    pub aggregate: bool,
    pub distinct: bool,
    pub top: Option<u64>,
    pub paging: Option<NativePaging>,
    /// Output row layout; appended as attributes are attached, never
    /// reordered by finalization.
    pub columns: Vec<FetchColumn>,
}

/// Snapshot for speculative translation (OR branches build natively first and
/// roll back wholesale if any branch degrades).
pub struct Checkpoint {
    nodes: Vec<Node>,
    columns_len: usize,
}

impl FetchQuery {
    pub fn new(root_entity: impl Into<String>) -> Self {
        Self {
            nodes: vec![Node::Entity {
                name: root_entity.into(),
                children: Vec::new(),
            }],
            root: 0,
            aggregate: false,
            distinct: false,
            top: None,
            paging: None,
            columns: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes[id].children().map(|c| c.as_slice()).unwrap_or(&[])
    }

    /// Entity name of an entity or link node.
    pub fn entity_name(&self, id: NodeId) -> &str {
        match &self.nodes[id] {
            Node::Entity { name, .. } => name,
            Node::Link { entity, .. } => entity,
            _ => "",
        }
    }

    /// Adds a node under `parent` and returns its id.
    pub fn add_child(&mut self, parent: NodeId, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        if let Some(children) = self.nodes[parent].children_mut() {
            children.push(id);
        }
        id
    }

    /// Attaches a plain attribute to an entity/link node, reusing an existing
    /// identical one. Returns the attribute node id.
    pub fn add_attribute(&mut self, parent: NodeId, name: &str) -> NodeId {
        for &child in self.children(parent) {
            if let Node::Attribute {
                name: existing,
                aggregate: None,
                date_grouping: None,
                ..
            } = &self.nodes[child]
            {
                if existing.eq_ignore_ascii_case(name) {
                    return child;
                }
            }
        }
        self.add_child(parent, Node::attribute(name))
    }

    /// Marks an entity/link node as selecting all attributes. Conflicts with
    /// any aliased attribute already on the node.
    pub fn set_all_attributes(&mut self, parent: NodeId, fragment: &str) -> Result<()> {
        if let Some(alias) = self.first_aliased_attribute(parent) {
            return Err(Error::Conflict {
                entity: self.entity_name(parent).to_string(),
                fragment: format!("{} vs aliased attribute {}", fragment, alias),
            });
        }
        if !self
            .children(parent)
            .iter()
            .any(|&c| matches!(self.nodes[c], Node::AllAttributes))
        {
            self.add_child(parent, Node::AllAttributes);
        }
        Ok(())
    }

    /// True when `node` is an outer link or sits beneath one. The store keeps
    /// unmatched parent rows for outer links, so a condition placed in such a
    /// link's filter would not drop them the way a WHERE clause must.
    pub fn under_outer_link(&self, node: NodeId) -> bool {
        self.outer_scoped(self.root, node, false).unwrap_or(false)
    }

    fn outer_scoped(&self, current: NodeId, target: NodeId, outer: bool) -> Option<bool> {
        let outer = outer
            || matches!(
                self.nodes[current],
                Node::Link {
                    kind: LinkKind::Outer,
                    ..
                }
            );
        if current == target {
            return Some(outer);
        }
        self.children(current)
            .iter()
            .find_map(|&child| self.outer_scoped(child, target, outer))
    }

    /// Guard for the opposite direction: adding an aliased attribute to a
    /// node already selecting all attributes.
    pub fn check_alias_allowed(&self, parent: NodeId, fragment: &str) -> Result<()> {
        if self
            .children(parent)
            .iter()
            .any(|&c| matches!(self.nodes[c], Node::AllAttributes))
        {
            return Err(Error::Conflict {
                entity: self.entity_name(parent).to_string(),
                fragment: fragment.to_string(),
            });
        }
        Ok(())
    }

    fn first_aliased_attribute(&self, parent: NodeId) -> Option<&str> {
        self.children(parent).iter().find_map(|&c| match &self.nodes[c] {
            Node::Attribute {
                alias: Some(alias), ..
            } => Some(alias.as_str()),
            _ => None,
        })
    }

    /// Returns the node's filter child, creating an undetermined one if none
    /// exists yet.
    pub fn ensure_filter(&mut self, parent: NodeId) -> NodeId {
        if let Some(&existing) = self
            .children(parent)
            .iter()
            .find(|&&c| matches!(self.nodes[c], Node::Filter { .. }))
        {
            return existing;
        }
        self.add_child(
            parent,
            Node::Filter {
                op: LogicalOp::Undetermined,
                children: Vec::new(),
            },
        )
    }

    /// Registers an output column and returns its row index.
    pub fn add_column(&mut self, node: NodeId, attribute: &str, output_name: &str) -> usize {
        if let Some(idx) = self.columns.iter().position(|c| {
            c.node == node
                && c.attribute.eq_ignore_ascii_case(attribute)
                && c.output_name == output_name
        }) {
            return idx;
        }
        self.columns.push(FetchColumn {
            node,
            attribute: attribute.to_string(),
            output_name: output_name.to_string(),
        });
        self.columns.len() - 1
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            nodes: self.nodes.clone(),
            columns_len: self.columns.len(),
        }
    }

    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.nodes = checkpoint.nodes;
        self.columns.truncate(checkpoint.columns_len);
    }

    /// All entity/link node ids, root first, in child order.
    pub fn entity_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            let mut links: Vec<NodeId> = self
                .children(id)
                .iter()
                .copied()
                .filter(|&c| matches!(self.nodes[c], Node::Link { .. }))
                .collect();
            links.reverse();
            stack.extend(links);
        }
        out
    }
}
