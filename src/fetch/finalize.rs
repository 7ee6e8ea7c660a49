//! Tree finalization
//!
//! Runs exactly once per statement, after every clause converter has had its
//! say. Child lists are rebuilt into the store's canonical order (attributes,
//! filters, orders, links), empty filters are pruned, and any filter whose
//! logical operator is still undetermined resolves to And. The resulting tree
//! is what gets serialized; an undetermined operator past this point would be
//! a compiler bug.

use super::tree::{FetchQuery, LogicalOp, Node, NodeId};

impl FetchQuery {
    pub fn finalize(&mut self) {
        self.finalize_node(self.root);
    }

    fn finalize_node(&mut self, id: NodeId) {
        let children = match self.nodes[id] {
            Node::Entity { ref children, .. }
            | Node::Link { ref children, .. }
            | Node::Filter { ref children, .. } => children.clone(),
            _ => return,
        };

        for &child in &children {
            self.finalize_node(child);
        }

        let mut kept: Vec<NodeId> = children
            .into_iter()
            .filter(|&c| !self.is_empty_filter(c))
            .collect();
        // Stable by construction: sort_by_key keeps the relative order of
        // children with equal rank.
        kept.sort_by_key(|&c| Self::rank(&self.nodes[c]));

        match &mut self.nodes[id] {
            Node::Entity { children, .. }
            | Node::Link { children, .. }
            | Node::Filter { children, .. } => *children = kept,
            _ => {}
        }

        if let Node::Filter { op, .. } = &mut self.nodes[id] {
            if *op == LogicalOp::Undetermined {
                *op = LogicalOp::And;
            }
        }
    }

    fn is_empty_filter(&self, id: NodeId) -> bool {
        matches!(&self.nodes[id], Node::Filter { children, .. } if children.is_empty())
    }

    fn rank(node: &Node) -> u8 {
        match node {
            Node::AllAttributes | Node::Attribute { .. } => 0,
            Node::Filter { .. } | Node::Condition { .. } => 1,
            Node::Order { .. } => 2,
            Node::Link { .. } => 3,
            Node::Entity { .. } => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tree::ConditionOp;
    use crate::types::Value;

    #[test]
    fn children_reordered_and_undetermined_resolved() {
        // Built deliberately out of order: order first, then filter, then
        // attributes. Finalization must yield the canonical layout no matter
        // which clause ran first.
        let mut tree = FetchQuery::new("t");
        let root = tree.root();
        tree.add_child(
            root,
            Node::Order {
                attribute: "b".into(),
                descending: false,
            },
        );
        let filter = tree.ensure_filter(root);
        tree.add_child(
            filter,
            Node::condition("a", ConditionOp::Eq, vec![Value::I64(1)]),
        );
        tree.add_attribute(root, "a");
        tree.add_attribute(root, "b");

        tree.finalize();

        let kinds: Vec<_> = tree
            .children(root)
            .iter()
            .map(|&c| match tree.node(c) {
                Node::Attribute { name, .. } => format!("attr:{}", name),
                Node::Filter { op, .. } => format!("filter:{:?}", op),
                Node::Order { attribute, .. } => format!("order:{}", attribute),
                other => format!("{:?}", other),
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["attr:a", "attr:b", "filter:And", "order:b"]
        );
    }

    #[test]
    fn empty_filters_pruned() {
        let mut tree = FetchQuery::new("t");
        let root = tree.root();
        let outer = tree.ensure_filter(root);
        tree.add_child(
            outer,
            Node::Filter {
                op: LogicalOp::Undetermined,
                children: Vec::new(),
            },
        );
        tree.finalize();
        assert!(tree.children(root).is_empty());
    }
}
