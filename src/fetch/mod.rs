//! The store's native query representation and its lifecycle
//!
//! Built incrementally by the clause converters, finalized exactly once per
//! statement, then serialized for the wire.

mod finalize;
pub mod tree;
mod xml;

pub use tree::{
    AggregateKind, Checkpoint, ConditionOp, DateGrouping, FetchColumn, FetchQuery, LinkKind,
    LogicalOp, NativePaging, Node, NodeId,
};
