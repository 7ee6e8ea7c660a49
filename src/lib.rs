//! A SQL front-end for page-oriented record stores
//!
//! This crate compiles T-SQL statements into the store's native query trees
//! and executes them with a degrade-and-recombine strategy:
//! - Predicates, sorts, joins and aggregates that the native query language
//!   can express are pushed down to the store
//! - Everything else degrades to precise residual work the client performs
//!   over the returned rows
//! - Aggregate statements carry a fallback plan that re-aggregates locally
//!   when the store hits its aggregate result-size limit
//!
//! Mutations (INSERT/UPDATE/DELETE) select affected keys first, ask the host
//! session for confirmation, then apply all-or-nothing store batches.

pub mod client;
pub mod compiler;
pub mod error;
pub mod execution;
pub mod fetch;
pub mod functions;
pub mod types;

pub use client::{Mutation, MutationKind, MutationSummary, Options, Page, RecordStore, StoreError};
pub use compiler::{compile, CompiledQuery, CompiledStatement};
pub use error::{Error, Result};
pub use execution::{ExecutionResult, Executor, QueryResult};
pub use fetch::FetchQuery;
pub use types::{
    ColumnSchema, ColumnType, MetadataProvider, Row, StaticMetadata, TableSchema, Value,
};
