//! Client-side execution of compiled statements: retrieval paging, residual
//! filtering and sorting, the streaming aggregate engine, and mutation
//! batching.

pub mod aggregate;
pub mod executor;
pub mod sort;

pub use executor::{ExecutionResult, Executor, QueryResult};
