//! External collaborators: the record-store client and the session options
//!
//! The compiler itself never talks to the network; everything the store does
//! is reached through [`RecordStore`], and everything the hosting session
//! controls (cancellation, confirmation prompts, batching) arrives through
//! [`Options`]. Both are synchronous: the only suspension points in the whole
//! pipeline are blocking calls into this trait.

use crate::fetch::FetchQuery;
use crate::types::{Row, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Store-side failures. These pass through the pipeline unmodified, except
/// that mutation statements wrap them with row-progress information.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The native aggregate query produced more rows than the store is
    /// willing to aggregate. The executor falls back to client-side
    /// aggregation when it sees this.
    #[error("native query exceeded the aggregate result-size limit")]
    AggregateLimit,

    #[error("network error: {0}")]
    Network(String),

    /// A mutation batch failed; the store rolls back the whole batch.
    #[error("batch of {size} operations failed and was rolled back: {message}")]
    BatchFailed { size: usize, message: String },

    #[error("store rejected the request: {0}")]
    Rejected(String),
}

/// One page of rows from a native query. Rows are laid out in the query's
/// flattened attribute order (see `CompiledQuery::output`).
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub rows: Vec<Row>,
    /// Whether another page exists. Native paging is page-indexed, which is
    /// why OFFSET is only representable as a whole number of pages.
    pub more: bool,
}

/// A single mutation in a batch. Batches are all-or-nothing on the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create {
        table: String,
        fields: Vec<(String, Value)>,
    },
    Update {
        table: String,
        id: Value,
        fields: Vec<(String, Value)>,
    },
    Delete {
        table: String,
        id: Value,
    },
}

/// Client for the remote record store.
pub trait RecordStore {
    /// Runs a finalized native query and returns one page of rows.
    fn run_query(
        &self,
        query: &FetchQuery,
        page_number: u32,
        page_size: u32,
    ) -> Result<Page, StoreError>;

    /// Creates a record, returning its new primary key.
    fn create(&self, table: &str, fields: &[(String, Value)]) -> Result<Value, StoreError>;

    fn update(
        &self,
        table: &str,
        id: &Value,
        fields: &[(String, Value)],
    ) -> Result<(), StoreError>;

    fn delete(&self, table: &str, id: &Value) -> Result<(), StoreError>;

    /// Applies a batch of mutations; the store reports all-or-nothing
    /// per-batch failure via [`StoreError::BatchFailed`].
    fn execute_batch(&self, batch: &[Mutation]) -> Result<(), StoreError>;
}

/// What a destructive statement is about to do, handed to the confirmation
/// callback before any row is touched.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationSummary {
    pub kind: MutationKind,
    pub table: String,
    /// Number of affected rows, already resolved by the key-selection query.
    pub rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

type ConfirmFn = dyn Fn(&MutationSummary) -> bool + Send + Sync;
type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// Per-session options shared by compilation and execution.
///
/// Cancellation is cooperative: the executor polls [`Options::is_cancelled`]
/// once per retrieved page and the aggregate engine polls it once per row.
pub struct Options {
    cancelled: Arc<AtomicBool>,
    /// Mutations per store batch.
    pub batch_size: usize,
    /// Rows per retrieval page.
    pub page_size: u32,
    /// When set, UPDATE/DELETE without a WHERE clause fails to compile.
    pub block_mutations_without_where: bool,
    confirm: Option<Box<ConfirmFn>>,
    progress: Option<Box<ProgressFn>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            batch_size: 100,
            page_size: 5000,
            block_mutations_without_where: false,
            confirm: None,
            progress: None,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle the host can flip from another thread to abort the current
    /// operation at the next poll point.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn check_cancelled(&self) -> crate::error::Result<()> {
        if self.is_cancelled() {
            Err(crate::error::Error::OperationCancelled)
        } else {
            Ok(())
        }
    }

    pub fn with_confirmation(
        mut self,
        f: impl Fn(&MutationSummary) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.confirm = Some(Box::new(f));
        self
    }

    pub fn with_progress(mut self, f: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    /// Asks the host to approve a destructive statement. Absent a callback,
    /// everything is approved.
    pub fn confirm_mutation(&self, summary: &MutationSummary) -> bool {
        self.confirm.as_ref().map(|f| f(summary)).unwrap_or(true)
    }

    pub fn report_progress(&self, done: usize, total: usize) {
        if let Some(f) = &self.progress {
            f(done, total);
        }
    }
}
