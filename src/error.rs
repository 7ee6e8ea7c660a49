//! Error types for the compiler and the client-side execution pipeline

use crate::client::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The statement uses a construct with no native and no residual
    /// representation. Always fatal; `fragment` is the offending SQL text.
    #[error("Unsupported construct: {construct} in `{fragment}`")]
    UnsupportedConstruct { construct: String, fragment: String },

    #[error("SQL parse error: {0}")]
    ParseError(String),

    #[error("Unknown identifier: {0}")]
    UnknownIdentifier(String),

    #[error("Ambiguous identifier: {0}")]
    AmbiguousIdentifier(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// An all-attributes selection and an aliased attribute were requested on
    /// the same entity node; the store cannot satisfy both.
    #[error("Conflicting attribute selection on {entity}: `{fragment}`")]
    Conflict { entity: String, fragment: String },

    // Evaluation errors
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Operation was cancelled")]
    OperationCancelled,

    /// Store-side failures pass through unmodified.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A mutation statement failed after some batches had been applied.
    /// Reports progress before re-raising the underlying failure.
    #[error("{affected} of {total} rows affected: {source}")]
    MutationFailed {
        affected: usize,
        total: usize,
        #[source]
        source: StoreError,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for the most common fatal diagnostic.
    pub fn unsupported(construct: impl Into<String>, fragment: impl ToString) -> Self {
        Error::UnsupportedConstruct {
            construct: construct.into(),
            fragment: fragment.to_string(),
        }
    }
}
