//! CMDB Store Error Types

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Table does not exist
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Table already exists
    #[error("Table already exists: {0}")]
    TableExists(String),

    /// Index does not exist on the table
    #[error("Index not found: {index} on table {table}")]
    IndexNotFound { table: String, index: String },

    /// An index with the same name or key pattern is already present
    #[error("Index already exists: {index} on table {table}: {reason}")]
    IndexAlreadyExists {
        table: String,
        index: String,
        reason: String,
    },

    /// Per-table index limit reached
    #[error("Index limit exceeded on table {table}: max {max}")]
    IndexLimitExceeded { table: String, max: usize },

    /// Unique index violation
    #[error("Duplicate key error on table {table}, index {index}, keys {keys:?}")]
    DuplicateKey {
        table: String,
        index: String,
        keys: Vec<String>,
    },

    /// Malformed document or filter
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Backend failure (network, timeout, engine fault)
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True for errors that mean the requested index state is already reached
    pub fn is_duplicated(&self) -> bool {
        matches!(self, Self::IndexAlreadyExists { .. })
    }

    /// True when a drop targeted an index that is already gone
    pub fn is_index_not_found(&self) -> bool {
        matches!(self, Self::IndexNotFound { .. })
    }

    /// True for unique-index violations
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    /// Create a backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Create an invalid document error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidDocument(message.into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidDocument(err.to_string())
    }
}

/// Store result type
pub type StoreResult<T> = Result<T, StoreError>;
