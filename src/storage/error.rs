//! Storage-specific error types.
//!
//! All storage operations return [`StorageError`] on failure, which can be
//! matched to determine the underlying cause (database, pool, timeout, etc.).
//! Row writes wrap it in [`WriteError`] together with the target relation.

use std::time::Duration;

use thiserror::Error;

use crate::schema::ColumnType;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed (duckdb error).
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    /// Could not check out a pooled connection.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Storage call did not finish within its bound.
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    /// Value shape does not match the relation's value column.
    #[error("relation '{relation}' stores {expected}, got {found} value")]
    TypeMismatch {
        relation: String,
        expected: ColumnType,
        found: &'static str,
    },

    /// Invalid data in database or request (e.g., unknown column type).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Internal error (e.g., task join failure).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A failed row write.
#[derive(Debug, Error)]
#[error("write to relation '{relation}' failed: {source}")]
pub struct WriteError {
    pub relation: String,
    #[source]
    pub source: StorageError,
}

impl WriteError {
    pub fn new(relation: impl Into<String>, source: StorageError) -> Self {
        Self {
            relation: relation.into(),
            source,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.source, StorageError::Timeout { .. })
    }
}
