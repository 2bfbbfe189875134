//! Schema routing errors.

use thiserror::Error;

use crate::schema::ColumnType;

/// Errors raised while routing a metric to its relation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// Normalization left nothing to name a relation with.
    #[error("metric name {0:?} normalizes to an empty relation name")]
    EmptyRelationName(String),

    /// The relation already exists with a different value column type.
    ///
    /// Types are never widened: an integer value bound for a DOUBLE relation
    /// is a conflict, not a silent conversion.
    #[error("relation '{relation}' stores {existing}, metric resolves to {incoming}")]
    Conflict {
        relation: String,
        existing: ColumnType,
        incoming: ColumnType,
    },
}
