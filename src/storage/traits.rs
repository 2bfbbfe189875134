//! Storage seams used by the schema router and the ingestor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::protocol::MetricValue;
use crate::schema::{ColumnType, RelationDescriptor};
use crate::storage::{StorageError, WriteError};

/// Relation catalog: existence checks and idempotent creation.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Value column type of `relation`, `None` if it does not exist.
    async fn lookup(&self, relation: &str) -> Result<Option<ColumnType>, StorageError>;

    /// Create the relation if it does not exist. An existing relation is not an error.
    async fn create(&self, descriptor: &RelationDescriptor) -> Result<(), StorageError>;
}

/// Appends single metric rows.
///
/// Implementations do not retry; a failure is reported once to the caller.
#[async_trait]
pub trait RowWriter: Send + Sync {
    async fn write(
        &self,
        relation: &RelationDescriptor,
        node_tag: &str,
        device_tag: Option<&str>,
        ts: DateTime<Utc>,
        value: &MetricValue,
    ) -> Result<(), WriteError>;
}
