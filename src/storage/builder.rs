//! Storage builder and handles.
//!
//! Provides a builder pattern for constructing the storage layer
//! and a handles struct for accessing the catalog, writer and reader.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::storage::pool::ConnectionPool;
use crate::storage::{Catalog, DuckStore, RelationReader, RowWriter, StorageError};

/// Path selecting an in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// Minimum connection pool size.
const MIN_POOL_SIZE: u32 = 2;

/// Maximum connection pool size.
const MAX_POOL_SIZE: u32 = 32;

/// Default bound on every storage call.
const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Calculate default pool size based on available CPU parallelism.
///
/// Returns the number of available CPUs, clamped between MIN_POOL_SIZE and MAX_POOL_SIZE.
fn default_pool_size() -> u32 {
    std::thread::available_parallelism()
        .map(|p| (p.get() as u32).clamp(MIN_POOL_SIZE, MAX_POOL_SIZE))
        .unwrap_or(4)
}

/// Builder for constructing the storage layer.
#[derive(Debug, Clone)]
pub struct StorageBuilder {
    db_path: PathBuf,
    pool_size: u32,
    statement_timeout: Duration,
}

impl StorageBuilder {
    /// Create a new storage builder. `":memory:"` selects an in-memory database.
    ///
    /// Pool size defaults to the number of available CPUs (clamped to 2-32).
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            pool_size: default_pool_size(),
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }

    /// Builder for an in-memory database.
    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY)
    }

    /// Set the connection pool size.
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the bound on every storage call, including connection checkout.
    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Build the storage layer and return handles.
    pub fn build(self) -> Result<StorageHandles, StorageError> {
        let pool = if self.db_path.as_os_str() == IN_MEMORY {
            ConnectionPool::in_memory(self.pool_size, self.statement_timeout)?
        } else {
            // Create parent directory if it doesn't exist
            if let Some(parent) = self.db_path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Internal(format!(
                        "Failed to create database directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
            ConnectionPool::open(&self.db_path, self.pool_size, self.statement_timeout)?
        };

        tracing::info!(
            path = %self.db_path.display(),
            pool_size = self.pool_size,
            statement_timeout = ?self.statement_timeout,
            "Storage opened"
        );

        Ok(StorageHandles {
            store: Arc::new(DuckStore::new(Arc::clone(&pool), self.statement_timeout)),
            reader: RelationReader::new(pool, self.statement_timeout),
        })
    }
}

/// Handles to the storage layer.
#[derive(Debug, Clone)]
pub struct StorageHandles {
    /// Catalog and row writer.
    pub store: Arc<DuckStore>,
    /// Facade for range queries.
    pub reader: RelationReader,
}

impl StorageHandles {
    pub fn catalog(&self) -> Arc<dyn Catalog> {
        self.store.clone()
    }

    pub fn writer(&self) -> Arc<dyn RowWriter> {
        self.store.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MetricValue;
    use crate::schema::{ColumnType, RelationDescriptor};
    use crate::storage::RangeQuery;
    use chrono::Utc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_storage_builder_roundtrip() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("test.duckdb");

        let handles = StorageBuilder::new(&db_path)
            .pool_size(2)
            .statement_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        assert!(db_path.parent().unwrap().exists());

        let descriptor = RelationDescriptor::new("fan_speed", ColumnType::Double);
        handles.catalog().create(&descriptor).await.unwrap();
        handles
            .writer()
            .write(&descriptor, "f/e", None, Utc::now(), &MetricValue::Float(1200.0))
            .await
            .unwrap();

        let rows = handles.reader.query(RangeQuery::new("fan_speed")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, MetricValue::Float(1200.0));
        assert_eq!(rows[0].node_tag, "f/e");
    }

    #[tokio::test]
    async fn test_in_memory_builder() {
        let handles = StorageBuilder::in_memory().pool_size(2).build().unwrap();
        assert!(handles.reader.relations().await.unwrap().is_empty());
        assert_eq!(handles.store.statement_timeout(), DEFAULT_STATEMENT_TIMEOUT);
    }

    #[test]
    fn test_default_pool_size_within_bounds() {
        let size = super::default_pool_size();
        assert!(size >= super::MIN_POOL_SIZE);
        assert!(size <= super::MAX_POOL_SIZE);
    }
}
