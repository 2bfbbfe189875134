//! DuckDB-backed catalog and row writer.
//!
//! Every call runs through [`ConnectionPool::run`]: admitted at most pool-size
//! at a time, then bounded by the statement timeout. A timed-out call is
//! reported, not retried, and its transaction is rolled back instead of
//! committed once the blocking work catches up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::types::Value;

use crate::protocol::MetricValue;
use crate::schema::{ColumnType, RelationDescriptor};
use crate::storage::pool::ConnectionPool;
use crate::storage::schema::{check_identifier, create_relation_sql, insert_sql, lookup_column_type};
use crate::storage::{Catalog, RowWriter, StorageError, WriteError};

/// Catalog and writer over one DuckDB connection pool.
#[derive(Clone)]
pub struct DuckStore {
    pool: Arc<ConnectionPool>,
    statement_timeout: Duration,
}

impl std::fmt::Debug for DuckStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckStore")
            .field("pool", &self.pool)
            .field("statement_timeout", &self.statement_timeout)
            .finish()
    }
}

impl DuckStore {
    pub fn new(pool: Arc<ConnectionPool>, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }
}

#[async_trait]
impl Catalog for DuckStore {
    async fn lookup(&self, relation: &str) -> Result<Option<ColumnType>, StorageError> {
        check_identifier(relation)?;
        let relation = relation.to_string();
        self.pool
            .run("catalog lookup", self.statement_timeout, move |conn, _| {
                lookup_column_type(conn, &relation)
            })
            .await
    }

    async fn create(&self, descriptor: &RelationDescriptor) -> Result<(), StorageError> {
        check_identifier(&descriptor.table_name)?;
        let ddl = create_relation_sql(descriptor);
        self.pool
            .run("create relation", self.statement_timeout, move |conn, gate| {
                let tx = conn.transaction()?;
                tx.execute_batch(&ddl)?;
                gate.commit(tx)
            })
            .await
    }
}

#[async_trait]
impl RowWriter for DuckStore {
    async fn write(
        &self,
        relation: &RelationDescriptor,
        node_tag: &str,
        device_tag: Option<&str>,
        ts: DateTime<Utc>,
        value: &MetricValue,
    ) -> Result<(), WriteError> {
        let fail = |e| WriteError::new(relation.table_name.clone(), e);

        check_identifier(&relation.table_name).map_err(fail)?;
        let bound = bind_value(relation, value).map_err(fail)?;
        let sql = insert_sql(relation);
        let node_tag = node_tag.to_string();
        let device_tag = device_tag.map(str::to_string);
        let ts = ts.timestamp_micros();

        self.pool
            .run("write", self.statement_timeout, move |conn, gate| {
                let tx = conn.transaction()?;
                tx.execute(&sql, duckdb::params![ts, node_tag, device_tag, bound])?;
                gate.commit(tx)
            })
            .await
            .map_err(fail)
    }
}

/// Convert a metric value to the SQL value of the relation's column.
fn bind_value(relation: &RelationDescriptor, value: &MetricValue) -> Result<Value, StorageError> {
    match (relation.column_type, value) {
        (ColumnType::Boolean, MetricValue::Bool(b)) => Ok(Value::Boolean(*b)),
        (ColumnType::Long, MetricValue::Int(i)) => Ok(Value::BigInt(*i)),
        (ColumnType::Double, MetricValue::Float(f)) => Ok(Value::Double(*f)),
        (ColumnType::Text, MetricValue::Text(s)) => Ok(Value::Text(s.clone())),
        (expected, other) => Err(StorageError::TypeMismatch {
            relation: relation.table_name.clone(),
            expected,
            found: other.kind_name(),
        }),
    }
}
