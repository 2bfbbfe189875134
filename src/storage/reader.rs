//! Read-side range queries over relations.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use duckdb::Connection;
use serde::Serialize;
use strum_macros::{AsRefStr, EnumString};

use crate::protocol::MetricValue;
use crate::schema::ColumnType;
use crate::storage::StorageError;
use crate::storage::pool::ConnectionPool;
use crate::storage::schema::{check_identifier, list_relations, lookup_column_type};

// =============================================================================
// Constants
// =============================================================================

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 10_000;
const DEFAULT_RANGE_DAYS: i64 = 30;

// =============================================================================
// Query Types
// =============================================================================

/// Sort order for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Time-window query over one relation.
#[derive(Debug, Clone, Default)]
pub struct RangeQuery {
    pub relation: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub node_tag: Option<String>,
    pub device_tag: Option<String>,
    pub limit: Option<u32>,
    pub order: Option<SortOrder>,
}

impl RangeQuery {
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            ..Default::default()
        }
    }
}

/// One stored metric row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationRow {
    pub ts: DateTime<Utc>,
    pub node_tag: String,
    pub device_tag: Option<String>,
    pub value: MetricValue,
}

// =============================================================================
// Reader
// =============================================================================

/// Relation reader.
///
/// Shares the pool's admission limit and statement timeout with writes.
#[derive(Clone)]
pub struct RelationReader {
    pool: Arc<ConnectionPool>,
    statement_timeout: std::time::Duration,
}

impl std::fmt::Debug for RelationReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationReader").finish_non_exhaustive()
    }
}

impl RelationReader {
    pub(crate) fn new(pool: Arc<ConnectionPool>, statement_timeout: std::time::Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    /// Names of all relations.
    pub async fn relations(&self) -> Result<Vec<String>, StorageError> {
        self.pool
            .run("list relations", self.statement_timeout, |conn, _| {
                list_relations(conn)
            })
            .await
    }

    /// Query rows of one relation with filters.
    ///
    /// # Errors
    /// Returns `StorageError::InvalidData` for an invalid or unknown relation,
    /// `StorageError::Timeout` when the statement timeout elapses.
    pub async fn query(&self, q: RangeQuery) -> Result<Vec<RelationRow>, StorageError> {
        check_identifier(&q.relation)?;
        self.pool
            .run("range query", self.statement_timeout, move |conn, _| {
                query_relation(conn, &q)
            })
            .await
    }
}

fn query_relation(conn: &Connection, q: &RangeQuery) -> Result<Vec<RelationRow>, StorageError> {
    let column_type = lookup_column_type(conn, &q.relation)?.ok_or_else(|| {
        StorageError::InvalidData(format!("unknown relation '{}'", q.relation))
    })?;

    let now = Utc::now();
    let start = q
        .start
        .unwrap_or_else(|| now - Duration::days(DEFAULT_RANGE_DAYS));
    let end = q.end.unwrap_or(now);
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let order = q.order.unwrap_or_default();

    let mut sql = format!(
        r#"SELECT ts, node_id, device_id, "{}" FROM "{}" WHERE ts >= ? AND ts <= ?"#,
        column_type.value_column(),
        q.relation
    );
    let mut params: Vec<Box<dyn duckdb::ToSql>> = vec![
        Box::new(start.timestamp_micros()),
        Box::new(end.timestamp_micros()),
    ];

    if let Some(ref node_tag) = q.node_tag {
        sql.push_str(" AND node_id = ?");
        params.push(Box::new(node_tag.clone()));
    }
    if let Some(ref device_tag) = q.device_tag {
        sql.push_str(" AND device_id = ?");
        params.push(Box::new(device_tag.clone()));
    }

    sql.push_str(&format!(" ORDER BY ts {} LIMIT {}", order.as_sql(), limit));

    let param_refs: Vec<&dyn duckdb::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        let value = match column_type {
            ColumnType::Boolean => MetricValue::Bool(row.get(3)?),
            ColumnType::Long => MetricValue::Int(row.get(3)?),
            ColumnType::Double => MetricValue::Float(row.get(3)?),
            ColumnType::Text => MetricValue::Text(row.get(3)?),
        };
        Ok(RelationRow {
            ts: DateTime::from_timestamp_micros(row.get(0)?).unwrap_or(DateTime::UNIX_EPOCH),
            node_tag: row.get(1)?,
            device_tag: row.get(2)?,
            value,
        })
    })?;

    rows.collect::<Result<Vec<_>, _>>()
        .map_err(StorageError::from)
}
