//! Relation DDL and catalog queries.
//!
//! Every relation has the same layout: a time column, the node and device
//! tags, and one typed value column named by the relation descriptor.
//!
//! ```text
//! ts        BIGINT NOT NULL   -- microseconds since epoch
//! node_id   VARCHAR NOT NULL  -- "<group>/<edge>"
//! device_id VARCHAR           -- NULL for node-level metrics
//! value | status  BOOLEAN | BIGINT | DOUBLE | VARCHAR
//! ```

use duckdb::Connection;

use crate::schema::{ColumnType, RelationDescriptor};
use crate::storage::StorageError;

/// Find the value column type of an existing relation.
const LOOKUP_SQL: &str = r#"
SELECT data_type FROM information_schema.columns
WHERE table_schema = 'main' AND table_name = ? AND column_name IN ('value', 'status')
LIMIT 1
"#;

/// List relations that carry a value column.
const LIST_SQL: &str = r#"
SELECT DISTINCT table_name FROM information_schema.columns
WHERE table_schema = 'main' AND column_name IN ('value', 'status')
ORDER BY table_name
"#;

/// Relation names are produced by normalization; anything else is refused
/// before it reaches a SQL string.
pub(crate) fn check_identifier(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidData(format!(
            "invalid relation name '{name}'"
        )))
    }
}

/// DDL creating a relation and its time index.
pub(crate) fn create_relation_sql(descriptor: &RelationDescriptor) -> String {
    let name = &descriptor.table_name;
    format!(
        r#"
CREATE TABLE IF NOT EXISTS "{name}" (
    ts        BIGINT NOT NULL,
    node_id   VARCHAR NOT NULL,
    device_id VARCHAR,
    "{column}" {sql_type}
);
CREATE INDEX IF NOT EXISTS "{name}_ts_idx" ON "{name}" (ts);
"#,
        column = descriptor.value_column,
        sql_type = descriptor.column_type.sql_type(),
    )
}

/// Parameterised single-row insert.
pub(crate) fn insert_sql(descriptor: &RelationDescriptor) -> String {
    format!(
        r#"INSERT INTO "{}" (ts, node_id, device_id, "{}") VALUES (?, ?, ?, ?)"#,
        descriptor.table_name, descriptor.value_column
    )
}

/// Value column type of `relation`, `None` if it does not exist.
pub(crate) fn lookup_column_type(
    conn: &Connection,
    relation: &str,
) -> Result<Option<ColumnType>, StorageError> {
    let mut stmt = conn.prepare(LOOKUP_SQL)?;
    let mut rows = stmt.query(duckdb::params![relation])?;
    let sql_type: Option<String> = match rows.next()? {
        Some(row) => Some(row.get(0)?),
        None => None,
    };

    sql_type
        .map(|t| {
            ColumnType::from_sql(&t).ok_or_else(|| {
                StorageError::InvalidData(format!(
                    "relation '{relation}' has unsupported value column type {t}"
                ))
            })
        })
        .transpose()
}

/// Names of all relations carrying a `value` or `status` column.
pub(crate) fn list_relations(conn: &Connection) -> Result<Vec<String>, StorageError> {
    let mut stmt = conn.prepare(LIST_SQL)?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(StorageError::from)
}
