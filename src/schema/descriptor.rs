//! Relation naming and column typing.

use serde::Serialize;
use strum_macros::{AsRefStr, Display};

use crate::protocol::{DataType, MetricValue};
use crate::schema::SchemaError;

/// Value column name for textual relations.
pub const STATUS_COLUMN: &str = "status";

/// Value column name for every other relation.
pub const VALUE_COLUMN: &str = "value";

/// Storage class of a relation's value column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ColumnType {
    Boolean,
    Long,
    Double,
    Text,
}

impl ColumnType {
    /// SQL column type used when creating a relation.
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Long => "BIGINT",
            Self::Double => "DOUBLE",
            Self::Text => "VARCHAR",
        }
    }

    /// Map a catalog-reported SQL type back to a column type.
    ///
    /// Accepts the aliases a relation created elsewhere may carry.
    pub fn from_sql(sql_type: &str) -> Option<Self> {
        match sql_type.trim().to_ascii_uppercase().as_str() {
            "BOOLEAN" | "BOOL" => Some(Self::Boolean),
            "BIGINT" | "INT8" | "LONG" | "INTEGER" | "INT" | "INT4" | "SMALLINT" | "TINYINT"
            | "HUGEINT" | "UBIGINT" | "UINTEGER" | "USMALLINT" | "UTINYINT" => Some(Self::Long),
            "DOUBLE" | "FLOAT8" | "FLOAT" | "FLOAT4" | "REAL" => Some(Self::Double),
            "VARCHAR" | "TEXT" | "STRING" => Some(Self::Text),
            _ => None,
        }
    }

    /// Name of the value column carrying this type.
    pub fn value_column(self) -> &'static str {
        match self {
            Self::Text => STATUS_COLUMN,
            Self::Boolean | Self::Long | Self::Double => VALUE_COLUMN,
        }
    }
}

/// Where a metric's rows live.
///
/// Derived deterministically from the metric name and type; cached for the
/// process lifetime once ensured.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RelationDescriptor {
    pub table_name: String,
    pub value_column: &'static str,
    pub column_type: ColumnType,
}

impl RelationDescriptor {
    pub fn new(table_name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            table_name: table_name.into(),
            value_column: column_type.value_column(),
            column_type,
        }
    }
}

/// Normalize a metric name into a relation name.
///
/// Strips everything up to and including the first `/`, lower-cases the rest
/// and replaces every character outside `[a-z0-9_]` with `_`. Different raw
/// names may collapse onto the same relation.
///
/// # Errors
/// Returns `SchemaError::EmptyRelationName` when nothing remains.
pub fn normalize_relation_name(metric_name: &str) -> Result<String, SchemaError> {
    let local = metric_name
        .split_once('/')
        .map_or(metric_name, |(_, rest)| rest);

    let normalized: String = local
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' => c,
            _ => '_',
        })
        .collect();

    if normalized.is_empty() {
        return Err(SchemaError::EmptyRelationName(metric_name.to_string()));
    }
    Ok(normalized)
}

/// Column type for a metric: its declared type if present, else its value shape.
pub fn resolve_column_type(data_type: Option<DataType>, value: &MetricValue) -> ColumnType {
    match data_type {
        Some(DataType::Boolean) => ColumnType::Boolean,
        Some(
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::DateTime,
        ) => ColumnType::Long,
        Some(DataType::Float | DataType::Double) => ColumnType::Double,
        Some(DataType::String | DataType::Text) => ColumnType::Text,
        None => match value {
            MetricValue::Bool(_) => ColumnType::Boolean,
            MetricValue::Int(_) => ColumnType::Long,
            MetricValue::Float(_) => ColumnType::Double,
            MetricValue::Text(_) => ColumnType::Text,
        },
    }
}
