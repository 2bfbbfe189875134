//! Schema Router
//!
//! Maps metric names onto storage relations, creating each relation lazily
//! on first sight:
//!
//! - [`normalize_relation_name`]: Metric name to relation name
//! - [`resolve_column_type`]: Declared type or runtime value shape to column type
//! - [`RelationCache`]: Process-lifetime record of ensured relations
//! - [`SchemaRouter`]: Resolves, creates and caches [`RelationDescriptor`]s
//!
//! Schema is additive-only: once a relation name is cached its column type
//! is fixed, and a metric resolving to a different type is rejected with
//! [`SchemaError::Conflict`].

mod cache;
mod descriptor;
mod error;
mod router;

pub use cache::RelationCache;
pub use descriptor::{ColumnType, RelationDescriptor, normalize_relation_name, resolve_column_type};
pub use error::SchemaError;
pub use router::SchemaRouter;
