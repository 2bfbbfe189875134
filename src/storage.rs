//! Storage Layer
//!
//! DuckDB persistence for metric relations, one table per relation:
//! - **Catalog**: Existence checks and idempotent relation creation
//! - **Writer**: Single-row appends, each in its own transaction
//! - **Reader**: Range queries by time window and tags
//!
//! All calls share a bounded r2d2 connection pool: at most pool-size calls run
//! at once, each bounded by the statement timeout once admitted.
//!
//! # Components
//!
//! - [`Catalog`] / [`RowWriter`]: Seams used by the schema router and the ingestor
//! - [`DuckStore`]: DuckDB implementation of both seams
//! - [`RelationReader`]: Read-side range queries
//! - [`StorageBuilder`] / [`StorageHandles`]: Initialization

mod builder;
mod error;
mod pool;
mod reader;
mod schema;
mod store;
mod traits;

pub use builder::{IN_MEMORY, StorageBuilder, StorageHandles};
pub use error::{StorageError, WriteError};
pub use pool::ConnectionPool;
pub use reader::{RangeQuery, RelationReader, RelationRow, SortOrder};
pub use store::DuckStore;
pub use traits::{Catalog, RowWriter};
