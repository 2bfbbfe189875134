//! sparkstore - Sparkplug-style telemetry ingestion
//!
//! This crate turns session-oriented telemetry from edge nodes into rows in
//! an embedded DuckDB store. It can be used as a library by a transport
//! client, or run as the standalone `sparkstore` replay binary.
//!
//! # Architecture
//!
//! - **Protocol**: identities, messages, topic parsing and the JSON codec
//! - **Session**: per-identity BIRTH/DATA/DEATH state machine and sequence
//!   continuity checks
//! - **Schema**: metric name to relation routing with lazily created,
//!   cached relations
//! - **Storage**: pooled DuckDB catalog, row writer and range reader
//! - **Ingest**: orchestration of the above, rebirth requests and counters
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sparkstore::{Ingestor, LoggingRebirthSink, NamespacePolicy, StorageBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = StorageBuilder::new("data/sparkstore.duckdb").build()?;
//!     let ingestor = Ingestor::from_storage(
//!         &storage,
//!         Arc::new(LoggingRebirthSink),
//!         NamespacePolicy::default(),
//!     );
//!
//!     let outcome = ingestor
//!         .ingest_raw("spBv1.0/plant/NBIRTH/edge1", br#"{"timestamp":0,"seq":0}"#)
//!         .await?;
//!     assert!(outcome.verdict.is_accept());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod ingest;
pub mod protocol;
pub mod schema;
pub mod session;
pub mod storage;

pub use config::{AppConfig, ConfigError};
pub use ingest::{
    ChannelRebirthSink, IngestOutcome, IngestStats, Ingestor, LoggingRebirthSink, MetricStatus,
    NamespacePolicy, RebirthRequest, RebirthSink, StatsSnapshot,
};
pub use protocol::{
    DataType, DecodeError, Delivery, JsonCodec, Message, MessageKind, Metric, MetricValue,
    NodeIdentity,
};
pub use schema::{ColumnType, RelationDescriptor, SchemaError, SchemaRouter};
pub use session::{RebirthReason, SessionManager, SessionState, Verdict};
pub use storage::{
    RangeQuery, RelationReader, RelationRow, StorageBuilder, StorageError, StorageHandles,
};
