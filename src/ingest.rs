//! Ingestion Orchestrator
//!
//! Wires codec, session gate, schema router and row writer per inbound message:
//!
//! - [`Ingestor`]: Runs one message through the pipeline under its identity's lane
//! - [`NamespacePolicy`]: Which BIRTH metrics get relations pre-created
//! - [`IngestOutcome`]: Per-metric result of one message
//! - [`RebirthSink`]: Side channel carrying rebirth requests back to the transport
//! - [`IngestStats`]: Lock-free counters
//!
//! # Flow
//!
//! ```text
//! bytes -> JsonCodec -> SessionManager --Accept--> SchemaRouter -> RowWriter
//!                              |
//!                              +--RequestRebirth--> RebirthSink
//! ```

mod orchestrator;
mod outcome;
mod policy;
mod rebirth;
mod stats;

pub use orchestrator::Ingestor;
pub use outcome::{IngestOutcome, MetricFailure, MetricOutcome, MetricStatus, SkipReason};
pub use policy::{MetricClass, NamespacePolicy};
pub use rebirth::{
    ChannelRebirthSink, LoggingRebirthSink, RebirthError, RebirthRequest, RebirthSink,
};
pub use stats::{IngestStats, StatsSnapshot};
