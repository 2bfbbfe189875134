//! Per-message ingestion results.

use std::fmt;

use thiserror::Error;

use crate::protocol::{MessageKind, NodeIdentity};
use crate::schema::{RelationDescriptor, SchemaError};
use crate::session::Verdict;
use crate::storage::WriteError;

/// Why a metric failed.
#[derive(Debug, Error)]
pub enum MetricFailure {
    /// The metric could not be routed to a relation.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The row write failed.
    #[error(transparent)]
    Write(#[from] WriteError),

    /// The write task ended without reporting (panic or cancellation).
    #[error("write task aborted: {0}")]
    Aborted(String),
}

/// Why a metric was not acted upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The message was not accepted by the session gate.
    NotAccepted,
    /// BIRTH metric under an internal or control namespace.
    Internal,
    /// BIRTH metric carrying the protocol's sequence bookkeeping.
    SequenceMetric,
    /// BIRTH metric outside every externally-visible namespace.
    NotVisible,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotAccepted => "not-accepted",
            Self::Internal => "internal",
            Self::SequenceMetric => "sequence-metric",
            Self::NotVisible => "not-visible",
        })
    }
}

/// Result for one metric of a message.
#[derive(Debug)]
pub enum MetricStatus {
    /// DATA row written.
    Written(RelationDescriptor),
    /// BIRTH relation ensured; no row written.
    Ensured(RelationDescriptor),
    Skipped(SkipReason),
    Failed(MetricFailure),
}

impl MetricStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Outcome of one metric, in message order.
#[derive(Debug)]
pub struct MetricOutcome {
    /// Zero-based position of the metric in its message.
    pub index: usize,
    pub name: String,
    pub status: MetricStatus,
}

/// Outcome of ingesting one message.
#[derive(Debug)]
pub struct IngestOutcome {
    pub identity: NodeIdentity,
    pub kind: MessageKind,
    pub verdict: Verdict,
    /// One entry per metric, in the message's order.
    pub metrics: Vec<MetricOutcome>,
    /// A rebirth request was raised for this message (delivery is best effort).
    pub rebirth_requested: bool,
}

impl IngestOutcome {
    /// Number of DATA rows written.
    pub fn rows_written(&self) -> usize {
        self.metrics
            .iter()
            .filter(|m| matches!(m.status, MetricStatus::Written(_)))
            .count()
    }

    /// Number of BIRTH relations ensured.
    pub fn relations_ensured(&self) -> usize {
        self.metrics
            .iter()
            .filter(|m| matches!(m.status, MetricStatus::Ensured(_)))
            .count()
    }

    /// Failed metrics, in message order.
    pub fn failures(&self) -> impl Iterator<Item = (&MetricOutcome, &MetricFailure)> {
        self.metrics.iter().filter_map(|m| match &m.status {
            MetricStatus::Failed(failure) => Some((m, failure)),
            _ => None,
        })
    }

    pub fn has_failures(&self) -> bool {
        self.metrics.iter().any(|m| m.status.is_failure())
    }
}
