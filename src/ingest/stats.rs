//! Ingestion counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free ingestion counters shared across ingestion paths.
#[derive(Debug, Default)]
pub struct IngestStats {
    messages: AtomicU64,
    accepted: AtomicU64,
    rebirth_requests: AtomicU64,
    dropped: AtomicU64,
    decode_failures: AtomicU64,
    rows_written: AtomicU64,
    metric_failures: AtomicU64,
    relations_ensured: AtomicU64,
    rebirth_delivery_failures: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Messages evaluated by the session gate.
    pub messages: u64,
    pub accepted: u64,
    pub rebirth_requests: u64,
    /// Messages dropped by the session gate.
    pub dropped: u64,
    /// Deliveries that failed to decode.
    pub decode_failures: u64,
    pub rows_written: u64,
    pub metric_failures: u64,
    pub relations_ensured: u64,
    pub rebirth_delivery_failures: u64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rebirth_requests: self.rebirth_requests.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            metric_failures: self.metric_failures.load(Ordering::Relaxed),
            relations_ensured: self.relations_ensured.load(Ordering::Relaxed),
            rebirth_delivery_failures: self.rebirth_delivery_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rebirth_request(&self) {
        self.rebirth_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rows_written(&self, n: usize) {
        self.rows_written.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_metric_failures(&self, n: usize) {
        self.metric_failures.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_relations_ensured(&self, n: usize) {
        self.relations_ensured.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_rebirth_delivery_failure(&self) {
        self.rebirth_delivery_failures.fetch_add(1, Ordering::Relaxed);
    }
}
