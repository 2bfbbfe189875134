//! Rebirth side channel.
//!
//! The ingestor raises a [`RebirthRequest`] whenever the session gate asks
//! for a fresh BIRTH. Delivery to the transport is best effort: a failed
//! delivery is logged and counted by the caller, never retried.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::NodeIdentity;
use crate::session::RebirthReason;

/// An encoded node command asking an edge node to publish a new BIRTH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebirthRequest {
    /// Session that triggered the request.
    pub identity: NodeIdentity,
    pub reason: RebirthReason,
    /// Command topic of the owning edge node.
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Rebirth delivery failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RebirthError {
    #[error("rebirth sink closed")]
    Closed,

    #[error("rebirth sink full")]
    Full,

    #[error("failed to encode rebirth command: {0}")]
    Encode(String),
}

/// Destination for rebirth requests.
#[async_trait]
pub trait RebirthSink: Send + Sync {
    async fn request_rebirth(&self, request: RebirthRequest) -> Result<(), RebirthError>;
}

/// Sink that only logs requests. Used when no transport is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingRebirthSink;

#[async_trait]
impl RebirthSink for LoggingRebirthSink {
    async fn request_rebirth(&self, request: RebirthRequest) -> Result<(), RebirthError> {
        tracing::info!(
            node = %request.identity,
            reason = %request.reason,
            topic = %request.topic,
            bytes = request.payload.len(),
            "Rebirth command (no transport attached)"
        );
        Ok(())
    }
}

/// Sink handing requests to a bounded channel without waiting.
#[derive(Debug, Clone)]
pub struct ChannelRebirthSink {
    tx: mpsc::Sender<RebirthRequest>,
}

impl ChannelRebirthSink {
    /// Create a sink and the receiver a transport task drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RebirthRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl RebirthSink for ChannelRebirthSink {
    async fn request_rebirth(&self, request: RebirthRequest) -> Result<(), RebirthError> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RebirthError::Full,
            mpsc::error::TrySendError::Closed(_) => RebirthError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(edge: &str) -> RebirthRequest {
        RebirthRequest {
            identity: NodeIdentity::node("factory", edge),
            reason: RebirthReason::NoPriorBirth,
            topic: format!("spBv1.0/factory/NCMD/{edge}"),
            payload: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_and_reports_full() {
        let (sink, mut rx) = ChannelRebirthSink::new(1);

        sink.request_rebirth(request("e1")).await.unwrap();
        assert_eq!(sink.request_rebirth(request("e2")).await, Err(RebirthError::Full));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, "spBv1.0/factory/NCMD/e1");
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed() {
        let (sink, rx) = ChannelRebirthSink::new(4);
        drop(rx);
        assert_eq!(sink.request_rebirth(request("e1")).await, Err(RebirthError::Closed));
    }

    #[tokio::test]
    async fn test_logging_sink_accepts() {
        assert!(LoggingRebirthSink.request_rebirth(request("e1")).await.is_ok());
    }
}
