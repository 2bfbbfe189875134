//! Protocol state machine.

use std::fmt;
use std::sync::Arc;

use crate::protocol::{Message, MessageKind, NodeIdentity};
use crate::session::{SessionLane, SessionState, SessionTable};

/// Why a rebirth is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebirthReason {
    /// DATA arrived while the session was Unborn.
    NoPriorBirth,
    /// DATA sequence number did not follow the last accepted one.
    SequenceGap { expected: u8, got: u8 },
}

impl fmt::Display for RebirthReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPriorBirth => f.write_str("no-prior-birth"),
            Self::SequenceGap { expected, got } => {
                write!(f, "sequence-gap: expected={expected} got={got}")
            }
        }
    }
}

/// Why a message is dropped without touching session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Group or edge node id is empty.
    MalformedIdentity,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedIdentity => f.write_str("malformed-identity"),
        }
    }
}

/// Outcome of evaluating one message. Final once computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    RequestRebirth(RebirthReason),
    Drop(DropReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => f.write_str("accept"),
            Self::RequestRebirth(reason) => write!(f, "request-rebirth({reason})"),
            Self::Drop(reason) => write!(f, "drop({reason})"),
        }
    }
}

/// Evaluates messages against per-identity session state.
///
/// The only component that mutates the [`SessionTable`].
#[derive(Debug, Clone)]
pub struct SessionManager {
    table: Arc<SessionTable>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(Arc::new(SessionTable::new()))
    }
}

impl SessionManager {
    pub fn new(table: Arc<SessionTable>) -> Self {
        Self { table }
    }

    /// Take the exclusive lane for `identity`.
    ///
    /// Callers that act on the verdict (writes, rebirth requests) keep the lane
    /// until they are done so the next message for the same identity waits.
    pub async fn lane(&self, identity: &NodeIdentity) -> SessionLane {
        self.table.acquire(identity).await
    }

    /// Evaluate one message for `identity`.
    pub async fn evaluate(&self, identity: &NodeIdentity, message: &Message) -> Verdict {
        let mut lane = self.lane(identity).await;
        self.evaluate_in(&mut lane, message)
    }

    /// Evaluate one message inside an already held lane.
    pub fn evaluate_in(&self, lane: &mut SessionLane, message: &Message) -> Verdict {
        let (identity, slot) = lane.parts_mut();

        if !identity.is_well_formed() {
            tracing::warn!(node = %identity, kind = %message.kind, "Dropping message with malformed identity");
            return Verdict::Drop(DropReason::MalformedIdentity);
        }

        let state = slot.get_or_insert_with(|| SessionState::unborn(message.timestamp));
        state.observe(message.timestamp);

        match message.kind {
            MessageKind::Birth => {
                state.born_alive = true;
                state.last_seq = Some(message.seq);
                tracing::info!(node = %identity, seq = message.seq, metrics = message.metrics.len(), "BIRTH accepted");
                Verdict::Accept
            }
            MessageKind::Data => match (state.born_alive, state.last_seq) {
                (true, Some(last)) => {
                    let expected = last.wrapping_add(1);
                    if message.seq == expected {
                        state.last_seq = Some(message.seq);
                        tracing::debug!(node = %identity, seq = message.seq, "DATA accepted");
                        Verdict::Accept
                    } else {
                        state.born_alive = false;
                        tracing::warn!(node = %identity, expected, got = message.seq, "Sequence gap, session reset");
                        Verdict::RequestRebirth(RebirthReason::SequenceGap {
                            expected,
                            got: message.seq,
                        })
                    }
                }
                _ => {
                    tracing::warn!(node = %identity, seq = message.seq, "DATA without prior BIRTH");
                    Verdict::RequestRebirth(RebirthReason::NoPriorBirth)
                }
            },
            MessageKind::Death => {
                state.born_alive = false;
                tracing::debug!(node = %identity, last_seq = ?state.last_seq, "DEATH recorded");
                Verdict::Accept
            }
        }
    }

    /// Copy of the session state for `identity`, if it was ever evaluated.
    pub async fn snapshot(&self, identity: &NodeIdentity) -> Option<SessionState> {
        self.table.peek(identity).await
    }

    /// Copies of all evaluated sessions, sorted by identity.
    pub async fn sessions(&self) -> Vec<(NodeIdentity, SessionState)> {
        self.table.entries().await
    }
}
