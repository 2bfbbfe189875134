//! Session table with per-identity locking.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::protocol::NodeIdentity;

type Slot = Arc<Mutex<Option<SessionState>>>;

/// Session state of one identity.
///
/// `last_seq` is meaningful while `born_alive` is true; after a DEATH or a
/// detected gap it is retained for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub born_alive: bool,
    pub last_seq: Option<u8>,
    /// Latest transport-supplied timestamp seen. Not guaranteed monotonic upstream.
    pub last_seen_at: DateTime<Utc>,
}

impl SessionState {
    pub(super) fn unborn(seen_at: DateTime<Utc>) -> Self {
        Self {
            born_alive: false,
            last_seq: None,
            last_seen_at: seen_at,
        }
    }

    pub(super) fn observe(&mut self, ts: DateTime<Utc>) {
        if ts > self.last_seen_at {
            self.last_seen_at = ts;
        }
    }
}

/// Process-wide map from identity to session state.
///
/// The outer map only ever grows; each identity's state sits behind its own
/// async mutex so two messages for the same identity are never evaluated
/// concurrently while different identities proceed in parallel.
#[derive(Default)]
pub struct SessionTable {
    slots: RwLock<HashMap<NodeIdentity, Slot>>,
}

impl std::fmt::Debug for SessionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTable")
            .field("identities", &self.len())
            .finish_non_exhaustive()
    }
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities that have been seen.
    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the exclusive lane for `identity`, waiting for any in-flight message.
    pub(crate) async fn acquire(&self, identity: &NodeIdentity) -> SessionLane {
        let slot = self.slot(identity);
        SessionLane {
            identity: identity.clone(),
            guard: slot.lock_owned().await,
        }
    }

    /// Copy of the current state, `None` if the identity was never evaluated.
    pub(crate) async fn peek(&self, identity: &NodeIdentity) -> Option<SessionState> {
        let slot = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()?;
        slot.lock().await.clone()
    }

    /// Copies of all evaluated sessions, sorted by identity.
    pub(crate) async fn entries(&self) -> Vec<(NodeIdentity, SessionState)> {
        let slots: Vec<(NodeIdentity, Slot)> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut out = Vec::with_capacity(slots.len());
        for (identity, slot) in slots {
            if let Some(state) = slot.lock().await.clone() {
                out.push((identity, state));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    fn slot(&self, identity: &NodeIdentity) -> Slot {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
        {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(identity.clone()).or_default())
    }
}

/// Exclusive hold on one identity's session.
///
/// Held by the ingestor for the whole processing of a message, so per-node
/// messages are handled strictly one after another in arrival order.
pub struct SessionLane {
    identity: NodeIdentity,
    guard: OwnedMutexGuard<Option<SessionState>>,
}

impl std::fmt::Debug for SessionLane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLane")
            .field("identity", &self.identity)
            .field("state", &*self.guard)
            .finish()
    }
}

impl SessionLane {
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Current state, `None` before the first evaluation.
    pub fn state(&self) -> Option<&SessionState> {
        self.guard.as_ref()
    }

    pub(super) fn parts_mut(&mut self) -> (&NodeIdentity, &mut Option<SessionState>) {
        (&self.identity, &mut self.guard)
    }
}
