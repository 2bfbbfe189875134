//! Session Layer
//!
//! Per-node protocol state machine enforcing birth-before-data ordering and
//! sequence-number continuity:
//!
//! - [`SessionTable`]: Process-wide map from identity to session state, one lock per identity
//! - [`SessionLane`]: Exclusive hold on one identity's session for the duration of a message
//! - [`SessionManager`]: Evaluates messages and returns a [`Verdict`]
//!
//! ```text
//!            BIRTH                       DATA (seq == last + 1)
//!   Unborn ---------> Alive <--------------------------------+
//!     ^                 |  \_________________________________/
//!     |  DATA (gap)     |
//!     +-----------------+
//!     |  DEATH          |
//!     +-----------------+
//! ```
//!
//! Session state is volatile: a restart resets every node to Unborn, forcing a
//! fresh BIRTH before any DATA is accepted again.

mod manager;
mod table;

pub use manager::{DropReason, RebirthReason, SessionManager, Verdict};
pub use table::{SessionLane, SessionState, SessionTable};
