//! Protocol Layer
//!
//! Data model and wire handling for the Sparkplug-style telemetry protocol:
//!
//! - [`NodeIdentity`]: Group / edge node / optional device triple, parsed from topics
//! - [`Message`]: One decoded BIRTH, DATA or DEATH payload with its sequence number
//! - [`Metric`] / [`MetricValue`]: Named, optionally typed values carried by a message
//! - [`JsonCodec`]: Turns `(topic, payload)` deliveries into [`Delivery`] values and back
//!
//! Topics follow `spBv1.0/<group>/<TYPE>/<edge>[/<device>]`. Only the
//! BIRTH, DATA and DEATH families are ingestible; command and host state
//! topics are recognised and rejected with [`DecodeError::NotIngestible`].

mod codec;
mod error;
pub mod topic;
mod types;

pub use codec::{Encoded, JsonCodec, REBIRTH_METRIC};
pub use error::DecodeError;
pub use types::{DataType, Delivery, Message, MessageKind, Metric, MetricValue, NodeIdentity};
