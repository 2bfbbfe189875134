//! Decode error types.
//!
//! A [`DecodeError`] always drops the whole delivery: no part of a message
//! that failed to decode is ever acted upon.

use thiserror::Error;

use crate::protocol::DataType;

/// Errors raised while turning a transport delivery into a [`crate::protocol::Delivery`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// Topic does not follow `spBv1.0/<group>/<TYPE>/<edge>[/<device>]`.
    #[error("malformed topic '{topic}': {reason}")]
    MalformedTopic { topic: String, reason: String },

    /// Well-formed topic whose message type carries no telemetry (commands, host state).
    #[error("message type '{0}' is not ingestible")]
    NotIngestible(String),

    /// Payload is not valid JSON or does not have the expected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Required payload field is absent.
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    /// Sequence number does not fit the 8-bit counter.
    #[error("sequence number {0} is outside 0..=255")]
    SequenceOutOfRange(u64),

    /// Timestamp cannot be represented as a UTC instant.
    #[error("invalid timestamp {0}")]
    InvalidTimestamp(u64),

    /// Declared data type name is unknown.
    #[error("metric '{metric}': unknown data type '{name}'")]
    UnknownDataType { metric: String, name: String },

    /// Value shape disagrees with the declared data type.
    #[error("metric '{metric}' declared as {data_type} but carries a {found} value")]
    TypeMismatch {
        metric: String,
        data_type: DataType,
        found: &'static str,
    },

    /// Integer value does not fit the declared width.
    #[error("metric '{metric}': value {value} does not fit {data_type}")]
    OutOfRange {
        metric: String,
        data_type: DataType,
        value: String,
    },

    /// Value shape has no metric representation (null, array, object).
    #[error("metric '{metric}': unsupported value {value}")]
    UnsupportedValue { metric: String, value: String },
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}
