//! Core protocol types.
//!
//! - [`NodeIdentity`]: Who published a message
//! - [`MessageKind`]: BIRTH / DATA / DEATH classification
//! - [`DataType`]: Declared metric type tags
//! - [`MetricValue`]: Tagged union over the value shapes a metric can carry
//! - [`Metric`] / [`Message`] / [`Delivery`]: Decoded, immutable message content

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::protocol::DecodeError;

// =============================================================================
// Identity
// =============================================================================

/// Publishing entity at node or device granularity.
///
/// Immutable once parsed; fields are only readable through accessors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeIdentity {
    group_id: String,
    edge_node_id: String,
    device_id: Option<String>,
}

impl NodeIdentity {
    /// Identity of an edge node.
    pub fn node(group_id: impl Into<String>, edge_node_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            edge_node_id: edge_node_id.into(),
            device_id: None,
        }
    }

    /// Identity of a device attached to an edge node.
    pub fn device(
        group_id: impl Into<String>,
        edge_node_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            edge_node_id: edge_node_id.into(),
            device_id: Some(device_id.into()),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn edge_node_id(&self) -> &str {
        &self.edge_node_id
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Group and edge node ids are non-empty, and so is the device id when present.
    pub fn is_well_formed(&self) -> bool {
        !self.group_id.is_empty()
            && !self.edge_node_id.is_empty()
            && self.device_id.as_ref().is_none_or(|d| !d.is_empty())
    }

    /// Value stored in the node tag column: `<group>/<edge>`.
    pub fn node_tag(&self) -> String {
        format!("{}/{}", self.group_id, self.edge_node_id)
    }

    /// Value stored in the device tag column.
    pub fn device_tag(&self) -> Option<&str> {
        self.device_id()
    }

    /// The owning edge node (drops the device component).
    pub fn edge_node(&self) -> NodeIdentity {
        Self::node(self.group_id.clone(), self.edge_node_id.clone())
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group_id, self.edge_node_id)?;
        if let Some(device) = &self.device_id {
            write!(f, "/{device}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Enumerations
// =============================================================================

/// Message family.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum MessageKind {
    /// Establishes or resets a session and declares the full metric set.
    Birth,
    /// Incremental metric updates, valid only within a session.
    Data,
    /// Ends a session.
    Death,
}

/// Declared metric data type.
///
/// Names match the protocol's type names; parsing is case-insensitive so
/// both `Float` and `FLOAT` are accepted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float,
    Double,
    Boolean,
    String,
    Text,
    /// Milliseconds since the Unix epoch.
    DateTime,
}

impl DataType {
    /// Inclusive integer range representable by this type, if it is integer-valued.
    ///
    /// `UInt64` is capped at `i64::MAX`: values are stored in a signed 64-bit column.
    pub fn integer_range(self) -> Option<(i64, i64)> {
        match self {
            Self::Int8 => Some((i64::from(i8::MIN), i64::from(i8::MAX))),
            Self::Int16 => Some((i64::from(i16::MIN), i64::from(i16::MAX))),
            Self::Int32 => Some((i64::from(i32::MIN), i64::from(i32::MAX))),
            Self::Int64 | Self::DateTime => Some((i64::MIN, i64::MAX)),
            Self::UInt8 => Some((0, i64::from(u8::MAX))),
            Self::UInt16 => Some((0, i64::from(u16::MAX))),
            Self::UInt32 => Some((0, i64::from(u32::MAX))),
            Self::UInt64 => Some((0, i64::MAX)),
            Self::Float | Self::Double | Self::Boolean | Self::String | Self::Text => None,
        }
    }

    /// Whether `value`'s runtime shape is consistent with this type.
    pub fn accepts(self, value: &MetricValue) -> bool {
        match (self, value) {
            (Self::Boolean, MetricValue::Bool(_)) => true,
            (Self::Float | Self::Double, MetricValue::Float(_)) => true,
            (Self::String | Self::Text, MetricValue::Text(_)) => true,
            (_, MetricValue::Int(v)) => self
                .integer_range()
                .is_some_and(|(min, max)| (min..=max).contains(v)),
            _ => false,
        }
    }
}

// =============================================================================
// Values
// =============================================================================

/// Metric value, fixed at decode time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetricValue {
    /// Short shape name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "string",
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

// =============================================================================
// Messages
// =============================================================================

/// A named metric carried by a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Raw metric name, possibly namespaced (e.g. `"Inputs/Indoor_temperature"`).
    pub name: String,
    /// Declared type; `None` when the publisher left it out.
    pub data_type: Option<DataType>,
    pub value: MetricValue,
    /// Sample time; `None` means the enclosing message's timestamp.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Metric {
    /// Create a metric with a declared type.
    ///
    /// # Errors
    /// Returns `DecodeError::TypeMismatch` or `DecodeError::OutOfRange` when
    /// the value does not fit `data_type`.
    pub fn typed(
        name: impl Into<String>,
        data_type: DataType,
        value: impl Into<MetricValue>,
    ) -> Result<Self, DecodeError> {
        let name = name.into();
        let value = value.into();
        if !data_type.accepts(&value) {
            return Err(match value {
                MetricValue::Int(v) if data_type.integer_range().is_some() => {
                    DecodeError::OutOfRange {
                        metric: name,
                        data_type,
                        value: v.to_string(),
                    }
                }
                other => DecodeError::TypeMismatch {
                    metric: name,
                    data_type,
                    found: other.kind_name(),
                },
            });
        }
        Ok(Self {
            name,
            data_type: Some(data_type),
            value,
            timestamp: None,
        })
    }

    /// Create a metric without a declared type.
    pub fn inferred(name: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            value: value.into(),
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }
}

/// One decoded protocol message. Immutable once produced by the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    /// 8-bit wrapping sequence number.
    pub seq: u8,
    pub timestamp: DateTime<Utc>,
    /// Metrics in publication order.
    pub metrics: Vec<Metric>,
}

impl Message {
    pub fn new(kind: MessageKind, seq: u8, timestamp: DateTime<Utc>, metrics: Vec<Metric>) -> Self {
        Self {
            kind,
            seq,
            timestamp,
            metrics,
        }
    }

    pub fn birth(seq: u8, timestamp: DateTime<Utc>, metrics: Vec<Metric>) -> Self {
        Self::new(MessageKind::Birth, seq, timestamp, metrics)
    }

    pub fn data(seq: u8, timestamp: DateTime<Utc>, metrics: Vec<Metric>) -> Self {
        Self::new(MessageKind::Data, seq, timestamp, metrics)
    }

    pub fn death(seq: u8, timestamp: DateTime<Utc>) -> Self {
        Self::new(MessageKind::Death, seq, timestamp, Vec::new())
    }

    /// Sample time of `metric`, falling back to the message timestamp.
    pub fn metric_time(&self, metric: &Metric) -> DateTime<Utc> {
        metric.timestamp.unwrap_or(self.timestamp)
    }
}

/// A decoded message together with the identity its topic names.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub identity: NodeIdentity,
    pub message: Message,
}
