//! JSON payload codec.
//!
//! Payload shape:
//!
//! ```json
//! {
//!   "timestamp": 1700000000000,
//!   "seq": 4,
//!   "metrics": [
//!     { "name": "Inputs/Temperature", "timestamp": 1700000000000, "dataType": "Float", "value": 25.5 }
//!   ]
//! }
//! ```
//!
//! Timestamps are milliseconds since the Unix epoch. `seq` may be omitted
//! only on DEATH payloads; `dataType` and per-metric `timestamp` are optional.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::topic::{command_topic, parse_topic, publish_topic};
use crate::protocol::{
    DataType, DecodeError, Delivery, Message, MessageKind, Metric, MetricValue, NodeIdentity,
};

/// Metric written into a node command to request a fresh BIRTH.
pub const REBIRTH_METRIC: &str = "Node Control/Rebirth";

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct WirePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seq: Option<u64>,
    #[serde(default)]
    metrics: Vec<WireMetric>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMetric {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
    #[serde(
        rename = "dataType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    data_type: Option<String>,
    #[serde(default)]
    value: Value,
}

/// An encoded message ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub topic: String,
    pub payload: Vec<u8>,
}

// =============================================================================
// Codec
// =============================================================================

/// Stateless JSON codec for protocol payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }

    /// Decode one transport delivery.
    ///
    /// # Errors
    /// Any topic, payload or metric error fails the whole delivery.
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<Delivery, DecodeError> {
        let (identity, kind) = parse_topic(topic)?;
        let wire: WirePayload = serde_json::from_slice(payload)?;
        Self::decode_wire(identity, kind, wire)
    }

    /// Decode a delivery whose payload has already been parsed as JSON.
    pub fn decode_json(&self, topic: &str, payload: Value) -> Result<Delivery, DecodeError> {
        let (identity, kind) = parse_topic(topic)?;
        let wire: WirePayload = serde_json::from_value(payload)?;
        Self::decode_wire(identity, kind, wire)
    }

    /// Encode a message for `identity` on its publish topic.
    pub fn encode(
        &self,
        identity: &NodeIdentity,
        message: &Message,
    ) -> Result<Encoded, serde_json::Error> {
        let wire = WirePayload {
            timestamp: Some(to_millis(message.timestamp)),
            seq: Some(u64::from(message.seq)),
            metrics: message
                .metrics
                .iter()
                .map(|m| WireMetric {
                    name: m.name.clone(),
                    timestamp: m.timestamp.map(to_millis),
                    data_type: m.data_type.map(|dt| dt.to_string()),
                    value: value_to_json(&m.value),
                })
                .collect(),
        };

        Ok(Encoded {
            topic: publish_topic(identity, message.kind),
            payload: serde_json::to_vec(&wire)?,
        })
    }

    /// Encode a node command asking the edge node owning `identity` to re-birth.
    pub fn encode_rebirth(
        &self,
        identity: &NodeIdentity,
        at: DateTime<Utc>,
    ) -> Result<Encoded, serde_json::Error> {
        let wire = WirePayload {
            timestamp: Some(to_millis(at)),
            seq: None,
            metrics: vec![WireMetric {
                name: REBIRTH_METRIC.to_string(),
                timestamp: Some(to_millis(at)),
                data_type: Some(DataType::Boolean.to_string()),
                value: Value::Bool(true),
            }],
        };

        Ok(Encoded {
            topic: command_topic(identity),
            payload: serde_json::to_vec(&wire)?,
        })
    }

    fn decode_wire(
        identity: NodeIdentity,
        kind: MessageKind,
        wire: WirePayload,
    ) -> Result<Delivery, DecodeError> {
        let timestamp = from_millis(wire.timestamp.ok_or(DecodeError::MissingField("timestamp"))?)?;

        let seq = match (wire.seq, kind) {
            (Some(seq), _) => u8::try_from(seq).map_err(|_| DecodeError::SequenceOutOfRange(seq))?,
            (None, MessageKind::Death) => 0,
            (None, _) => return Err(DecodeError::MissingField("seq")),
        };

        let metrics = wire
            .metrics
            .into_iter()
            .map(decode_metric)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Delivery {
            identity,
            message: Message::new(kind, seq, timestamp, metrics),
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn decode_metric(wire: WireMetric) -> Result<Metric, DecodeError> {
    let timestamp = wire.timestamp.map(from_millis).transpose()?;

    let metric = match wire.data_type {
        Some(type_name) => {
            let data_type =
                DataType::from_str(&type_name).map_err(|_| DecodeError::UnknownDataType {
                    metric: wire.name.clone(),
                    name: type_name,
                })?;
            let value = typed_value(&wire.name, data_type, &wire.value)?;
            Metric::typed(wire.name, data_type, value)?
        }
        None => {
            let value = inferred_value(&wire.name, &wire.value)?;
            Metric::inferred(wire.name, value)
        }
    };

    Ok(match timestamp {
        Some(ts) => metric.with_timestamp(ts),
        None => metric,
    })
}

/// Convert a JSON value according to its declared type.
fn typed_value(metric: &str, data_type: DataType, json: &Value) -> Result<MetricValue, DecodeError> {
    let mismatch = || DecodeError::TypeMismatch {
        metric: metric.to_string(),
        data_type,
        found: json_kind(json),
    };

    match data_type {
        DataType::Boolean => json.as_bool().map(MetricValue::Bool).ok_or_else(mismatch),
        DataType::Float | DataType::Double => {
            json.as_f64().map(MetricValue::Float).ok_or_else(mismatch)
        }
        DataType::String | DataType::Text => json
            .as_str()
            .map(|s| MetricValue::Text(s.to_string()))
            .ok_or_else(mismatch),
        _ => match (json.as_i64(), json.as_u64()) {
            (Some(v), _) => Ok(MetricValue::Int(v)),
            (None, Some(v)) => Err(DecodeError::OutOfRange {
                metric: metric.to_string(),
                data_type,
                value: v.to_string(),
            }),
            (None, None) => Err(mismatch()),
        },
    }
}

/// Infer a value from its JSON shape: boolean, integer, float, else text.
fn inferred_value(metric: &str, json: &Value) -> Result<MetricValue, DecodeError> {
    match json {
        Value::Bool(b) => Ok(MetricValue::Bool(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(MetricValue::Int)
            .or_else(|| n.is_f64().then(|| n.as_f64().map(MetricValue::Float)).flatten())
            .ok_or_else(|| DecodeError::UnsupportedValue {
                metric: metric.to_string(),
                value: n.to_string(),
            }),
        Value::String(s) => Ok(MetricValue::Text(s.clone())),
        other => Err(DecodeError::UnsupportedValue {
            metric: metric.to_string(),
            value: other.to_string(),
        }),
    }
}

fn value_to_json(value: &MetricValue) -> Value {
    match value {
        MetricValue::Bool(b) => Value::Bool(*b),
        MetricValue::Int(i) => Value::from(*i),
        MetricValue::Float(f) => Value::from(*f),
        MetricValue::Text(s) => Value::String(s.clone()),
    }
}

fn json_kind(json: &Value) -> &'static str {
    match json {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn from_millis(ms: u64) -> Result<DateTime<Utc>, DecodeError> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or(DecodeError::InvalidTimestamp(ms))
}

fn to_millis(ts: DateTime<Utc>) -> u64 {
    u64::try_from(ts.timestamp_millis()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(topic: &str, payload: Value) -> Result<Delivery, DecodeError> {
        JsonCodec::new().decode(topic, payload.to_string().as_bytes())
    }

    #[test]
    fn test_decode_node_birth() {
        let delivery = decode(
            "spBv1.0/UCL-SEE-A/NBIRTH/TLab",
            json!({
                "timestamp": 1_700_000_000_000_u64,
                "seq": 0,
                "metrics": [
                    { "name": "bdSeq", "dataType": "UInt64", "value": 1 },
                    { "name": "Node Control/Rebirth", "dataType": "Boolean", "value": false },
                    { "name": "Properties/Hardware", "dataType": "String", "value": "ESP32-POE" },
                    { "name": "Inputs/Temperature", "dataType": "Float", "value": 25.5 },
                    { "name": "Inputs/Status", "dataType": "UInt64", "value": 0 }
                ]
            }),
        )
        .unwrap();

        assert_eq!(delivery.identity, NodeIdentity::node("UCL-SEE-A", "TLab"));
        assert_eq!(delivery.message.kind, MessageKind::Birth);
        assert_eq!(delivery.message.seq, 0);
        assert_eq!(delivery.message.metrics.len(), 5);
        assert_eq!(delivery.message.metrics[3].value, MetricValue::Float(25.5));
        assert_eq!(delivery.message.metrics[4].value, MetricValue::Int(0));
        assert_eq!(
            delivery.message.metrics[2].value,
            MetricValue::Text("ESP32-POE".to_string())
        );
    }

    #[test]
    fn test_decode_float_accepts_integer_json() {
        let delivery = decode(
            "spBv1.0/f/NDATA/e",
            json!({ "timestamp": 1, "seq": 1, "metrics": [
                { "name": "Inputs/CO2_levels", "dataType": "Float", "value": 500 }
            ]}),
        )
        .unwrap();
        assert_eq!(delivery.message.metrics[0].value, MetricValue::Float(500.0));
    }

    #[test]
    fn test_decode_infers_untyped_values() {
        let delivery = decode(
            "spBv1.0/f/DDATA/e/d",
            json!({ "timestamp": 1, "seq": 7, "metrics": [
                { "name": "a", "value": true },
                { "name": "b", "value": 3 },
                { "name": "c", "value": 3.25 },
                { "name": "d", "value": "ok" }
            ]}),
        )
        .unwrap();
        let values: Vec<_> = delivery.message.metrics.iter().map(|m| m.value.clone()).collect();
        assert_eq!(
            values,
            vec![
                MetricValue::Bool(true),
                MetricValue::Int(3),
                MetricValue::Float(3.25),
                MetricValue::Text("ok".to_string())
            ]
        );
        assert!(delivery.message.metrics.iter().all(|m| m.data_type.is_none()));
    }

    #[test]
    fn test_decode_type_mismatch_drops_message() {
        let err = decode(
            "spBv1.0/f/NDATA/e",
            json!({ "timestamp": 1, "seq": 1, "metrics": [
                { "name": "ok", "dataType": "Float", "value": 1.0 },
                { "name": "bad", "dataType": "Boolean", "value": "yes" }
            ]}),
        )
        .unwrap_err();
        assert_eq!(
            err,
            DecodeError::TypeMismatch {
                metric: "bad".to_string(),
                data_type: DataType::Boolean,
                found: "string",
            }
        );
    }

    #[test]
    fn test_decode_integer_width_checked() {
        let err = decode(
            "spBv1.0/f/NDATA/e",
            json!({ "timestamp": 1, "seq": 1, "metrics": [
                { "name": "x", "dataType": "Int8", "value": 200 }
            ]}),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::OutOfRange { .. }));

        let err = decode(
            "spBv1.0/f/NDATA/e",
            json!({ "timestamp": 1, "seq": 1, "metrics": [
                { "name": "x", "dataType": "UInt64", "value": u64::MAX }
            ]}),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::OutOfRange { .. }));
    }

    #[test]
    fn test_decode_sequence_rules() {
        let err = decode("spBv1.0/f/NDATA/e", json!({ "timestamp": 1, "seq": 256 })).unwrap_err();
        assert_eq!(err, DecodeError::SequenceOutOfRange(256));

        let err = decode("spBv1.0/f/NDATA/e", json!({ "timestamp": 1 })).unwrap_err();
        assert_eq!(err, DecodeError::MissingField("seq"));

        let death = decode("spBv1.0/f/NDEATH/e", json!({ "timestamp": 1 })).unwrap();
        assert_eq!(death.message.kind, MessageKind::Death);
        assert!(death.message.metrics.is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode("spBv1.0/f/NDATA/e", b"not json"),
            Err(DecodeError::InvalidPayload(_))
        ));
        assert_eq!(
            decode("spBv1.0/f/NDATA/e", json!({ "seq": 1 })).unwrap_err(),
            DecodeError::MissingField("timestamp")
        );
        assert!(matches!(
            decode(
                "spBv1.0/f/NDATA/e",
                json!({ "timestamp": 1, "seq": 1, "metrics": [{ "name": "x", "value": [1, 2] }] })
            ),
            Err(DecodeError::UnsupportedValue { .. })
        ));
        assert!(matches!(
            decode(
                "spBv1.0/f/NDATA/e",
                json!({ "timestamp": 1, "seq": 1, "metrics": [{ "name": "x", "dataType": "Decimal", "value": 1 }] })
            ),
            Err(DecodeError::UnknownDataType { .. })
        ));
    }

    #[test]
    fn test_encode_then_decode_preserves_message() {
        let codec = JsonCodec::new();
        let identity = NodeIdentity::device("factory", "edge1", "tempSensor01");
        let ts = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let message = Message::data(
            42,
            ts,
            vec![
                Metric::typed("temperatur", DataType::Int32, 25_i64).unwrap(),
                Metric::typed("humidity", DataType::Float, 65.5).unwrap(),
            ],
        );

        let encoded = codec.encode(&identity, &message).unwrap();
        assert_eq!(encoded.topic, "spBv1.0/factory/DDATA/edge1/tempSensor01");

        let delivery = codec.decode(&encoded.topic, &encoded.payload).unwrap();
        assert_eq!(delivery.identity, identity);
        assert_eq!(delivery.message, message);
    }

    #[test]
    fn test_encode_rebirth_command() {
        let codec = JsonCodec::new();
        let identity = NodeIdentity::device("factory", "edge1", "tempSensor01");
        let at = DateTime::from_timestamp_millis(5_000).unwrap();
        let encoded = codec.encode_rebirth(&identity, at).unwrap();

        assert_eq!(encoded.topic, "spBv1.0/factory/NCMD/edge1");
        let payload: Value = serde_json::from_slice(&encoded.payload).unwrap();
        assert_eq!(payload["metrics"][0]["name"], REBIRTH_METRIC);
        assert_eq!(payload["metrics"][0]["value"], true);
        assert_eq!(payload["timestamp"], 5_000);
    }
}
