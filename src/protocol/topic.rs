//! Topic parsing and formatting.
//!
//! Ingestible topics have the shape `spBv1.0/<group>/<TYPE>/<edge>[/<device>]`
//! where node-level types (`N*`) carry no device segment and device-level
//! types (`D*`) require one.

use std::str::FromStr;

use strum_macros::{AsRefStr, Display, EnumString};

use crate::protocol::{DecodeError, MessageKind, NodeIdentity};

/// Topic namespace prefix.
pub const NAMESPACE: &str = "spBv1.0";

/// Host application state topics live under this segment instead of a group id.
const STATE_SEGMENT: &str = "STATE";

/// Message type segment of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum TopicType {
    NBirth,
    NData,
    NDeath,
    NCmd,
    DBirth,
    DData,
    DDeath,
    DCmd,
}

impl TopicType {
    /// Device-level types require a device segment.
    pub fn is_device(self) -> bool {
        matches!(self, Self::DBirth | Self::DData | Self::DDeath | Self::DCmd)
    }

    /// Message family, or `None` for command types.
    pub fn message_kind(self) -> Option<MessageKind> {
        match self {
            Self::NBirth | Self::DBirth => Some(MessageKind::Birth),
            Self::NData | Self::DData => Some(MessageKind::Data),
            Self::NDeath | Self::DDeath => Some(MessageKind::Death),
            Self::NCmd | Self::DCmd => None,
        }
    }

    /// Topic type publishing `kind` for an identity at the given granularity.
    pub fn for_kind(kind: MessageKind, device: bool) -> Self {
        match (kind, device) {
            (MessageKind::Birth, false) => Self::NBirth,
            (MessageKind::Data, false) => Self::NData,
            (MessageKind::Death, false) => Self::NDeath,
            (MessageKind::Birth, true) => Self::DBirth,
            (MessageKind::Data, true) => Self::DData,
            (MessageKind::Death, true) => Self::DDeath,
        }
    }
}

/// Parse an ingestible topic into the publishing identity and message family.
///
/// # Errors
/// - `DecodeError::MalformedTopic` for a wrong namespace, segment count,
///   unknown type or empty segment
/// - `DecodeError::NotIngestible` for command and host state topics
pub fn parse_topic(topic: &str) -> Result<(NodeIdentity, MessageKind), DecodeError> {
    let malformed = |reason: &str| DecodeError::MalformedTopic {
        topic: topic.to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = topic.split('/').collect();
    if parts.first() != Some(&NAMESPACE) {
        return Err(malformed("unexpected namespace"));
    }
    if parts.get(1) == Some(&STATE_SEGMENT) {
        return Err(DecodeError::NotIngestible(STATE_SEGMENT.to_string()));
    }
    if !(4..=5).contains(&parts.len()) {
        return Err(malformed("expected 4 or 5 segments"));
    }
    if parts.iter().any(|p| p.is_empty()) {
        return Err(malformed("empty segment"));
    }

    let topic_type = TopicType::from_str(parts[2]).map_err(|_| malformed("unknown message type"))?;
    let kind = topic_type
        .message_kind()
        .ok_or_else(|| DecodeError::NotIngestible(topic_type.to_string()))?;

    let identity = match (topic_type.is_device(), parts.get(4)) {
        (false, None) => NodeIdentity::node(parts[1], parts[3]),
        (true, Some(device)) => NodeIdentity::device(parts[1], parts[3], *device),
        (false, Some(_)) => return Err(malformed("node message with device segment")),
        (true, None) => return Err(malformed("device message without device segment")),
    };

    Ok((identity, kind))
}

/// Topic on which `identity` publishes messages of `kind`.
pub fn publish_topic(identity: &NodeIdentity, kind: MessageKind) -> String {
    let topic_type = TopicType::for_kind(kind, identity.device_id().is_some());
    match identity.device_id() {
        Some(device) => format!(
            "{NAMESPACE}/{}/{topic_type}/{}/{device}",
            identity.group_id(),
            identity.edge_node_id()
        ),
        None => format!(
            "{NAMESPACE}/{}/{topic_type}/{}",
            identity.group_id(),
            identity.edge_node_id()
        ),
    }
}

/// Node command topic for the edge node owning `identity`.
///
/// Rebirth is always requested from the edge node, even for device sessions.
pub fn command_topic(identity: &NodeIdentity) -> String {
    format!(
        "{NAMESPACE}/{}/{}/{}",
        identity.group_id(),
        TopicType::NCmd,
        identity.edge_node_id()
    )
}
