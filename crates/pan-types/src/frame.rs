//! The wire frame — the single shape every inbound and outbound message
//! takes.
//!
//! Deliberately loose at the type level: `payload` is an opaque JSON
//! object and `msg_type` an unvalidated string, because the validity rules
//! (regex, length, ttl range) live in the validators, not in the shape
//! itself — a malformed frame must still deserialize into a `Frame` so the
//! validator can reject it with a specific reason instead of the decoder
//! silently dropping it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ConnId, MsgId, NodeId};

/// Canonical length of a plain group id (`<uuid>`).
pub const GROUP_ID_LEN: usize = 36;
/// Canonical length of the node-scoped extended group form (`<node_id>:<uuid>`).
pub const EXTENDED_GROUP_ID_LEN: usize = 73;
/// Maximum size, in bytes, of a single encoded frame.
pub const MAX_FRAME_BYTES: usize = 61_440;
/// `msg_type` is 1..=64 chars matching `[A-Za-z0-9_.@]+`.
pub const MSG_TYPE_MAX_LEN: usize = 64;

/// The top-level category of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Direct,
    Broadcast,
    Control,
    PeerControl,
    AgentControl,
}

/// `{node_id, conn_id}` — identifies either the sender or a unicast target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub node_id: NodeId,
    pub conn_id: ConnId,
}

impl Endpoint {
    pub fn new(node_id: NodeId, conn_id: ConnId) -> Self {
        Self { node_id, conn_id }
    }

    /// The sentinel endpoint carried by an unauthenticated frame's `from`.
    pub fn null() -> Self {
        Self {
            node_id: NodeId::NULL,
            conn_id: ConnId::NULL,
        }
    }
}

/// The invariant frame shape every message shares, with the `direct`/
/// `broadcast` variant fields folded in as `Option`s rather than an enum
/// payload — the wire format does not tag which optional fields are
/// present by variant, it is the validator's job to require them given
/// `msg_type`/`type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub msg_id: MsgId,
    #[serde(rename = "type")]
    pub kind: FrameType,
    pub from: Endpoint,
    pub msg_type: String,
    pub payload: Value,
    pub ttl: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<MsgId>,
}

impl Frame {
    /// Build an outbound control frame, minting `msg_id` and wiring
    /// `in_response_to` when this is a reply to an inbound frame.
    pub fn control(msg_type: impl Into<String>, payload: Value, in_response_to: Option<MsgId>) -> Self {
        Self {
            msg_id: MsgId::generate(),
            kind: FrameType::Control,
            from: Endpoint::null(),
            msg_type: msg_type.into(),
            payload,
            ttl: 0,
            to: None,
            group: None,
            in_response_to,
        }
    }

    /// Whether `group` has the length of either the plain or extended form.
    pub fn group_len_valid(group: &str) -> bool {
        matches!(group.len(), GROUP_ID_LEN | EXTENDED_GROUP_ID_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn control_frame_carries_in_response_to() {
        let trigger = MsgId::generate();
        let frame = Frame::control("auth.ok", json!({"ok": true}), Some(trigger));
        assert_eq!(frame.in_response_to, Some(trigger));
        assert!(matches!(frame.kind, FrameType::Control));
        assert!(frame.from.node_id.is_null());
    }

    #[test]
    fn group_length_accepts_only_plain_and_extended_forms() {
        assert!(Frame::group_len_valid(&"a".repeat(36)));
        assert!(Frame::group_len_valid(&"a".repeat(73)));
        assert!(!Frame::group_len_valid(&"a".repeat(37)));
    }

    #[test]
    fn frame_roundtrips_through_json() {
        let frame = Frame {
            msg_id: MsgId::generate(),
            kind: FrameType::Direct,
            from: Endpoint::new(NodeId::new_random(), ConnId::new_random()),
            msg_type: "test.direct".to_string(),
            payload: json!({"hello": "self-test"}),
            ttl: 5,
            to: Some(Endpoint::new(NodeId::new_random(), ConnId::new_random())),
            group: None,
            in_response_to: None,
        };
        let encoded = serde_json::to_vec(&frame).unwrap();
        let decoded: Frame = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded.msg_type, "test.direct");
        assert_eq!(decoded.ttl, 5);
    }
}
