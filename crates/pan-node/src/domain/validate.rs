//! Structural frame validation.
//!
//! Small, allocation-light `pub fn`s returning `bool`/`Result` — the
//! validator must never throw on malformed input, so every check here is
//! a plain predicate over an already-decoded `Frame`.

use pan_types::{Frame, FrameType, EXTENDED_GROUP_ID_LEN, GROUP_ID_LEN, MSG_TYPE_MAX_LEN};

/// Maximum `ttl` accepted on a frame from an agent connection.
const AGENT_MAX_TTL: i64 = 1;
/// Maximum `ttl` accepted on a frame from a peer connection.
const PEER_MAX_TTL: i64 = 255;

/// `is_valid_base`: the checks every frame must pass
/// regardless of `type`.
///
/// Note: whether `from` is allowed to be the null identity is an
/// authentication-state question, not a shape question, so it is left to
/// the caller (the Agent Server's per-frame state machine) rather than
/// checked here.
pub fn is_valid_base(frame: &Frame, is_agent: bool) -> bool {
    if !is_valid_msg_type(&frame.msg_type) {
        return false;
    }
    if frame.payload.is_null() || !frame.payload.is_object() {
        return false;
    }
    let max_ttl = if is_agent { AGENT_MAX_TTL } else { PEER_MAX_TTL };
    if !(0..=max_ttl).contains(&frame.ttl) {
        return false;
    }
    true
}

/// `msg_type` is 1..=64 chars matching `[A-Za-z0-9_.@]+`. A
/// hand-rolled byte scan rather than a regex dependency — the alphabet is
/// fixed and ASCII-only, so a `matches` predicate is both simpler and
/// allocation-free.
fn is_valid_msg_type(msg_type: &str) -> bool {
    let len = msg_type.len();
    (1..=MSG_TYPE_MAX_LEN).contains(&len)
        && msg_type
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'@'))
}

/// Additional checks for `type: direct` frames.
pub fn is_valid_direct(frame: &Frame) -> bool {
    matches!(frame.kind, FrameType::Direct) && frame.to.is_some()
}

/// Additional checks for `type: broadcast` frames: `group`
/// must be present and have the length of either the plain or extended
/// group-id form.
pub fn is_valid_broadcast(frame: &Frame) -> bool {
    matches!(frame.kind, FrameType::Broadcast)
        && frame
            .group
            .as_deref()
            .map(is_valid_group_id)
            .unwrap_or(false)
}

/// `control` / `agent_control` / `peer_control` require no extra fields
/// beyond the base shape.
pub fn is_valid_control(frame: &Frame) -> bool {
    matches!(
        frame.kind,
        FrameType::Control | FrameType::AgentControl | FrameType::PeerControl
    )
}

/// Full validation: base checks plus whichever variant checks `frame.kind`
/// implies.
pub fn is_valid_frame(frame: &Frame, is_agent: bool) -> bool {
    if !is_valid_base(frame, is_agent) {
        return false;
    }
    match frame.kind {
        FrameType::Direct => is_valid_direct(frame),
        FrameType::Broadcast => is_valid_broadcast(frame),
        FrameType::Control | FrameType::AgentControl | FrameType::PeerControl => {
            is_valid_control(frame)
        }
    }
}

/// Whether `group` has the length of either the plain (`36`) or extended
/// (`73`, `<node_id>:<uuid>`) form. Both forms are opaque — only length is
/// validated.
pub fn is_valid_group_id(group: &str) -> bool {
    matches!(group.len(), GROUP_ID_LEN | EXTENDED_GROUP_ID_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pan_types::{ConnId, Endpoint, MsgId, NodeId};
    use serde_json::json;

    fn base_frame(kind: FrameType) -> Frame {
        Frame {
            msg_id: MsgId::generate(),
            kind,
            from: Endpoint::new(NodeId::new_random(), ConnId::new_random()),
            msg_type: "chat.message".to_string(),
            payload: json!({}),
            ttl: 5,
            to: None,
            group: None,
            in_response_to: None,
        }
    }

    #[test]
    fn rejects_bad_msg_type_characters() {
        let mut frame = base_frame(FrameType::Control);
        frame.msg_type = "bad type!".to_string();
        assert!(!is_valid_frame(&frame, false));
    }

    #[test]
    fn rejects_null_payload() {
        let mut frame = base_frame(FrameType::Control);
        frame.payload = serde_json::Value::Null;
        assert!(!is_valid_frame(&frame, false));
    }

    #[test]
    fn agent_ttl_is_capped_at_one() {
        let mut frame = base_frame(FrameType::Control);
        frame.ttl = 1;
        assert!(is_valid_frame(&frame, true));
        frame.ttl = 2;
        assert!(!is_valid_frame(&frame, true));
    }

    #[test]
    fn peer_ttl_allows_up_to_255() {
        let mut frame = base_frame(FrameType::Control);
        frame.ttl = 255;
        assert!(is_valid_frame(&frame, false));
        frame.ttl = 256;
        assert!(!is_valid_frame(&frame, false));
    }

    #[test]
    fn direct_requires_to_endpoint() {
        let mut frame = base_frame(FrameType::Direct);
        assert!(!is_valid_frame(&frame, true));
        frame.to = Some(Endpoint::new(NodeId::new_random(), ConnId::new_random()));
        assert!(is_valid_frame(&frame, true));
    }

    #[test]
    fn broadcast_requires_plain_or_extended_group_len() {
        let mut frame = base_frame(FrameType::Broadcast);
        frame.group = Some("too-short".to_string());
        assert!(!is_valid_frame(&frame, true));
        frame.group = Some("a".repeat(36));
        assert!(is_valid_frame(&frame, true));
        frame.group = Some("a".repeat(73));
        assert!(is_valid_frame(&frame, true));
    }
}
