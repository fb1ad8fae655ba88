//! Control Handlers: `join_group`, `leave_group`,
//! `ping_request`, `disconnect`.
//!
//! Small, single-purpose `handle_*` functions taking a shared context by
//! reference rather than a method-per-struct dispatcher — control
//! messages are independent of each other and share no mutable state
//! beyond the [`NodeContext`] they're handed.

use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use pan_bus::{EventPublisher, PanEvent};
use pan_types::{ConnId, Frame};

use crate::container::NodeContext;
use crate::domain::connection::AgentConnection;
use crate::domain::groups::JoinOutcome;
use crate::domain::validate::is_valid_group_id;

const PING_MSG_MAX_LEN: usize = 64;

/// Outcome the caller (Agent Router) needs to know about: whether this
/// control message should close the socket (`disconnect`).
pub enum ControlOutcome {
    Continue,
    Disconnect,
}

pub async fn process(ctx: &NodeContext, conn: &AgentConnection, frame: &Frame) -> ControlOutcome {
    match frame.msg_type.as_str() {
        "join_group" => {
            handle_join_group(ctx, conn, frame);
            ControlOutcome::Continue
        }
        "leave_group" => {
            handle_leave_group(ctx, conn, frame);
            ControlOutcome::Continue
        }
        "ping_request" => {
            handle_ping_request(ctx, conn, frame).await;
            ControlOutcome::Continue
        }
        "disconnect" => {
            handle_disconnect(ctx, conn);
            ControlOutcome::Disconnect
        }
        other => {
            warn!(msg_type = other, conn_id = %conn.conn_id(), "unrecognized control message");
            conn.send_control(
                "error",
                json!({ "error_type": "unknown_control_message", "msg_type": other }),
                Some(frame.msg_id),
            );
            ControlOutcome::Continue
        }
    }
}

fn handle_join_group(ctx: &NodeContext, conn: &AgentConnection, frame: &Frame) {
    let group = frame.payload.get("group").and_then(Value::as_str);
    let msg_types: Vec<String> = frame
        .payload
        .get("msg_types")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let Some(group) = group.filter(|g| is_valid_group_id(g)) else {
        conn.send_control(
            "join_group_reply",
            json!({ "status": "failed", "error": "invalid group id" }),
            Some(frame.msg_id),
        );
        return;
    };

    let reply = match ctx.group_manager.join_group(conn.conn_id(), group, &msg_types) {
        JoinOutcome::Ok => json!({ "status": "ok", "group": group }),
        JoinOutcome::EmptyMsgTypes => json!({
            "status": "failed",
            "group": group,
            "error": "msg_types must be non-empty",
        }),
        JoinOutcome::CapExceeded => json!({
            "status": "failed",
            "group": group,
            "error": "msg_type cap exceeded for this group",
        }),
    };
    conn.send_control("join_group_reply", reply, Some(frame.msg_id));
}

fn handle_leave_group(ctx: &NodeContext, conn: &AgentConnection, frame: &Frame) {
    let Some(group) = frame.payload.get("group").and_then(Value::as_str) else {
        conn.send_control(
            "leave_group_reply",
            json!({ "status": "failed", "error": "missing group" }),
            Some(frame.msg_id),
        );
        return;
    };
    ctx.group_manager.leave_group(conn.conn_id(), group);
    conn.send_control(
        "leave_group_reply",
        json!({ "status": "ok", "group": group }),
        Some(frame.msg_id),
    );
}

async fn handle_ping_request(ctx: &NodeContext, conn: &AgentConnection, frame: &Frame) {
    let dest_node_id = frame
        .payload
        .get("dest_node_id")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Uuid>().ok());
    let msg = frame.payload.get("msg").and_then(Value::as_str);
    let ttl = frame.payload.get("ttl").and_then(Value::as_i64);

    let valid = dest_node_id.is_some()
        && msg.map(|m| !m.is_empty() && m.len() <= PING_MSG_MAX_LEN).unwrap_or(false)
        && ttl.map(|t| (0..=255).contains(&t)).unwrap_or(false);

    if !valid {
        conn.send_control(
            "ping_response",
            json!({ "msg": msg, "reached": false, "ttl": ttl, "error": "invalid ping_request fields" }),
            Some(frame.msg_id),
        );
        return;
    }

    let dest_node_id = pan_types::NodeId::from(dest_node_id.unwrap());
    ctx.bus
        .publish(PanEvent::AgentPing {
            from: (conn.node_id(), conn.conn_id()),
            dest_node_id,
            msg: msg.unwrap().to_string(),
            ttl: ttl.unwrap(),
        })
        .await;
}

fn handle_disconnect(ctx: &NodeContext, conn: &AgentConnection) {
    cleanup(ctx, conn.conn_id());
}

/// Shared cleanup for both explicit `disconnect` and resume-grace expiry
///: drop every group subscription, then unregister.
pub fn cleanup(ctx: &NodeContext, conn_id: ConnId) {
    ctx.group_manager.remove_from_all(conn_id);
    ctx.agent_registry.unregister(conn_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent_registry::AgentRegistry;
    use crate::domain::groups::GroupManager;
    use pan_bus::InMemoryEventBus;
    use pan_types::{Endpoint, FrameType, NodeId};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn ctx() -> NodeContext {
        NodeContext::new(
            NodeId::new_random(),
            Arc::new(InMemoryEventBus::new()),
            Arc::new(AgentRegistry::new()),
            Arc::new(GroupManager::new()),
        )
    }

    fn conn_with_channel() -> (AgentConnection, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = AgentConnection::with_channel(ConnId::new_random(), NodeId::new_random(), tx);
        (conn, rx)
    }

    fn control_frame(msg_type: &str, payload: Value, node_id: NodeId, conn_id: ConnId) -> Frame {
        Frame {
            msg_id: MsgId::generate(),
            kind: FrameType::Control,
            from: Endpoint::new(node_id, conn_id),
            msg_type: msg_type.to_string(),
            payload,
            ttl: 1,
            to: None,
            group: None,
            in_response_to: None,
        }
    }

    #[tokio::test]
    async fn join_group_with_valid_group_succeeds() {
        let ctx = ctx();
        let (conn, mut rx) = conn_with_channel();
        let group = "a".repeat(36);
        let frame = control_frame(
            "join_group",
            json!({ "group": group, "msg_types": ["chat"] }),
            conn.node_id(),
            conn.conn_id(),
        );

        process(&ctx, &conn, &frame).await;
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.msg_type, "join_group_reply");
        assert_eq!(reply.payload["status"], "ok");
        assert!(ctx.group_manager.get_recipients(&group, "chat").contains(&conn.conn_id()));
    }

    #[tokio::test]
    async fn join_group_with_bad_group_id_fails() {
        let ctx = ctx();
        let (conn, mut rx) = conn_with_channel();
        let frame = control_frame(
            "join_group",
            json!({ "group": "too-short", "msg_types": ["chat"] }),
            conn.node_id(),
            conn.conn_id(),
        );

        process(&ctx, &conn, &frame).await;
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.payload["status"], "failed");
    }

    #[tokio::test]
    async fn disconnect_cleans_up_and_signals_close() {
        let ctx = ctx();
        let (conn, _rx) = conn_with_channel();
        let group = "b".repeat(36);
        ctx.group_manager
            .join_group(conn.conn_id(), &group, &["chat".to_string()]);

        let frame = control_frame("disconnect", json!({}), conn.node_id(), conn.conn_id());
        let outcome = process(&ctx, &conn, &frame).await;
        assert!(matches!(outcome, ControlOutcome::Disconnect));
        assert!(ctx.group_manager.get_recipients(&group, "chat").is_empty());
    }

    #[tokio::test]
    async fn ping_request_with_invalid_fields_replies_with_error() {
        let ctx = ctx();
        let (conn, mut rx) = conn_with_channel();
        let frame = control_frame(
            "ping_request",
            json!({ "dest_node_id": "not-a-uuid", "msg": "hi", "ttl": 5 }),
            conn.node_id(),
            conn.conn_id(),
        );
        process(&ctx, &conn, &frame).await;
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.msg_type, "ping_response");
        assert_eq!(reply.payload["reached"], false);
    }
}
