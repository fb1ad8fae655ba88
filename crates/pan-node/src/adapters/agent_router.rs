//! Agent Router — type-dispatch of a validated, authenticated
//! frame to local delivery or the peer relay bus.

use serde_json::json;
use tracing::warn;

use pan_bus::{EventPublisher, PanEvent};
use pan_types::{Frame, FrameType};

use crate::adapters::control_handlers::{self, ControlOutcome};
use crate::container::NodeContext;
use crate::domain::connection::AgentConnection;

/// What the Agent Server should do after dispatch.
pub enum RouteOutcome {
    Continue,
    Disconnect,
}

pub async fn dispatch(
    ctx: &NodeContext,
    conn: &AgentConnection,
    sender_outbound: impl Fn(&Frame) -> bool,
    frame: Frame,
) -> RouteOutcome {
    match frame.kind {
        FrameType::Control | FrameType::AgentControl | FrameType::PeerControl => {
            match control_handlers::process(ctx, conn, &frame).await {
                ControlOutcome::Continue => RouteOutcome::Continue,
                ControlOutcome::Disconnect => RouteOutcome::Disconnect,
            }
        }
        FrameType::Broadcast => {
            route_broadcast(ctx, conn, frame).await;
            RouteOutcome::Continue
        }
        FrameType::Direct => {
            if route_direct(ctx, conn, sender_outbound, frame).await {
                RouteOutcome::Disconnect
            } else {
                RouteOutcome::Continue
            }
        }
    }
}

async fn route_broadcast(ctx: &NodeContext, conn: &AgentConnection, frame: Frame) {
    let Some(group) = frame.group.clone() else {
        conn.send_control(
            "error",
            json!({ "error_type": "protocol_violation", "reason": "broadcast without group" }),
            Some(frame.msg_id),
        );
        return;
    };

    let recipients = ctx.group_manager.get_recipients(&group, &frame.msg_type);
    for recipient in recipients {
        if recipient == conn.conn_id() {
            continue;
        }
        if let Some(target) = ctx.agent_registry.get(recipient) {
            target.send(frame.clone());
        }
    }

    ctx.bus
        .publish(PanEvent::AgentBroadcast {
            from: (conn.node_id(), conn.conn_id()),
            message: frame,
        })
        .await;
}

/// Returns whether the sender's socket should now be closed — set once
/// the sender's rolling error log overflows from repeatedly addressing
/// unreachable targets.
async fn route_direct(
    ctx: &NodeContext,
    conn: &AgentConnection,
    sender_outbound: impl Fn(&Frame) -> bool,
    mut frame: Frame,
) -> bool {
    let Some(to) = frame.to else {
        conn.send_control(
            "error",
            json!({ "error_type": "protocol_violation", "reason": "direct without to" }),
            Some(frame.msg_id),
        );
        return false;
    };

    if to.node_id == ctx.local_node_id {
        let Some(target) = ctx.agent_registry.get(to.conn_id) else {
            let error = Frame::control(
                "error",
                json!({ "error_type": "target_not_found", "conn_id": to.conn_id.to_string() }),
                Some(frame.msg_id),
            );
            sender_outbound(&error);
            return conn.record_error("direct message target not found", Some(&frame));
        };
        // Rewrite `from`/`in_response_to` before local delivery so the
        // recipient sees the authoritative sender.
        frame.in_response_to = Some(frame.msg_id);
        frame.from = pan_types::Endpoint::new(conn.node_id(), conn.conn_id());
        target.send(frame);
        return false;
    }

    warn!(to_node = %to.node_id, "direct message addressed to a remote node, handing off to bus");
    ctx.bus
        .publish(PanEvent::AgentDirect {
            from: (conn.node_id(), conn.conn_id()),
            message: frame,
        })
        .await;
    false
}
