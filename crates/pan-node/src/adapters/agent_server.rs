//! Agent Server — the central per-frame state machine every
//! inbound agent socket runs through: spam check, size check, parse,
//! schema validation, then authentication-or-dispatch.
//!
//! A `tokio::spawn`-per-connection accept loop; the pipeline steps are
//! kept as small, separately testable free functions rather than one
//! long `match`, composed the way a `tower`-style middleware chain
//! composes discrete steps. The read half and the `AgentConnection`'s
//! outbound `mpsc` channel are driven by two independent tasks (read
//! loop, writer loop) so a slow writer never blocks the reader.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use pan_types::{ConnId, Endpoint, Frame, FrameType};

use crate::adapters::agent_router::{self, RouteOutcome};
use crate::adapters::control_handlers;
use crate::container::NodeContext;
use crate::domain::auth::AuthManager;
use crate::domain::connection::AgentConnection;
use crate::domain::spam::{SpamCheck, SpamGuard, SpamGuardConfig};
use crate::domain::validate::is_valid_frame;
use crate::transport::{decode_frame, encode_frame, frame_transport, is_too_large, FrameTransport};

#[derive(Debug, Clone, Copy)]
pub struct AgentServerConfig {
    pub port: u16,
    pub spam: SpamGuardConfig,
    /// Invalid-message tolerance before a socket is dropped. 20 is chosen
    /// as generous enough to absorb a client retrying a bad frame a few
    /// times while still bounding the cost of a broken client.
    pub max_errors_before_disconnect: u32,
    /// Window after which the bad-message counter resets if no further
    /// errors arrive.
    pub error_reset_window: Duration,
    /// Time allowed for a freshly accepted socket to complete its first
    /// `auth` control frame.
    pub connect_timeout: Duration,
    /// How long an authenticated connection's slot survives an
    /// unexpected socket close before the agent registry forgets it
    ///.
    pub resume_grace: Duration,
}

impl Default for AgentServerConfig {
    fn default() -> Self {
        Self {
            port: 5295,
            spam: SpamGuardConfig::default(),
            max_errors_before_disconnect: 20,
            error_reset_window: Duration::from_millis(300_000),
            connect_timeout: Duration::from_secs(3),
            resume_grace: Duration::from_secs(120),
        }
    }
}

pub struct AgentServer {
    ctx: Arc<NodeContext>,
    auth: Arc<AuthManager>,
    config: AgentServerConfig,
}

impl AgentServer {
    pub fn new(ctx: Arc<NodeContext>, auth: Arc<AuthManager>, config: AgentServerConfig) -> Self {
        Self { ctx, auth, config }
    }

    pub async fn run(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            info!(%addr, "agent connection accepted");
            let ctx = self.ctx.clone();
            let auth = self.auth.clone();
            let config = self.config;
            tokio::spawn(async move {
                handle_agent_connection(stream, ctx, auth, config).await;
            });
        }
    }
}

/// Tracks the bad-message counter across one connection's lifetime,
/// along with when it was last bumped, so a long-quiet stretch can
/// reset it instead of carrying a decade-old grudge against the socket.
struct ErrorCounter {
    count: AtomicU32,
    last_error: Mutex<Option<Instant>>,
    reset_window: Duration,
}

impl ErrorCounter {
    fn new(reset_window: Duration) -> Self {
        Self {
            count: AtomicU32::new(0),
            last_error: Mutex::new(None),
            reset_window,
        }
    }

    /// Bump the counter, resetting it first if the reset window has
    /// elapsed since the last bad message. Returns the post-bump count.
    fn bump(&self) -> u32 {
        let now = Instant::now();
        let mut last = self.last_error.lock();
        if let Some(prev) = *last {
            if now.duration_since(prev) > self.reset_window {
                self.count.store(0, Ordering::SeqCst);
            }
        }
        *last = Some(now);
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[instrument(skip(stream, ctx, auth, config), fields(kind = "agent"))]
async fn handle_agent_connection(
    stream: TcpStream,
    ctx: Arc<NodeContext>,
    auth: Arc<AuthManager>,
    config: AgentServerConfig,
) {
    let transport = frame_transport(stream);
    let spam = SpamGuard::new(config.spam);
    let errors = ErrorCounter::new(config.error_reset_window);

    let Some((conn, transport, rx)) = (match tokio::time::timeout(
        config.connect_timeout,
        authenticate(transport, &ctx, &auth, &spam, &errors, config.max_errors_before_disconnect),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!("agent connection timed out before completing authentication");
            None
        }
    }) else {
        return;
    };

    let conn_id = conn.conn_id();
    let (sink, mut stream) = transport.split();
    let writer = tokio::spawn(run_writer(sink, rx));

    loop {
        let line = match stream.next().await {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                if is_too_large(&e) {
                    // Size check (spec §4.11 step 2): drop the
                    // oversized frame and keep the connection open.
                    // `LinesCodec` has already discarded the overlong
                    // line, so the next `next()` call resumes cleanly
                    // with whatever the client sends after it.
                    conn.send_control("bad_packet", json!({ "error": "frame too large" }), None);
                    continue;
                }
                break;
            }
            None => break,
        };

        if let SpamCheck::Violation { should_disconnect } = spam.check() {
            conn.send_control(
                "speed_limit_exceeded",
                json!({ "limit": spam.limit(), "window": spam.window_seconds() }),
                None,
            );
            if should_disconnect {
                break;
            }
            continue;
        }

        let frame = match decode_frame(&line) {
            Ok(frame) => frame,
            Err(e) => {
                conn.send_control("message_failure", json!({ "error": e.to_string() }), None);
                break;
            }
        };

        if !is_valid_frame(&frame, true) {
            let count = errors.bump();
            conn.send_control(
                "invalid_message",
                json!({ "msg_type": frame.msg_type }),
                Some(frame.msg_id),
            );
            if count > config.max_errors_before_disconnect {
                conn.send_control("too_many_bad_messages", json!({ "count": count }), None);
                break;
            }
            continue;
        }

        let mut frame = frame;
        if frame.from.node_id != ctx.local_node_id || frame.from.conn_id != conn_id {
            warn!(conn_id = %conn_id, "protocol violation: forged from endpoint");
            break;
        }
        frame.from = Endpoint::new(ctx.local_node_id, conn_id);

        let conn_for_fallback = conn.clone();
        let outcome = agent_router::dispatch(&ctx, &conn, move |f| conn_for_fallback.send(f.clone()), frame).await;
        if matches!(outcome, RouteOutcome::Disconnect) {
            break;
        }
    }

    writer.abort();
    spawn_resume_grace_or_cleanup(ctx, conn, config.resume_grace).await;
}

/// Drains `conn`'s outbound channel onto the wire until the channel
/// closes or the socket breaks. Runs as its own task so a burst of
/// outbound control/relay frames never blocks the read loop that feeds
/// the spam/size/schema pipeline.
async fn run_writer(mut sink: SplitSink<FrameTransport, String>, mut rx: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        let Ok(line) = encode_frame(&frame) else {
            continue;
        };
        if sink.send(line).await.is_err() {
            break;
        }
    }
}

/// Authenticate a freshly accepted socket: the first frame must be a
/// `control`/`auth` frame. Returns the resulting
/// connection, the still-open transport, and the receiving half of its
/// outbound channel (for the caller to hand to [`run_writer`]) — or
/// `None` if the socket should be closed without further action
/// (already reported to the peer via an `auth.failed` reply where
/// applicable).
async fn authenticate(
    mut transport: FrameTransport,
    ctx: &NodeContext,
    auth: &AuthManager,
    spam: &SpamGuard,
    errors: &ErrorCounter,
    max_errors_before_disconnect: u32,
) -> Option<(Arc<AgentConnection>, FrameTransport, mpsc::UnboundedReceiver<Frame>)> {
    loop {
        let line = match transport.next().await {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                if is_too_large(&e) {
                    // Same size-check-and-drop treatment as the
                    // post-auth loop (spec §4.11 step 2 applies to
                    // every inbound frame, including the first `auth`).
                    send_reply(
                        &mut transport,
                        Frame::control("bad_packet", json!({ "error": "frame too large" }), None),
                    )
                    .await;
                    continue;
                }
                return None;
            }
            None => return None,
        };

        if let SpamCheck::Violation { should_disconnect } = spam.check() {
            if should_disconnect {
                return None;
            }
            continue;
        }

        let Ok(frame) = decode_frame(&line) else {
            send_reply(&mut transport, Frame::control("message_failure", json!({}), None)).await;
            return None;
        };

        if !is_valid_frame(&frame, true) || frame.kind != FrameType::Control || frame.msg_type != "auth" {
            if errors.bump() > max_errors_before_disconnect {
                return None;
            }
            send_reply(
                &mut transport,
                Frame::control(
                    "error",
                    json!({ "error_type": "protocol_violation", "reason": "expected control/auth" }),
                    Some(frame.msg_id),
                ),
            )
            .await;
            continue;
        }

        let result = auth.submit_auth_request(frame.payload.clone()).await;
        if !result.success {
            send_reply(
                &mut transport,
                Frame::control(
                    "auth.failed",
                    json!({ "message": result.error.unwrap_or_default() }),
                    Some(frame.msg_id),
                ),
            )
            .await;
            return None;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let reconnect_conn_id = frame
            .payload
            .get("conn_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<ConnId>().ok());
        let auth_key = frame.payload.get("auth_key").and_then(|v| v.as_str());

        let (conn, auth_key, reconnected) = match (reconnect_conn_id, auth_key) {
            (Some(conn_id), Some(key)) => match ctx.agent_registry.resume(conn_id, key) {
                Some(existing) => {
                    existing.reconnect(tx);
                    (existing, key.to_string(), true)
                }
                None => {
                    send_reply(
                        &mut transport,
                        Frame::control("auth.failed", json!({ "message": "resume failed" }), Some(frame.msg_id)),
                    )
                    .await;
                    return None;
                }
            },
            _ => {
                // Every agent on this socket belongs to *this* node:
                // every subsequent frame is checked against
                // `frame.from.node_id == local_node_id`, so the
                // connection's node_id is the local node's, not a fresh
                // one per socket.
                let fresh = Arc::new(AgentConnection::with_channel(ConnId::new_random(), ctx.local_node_id, tx));
                let key = ctx.agent_registry.register(fresh.clone());
                (fresh, key, false)
            }
        };
        conn.mark_authenticated();

        send_reply(
            &mut transport,
            Frame::control(
                "auth.ok",
                json!({
                    "node_id": conn.node_id().to_string(),
                    "conn_id": conn.conn_id().to_string(),
                    "auth_key": auth_key,
                    "auth_type": if reconnected { "reconnect" } else { "fresh" },
                    "agent_name": result.agent_name,
                }),
                Some(frame.msg_id),
            ),
        )
        .await;

        return Some((conn, transport, rx));
    }
}

async fn send_reply(transport: &mut FrameTransport, frame: Frame) {
    if let Ok(line) = encode_frame(&frame) {
        let _ = transport.send(line).await;
    }
}

/// On unexpected socket close for an authenticated connection, keep its
/// registry slot alive for `resume_grace` so a client can reconnect and
/// resume. Realized as a per-connection timeout race
/// rather than a centralized maintenance sweep — the externally
/// observable behavior (slot forgotten `resume_grace` after close) is
/// identical either way, and this avoids a second shared structure
/// purely to track expiry times. [`AgentConnection::reconnect`] cancels
/// the token this races against, so a client that comes back before the
/// window closes short-circuits the timer instead of racing the cleanup.
async fn spawn_resume_grace_or_cleanup(ctx: Arc<NodeContext>, conn: Arc<AgentConnection>, resume_grace: Duration) {
    let conn_id = conn.conn_id();
    if !ctx.agent_registry.contains(conn_id) {
        return;
    }

    let cancel = conn.begin_resume_grace();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(resume_grace) => {
                info!(%conn_id, "resume grace window expired, forgetting connection");
                control_handlers::cleanup(&ctx, conn_id);
            }
            _ = cancel.cancelled() => {}
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_counter_resets_after_the_window_elapses() {
        let window = Duration::from_millis(300_000);
        let counter = ErrorCounter::new(window);
        assert_eq!(counter.bump(), 1);
        assert_eq!(counter.bump(), 2);
        // Simulate the reset window having elapsed by back-dating the
        // recorded last-error instant directly.
        *counter.last_error.lock() = Some(Instant::now() - window - Duration::from_millis(1));
        assert_eq!(counter.bump(), 1);
    }
}
