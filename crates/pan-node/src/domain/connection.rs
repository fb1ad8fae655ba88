//! Agent Connection — socket-sending helpers plus the
//! rolling error log that trips a disconnect.
//!
//! The socket reference is an `mpsc::UnboundedSender<Frame>` feeding a
//! per-connection writer task rather than a raw `TcpStream` handle, so
//! [`AgentConnection::reconnect`] is a plain pointer swap under a lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use pan_types::{ConnId, Endpoint, Frame, FrameType, MsgId, NodeId};

/// Error-log window: only the last 60s of entries are kept,
/// and more than 200 within that window forces a close.
const ERROR_WINDOW: Duration = Duration::from_secs(60);
const ERROR_WINDOW_CAP: usize = 200;

/// The outbound side of an agent socket. Sending is fire-and-forget from
/// the caller's perspective; the receiving end of the channel is owned by
/// whatever I/O task actually writes to the TCP stream.
type Outbound = mpsc::UnboundedSender<Frame>;

pub struct AgentConnection {
    conn_id: ConnId,
    node_id: NodeId,
    socket: Mutex<Outbound>,
    error_log: Mutex<VecDeque<Instant>>,
    authenticated: AtomicBool,
    grace_cancel: Mutex<Option<CancellationToken>>,
}

impl AgentConnection {
    /// Construct a connection bound to a fresh outbound channel. The
    /// paired receiver is expected to be driven by the caller's I/O task.
    pub fn new(conn_id: ConnId, node_id: NodeId) -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self {
            conn_id,
            node_id,
            socket: Mutex::new(tx),
            error_log: Mutex::new(VecDeque::new()),
            authenticated: AtomicBool::new(false),
            grace_cancel: Mutex::new(None),
        }
    }

    /// Bind an already-created channel pair (used by the server when it
    /// owns both halves).
    pub fn with_channel(conn_id: ConnId, node_id: NodeId, sender: Outbound) -> Self {
        Self {
            conn_id,
            node_id,
            socket: Mutex::new(sender),
            error_log: Mutex::new(VecDeque::new()),
            authenticated: AtomicBool::new(false),
            grace_cancel: Mutex::new(None),
        }
    }

    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn mark_authenticated(&self) {
        self.authenticated.store(true, Ordering::Release);
    }

    /// Send a frame as-is, minting `msg_id` if the caller left it unset.
    /// Returns `false` if the writer task is gone.
    pub fn send(&self, mut frame: Frame) -> bool {
        if frame.msg_id.is_null() {
            frame.msg_id = MsgId::generate();
        }
        self.socket.lock().send(frame).is_ok()
    }

    /// Send a control reply, wrapping `msg_type`/`payload` as
    /// `type: control` with `in_response_to` set when this is answering a
    /// specific inbound message.
    pub fn send_control(&self, msg_type: impl Into<String>, payload: serde_json::Value, in_response_to: Option<MsgId>) -> bool {
        let mut frame = Frame::control(msg_type, payload, in_response_to);
        frame.kind = FrameType::Control;
        frame.from = Endpoint::new(self.node_id, self.conn_id);
        self.send(frame)
    }

    /// Record a processing error against this connection's rolling
    /// window. Returns `true` once the window overflows the 200-entry
    /// cap, at which point a final error frame should be sent and the
    /// socket closed.
    pub fn record_error(&self, reason: &str, original: Option<&Frame>) -> bool {
        let now = Instant::now();
        let mut log = self.error_log.lock();
        log.push_back(now);
        while let Some(front) = log.front() {
            if now.duration_since(*front) > ERROR_WINDOW {
                log.pop_front();
            } else {
                break;
            }
        }

        if log.len() > ERROR_WINDOW_CAP {
            warn!(conn_id = %self.conn_id, reason = reason, "error window overflow, closing connection");
            self.send_control(
                "message_failure",
                json!({ "reason": "too many errors" }),
                original.map(|f| f.msg_id),
            );
            true
        } else {
            false
        }
    }

    /// Hot-swap the outbound channel after a reconnect.
    /// The registry still maps the same `conn_id` to this same
    /// `AgentConnection`; only the wire endpoint underneath changes.
    /// Cancels any in-flight resume-grace timer, since
    /// the whole point of that timer is moot once a client has actually
    /// come back.
    pub fn reconnect(&self, new_sender: Outbound) {
        *self.socket.lock() = new_sender;
        if let Some(token) = self.grace_cancel.lock().take() {
            token.cancel();
        }
    }

    /// Start (or restart) the resume-grace window for this connection,
    /// returning the token the caller's timer task should race against.
    /// A fresh token replaces any previous one so only the most recent
    /// disconnect's timer is ever live.
    pub fn begin_resume_grace(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.grace_cancel.lock() = Some(token.clone());
        token
    }
}
