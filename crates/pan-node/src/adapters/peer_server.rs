//! Peer Server — single-handshake-frame peer admission.
//!
//! The peer *relay* (what a node does with traffic after a peer is
//! admitted) is explicitly out of core scope; this module only
//! covers the handshake and registration boundary the core owns.

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use pan_types::{Frame, FrameType, NodeId};

use crate::domain::peer_registry::{PeerRegistry, RegisterOutcome};
use crate::domain::trust::TrustValidator;
use crate::domain::validate::{is_valid_base, is_valid_control};
use crate::transport::{decode_frame, encode_frame, frame_transport};

/// A registered peer connection. The actual relay logic downstream of
/// admission is out of scope for the core.
pub struct Peer {
    pub node_id: NodeId,
    pub outbound: mpsc::UnboundedSender<Frame>,
}

pub struct PeerServer {
    peer_trust: std::sync::Arc<TrustValidator>,
    peer_registry: std::sync::Arc<PeerRegistry<Peer>>,
}

impl PeerServer {
    pub fn new(peer_trust: std::sync::Arc<TrustValidator>, peer_registry: std::sync::Arc<PeerRegistry<Peer>>) -> Self {
        Self {
            peer_trust,
            peer_registry,
        }
    }

    pub async fn run(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            info!(%addr, "peer connection accepted");
            let peer_trust = self.peer_trust.clone();
            let peer_registry = self.peer_registry.clone();
            tokio::spawn(async move {
                handle_peer_connection(stream, peer_trust, peer_registry).await;
            });
        }
    }
}

#[instrument(skip(stream, peer_trust, peer_registry), fields(kind = "peer"))]
async fn handle_peer_connection(
    stream: TcpStream,
    peer_trust: std::sync::Arc<TrustValidator>,
    peer_registry: std::sync::Arc<PeerRegistry<Peer>>,
) {
    let mut transport = frame_transport(stream);

    let Some(Ok(line)) = transport.next().await else {
        return;
    };

    let Ok(frame) = decode_frame(&line) else {
        let _ = send_auth_failed(&mut transport, "malformed handshake frame").await;
        return;
    };

    if !is_valid_base(&frame, false) || !is_valid_control(&frame) || frame.kind != FrameType::PeerControl {
        let _ = send_auth_failed(&mut transport, "invalid handshake frame").await;
        return;
    }

    if frame.msg_type != "hello" {
        let _ = send_auth_failed(&mut transport, "expected peer_control hello").await;
        return;
    }

    let Some(token) = frame.payload.get("token").and_then(|v| v.as_str()) else {
        let _ = send_auth_failed(&mut transport, "missing token").await;
        return;
    };

    if peer_trust.validate_token(token).is_err() {
        let _ = send_auth_failed(&mut transport, "token failed to decode").await;
        return;
    }

    let extra_tokens: Vec<String> = frame
        .payload
        .get("tokens")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let trust = peer_trust.is_token_trusted(token, &extra_tokens, &["peer-connect"]);
    if !trust.trusted {
        let reason = trust.reason.unwrap_or_else(|| "access denied".to_string());
        let _ = send_auth_failed(&mut transport, &reason).await;
        return;
    }
    let issuer = trust.issuer.unwrap_or_default();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let node_id = frame.from.node_id;
    match peer_registry.register(node_id, std::sync::Arc::new(Peer { node_id, outbound: tx }), issuer) {
        RegisterOutcome::IssuerMismatch => {
            let _ = send_auth_failed(&mut transport, "node_id already claimed by a different issuer").await;
            return;
        }
        RegisterOutcome::Registered => {
            info!(%node_id, "peer registered");
        }
    }

    let (mut sink, mut stream) = transport.split();
    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if let Ok(line) = encode_frame(&frame) {
                            if sink.send(line).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(_line)) => {
                        // Relay/routing of post-handshake peer traffic is
                        // out of core scope; admitted peers are
                        // simply kept alive here.
                    }
                    _ => break,
                }
            }
        }
    }

    warn!(%node_id, "peer connection closed");
    peer_registry.unregister(node_id);
}

async fn send_auth_failed(
    transport: &mut crate::transport::FrameTransport,
    message: &str,
) -> Result<(), tokio_util::codec::LinesCodecError> {
    let frame = Frame::control("auth.failed", serde_json::json!({ "message": message }), None);
    if let Ok(line) = encode_frame(&frame) {
        transport.send(line).await
    } else {
        Ok(())
    }
}
