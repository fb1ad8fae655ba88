//! Peer Registry — tracks connected peers and enforces the
//! anti-impersonation invariant on the shared overlay identity space.
//!
//! Uses the same `DashMap`-backed store shape as the Agent Registry.

use std::sync::Arc;

use dashmap::DashMap;

use pan_types::NodeId;

/// A registered peer connection plus the issuer identity ("vouchsafe_id")
/// that vouched for it.
pub struct PeerEntry<P> {
    pub peer: Arc<P>,
    pub issuer: String,
}

/// Outcome of attempting to register a peer handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    /// A peer already exists for this `node_id` under a different
    /// issuer; the new connection must be rejected and closed.
    IssuerMismatch,
}

pub struct PeerRegistry<P> {
    peers: DashMap<NodeId, PeerEntry<P>>,
}

impl<P> Default for PeerRegistry<P> {
    fn default() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }
}

impl<P> PeerRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `peer` for `node_id`, vouched for by `issuer`. Rejects the
    /// registration if a peer is already present under a different
    /// issuer.
    pub fn register(&self, node_id: NodeId, peer: Arc<P>, issuer: String) -> RegisterOutcome {
        if let Some(existing) = self.peers.get(&node_id) {
            if existing.issuer != issuer {
                return RegisterOutcome::IssuerMismatch;
            }
        }
        self.peers.insert(node_id, PeerEntry { peer, issuer });
        RegisterOutcome::Registered
    }

    pub fn get(&self, node_id: NodeId) -> Option<Arc<P>> {
        self.peers.get(&node_id).map(|e| e.peer.clone())
    }

    pub fn unregister(&self, node_id: NodeId) {
        self.peers.remove(&node_id);
    }

    pub fn count(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakePeer;

    #[test]
    fn first_registration_for_a_node_id_succeeds() {
        let registry: PeerRegistry<FakePeer> = PeerRegistry::new();
        let node_id = NodeId::new_random();
        let outcome = registry.register(node_id, Arc::new(FakePeer), "urn:issuer-a".to_string());
        assert_eq!(outcome, RegisterOutcome::Registered);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn same_issuer_reregistering_succeeds() {
        let registry: PeerRegistry<FakePeer> = PeerRegistry::new();
        let node_id = NodeId::new_random();
        registry.register(node_id, Arc::new(FakePeer), "urn:issuer-a".to_string());
        let outcome = registry.register(node_id, Arc::new(FakePeer), "urn:issuer-a".to_string());
        assert_eq!(outcome, RegisterOutcome::Registered);
    }

    #[test]
    fn different_issuer_for_the_same_node_id_is_rejected() {
        let registry: PeerRegistry<FakePeer> = PeerRegistry::new();
        let node_id = NodeId::new_random();
        registry.register(node_id, Arc::new(FakePeer), "urn:issuer-a".to_string());
        let outcome = registry.register(node_id, Arc::new(FakePeer), "urn:issuer-b".to_string());
        assert_eq!(outcome, RegisterOutcome::IssuerMismatch);
    }

    #[test]
    fn unregister_removes_the_peer() {
        let registry: PeerRegistry<FakePeer> = PeerRegistry::new();
        let node_id = NodeId::new_random();
        registry.register(node_id, Arc::new(FakePeer), "urn:issuer-a".to_string());
        registry.unregister(node_id);
        assert!(registry.get(node_id).is_none());
    }
}
