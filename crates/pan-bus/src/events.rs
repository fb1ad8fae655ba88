//! The three bus events the core emits: `outbound:agent_broadcast`,
//! `outbound:agent_direct`, `outbound:agent_ping`. Each is the hand-off
//! point from the Agent Router / Control Handlers to the peer relay
//! layer, which is the single consumer of these events.

use pan_types::{ConnId, Frame, NodeId};
use serde::{Deserialize, Serialize};

/// Which of the three outbound events a `PanEvent` carries, for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    AgentBroadcast,
    AgentDirect,
    AgentPing,
    /// Matches every topic.
    All,
}

/// An event emitted onto the bus for the peer relay (or any other local
/// subscriber) to consume.
#[derive(Debug, Clone)]
pub enum PanEvent {
    /// A local agent broadcast that had no (or incomplete) local fan-out
    /// and should be offered to the peer relay.
    AgentBroadcast { from: (NodeId, ConnId), message: Frame },
    /// A direct message addressed to a remote `node_id`.
    AgentDirect { from: (NodeId, ConnId), message: Frame },
    /// A `ping_request` control message that the peer relay should carry.
    AgentPing {
        from: (NodeId, ConnId),
        dest_node_id: NodeId,
        msg: String,
        ttl: i64,
    },
}

impl PanEvent {
    pub fn topic(&self) -> EventTopic {
        match self {
            PanEvent::AgentBroadcast { .. } => EventTopic::AgentBroadcast,
            PanEvent::AgentDirect { .. } => EventTopic::AgentDirect,
            PanEvent::AgentPing { .. } => EventTopic::AgentPing,
        }
    }
}

/// A subscription-time filter over event topics.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub topics: Vec<EventTopic>,
}

impl EventFilter {
    /// Match every event.
    pub fn all() -> Self {
        Self { topics: vec![EventTopic::All] }
    }

    /// Match only the given topics.
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self { topics }
    }

    pub fn matches(&self, event: &PanEvent) -> bool {
        self.topics.contains(&EventTopic::All) || self.topics.contains(&event.topic())
    }
}
