//! The composition root's shared capabilities: a plain struct of
//! `Arc`-shared state built once in `main` and handed to whichever
//! adapters need it, rather than a dynamic registry keyed by subsystem
//! name.

use std::sync::Arc;

use pan_bus::InMemoryEventBus;
use pan_types::NodeId;

use crate::domain::agent_registry::AgentRegistry;
use crate::domain::groups::GroupManager;

/// The slice of node-wide state the router and control handlers need:
/// the local identity, the bus, and the two registries that track
/// locally reachable recipients.
pub struct NodeContext {
    pub local_node_id: NodeId,
    pub bus: Arc<InMemoryEventBus>,
    pub agent_registry: Arc<AgentRegistry>,
    pub group_manager: Arc<GroupManager>,
}

impl NodeContext {
    pub fn new(
        local_node_id: NodeId,
        bus: Arc<InMemoryEventBus>,
        agent_registry: Arc<AgentRegistry>,
        group_manager: Arc<GroupManager>,
    ) -> Self {
        Self {
            local_node_id,
            bus,
            agent_registry,
            group_manager,
        }
    }
}
