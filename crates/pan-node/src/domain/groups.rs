//! Group Manager — the two-level subscription index.
//!
//! The forward index (`group → msg_type → conn_id`) and its inverse
//! (`conn_id → group → msg_type`) must be updated together under a
//! single critical section, so unlike the
//! rest of this crate's `DashMap`-per-structure style, both maps live
//! inside one `parking_lot::Mutex<Inner>` — a sharded map per structure
//! would let a reader observe one index updated and the other not yet.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use pan_types::ConnId;

/// Cap on distinct `msg_type`s a single `(conn, group)` pair may hold
///.
const MAX_MSG_TYPES_PER_GROUP: usize = 100;

/// Outcome of [`GroupManager::join_group`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Ok,
    /// `msg_types` was empty; nothing was applied.
    EmptyMsgTypes,
    /// The `(conn, group)` cap was hit partway through; the entries
    /// applied before the cap was reached stand.
    CapExceeded,
}

#[derive(Default)]
struct Inner {
    /// group_id -> msg_type -> subscribed conns
    groups: HashMap<String, HashMap<String, HashSet<ConnId>>>,
    /// conn_id -> group_id -> subscribed msg_types
    agent_subs: HashMap<ConnId, HashMap<String, HashSet<String>>>,
}

#[derive(Default)]
pub struct GroupManager {
    inner: Mutex<Inner>,
}

impl GroupManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `conn_id` to `msg_types` within `group_id`. Idempotent
    /// per `(conn, group, msg_type)`.
    pub fn join_group(&self, conn_id: ConnId, group_id: &str, msg_types: &[String]) -> JoinOutcome {
        if msg_types.is_empty() {
            return JoinOutcome::EmptyMsgTypes;
        }

        let mut guard = self.inner.lock();
        let Inner { groups, agent_subs } = &mut *guard;

        let conn_types = agent_subs
            .entry(conn_id)
            .or_default()
            .entry(group_id.to_string())
            .or_default();

        let mut cap_exceeded = false;
        for msg_type in msg_types {
            if conn_types.contains(msg_type) {
                continue;
            }
            if conn_types.len() >= MAX_MSG_TYPES_PER_GROUP {
                cap_exceeded = true;
                break;
            }
            conn_types.insert(msg_type.clone());
            groups
                .entry(group_id.to_string())
                .or_default()
                .entry(msg_type.clone())
                .or_default()
                .insert(conn_id);
        }

        if cap_exceeded {
            JoinOutcome::CapExceeded
        } else {
            JoinOutcome::Ok
        }
    }

    /// Unsubscribe `conn_id` from every `msg_type` it held in `group_id`,
    /// pruning empty structures eagerly.
    pub fn leave_group(&self, conn_id: ConnId, group_id: &str) {
        let mut guard = self.inner.lock();
        let Inner { groups, agent_subs } = &mut *guard;

        let Some(conn_groups) = agent_subs.get_mut(&conn_id) else {
            return;
        };
        let Some(msg_types) = conn_groups.remove(group_id) else {
            return;
        };
        if conn_groups.is_empty() {
            agent_subs.remove(&conn_id);
        }

        if let Some(group) = groups.get_mut(group_id) {
            for msg_type in &msg_types {
                if let Some(conns) = group.get_mut(msg_type) {
                    conns.remove(&conn_id);
                    if conns.is_empty() {
                        group.remove(msg_type);
                    }
                }
            }
            if group.is_empty() {
                groups.remove(group_id);
            }
        }
    }

    /// Local recipients for `group_id`/`msg_type`. An empty set means "no
    /// local recipients", never an error.
    pub fn get_recipients(&self, group_id: &str, msg_type: &str) -> HashSet<ConnId> {
        let guard = self.inner.lock();
        guard
            .groups
            .get(group_id)
            .and_then(|m| m.get(msg_type))
            .cloned()
            .unwrap_or_default()
    }

    /// Remove `conn_id` from every group it is subscribed to. Snapshots
    /// the conn's group list first since `leave_group` mutates the very
    /// index being iterated.
    pub fn remove_from_all(&self, conn_id: ConnId) {
        let group_ids: Vec<String> = {
            let guard = self.inner.lock();
            guard
                .agent_subs
                .get(&conn_id)
                .map(|groups| groups.keys().cloned().collect())
                .unwrap_or_default()
        };
        for group_id in group_ids {
            self.leave_group(conn_id, &group_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_id() -> String {
        "a".repeat(36)
    }

    #[test]
    fn join_then_get_recipients_finds_the_subscriber() {
        let mgr = GroupManager::new();
        let conn = ConnId::new_random();
        let types = vec!["chat.message".to_string()];
        assert_eq!(mgr.join_group(conn, &group_id(), &types), JoinOutcome::Ok);

        let recipients = mgr.get_recipients(&group_id(), "chat.message");
        assert!(recipients.contains(&conn));
    }

    #[test]
    fn empty_msg_types_is_rejected() {
        let mgr = GroupManager::new();
        let conn = ConnId::new_random();
        assert_eq!(mgr.join_group(conn, &group_id(), &[]), JoinOutcome::EmptyMsgTypes);
    }

    #[test]
    fn join_is_idempotent_per_conn_group_msg_type() {
        let mgr = GroupManager::new();
        let conn = ConnId::new_random();
        let types = vec!["chat.message".to_string()];
        mgr.join_group(conn, &group_id(), &types);
        mgr.join_group(conn, &group_id(), &types);
        assert_eq!(mgr.get_recipients(&group_id(), "chat.message").len(), 1);
    }

    #[test]
    fn cap_exceeded_keeps_partial_progress() {
        let mgr = GroupManager::new();
        let conn = ConnId::new_random();
        let many: Vec<String> = (0..150).map(|i| format!("type{i}")).collect();
        let outcome = mgr.join_group(conn, &group_id(), &many);
        assert_eq!(outcome, JoinOutcome::CapExceeded);
        assert!(mgr.get_recipients(&group_id(), "type0").contains(&conn));
        assert!(mgr.get_recipients(&group_id(), "type99").contains(&conn));
        assert!(mgr.get_recipients(&group_id(), "type120").is_empty());
    }

    #[test]
    fn leave_group_prunes_empty_structures() {
        let mgr = GroupManager::new();
        let conn = ConnId::new_random();
        let types = vec!["chat.message".to_string()];
        mgr.join_group(conn, &group_id(), &types);
        mgr.leave_group(conn, &group_id());
        assert!(mgr.get_recipients(&group_id(), "chat.message").is_empty());
    }

    #[test]
    fn remove_from_all_leaves_every_group() {
        let mgr = GroupManager::new();
        let conn = ConnId::new_random();
        let group_a = "a".repeat(36);
        let group_b = "b".repeat(36);
        mgr.join_group(conn, &group_a, &["x".to_string()]);
        mgr.join_group(conn, &group_b, &["y".to_string()]);

        mgr.remove_from_all(conn);

        assert!(mgr.get_recipients(&group_a, "x").is_empty());
        assert!(mgr.get_recipients(&group_b, "y").is_empty());
    }
}
