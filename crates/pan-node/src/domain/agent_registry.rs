//! Agent Registry — resumable connection bookkeeping.
//!
//! A `DashMap`-backed store with a constant-time resume-key comparison:
//! the auth key is the sole resume capability, so comparing it must not
//! leak timing information about how many leading bytes matched.

use std::sync::Arc;

use dashmap::DashMap;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use pan_types::ConnId;

use super::connection::AgentConnection;

/// Registration record: the live connection plus its resume key.
struct Entry {
    conn: Arc<AgentConnection>,
    auth_key: String,
}

/// Tracks authenticated agent connections and their resume (“auth key”)
/// capability.
#[derive(Default)]
pub struct AgentRegistry {
    entries: DashMap<ConnId, Entry>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register a freshly authenticated connection, minting its resume
    /// key.
    pub fn register(&self, conn: Arc<AgentConnection>) -> String {
        let auth_key = Uuid::new_v4().to_string();
        self.entries.insert(
            conn.conn_id(),
            Entry {
                conn,
                auth_key: auth_key.clone(),
            },
        );
        auth_key
    }

    /// Resume a connection by id, given its claimed auth key. Constant
    /// time in the key comparison; returns `None` both when the
    /// connection is unknown and when the key is wrong, so callers cannot
    /// distinguish the two from timing alone.
    pub fn resume(&self, conn_id: ConnId, auth_key: &str) -> Option<Arc<AgentConnection>> {
        let entry = self.entries.get(&conn_id)?;
        if constant_time_compare(&entry.auth_key, auth_key) {
            Some(entry.conn.clone())
        } else {
            None
        }
    }

    /// Plain lookup by `conn_id`, no resume-key check. Used by the router
    /// to find a local delivery target, which is a different trust
    /// boundary than resuming a session.
    pub fn get(&self, conn_id: ConnId) -> Option<Arc<AgentConnection>> {
        self.entries.get(&conn_id).map(|e| e.conn.clone())
    }

    pub fn unregister(&self, conn_id: ConnId) {
        self.entries.remove(&conn_id);
    }

    pub fn contains(&self, conn_id: ConnId) -> bool {
        self.entries.contains_key(&conn_id)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }
}

/// Pads both inputs to the same length with different fill bytes so a
/// length mismatch cannot short-circuit the comparison, then compares in
/// constant time via `subtle`.
fn constant_time_compare(a: &str, b: &str) -> bool {
    let max_len = a.len().max(b.len());
    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];
    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);
    (lengths_equal & contents_equal).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::connection::AgentConnection;
    use pan_types::NodeId;

    fn fresh_conn() -> Arc<AgentConnection> {
        Arc::new(AgentConnection::new(ConnId::new_random(), NodeId::new_random()))
    }

    #[test]
    fn register_then_resume_with_correct_key_succeeds() {
        let registry = AgentRegistry::new();
        let conn = fresh_conn();
        let conn_id = conn.conn_id();
        let auth_key = registry.register(conn);

        let resumed = registry.resume(conn_id, &auth_key);
        assert!(resumed.is_some());
    }

    #[test]
    fn resume_with_wrong_key_fails() {
        let registry = AgentRegistry::new();
        let conn = fresh_conn();
        let conn_id = conn.conn_id();
        let _auth_key = registry.register(conn);

        assert!(registry.resume(conn_id, "wrong-key").is_none());
    }

    #[test]
    fn resume_of_unknown_conn_fails() {
        let registry = AgentRegistry::new();
        assert!(registry.resume(ConnId::new_random(), "anything").is_none());
    }

    #[test]
    fn unregister_removes_the_entry() {
        let registry = AgentRegistry::new();
        let conn = fresh_conn();
        let conn_id = conn.conn_id();
        let auth_key = registry.register(conn);

        registry.unregister(conn_id);
        assert!(registry.resume(conn_id, &auth_key).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn constant_time_compare_matches_equal_strings() {
        assert!(constant_time_compare("secret", "secret"));
        assert!(!constant_time_compare("secret", "secrets"));
        assert!(!constant_time_compare("secret", "Secret"));
    }
}
