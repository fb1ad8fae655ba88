//! Identity Service — the single stable `node_id` for this
//! process.
//!
//! Guarded by an `Arc<RwLock<...>>`-held shared state; the only way to
//! mutate the id after startup is a "write-once setter" capability
//! handed out exactly once.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pan_types::{IdentityError, NodeId};
use parking_lot::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Whether a corrupt persisted `node_id` file should be regenerated or
/// should crash the process at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashOnCorrupt {
    Regenerate,
    Fatal,
}

impl Default for CrashOnCorrupt {
    fn default() -> Self {
        CrashOnCorrupt::Regenerate
    }
}

/// The process-wide node identity, with a one-shot setter capability.
///
/// `IdentityService` is cheap to clone (it is just an `Arc` to the shared
/// slot); the setter, by contrast, can be obtained only once per service —
/// a second call to [`IdentityService::take_setter`] fails, so only
/// whichever subsystem the composition root hands it to may ever write
/// the id.
#[derive(Clone)]
pub struct IdentityService {
    inner: Arc<Inner>,
}

struct Inner {
    node_id: RwLock<NodeId>,
    persist_path: Option<PathBuf>,
    setter_issued: AtomicBool,
}

/// A one-shot capability to change the node's id. Consumed by
/// [`NodeIdSetter::set`]; a second call panics in debug builds and is a
/// logic error by construction (the type cannot be cloned or reused).
pub struct NodeIdSetter {
    inner: Arc<Inner>,
}

impl NodeIdSetter {
    /// Replace the node id and persist it. Only a well-formed UUID is
    /// accepted.
    pub fn set(self, new_id: &str) -> Result<NodeId, IdentityError> {
        let parsed: Uuid = new_id.parse().map_err(|_| IdentityError::MalformedNodeId)?;
        let node_id = NodeId::from(parsed);
        *self.inner.node_id.write() = node_id;
        if let Some(path) = &self.inner.persist_path {
            persist(path, &node_id)?;
        }
        info!(node_id = %node_id, "node_id changed via setter capability");
        Ok(node_id)
    }
}

impl IdentityService {
    /// Resolve the node's id at startup, in order: adopt a valid
    /// persisted value, else derive from a configured textual identifier,
    /// else mint a random id and persist it.
    pub fn initialize(
        persist_path: Option<&Path>,
        node_identifier: Option<&str>,
        crash_on_corrupt: CrashOnCorrupt,
    ) -> Result<Self, IdentityError> {
        let persisted = match persist_path {
            Some(path) => read_persisted(path),
            None => Ok(None),
        };

        let node_id = match persisted {
            Ok(Some(id)) => id,
            Ok(None) => Self::derive_or_random(node_identifier, persist_path)?,
            Err(IdentityError::Corrupt { path, reason }) => match crash_on_corrupt {
                CrashOnCorrupt::Fatal => {
                    return Err(IdentityError::Corrupt { path, reason });
                }
                CrashOnCorrupt::Regenerate => {
                    warn!(path = %path, reason = %reason, "persisted node_id corrupt, regenerating");
                    Self::derive_or_random(node_identifier, persist_path)?
                }
            },
            Err(other) => return Err(other),
        };

        info!(node_id = %node_id, "node identity resolved");

        Ok(Self {
            inner: Arc::new(Inner {
                node_id: RwLock::new(node_id),
                persist_path: persist_path.map(Path::to_path_buf),
                setter_issued: AtomicBool::new(false),
            }),
        })
    }

    fn derive_or_random(
        node_identifier: Option<&str>,
        persist_path: Option<&Path>,
    ) -> Result<NodeId, IdentityError> {
        let node_id = match node_identifier {
            Some(identifier) => NodeId::derive_from(identifier),
            None => NodeId::new_random(),
        };
        if let Some(path) = persist_path {
            persist(path, &node_id)?;
        }
        Ok(node_id)
    }

    /// The current node id. Stable for the process lifetime unless changed
    /// through the one-shot setter.
    pub fn get_node_id(&self) -> NodeId {
        *self.inner.node_id.read()
    }

    /// Hand out the write-once setter capability. Fails if it has already
    /// been issued once.
    pub fn take_setter(&self) -> Result<NodeIdSetter, IdentityError> {
        if self
            .inner
            .setter_issued
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(IdentityError::SetterAlreadyIssued);
        }
        Ok(NodeIdSetter {
            inner: self.inner.clone(),
        })
    }
}

fn read_persisted(path: &Path) -> Result<Option<NodeId>, IdentityError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(IdentityError::Read {
                path: path.display().to_string(),
                source: e,
            })
        }
    };
    let trimmed = contents.trim();
    match trimmed.parse::<Uuid>() {
        Ok(uuid) => Ok(Some(NodeId::from(uuid))),
        Err(e) => Err(IdentityError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Write-then-rename so a crash mid-write never leaves a half-written id
/// file behind.
fn persist(path: &Path, node_id: &NodeId) -> Result<(), IdentityError> {
    let tmp_path = path.with_extension("tmp");
    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        writeln!(file, "{node_id}")?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    };
    write().map_err(|e| IdentityError::Write {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn no_persist_path_mints_random_id() {
        let svc = IdentityService::initialize(None, None, CrashOnCorrupt::Regenerate).unwrap();
        assert!(!svc.get_node_id().is_null());
    }

    #[test]
    fn derives_deterministically_from_identifier() {
        let a = IdentityService::initialize(None, Some("edge-01"), CrashOnCorrupt::Regenerate)
            .unwrap()
            .get_node_id();
        let b = IdentityService::initialize(None, Some("edge-01"), CrashOnCorrupt::Regenerate)
            .unwrap()
            .get_node_id();
        assert_eq!(a, b);
    }

    #[test]
    fn restart_adopts_persisted_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persisted_node_id.txt");

        let first = IdentityService::initialize(Some(&path), None, CrashOnCorrupt::Regenerate)
            .unwrap()
            .get_node_id();
        let second = IdentityService::initialize(Some(&path), None, CrashOnCorrupt::Regenerate)
            .unwrap()
            .get_node_id();

        assert_eq!(first, second);
    }

    #[test]
    fn corrupt_file_regenerates_by_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persisted_node_id.txt");
        fs::write(&path, "not-a-uuid").unwrap();

        let svc =
            IdentityService::initialize(Some(&path), None, CrashOnCorrupt::Regenerate).unwrap();
        assert!(!svc.get_node_id().is_null());
    }

    #[test]
    fn corrupt_file_is_fatal_when_configured() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persisted_node_id.txt");
        fs::write(&path, "not-a-uuid").unwrap();

        let err = IdentityService::initialize(Some(&path), None, CrashOnCorrupt::Fatal)
            .unwrap_err();
        assert!(matches!(err, IdentityError::Corrupt { .. }));
    }

    #[test]
    fn setter_capability_is_single_use() {
        let svc = IdentityService::initialize(None, None, CrashOnCorrupt::Regenerate).unwrap();
        let setter = svc.take_setter().unwrap();
        assert!(svc.take_setter().is_err());

        let fresh = Uuid::new_v4().to_string();
        let new_id = setter.set(&fresh).unwrap();
        assert_eq!(svc.get_node_id(), new_id);
    }

    #[test]
    fn setter_rejects_malformed_id() {
        let svc = IdentityService::initialize(None, None, CrashOnCorrupt::Regenerate).unwrap();
        let setter = svc.take_setter().unwrap();
        assert!(matches!(
            setter.set("not-a-uuid"),
            Err(IdentityError::MalformedNodeId)
        ));
    }
}
