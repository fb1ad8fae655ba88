//! Node configuration.
//!
//! A plain `NodeConfig` read once by the composition root in `main.rs`;
//! no component re-reads this file for itself. A plain struct with a
//! `Default` impl, extended with a `json5` file load plus `PAN_<FIELD>`
//! environment overrides.

use std::env;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use crate::adapters::agent_server::AgentServerConfig;
use crate::domain::auth::AuthManagerConfig;
use crate::domain::identity::CrashOnCorrupt;
use crate::domain::spam::SpamGuardConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: json5::Error,
    },
}

/// On-disk/env-overridable node configuration. Every field
/// here maps onto one of the component configs the composition root
/// hands out; this struct is the single thing `main` parses so no
/// component reads the file or the environment for itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub agent_port: u16,
    pub peer_port: u16,

    /// Where the resolved `node_id` is persisted.
    pub persist_path: PathBuf,
    /// Textual identifier to derive a deterministic `node_id` from, if
    /// no persisted id exists yet.
    pub node_identifier: Option<String>,
    /// Regenerate vs. crash the process on a corrupt persisted id.
    pub crash_on_corrupt: bool,

    /// Path to the agent-trust issuer config.
    pub trusted_agents_config_file: PathBuf,
    /// Path to the peer-trust issuer config.
    pub trusted_peers_config_file: PathBuf,
    /// How long a loaded trust config is cached before a reload is
    /// attempted.
    pub trust_config_ttl_secs: u64,
    /// Accept any structurally valid token regardless of trust-chain
    /// membership.
    pub allow_untrusted_agents: bool,

    /// Ordered auth method names to try.
    pub auth_method_order: Vec<String>,
    pub auth_max_tries: u32,
    pub auth_timeout_ms: u64,

    pub spam_window_seconds: u64,
    pub spam_message_limit: u32,
    pub spam_disconnect_threshold: u32,

    pub connect_timeout_secs: u64,
    pub resume_grace_secs: u64,
    pub max_errors_before_disconnect: u32,
    pub error_reset_window_ms: u64,

    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            agent_port: 5295,
            peer_port: 5874,
            persist_path: PathBuf::from("./persisted_node_id.txt"),
            node_identifier: None,
            crash_on_corrupt: false,
            trusted_agents_config_file: PathBuf::from("./trusted_agents.json"),
            trusted_peers_config_file: PathBuf::from("./trusted_peers.json"),
            trust_config_ttl_secs: 30,
            allow_untrusted_agents: false,
            auth_method_order: vec!["local".to_string()],
            auth_max_tries: 3,
            auth_timeout_ms: 3_000,
            spam_window_seconds: 10,
            spam_message_limit: 50,
            spam_disconnect_threshold: 5,
            connect_timeout_secs: 3,
            resume_grace_secs: 120,
            max_errors_before_disconnect: 20,
            error_reset_window_ms: 300_000,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load from `path`, falling back to defaults with a warning if the
    /// file is absent rather than failing startup. A file that exists
    /// but fails to parse is still an error — only *absence* is
    /// tolerated.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::apply_env_overrides(Self::default()));
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };

        let config: NodeConfig = json5::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Self::apply_env_overrides(config))
    }

    /// Resolve the config file path from `PAN_CONFIG`, defaulting to
    /// `config.json5`.
    pub fn config_path_from_env() -> PathBuf {
        PathBuf::from(env::var("PAN_CONFIG").unwrap_or_else(|_| "config.json5".to_string()))
    }

    /// Apply `PAN_<FIELD>` environment overrides on top of a
    /// file-or-default config. Only the handful of fields an
    /// operator is likely to override per-deployment (ports, log level)
    /// are wired; anything else stays config-file-only.
    fn apply_env_overrides(mut config: Self) -> Self {
        if let Ok(v) = env::var("PAN_AGENT_PORT") {
            if let Ok(port) = v.parse() {
                config.agent_port = port;
            }
        }
        if let Ok(v) = env::var("PAN_PEER_PORT") {
            if let Ok(port) = v.parse() {
                config.peer_port = port;
            }
        }
        if let Ok(v) = env::var("PAN_LOG_LEVEL") {
            config.log_level = v;
        }
        if let Ok(v) = env::var("PAN_NODE_IDENTIFIER") {
            config.node_identifier = Some(v);
        }
        if let Ok(v) = env::var("PAN_ALLOW_UNTRUSTED_AGENTS") {
            config.allow_untrusted_agents = v == "1" || v.eq_ignore_ascii_case("true");
        }
        config
    }

    pub fn crash_on_corrupt_policy(&self) -> CrashOnCorrupt {
        if self.crash_on_corrupt {
            CrashOnCorrupt::Fatal
        } else {
            CrashOnCorrupt::Regenerate
        }
    }

    pub fn agent_server_config(&self) -> AgentServerConfig {
        AgentServerConfig {
            port: self.agent_port,
            spam: SpamGuardConfig {
                window_seconds: self.spam_window_seconds,
                message_limit: self.spam_message_limit,
                disconnect_threshold: self.spam_disconnect_threshold,
                max_refill_seconds: self.spam_window_seconds,
            },
            max_errors_before_disconnect: self.max_errors_before_disconnect,
            error_reset_window: std::time::Duration::from_millis(self.error_reset_window_ms),
            connect_timeout: std::time::Duration::from_secs(self.connect_timeout_secs),
            resume_grace: std::time::Duration::from_secs(self.resume_grace_secs),
        }
    }

    pub fn auth_manager_config(&self) -> AuthManagerConfig {
        AuthManagerConfig {
            order: self.auth_method_order.clone(),
            max_tries: self.auth_max_tries,
            timeout_ms: self.auth_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json5");
        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.agent_port, 5295);
        assert_eq!(config.peer_port, 5874);
    }

    #[test]
    fn json5_file_with_comments_and_trailing_commas_parses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json5");
        std::fs::write(
            &path,
            r#"{
                // operator override
                agent_port: 6000,
                peer_port: 6001,
            }"#,
        )
        .unwrap();

        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.agent_port, 6000);
        assert_eq!(config.peer_port, 6001);
    }

    #[test]
    fn malformed_existing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json5");
        std::fs::write(&path, "{ not json5 at all !!!").unwrap();
        assert!(NodeConfig::load(&path).is_err());
    }

    #[test]
    fn env_override_takes_precedence_over_default() {
        std::env::set_var("PAN_AGENT_PORT", "9999");
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json5");
        let config = NodeConfig::load(&path).unwrap();
        std::env::remove_var("PAN_AGENT_PORT");
        assert_eq!(config.agent_port, 9999);
    }
}
