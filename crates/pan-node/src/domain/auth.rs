//! Auth Manager — ordered, retrying, timed dispatch over
//! pluggable auth methods.
//!
//! Built on `DashMap` plus atomic per-method attempt counters, the same
//! shape as a request/response correlation store, adapted here to
//! ordered-method-retry-with-timeout. A caller `.await`s `authenticate`
//! directly rather than registering a callback, which also removes the
//! reentrancy hazard a callback-driven design would carry: there is no
//! separate stack frame a synchronous resubmission could observe
//! mid-flight. The pending map survives regardless, since it is also how
//! `pending_count()` and the per-method attempt stats are exposed for
//! diagnostics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::trust::TrustValidator;

/// Result of one method's authentication attempt.
#[derive(Debug, Clone)]
pub enum AuthMethodOutcome {
    Success { agent_name: String, token: String },
    Failure { error: String },
}

/// A pluggable auth method, raced against a per-attempt timeout by the
/// manager. `"local"` is the only method wired in today; the trait exists
/// so a future `"special-agent"` method can be added without touching
/// the manager's retry logic.
#[async_trait]
pub trait AuthMethod: Send + Sync {
    fn name(&self) -> &str;
    async fn attempt(&self, payload: &Value) -> AuthMethodOutcome;
}

/// Tunables for one manager instance.
#[derive(Debug, Clone)]
pub struct AuthManagerConfig {
    /// Method names to try, in order.
    pub order: Vec<String>,
    pub max_tries: u32,
    pub timeout_ms: u64,
}

impl Default for AuthManagerConfig {
    fn default() -> Self {
        Self {
            order: vec!["local".to_string()],
            max_tries: 3,
            timeout_ms: 5_000,
        }
    }
}

/// The final result of `authenticate`.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub success: bool,
    pub agent_name: Option<String>,
    pub token: Option<String>,
    pub error: Option<String>,
}

#[derive(Default)]
struct AuthStats {
    total_submitted: AtomicU64,
    total_succeeded: AtomicU64,
    total_failed: AtomicU64,
}

struct PendingAuthRequest {
    started_at: Instant,
}

/// Newtype id for an in-flight auth request, used only for the pending
/// map / diagnostics. The request is removed from the pending map before
/// its result is returned, so a reentrant submission never observes
/// stale state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthRequestId(Uuid);

impl AuthRequestId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

pub struct AuthManager {
    methods: HashMap<String, Arc<dyn AuthMethod>>,
    config: AuthManagerConfig,
    pending: DashMap<AuthRequestId, PendingAuthRequest>,
    stats: AuthStats,
}

impl AuthManager {
    pub fn new(config: AuthManagerConfig, methods: Vec<Arc<dyn AuthMethod>>) -> Self {
        let methods = methods.into_iter().map(|m| (m.name().to_string(), m)).collect();
        Self {
            methods,
            config,
            pending: DashMap::new(),
            stats: AuthStats::default(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Dispatch `payload` through `config.order`, racing each method
    /// against `timeout_ms` and retrying the next method on failure or
    /// timeout, for exactly `max_tries` attempts total: the loop stops
    /// before a try that would exceed `max_tries`, so at most
    /// `max_tries` methods are ever attempted.
    pub async fn submit_auth_request(&self, payload: Value) -> AuthResult {
        let request_id = AuthRequestId::new();
        self.pending.insert(
            request_id,
            PendingAuthRequest {
                started_at: Instant::now(),
            },
        );
        self.stats.total_submitted.fetch_add(1, Ordering::Relaxed);

        let mut tries = 0u32;
        let mut last_error = "no auth methods configured".to_string();

        for method_name in &self.config.order {
            if tries >= self.config.max_tries {
                break;
            }
            let Some(method) = self.methods.get(method_name) else {
                warn!(method = %method_name, "auth method not registered, skipping");
                continue;
            };

            tries += 1;
            let attempt = tokio::time::timeout(
                Duration::from_millis(self.config.timeout_ms),
                method.attempt(&payload),
            )
            .await;

            match attempt {
                Ok(AuthMethodOutcome::Success { agent_name, token }) => {
                    self.pending.remove(&request_id);
                    self.stats.total_succeeded.fetch_add(1, Ordering::Relaxed);
                    debug!(method = %method_name, agent_name = %agent_name, "auth succeeded");
                    return AuthResult {
                        success: true,
                        agent_name: Some(agent_name),
                        token: Some(token),
                        error: None,
                    };
                }
                Ok(AuthMethodOutcome::Failure { error }) => {
                    last_error = error;
                }
                Err(_) => {
                    last_error = format!("auth method {method_name} timed out");
                }
            }
        }

        self.pending.remove(&request_id);
        self.stats.total_failed.fetch_add(1, Ordering::Relaxed);
        AuthResult {
            success: false,
            agent_name: None,
            token: None,
            error: Some(last_error),
        }
    }
}

/// The `"local"` auth method: validates the bearer token
/// against the configured agent-trust [`TrustValidator`].
pub struct LocalAuthMethod {
    trust_validator: Arc<TrustValidator>,
    allow_untrusted_agents: bool,
}

impl LocalAuthMethod {
    pub fn new(trust_validator: Arc<TrustValidator>, allow_untrusted_agents: bool) -> Self {
        Self {
            trust_validator,
            allow_untrusted_agents,
        }
    }
}

#[async_trait]
impl AuthMethod for LocalAuthMethod {
    fn name(&self) -> &str {
        "local"
    }

    async fn attempt(&self, payload: &Value) -> AuthMethodOutcome {
        let Some(token) = payload.get("token").and_then(Value::as_str) else {
            return AuthMethodOutcome::Failure {
                error: "missing token".to_string(),
            };
        };

        if self.allow_untrusted_agents {
            return match self.trust_validator.validate_token(token) {
                Ok(claims) => AuthMethodOutcome::Success {
                    agent_name: claims.identifier.unwrap_or(claims.iss),
                    token: token.to_string(),
                },
                Err(e) => AuthMethodOutcome::Failure {
                    error: format!("token decode failed: {e}"),
                },
            };
        }

        let extra_tokens: Vec<String> = payload
            .get("tokens")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let result = self
            .trust_validator
            .is_token_trusted(token, &extra_tokens, &["agent-connect"]);

        if result.trusted {
            let agent_name = result
                .decoded
                .and_then(|d| d.identifier.or(Some(d.iss)))
                .unwrap_or_else(|| result.issuer.clone().unwrap_or_default());
            AuthMethodOutcome::Success {
                agent_name,
                token: token.to_string(),
            }
        } else {
            AuthMethodOutcome::Failure {
                error: result.reason.unwrap_or_else(|| "not trusted".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct AlwaysFail;
    #[async_trait]
    impl AuthMethod for AlwaysFail {
        fn name(&self) -> &str {
            "always-fail"
        }
        async fn attempt(&self, _payload: &Value) -> AuthMethodOutcome {
            AuthMethodOutcome::Failure {
                error: "nope".to_string(),
            }
        }
    }

    struct AlwaysSucceed;
    #[async_trait]
    impl AuthMethod for AlwaysSucceed {
        fn name(&self) -> &str {
            "always-succeed"
        }
        async fn attempt(&self, _payload: &Value) -> AuthMethodOutcome {
            AuthMethodOutcome::Success {
                agent_name: "agent-x".to_string(),
                token: "tok".to_string(),
            }
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_method() {
        let manager = AuthManager::new(
            AuthManagerConfig {
                order: vec!["always-succeed".to_string()],
                max_tries: 3,
                timeout_ms: 1_000,
            },
            vec![Arc::new(AlwaysSucceed)],
        );
        let result = manager.submit_auth_request(json!({})).await;
        assert!(result.success);
        assert_eq!(result.agent_name.as_deref(), Some("agent-x"));
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn falls_through_to_next_method_on_failure() {
        let manager = AuthManager::new(
            AuthManagerConfig {
                order: vec!["always-fail".to_string(), "always-succeed".to_string()],
                max_tries: 3,
                timeout_ms: 1_000,
            },
            vec![Arc::new(AlwaysFail), Arc::new(AlwaysSucceed)],
        );
        let result = manager.submit_auth_request(json!({})).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn stops_at_exactly_max_tries() {
        let manager = AuthManager::new(
            AuthManagerConfig {
                order: vec![
                    "always-fail".to_string(),
                    "always-fail".to_string(),
                    "always-succeed".to_string(),
                ],
                max_tries: 2,
                timeout_ms: 1_000,
            },
            vec![Arc::new(AlwaysFail), Arc::new(AlwaysSucceed)],
        );
        // Only 2 tries permitted, and both land on "always-fail" before
        // "always-succeed" would ever be reached.
        let result = manager.submit_auth_request(json!({})).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn local_method_accepts_trusted_token() {
        use crate::domain::trust::TrustValidator;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine as _;
        use std::time::Duration;
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let path = dir.path().join("trusted.json");
        std::fs::write(
            &path,
            json!({"trusted_issuers": {"urn:alice": ["agent-connect"]}}).to_string(),
        )
        .unwrap();

        let validator = Arc::new(TrustValidator::new(path, Duration::from_secs(30)));
        validator.load_initial().unwrap();

        let method = LocalAuthMethod::new(validator, false);
        let payload_b64 =
            URL_SAFE_NO_PAD.encode(json!({"iss": "urn:alice", "purposes": ["agent-connect"]}).to_string());
        let token = format!("h.{payload_b64}.s");

        let outcome = method.attempt(&json!({"token": token})).await;
        assert!(matches!(outcome, AuthMethodOutcome::Success { .. }));
    }
}
