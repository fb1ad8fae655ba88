//! Error taxonomy shared across components.
//!
//! Each enum below belongs to the one component that raises it
//! (identity, trust config, token decoding); the Agent Server's own
//! per-frame close/count/reply decisions are made inline at each call
//! site rather than through a shared frame-failure enum, matching the
//! surrounding adapters' per-branch `send_control` style.

use thiserror::Error;

/// Errors raised while resolving or persisting the node's identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read persisted node_id at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist node_id at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("persisted node_id at {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("a node_id setter capability has already been issued")]
    SetterAlreadyIssued,

    #[error("rejected node_id: not a well-formed UUID")]
    MalformedNodeId,
}

/// Errors raised while loading or evaluating the trusted-issuer config.
#[derive(Debug, Error)]
pub enum TrustConfigError {
    #[error("failed to read trusted-issuer config at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse trusted-issuer config at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while decoding a bearer token's structural claims.
#[derive(Debug, Error)]
pub enum TokenDecodeError {
    #[error("token is not valid base64url: {0}")]
    Encoding(String),

    #[error("decoded token is not valid JSON claims: {0}")]
    Claims(String),
}
