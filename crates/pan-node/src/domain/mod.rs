//! The fourteen always-on components, grouped as a plain
//! hexagonal "domain" layer — no feature flags, no dynamic registry (see
//! DESIGN.md's "typed-container composition root" note). Each submodule
//! is independently testable and has no dependency on the transport or
//! adapter layers.

pub mod agent_registry;
pub mod auth;
pub mod connection;
pub mod groups;
pub mod identity;
pub mod peer_registry;
pub mod spam;
pub mod trust;
pub mod validate;
