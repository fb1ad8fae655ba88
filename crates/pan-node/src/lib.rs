//! # pan-node
//!
//! The node runtime: the fourteen always-on components of a PAN overlay
//! node plus the TCP frame transport and the `main` composition root.

pub mod adapters;
pub mod config;
pub mod container;
pub mod domain;
pub mod transport;

pub use config::NodeConfig;
pub use container::NodeContext;
