//! I/O-facing glue: the two socket-owning servers and the pure-dispatch
//! helpers they hand validated frames to.

pub mod agent_router;
pub mod agent_server;
pub mod control_handlers;
pub mod peer_server;
