//! PAN node entry point — a thin composition root.
//!
//! Wires every always-on component in dependency order (identity, bus,
//! trust validators, auth manager, registries, servers) and races
//! `ctrl_c` against a SIGTERM listener for graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info};

use pan_bus::InMemoryEventBus;
use pan_node::adapters::agent_server::AgentServer;
use pan_node::adapters::peer_server::{Peer, PeerServer};
use pan_node::config::NodeConfig;
use pan_node::container::NodeContext;
use pan_node::domain::agent_registry::AgentRegistry;
use pan_node::domain::auth::{AuthManager, LocalAuthMethod};
use pan_node::domain::groups::GroupManager;
use pan_node::domain::identity::IdentityService;
use pan_node::domain::peer_registry::PeerRegistry;
use pan_node::domain::trust::TrustValidator;
use pan_telemetry::TelemetryConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = NodeConfig::config_path_from_env();
    let config = NodeConfig::load(&config_path).context("failed to load node configuration")?;

    let _telemetry = pan_telemetry::init_telemetry(TelemetryConfig {
        service_name: "pan-node".to_string(),
        log_level: config.log_level.clone(),
        json_logs: false,
    })
    .context("failed to initialize logging")?;

    info!(config_path = %config_path.display(), "PAN node starting");

    // Identity Service: resolve/persist node_id, hand out the
    // one-shot setter capability once. Nothing downstream of startup
    // needs to change the id today, so the capability is simply held for
    // the process lifetime rather than given to a subsystem — obtaining
    // it here is what makes a *second* `take_setter()` call elsewhere a
    // compile-time-visible logic error rather than a silent no-op.
    let identity = IdentityService::initialize(
        Some(&config.persist_path),
        config.node_identifier.as_deref(),
        config.crash_on_corrupt_policy(),
    )
    .context("failed to resolve node identity")?;
    let _node_id_setter = identity.take_setter().expect("setter issued exactly once at startup");
    let local_node_id = identity.get_node_id();
    info!(node_id = %local_node_id, "node identity resolved");

    let bus = Arc::new(InMemoryEventBus::new());

    // Trust Validators: one per trust domain. The peer-trust
    // config is load-bearing for the overlay handshake, so a missing file
    // is fatal at startup; the agent-trust config degrades
    // to "every agent token denied until the file appears" since an
    // operator running `allow_untrusted_agents=true` may never ship one.
    let ttl = Duration::from_secs(config.trust_config_ttl_secs);
    let agent_trust = Arc::new(TrustValidator::new(config.trusted_agents_config_file.clone(), ttl));
    if let Err(e) = agent_trust.load_initial() {
        tracing::warn!(error = %e, "agent trust config failed to load at startup, agent auth will deny until it appears");
    }

    let peer_trust = Arc::new(TrustValidator::new(config.trusted_peers_config_file.clone(), ttl));
    peer_trust
        .load_initial()
        .context("trusted_peers_config_file is required and must be readable at startup")?;

    let auth_manager = Arc::new(AuthManager::new(
        config.auth_manager_config(),
        vec![Arc::new(LocalAuthMethod::new(agent_trust, config.allow_untrusted_agents))],
    ));

    let agent_registry = Arc::new(AgentRegistry::new());
    let peer_registry = Arc::new(PeerRegistry::<Peer>::new());
    let group_manager = Arc::new(GroupManager::new());

    let ctx = Arc::new(NodeContext::new(
        local_node_id,
        bus.clone(),
        agent_registry,
        group_manager,
    ));

    let agent_server = AgentServer::new(ctx.clone(), auth_manager, config.agent_server_config());
    let peer_server = PeerServer::new(peer_trust, peer_registry);

    let agent_listener = TcpListener::bind(("0.0.0.0", config.agent_port))
        .await
        .with_context(|| format!("failed to bind agent port {}", config.agent_port))?;
    let peer_listener = TcpListener::bind(("0.0.0.0", config.peer_port))
        .await
        .with_context(|| format!("failed to bind peer port {}", config.peer_port))?;

    info!(port = config.agent_port, "agent server listening");
    info!(port = config.peer_port, "peer server listening");

    let agent_task = tokio::spawn(async move {
        if let Err(e) = agent_server.run(agent_listener).await {
            error!(error = %e, "agent server accept loop exited");
        }
    });
    let peer_task = tokio::spawn(async move {
        if let Err(e) = peer_server.run(peer_listener).await {
            error!(error = %e, "peer server accept loop exited");
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping accept loops");

    agent_task.abort();
    peer_task.abort();

    info!("PAN node shut down");
    Ok(())
}

/// Race `ctrl_c` against a SIGTERM listener. Unix-only
/// signal handling is gated behind `cfg(unix)`; on other platforms
/// `ctrl_c` is the only shutdown trigger.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler, falling back to ctrl_c only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
