//! Nim Coordinator Server
//!
//! Pairs players into misère Nim sessions and relays game state over
//! WebSocket.

use std::sync::Arc;
use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nim_coordinator::{config::ServerConfig, GameServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env().context("invalid configuration")?;

    info!("Nim Coordinator v{}", config.version);
    info!("Initial piles: {:?}", config.coordinator.initial_piles);
    info!("Pairing: {}", config.coordinator.pairing);
    info!(
        "Eviction grace: {:?} finished, {:?} abandoned",
        config.coordinator.reaper.finished_grace,
        config.coordinator.reaper.abandoned_grace
    );

    let server = Arc::new(GameServer::new(config));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await.context("server failed")?;
    info!("Server stopped");

    Ok(())
}
