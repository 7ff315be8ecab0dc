//! # beammesh Node
//!
//! Entry point for a standalone overlay node. Loads a TOML config,
//! starts the node, and runs until interrupted.
//!
//! ```text
//! mesh-node <config.toml>
//! ```

use anyhow::{Context, Result};
use mesh_node::{NodeConfig, NodeHandle};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .context("usage: mesh-node <config.toml>")?;
    let config = NodeConfig::load(&config_path)
        .with_context(|| format!("loading config from {config_path}"))?;

    info!("===========================================");
    info!("  beammesh node v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");

    let node = NodeHandle::start(config).await?;
    info!(
        device = node.device_id(),
        addr = %node.public_addr(),
        "node is running, press Ctrl+C to stop"
    );

    // Surface peer churn on the console while we run.
    let mut events = node.subscribe_events();
    let event_logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(?event, "peer event");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down gracefully...");
    node.stop().await;
    event_logger.abort();

    Ok(())
}
