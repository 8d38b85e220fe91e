//! Agent Connectivity Hub - binary entry point.
//!
//! Starts the hub, waits for ctrl-c, and shuts down cleanly.

use std::sync::Arc;

use agent_hub::{Hub, HubConfig};
use anyhow::Result;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("agent_hub=info".parse()?),
        )
        .init();

    info!("starting agent connectivity hub");

    let config = HubConfig::default();
    config.validate()?;
    let hub = Arc::new(Hub::new(config, vec![]));

    hub.start().await?;
    info!("hub is ready");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    hub.stop().await?;
    info!("hub stopped");
    Ok(())
}
