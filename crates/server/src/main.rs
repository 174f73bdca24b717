//! Domain Broker - worker process
//!
//! Drains the step queue with a pool of workers and runs the stall and
//! renewal scanners until interrupted.

use anyhow::Context;
use domain_broker_adapters::AppConfig;
use domain_broker_server::{init_tracing, initialize, log_config_summary};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.logging)?;
    info!("Starting domain broker");
    log_config_summary(&config);

    let runtime = initialize(config).await.map_err(|e| {
        error!("Failed to initialize domain broker: {}", e);
        e
    })?;

    runtime
        .run(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C"),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
        })
        .await?;

    info!("Shutdown complete");
    Ok(())
}
