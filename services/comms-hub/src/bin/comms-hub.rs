//! Diagnostics entry point: builds every manager from the environment,
//! probes all configured providers and prints a JSON report.

use anyhow::{Context, Result};
use comms_hub::CommsHub;
use serde_json::json;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("comms_hub=info".parse()?),
        )
        .init();

    info!("Starting communications hub diagnostics");

    let hub = CommsHub::from_env().context("Failed to build communications hub")?;

    let connections = hub.test_all_connections().await;
    if !connections.all_healthy() {
        warn!("One or more providers failed their connection test");
    }

    let report = json!({
        "connections": connections,
        "stats": hub.all_stats(),
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize report")?
    );

    Ok(())
}
