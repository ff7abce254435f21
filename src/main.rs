use anyhow::Result;
use clap::Parser;
use tracing::info;

use roundsmith::config::BaseConfig;
use roundsmith::orchestrator::Orchestrator;
use roundsmith::{shutdown, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize telemetry
    telemetry::init();
    info!("Starting roundsmith");

    // Parse configuration from CLI arguments and environment
    let config = BaseConfig::parse();
    info!(
        "Configuration: store={:?}, execution={:?}, round_duration_secs={}",
        config.store_type, config.execution_type, config.round_duration_secs
    );

    let orchestrator = Orchestrator::initialize(config)?;

    let (trigger, shutdown) = shutdown::channel();
    trigger.signal_on(tokio::signal::ctrl_c());

    orchestrator.run(shutdown).await?;

    info!("Roundsmith shutdown complete");
    Ok(())
}
