//! Metron agent binary
//!
//! Usage:
//!   metron --config config/metron.json

use anyhow::{Context, Result};
use clap::Parser;
use metron::Agent;
use network::Counters;
use relay_config::{load_from_file, MetronConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const ENV_PREFIX: &str = "METRON";

#[derive(Parser, Debug)]
#[command(name = "metron")]
#[command(about = "Telemetry agent forwarding local envelopes to dopplers")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config: MetronConfig = match load_from_file(&args.config, ENV_PREFIX) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("metron: {e:#}");
            return Err(e);
        }
    };
    init_logging(&config.log_level, args.json_logs);

    info!(config = ?args.config, "Starting Metron");
    let agent = Agent::start(&config, Arc::new(Counters::new()))
        .await
        .map_err(|e| {
            error!("Failed to start: {e:#}");
            e
        })?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    let counters = Arc::clone(agent.counters());
    agent.stop().await;
    info!(counters = ?counters.snapshot(), "Final counters");
    Ok(())
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
