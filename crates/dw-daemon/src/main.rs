//! driftwarden: watches environments for drift against approved baselines.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use dw_core::config::{Config, LogFormat};
use dw_daemon::daemon::Daemon;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "driftwarden", version, about)]
struct Cli {
    /// Config file (default: ~/.driftwarden/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single check cycle and exit.
    #[arg(long)]
    once: bool,

    /// Emit logs as JSON lines regardless of config.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    let json = cli.json_logs || config.general.log_format == LogFormat::Json;
    dw_telemetry::logging::init(&config.general.service_name, &config.general.log_level, json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environments = config.environments.len(),
        "driftwarden starting"
    );

    let daemon = Daemon::new(config).await?;

    if cli.once {
        let summary = daemon.run_once().await;
        info!(
            checked = summary.outcomes.len(),
            drifting = summary.drifting(),
            errors = summary.errors.len(),
            "single cycle finished"
        );
        return Ok(());
    }

    let shutdown = daemon.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
        shutdown.trigger();
    });

    daemon.run().await
}
