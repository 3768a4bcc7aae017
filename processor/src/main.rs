//! Dubflow processor service: pulls queued translation tasks until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use tokio::sync::Notify;

use dubflow_lib::core::settings::ProcessorConfig;

#[derive(Parser)]
#[command(name = "dubflow-processor", version, about = "Video translation task processor")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short = 'f', long = "config", default_value = "config.json")]
    config: PathBuf,

    /// Write rolling log files to this directory (overrides the config file)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ProcessorConfig::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    if args.log_dir.is_some() {
        config.log_dir = args.log_dir;
    }
    dubflow_lib::init_logging(config.log_dir.as_deref());

    let shutdown = Arc::new(Notify::new());
    tokio::spawn({
        let shutdown = Arc::clone(&shutdown);
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Interrupt received, stopping task pull loop"),
                Err(e) => tracing::error!("Failed to listen for interrupt: {}", e),
            }
            shutdown.notify_one();
        }
    });

    dubflow_lib::run_service(config, shutdown)
        .await
        .context("Processor stopped with an error")?;

    tracing::info!("Processor stopped");
    Ok(())
}
