use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use acdn::{config::Config, logging};

#[derive(Parser, Debug)]
#[command(name = "acdn")]
#[command(about = "Configuration and logging bootstrap for ACDN")]
struct Args {
    /// Deployment name (overrides ACDN_ENV)
    #[arg(long)]
    env: Option<String>,

    /// Project base directory (defaults to the crate root)
    #[arg(long)]
    base_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.base_dir {
        Some(dir) => Config::load_with_base_dir(args.env.as_deref(), dir),
        None => Config::load(args.env.as_deref()),
    }
    .context("Failed to assemble configuration")?;

    // No document store client is wired in here; subsystems that own one
    // pass it to `init_tracing` themselves.
    let log_guard = logging::init_tracing(&config, None)?;

    info!("Starting ACDN ({})...", config.env);
    config.log_summary();

    let enabled = config.get_enabled_exchanges();
    if enabled.is_empty() {
        warn!("No exchanges enabled - set <EXCHANGE>_API_KEY and <EXCHANGE>_API_SECRET");
    } else {
        info!(
            "Enabled exchanges: {}",
            enabled
                .iter()
                .map(|e| e.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    info!(
        data = %config.data_dir.display(),
        logs = %config.logs_dir.display(),
        checkpoints = %config.checkpoint_dir().display(),
        "Working directories ready"
    );

    log_guard.shutdown().await;
    Ok(())
}
