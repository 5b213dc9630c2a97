//! killfeed: polls game servers for CSV kill logs and publishes each kill once.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use killfeed::config::ServerConfigProvider;
use killfeed::error::{AppError, ConfigSnafu};
use killfeed::{Config, RunOptions};

/// Incremental kill-log ingestion.
#[derive(Parser, Debug)]
#[command(name = "killfeed")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Validate configuration and print resolved paths without connecting.
    #[arg(long)]
    dry_run: bool,

    /// Run a single cycle per source and exit.
    #[arg(long)]
    once: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("killfeed starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        let sources = config.server_sources();
        for error in &sources.rejected {
            info!("  rejected: {}", error);
        }
        for source in config.server_configs() {
            let paths = source.paths();
            info!("Source {} ({:?} {})", source.server_id, source.transport, source.target());
            info!("  base: {}", paths.base_dir);
            info!("  logs: {}", paths.log_file);
            info!("  csv:  {}", paths.csv_dir);
            info!("  window: {} days", source.polling_window_days);
        }
        info!("State: {}", config.state.path);
        info!("Sink: {:?} {}", config.sink.kind, config.sink.path);
        info!("Configuration is valid");
        return Ok(());
    }

    let summary = killfeed::run(config, RunOptions { once: args.once }).await?;

    info!("killfeed stopped");
    info!("  Sources completed: {}", summary.completed);
    info!("  Sources failed: {}", summary.failed);
    info!("  Sources panicked: {}", summary.panicked);

    Ok(())
}
