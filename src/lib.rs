//! killfeed: incremental ingestion of game-server kill logs.
//!
//! Game servers drop timestamped CSV kill logs into a directory reachable over
//! SFTP. For every configured server this library periodically lists that
//! directory, fetches files it has not ingested yet, parses each row into a
//! [`CanonicalEvent`](event::CanonicalEvent), publishes the events to a sink,
//! and persists a per-server watermark so nothing is published twice.
//!
//! # Example
//!
//! ```ignore
//! use killfeed::{Config, RunOptions, run};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), killfeed::error::AppError> {
//!     let config = Config::from_file("killfeed.yaml")?;
//!     let summary = run(config, RunOptions::default()).await?;
//!     println!("{} sources stopped cleanly", summary.completed);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod metrics;
pub mod parser;
pub mod paths;
pub mod remote;
pub mod runner;
pub mod signal;
pub mod sink;
pub mod stats;

use snafu::prelude::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use checkpoint::{JsonWatermarkStore, WatermarkStoreRef};
use config::{ServerConfigProvider, ServerSourceConfig, SinkKind, Transport};
use coordinator::{IngestionCoordinator, ParserCoordinatorStats};
use error::{
    AddressParseSnafu, AppError, MetricsSnafu, NoValidSourcesSnafu, OpenSinkSnafu, OpenStoreSnafu,
};
use metrics::ObservabilityState;
use remote::{
    LocalConnector, RemoteConnectorRef, RemoteTimeouts, SftpConnector, SftpCredentials,
    TimedChannel,
};
use runner::{Schedule, SourceRunner, SourceTask};
use sink::{EventSinkRef, LogSink, NdjsonFileSink, PlayerStatsSink};
use stats::PlayerStatsAggregator;

// Re-export main types
pub use config::Config;
pub use runner::RunSummary;

/// Process-level switches that do not belong in the config file.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Run one cycle per source, then exit.
    pub once: bool,
}

/// Build the remote connector for one source.
pub fn connector_for(source: &ServerSourceConfig, timeouts: &RemoteTimeouts) -> RemoteConnectorRef {
    match source.transport {
        Transport::Sftp => Arc::new(SftpConnector::new(
            source.host.clone(),
            source.port,
            SftpCredentials {
                username: source.username.clone(),
                password: source.password.clone(),
            },
            timeouts.read,
        )),
        Transport::Local => Arc::new(LocalConnector::new(&source.root_path)),
    }
}

async fn build_sink(
    config: &Config,
    players: Option<Arc<PlayerStatsAggregator>>,
) -> Result<EventSinkRef, AppError> {
    let sink: EventSinkRef = match config.sink.kind {
        SinkKind::Ndjson => Arc::new(
            NdjsonFileSink::open(&config.sink.path)
                .await
                .context(OpenSinkSnafu)?,
        ),
        SinkKind::Log => Arc::new(LogSink),
    };
    Ok(match players {
        Some(players) => Arc::new(PlayerStatsSink::new(sink, players)),
        None => sink,
    })
}

/// Run every configured source until shutdown (or for one cycle each).
pub async fn run(config: Config, options: RunOptions) -> Result<RunSummary, AppError> {
    let sources = config.server_configs();
    ensure!(
        !sources.is_empty(),
        NoValidSourcesSnafu {
            rejected: config.server_sources().rejected.len(),
        }
    );

    let store: WatermarkStoreRef = Arc::new(
        JsonWatermarkStore::open(&config.state.path)
            .await
            .context(OpenStoreSnafu)?,
    );
    let players = config
        .sink
        .player_stats
        .then(|| Arc::new(PlayerStatsAggregator::new()));
    let sink = build_sink(&config, players.clone()).await?;
    let stats = Arc::new(ParserCoordinatorStats::new());

    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(
            addr,
            ObservabilityState {
                sources: stats.clone(),
                players,
            },
        )
        .context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    let shutdown = CancellationToken::new();
    let schedule = Schedule {
        interval: config.polling.interval(),
        jitter_secs: config.polling.jitter_secs,
        initial_backoff: config.polling.initial_backoff(),
        max_backoff: config.polling.max_backoff(),
        once: options.once,
    };

    let tasks: Vec<SourceTask> = sources
        .iter()
        .map(|source| {
            info!(
                server_id = %source.server_id,
                target = %source.target(),
                csv_dir = %source.paths().csv_dir,
                "Configured source"
            );
            let channel = TimedChannel::new(connector_for(source, &config.remote), config.remote);
            let coordinator = IngestionCoordinator::new(
                source.coordinator_settings(&config.polling),
                channel,
                store.clone(),
                sink.clone(),
                stats.clone(),
            );
            SourceTask::new(coordinator, schedule, shutdown.clone())
        })
        .collect();

    let runner = SourceRunner::new(tasks, shutdown, config.polling.jitter_secs);
    runner.spawn_shutdown_handler();
    Ok(runner.run().await)
}
