//! Prometheus metrics server.
//!
//! Besides `/metrics` and `/health`, the server exposes read-only JSON views
//! of the coordinator counters and of player statistics.

use axum::extract::Path;
use axum::http::StatusCode;
use axum::{Extension, Json, Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::coordinator::{ParserCoordinatorStats, SourceStatsSnapshot};
use crate::error::{MetricsError, PrometheusInitSnafu};
use crate::stats::{PlayerStatsAggregator, PlayerSummary};

/// Shared state read by the JSON endpoints.
#[derive(Debug, Clone)]
pub struct ObservabilityState {
    pub sources: Arc<ParserCoordinatorStats>,
    /// Present when player statistics are enabled.
    pub players: Option<Arc<PlayerStatsAggregator>>,
}

/// Initialize the Prometheus metrics exporter with an HTTP endpoint.
///
/// Serves:
/// - `/metrics` - Prometheus metrics in text format
/// - `/health` - Health check endpoint (returns 200 OK)
/// - `/stats` - per-source counters as JSON
/// - `/players/{server_id}` - leaderboard of one server as JSON
pub fn init(addr: SocketAddr, state: ObservabilityState) -> Result<(), MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    tokio::spawn(run_server(addr, router(handle, state)));

    Ok(())
}

fn router(handle: PrometheusHandle, state: ObservabilityState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/players/{server_id}", get(players_handler))
        .layer(Extension(handle))
        .layer(Extension(state))
}

async fn run_server(addr: SocketAddr, app: Router) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server to {}: {}", addr, e);
            return;
        }
    };
    info!("Metrics server listening on {}", addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Metrics server error: {}", e);
    }
}

async fn metrics_handler(Extension(handle): Extension<PrometheusHandle>) -> String {
    handle.render()
}

async fn health_handler() -> &'static str {
    "ok\n"
}

async fn stats_handler(
    Extension(state): Extension<ObservabilityState>,
) -> Json<BTreeMap<String, SourceStatsSnapshot>> {
    Json(state.sources.snapshot_all())
}

async fn players_handler(
    Extension(state): Extension<ObservabilityState>,
    Path(server_id): Path<String>,
) -> Result<Json<Vec<PlayerSummary>>, StatusCode> {
    let players = state.players.ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(players.leaderboard(&server_id)))
}
