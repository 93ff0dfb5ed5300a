//! Prometheus metrics exporter and scrape endpoint.

use std::sync::OnceLock;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Must run before any counter is touched
/// so nothing lands in the void.
pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

/// Pre-register the engine's counters at zero so dashboards see every
/// series from the first scrape, not the first event.
pub fn initialize_engine_metrics() {
    for name in [
        "ingest.ticks",
        "ingest.controller.parse_dropped",
        "ingest.transceivers.unmatched",
        "vatsim.fetch.retry",
        "vatsim.fetch.exhausted",
        "persistence.flights.failed_batches",
        "persistence.controllers.failed_batches",
        "persistence.transceivers.failed_batches",
        "summarizer.flight.summaries",
        "summarizer.flight.failed",
        "summarizer.controller.summaries",
        "summarizer.controller.failed",
    ] {
        metrics::counter!(name).absolute(0);
    }
}

async fn metrics_handler() -> String {
    match METRICS_HANDLE.get() {
        Some(handle) => handle.render(),
        None => String::new(),
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Serve `/metrics` and `/healthz` until the process exits.
pub async fn start_metrics_server(port: u16) {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health_handler));

    let addr = format!("0.0.0.0:{}", port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!("Failed to bind metrics server on {}: {}", addr, e);
            return;
        }
    };

    info!("Metrics server listening on {}", addr);
    if let Err(e) = axum::serve(listener, app).await {
        warn!("Metrics server stopped: {}", e);
    }
}
