//! The `run` command: wire every component and drive the scheduler until
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::controllers_repo::ControllersRepository;
use crate::db;
use crate::filters::FilterPipeline;
use crate::flights_repo::FlightsRepository;
use crate::ingestion::IngestService;
use crate::interactions::InteractionDetector;
use crate::scheduler::Scheduler;
use crate::schema_check;
use crate::summarizer::SummarizationService;
use crate::transceivers_repo::TransceiversRepository;
use crate::vatsim_client::VatsimClient;

pub async fn handle_run(config: AppConfig) -> Result<()> {
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", "run");
    });

    crate::metrics::init_metrics()?;
    crate::metrics::initialize_engine_metrics();
    let metrics_port: u16 = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(9090);
    tokio::spawn(async move {
        crate::metrics::start_metrics_server(metrics_port).await;
    });

    let pool = db::create_pool(&config.database)?;
    schema_check::ensure_schema(&pool).await?;

    let client = VatsimClient::new(config.vatsim.clone())?;
    match client.fetch_status().await {
        Ok(status) => info!(
            "Upstream status: {} data endpoints, {} transceiver endpoints",
            status.data.v3.len(),
            status.data.transceivers.len()
        ),
        Err(e) => warn!("Status feed unavailable at startup (continuing): {}", e),
    }

    // Boundary polygon loads (and caches) here, so a bad file fails startup
    // instead of the first tick.
    let pipeline = Arc::new(FilterPipeline::new(config.filters.clone())?);

    let flights_repo = FlightsRepository::new(pool.clone());
    let controllers_repo = ControllersRepository::new(pool.clone());
    let transceivers_repo = TransceiversRepository::new(pool.clone());

    let detector = InteractionDetector::new(
        controllers_repo.clone(),
        transceivers_repo.clone(),
        config.interaction,
    );
    let summarizer = SummarizationService::new(
        flights_repo.clone(),
        controllers_repo.clone(),
        transceivers_repo.clone(),
        detector,
        config.completion.clone(),
        &config.service,
    );
    let ingest = Arc::new(IngestService::new(
        client,
        pipeline,
        flights_repo,
        controllers_repo,
        transceivers_repo,
        config.service.batch_size,
    ));

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let scheduler = Scheduler::new(
        ingest,
        summarizer,
        Duration::from_secs(config.vatsim.poll_interval_seconds),
        Duration::from_secs(config.completion.summary_pass_interval_minutes * 60),
        shutdown,
    );
    scheduler.run().await
}

/// Trip the shutdown token on SIGINT or SIGTERM.
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!("Failed to register SIGTERM handler: {}", e);
                    let _ = ctrl_c.await;
                    info!("Received SIGINT, shutting down");
                    shutdown.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("Received SIGINT, shutting down");
        }

        shutdown.cancel();
    });
}
