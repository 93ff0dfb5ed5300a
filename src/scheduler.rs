//! Cooperative scheduler for the three periodic tracks: ingest, flight
//! summarization, controller summarization.
//!
//! Each track is serial with itself (a tick that overruns its period causes
//! later ticks to be skipped, not queued) and isolated from the others: no
//! failure crosses a track boundary. Shutdown cancels all tracks and grants
//! in-flight ticks a bounded grace period.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::TraconError;
use crate::ingestion::IngestService;
use crate::summarizer::SummarizationService;

/// How long in-flight ticks get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Consecutive transient database failures on one track before the fault is
/// treated as unrecoverable and the whole process is brought down.
const MAX_CONSECUTIVE_DB_FAILURES: u32 = 10;

pub struct Scheduler {
    ingest: Arc<IngestService>,
    summarizer: SummarizationService,
    poll_interval: Duration,
    summary_interval: Duration,
    shutdown: CancellationToken,
    fatal: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        ingest: Arc<IngestService>,
        summarizer: SummarizationService,
        poll_interval: Duration,
        summary_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ingest,
            summarizer,
            poll_interval,
            summary_interval,
            shutdown,
            fatal: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run all tracks until the shutdown token fires or a track declares an
    /// unrecoverable fault. Returns `Err` only for the fatal case.
    pub async fn run(self) -> Result<()> {
        info!(
            "Scheduler starting: ingest every {:?}, summary passes every {:?}",
            self.poll_interval, self.summary_interval
        );

        let ingest = self.ingest.clone();
        let ingest_track = spawn_track(
            "ingest",
            self.poll_interval,
            self.shutdown.clone(),
            self.fatal.clone(),
            move || {
                let ingest = ingest.clone();
                async move { ingest.run_tick().await.map(|_| ()) }
            },
        );

        let summarizer = self.summarizer.clone();
        let flight_track = spawn_track(
            "flight-summary",
            self.summary_interval,
            self.shutdown.clone(),
            self.fatal.clone(),
            move || {
                let summarizer = summarizer.clone();
                async move {
                    summarizer
                        .run_flight_pass()
                        .await
                        .map(|_| ())
                        .map_err(TraconError::DatabaseTransient)
                }
            },
        );

        let summarizer = self.summarizer.clone();
        let controller_track = spawn_track(
            "controller-summary",
            self.summary_interval,
            self.shutdown.clone(),
            self.fatal.clone(),
            move || {
                let summarizer = summarizer.clone();
                async move {
                    summarizer
                        .run_controller_pass()
                        .await
                        .map(|_| ())
                        .map_err(TraconError::DatabaseTransient)
                }
            },
        );

        self.shutdown.cancelled().await;
        info!(
            "Shutdown requested; allowing in-flight ticks up to {:?}",
            SHUTDOWN_GRACE
        );

        let mut handles = vec![ingest_track, flight_track, controller_track];
        let drain = async {
            for handle in &mut handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("Grace period expired; aborting remaining ticks");
            for handle in &handles {
                handle.abort();
            }
        }

        if self.fatal.load(Ordering::SeqCst) {
            bail!("scheduler stopped on unrecoverable database fault");
        }
        info!("Scheduler stopped");
        Ok(())
    }
}

/// Drive one periodic track. Skips ticks that would overlap a running one,
/// confines errors to the track, and escalates persistent database failure
/// by setting the fatal flag and cancelling the whole scheduler.
fn spawn_track<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    fatal: Arc<AtomicBool>,
    mut work: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), TraconError>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut consecutive_db_failures = 0u32;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let started = std::time::Instant::now();
                    match work().await {
                        Ok(()) => {
                            consecutive_db_failures = 0;
                        }
                        Err(TraconError::UpstreamUnavailable(msg)) => {
                            // Expected transient condition: skip this tick.
                            warn!("[{}] upstream unavailable, tick skipped: {}", name, msg);
                            metrics::counter!("scheduler.tick.skipped", "track" => name)
                                .increment(1);
                        }
                        Err(TraconError::DatabaseTransient(e)) => {
                            consecutive_db_failures += 1;
                            error!(
                                "[{}] database failure ({} consecutive): {}",
                                name, consecutive_db_failures, e
                            );
                            if consecutive_db_failures >= MAX_CONSECUTIVE_DB_FAILURES {
                                error!("[{}] database failure persists; stopping scheduler", name);
                                fatal.store(true, Ordering::SeqCst);
                                shutdown.cancel();
                                break;
                            }
                        }
                        Err(e) => {
                            error!("[{}] tick failed: {}", name, e);
                        }
                    }
                    metrics::histogram!("scheduler.tick.duration_ms", "track" => name)
                        .record(started.elapsed().as_millis() as f64);
                }
            }
        }
        info!("[{}] track stopped", name);
    })
}
