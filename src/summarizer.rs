//! Completion detection and session summarization.
//!
//! A session is complete once its live row has not been updated for the
//! configured threshold. Completion produces a durable summary (flights
//! need a filed departure and arrival; controllers always summarize),
//! copies the live row to the archive, and deletes it once the retention
//! window has elapsed. Summary, archive and delete commit atomically per
//! session key.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use futures_util::{StreamExt, stream};
use tracing::{error, info};

use crate::config::{CompletionConfig, ServiceConfig};
use crate::controllers::Controller;
use crate::controllers_repo::{ControllerFinalizeOutcome, ControllersRepository};
use crate::errors::TraconError;
use crate::flights::Flight;
use crate::flights_repo::{FinalizeOutcome, FlightsRepository};
use crate::interactions::InteractionDetector;
use crate::summaries::{ControllerInteraction, NewControllerSummary, NewFlightSummary};
use crate::transceivers::{EntityType, hz_to_mhz_rounded};
use crate::transceivers_repo::TransceiversRepository;

/// Outcome counters for one summarization pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    pub candidates: usize,
    pub summarized: usize,
    pub archived: usize,
    pub superseded: usize,
    pub failed: usize,
    pub swept: usize,
}

#[derive(Clone)]
pub struct SummarizationService {
    flights_repo: FlightsRepository,
    controllers_repo: ControllersRepository,
    transceivers_repo: TransceiversRepository,
    detector: InteractionDetector,
    completion: CompletionConfig,
    worker_count: usize,
}

impl SummarizationService {
    pub fn new(
        flights_repo: FlightsRepository,
        controllers_repo: ControllersRepository,
        transceivers_repo: TransceiversRepository,
        detector: InteractionDetector,
        completion: CompletionConfig,
        service: &ServiceConfig,
    ) -> Self {
        Self {
            flights_repo,
            controllers_repo,
            transceivers_repo,
            detector,
            completion,
            worker_count: service.worker_count,
        }
    }

    /// One flight summarization pass. Each candidate is processed
    /// independently; a failure affects only its own session.
    pub async fn run_flight_pass(&self) -> Result<PassStats> {
        let now = Utc::now();
        let cutoff = now - Duration::minutes(self.completion.flight_completion_minutes);
        let retention_cutoff = now - Duration::hours(self.completion.flight_retention_hours);

        let candidates = self
            .flights_repo
            .completion_candidates(cutoff)
            .await
            .context("flight completion candidate query failed")?;

        let mut stats = PassStats {
            candidates: candidates.len(),
            ..PassStats::default()
        };

        let outcomes: Vec<_> = stream::iter(candidates)
            .map(|flight| {
                let service = self.clone();
                async move {
                    let callsign = flight.callsign.clone();
                    service
                        .summarize_flight(flight, retention_cutoff)
                        .await
                        .map_err(|cause| TraconError::Summarization { callsign, cause })
                }
            })
            .buffer_unordered(self.worker_count)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Ok(FinalizeOutcome::Completed {
                    summarized,
                    deleted: _,
                }) => {
                    stats.archived += 1;
                    if summarized {
                        stats.summarized += 1;
                    }
                }
                Ok(FinalizeOutcome::Superseded) => stats.superseded += 1,
                Err(e) => {
                    stats.failed += 1;
                    metrics::counter!("summarizer.flight.failed").increment(1);
                    error!("{}", e);
                }
            }
        }

        stats.swept = self
            .flights_repo
            .retention_sweep(retention_cutoff)
            .await
            .unwrap_or_else(|e| {
                error!("Flight retention sweep failed: {}", e);
                0
            });

        if stats.candidates > 0 || stats.swept > 0 {
            info!(
                "Flight pass: {} candidates, {} summarized, {} archived, {} superseded, {} failed, {} swept",
                stats.candidates,
                stats.summarized,
                stats.archived,
                stats.superseded,
                stats.failed,
                stats.swept
            );
        }
        metrics::counter!("summarizer.flight.summaries").increment(stats.summarized as u64);

        Ok(stats)
    }

    async fn summarize_flight(
        &self,
        flight: Flight,
        retention_cutoff: DateTime<Utc>,
    ) -> Result<FinalizeOutcome> {
        // Incomplete plans never produce a summary; the session is still
        // archived and aged out on the same cadence.
        let summary = if flight.has_complete_plan() {
            let interactions = self
                .detector
                .controller_interactions_for_flight(
                    &flight.callsign,
                    flight.logon_time,
                    flight.last_updated,
                )
                .await?;
            let coverage = interaction_coverage_percentage(
                &interactions,
                flight.logon_time,
                flight.last_updated,
            );

            Some(NewFlightSummary {
                callsign: flight.callsign.clone(),
                logon_time: flight.logon_time,
                cid: flight.cid,
                aircraft_type: flight.aircraft_type.clone(),
                departure: flight.departure.clone(),
                arrival: flight.arrival.clone(),
                route: flight.route.clone(),
                deptime: flight.deptime.clone(),
                completion_time: flight.last_updated,
                session_duration_minutes: flight.session_duration_minutes(),
                total_updates: flight.update_count,
                controller_callsigns: serde_json::to_value(&interactions)?,
                controller_time_percentage: coverage,
            })
        } else {
            None
        };

        self.flights_repo
            .finalize_session(
                flight.callsign,
                flight.logon_time,
                flight.last_updated,
                summary,
                retention_cutoff,
            )
            .await
    }

    /// One controller summarization pass, the mirror of the flight pass.
    pub async fn run_controller_pass(&self) -> Result<PassStats> {
        let now = Utc::now();
        let cutoff = now - Duration::minutes(self.completion.controller_completion_minutes);
        let retention_cutoff = now - Duration::hours(self.completion.controller_retention_hours);

        let candidates = self
            .controllers_repo
            .completion_candidates(cutoff)
            .await
            .context("controller completion candidate query failed")?;

        let mut stats = PassStats {
            candidates: candidates.len(),
            ..PassStats::default()
        };

        let outcomes: Vec<_> = stream::iter(candidates)
            .map(|controller| {
                let service = self.clone();
                async move {
                    let callsign = controller.callsign.clone();
                    service
                        .summarize_controller(controller, retention_cutoff)
                        .await
                        .map_err(|cause| TraconError::Summarization { callsign, cause })
                }
            })
            .buffer_unordered(self.worker_count)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Ok(ControllerFinalizeOutcome::Completed {
                    summarized,
                    deleted: _,
                }) => {
                    stats.archived += 1;
                    if summarized {
                        stats.summarized += 1;
                    }
                }
                Ok(ControllerFinalizeOutcome::Superseded) => stats.superseded += 1,
                Err(e) => {
                    stats.failed += 1;
                    metrics::counter!("summarizer.controller.failed").increment(1);
                    error!("{}", e);
                }
            }
        }

        stats.swept = self
            .controllers_repo
            .retention_sweep(retention_cutoff)
            .await
            .unwrap_or_else(|e| {
                error!("Controller retention sweep failed: {}", e);
                0
            });

        if stats.candidates > 0 || stats.swept > 0 {
            info!(
                "Controller pass: {} candidates, {} summarized, {} archived, {} superseded, {} failed, {} swept",
                stats.candidates,
                stats.summarized,
                stats.archived,
                stats.superseded,
                stats.failed,
                stats.swept
            );
        }
        metrics::counter!("summarizer.controller.summaries").increment(stats.summarized as u64);

        Ok(stats)
    }

    async fn summarize_controller(
        &self,
        controller: Controller,
        retention_cutoff: DateTime<Utc>,
    ) -> Result<ControllerFinalizeOutcome> {
        // Observers provide no service; their summary carries an empty
        // aircraft array, matching their exclusion on the flight side.
        let interactions = if controller.is_observer() {
            Vec::new()
        } else {
            self.detector
                .aircraft_interactions_for_controller(
                    &controller.callsign,
                    controller.logon_time,
                    controller.last_updated,
                )
                .await?
        };

        let frequencies_hz = self
            .transceivers_repo
            .distinct_frequencies(
                EntityType::Atc,
                controller.callsign.clone(),
                controller.logon_time,
                controller.last_updated,
            )
            .await?;
        // The query returns distinct Hz in ascending order; rounding to the
        // kHz grid can merge neighbors, so dedup once more.
        let mut frequencies_mhz: Vec<f64> =
            frequencies_hz.into_iter().map(hz_to_mhz_rounded).collect();
        frequencies_mhz.dedup();

        let intervals: Vec<(DateTime<Utc>, DateTime<Utc>)> = interactions
            .iter()
            .map(|i| (i.first_seen, i.last_seen))
            .collect();

        let summary = NewControllerSummary {
            callsign: controller.callsign.clone(),
            session_start_time: controller.logon_time,
            session_end_time: controller.last_updated,
            session_duration_minutes: controller.session_duration_minutes(),
            cid: controller.cid,
            name: controller.name.clone(),
            rating: controller.rating,
            facility: controller.facility,
            server: controller.server.clone(),
            total_aircraft_handled: interactions.len() as i32,
            peak_aircraft_count: peak_concurrent(&intervals),
            frequencies_used: serde_json::to_value(&frequencies_mhz)?,
            aircraft_details: serde_json::to_value(&interactions)?,
        };

        self.controllers_repo
            .finalize_session(
                controller.callsign,
                controller.logon_time,
                controller.last_updated,
                Some(summary),
                retention_cutoff,
            )
            .await
    }
}

/// Percentage of the session covered by at least one controller
/// interaction. Overlapping intervals are merged before summing.
pub fn interaction_coverage_percentage(
    interactions: &[ControllerInteraction],
    session_start: DateTime<Utc>,
    session_end: DateTime<Utc>,
) -> f64 {
    let session_seconds = (session_end - session_start).num_seconds();
    if session_seconds <= 0 || interactions.is_empty() {
        return 0.0;
    }

    let mut intervals: Vec<(DateTime<Utc>, DateTime<Utc>)> = interactions
        .iter()
        .map(|i| (i.first_seen.max(session_start), i.last_seen.min(session_end)))
        .filter(|(start, end)| end >= start)
        .collect();
    intervals.sort();

    let mut covered_seconds = 0i64;
    let mut current: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
    for (start, end) in intervals {
        match current {
            Some((cur_start, cur_end)) if start <= cur_end => {
                current = Some((cur_start, cur_end.max(end)));
            }
            Some((cur_start, cur_end)) => {
                covered_seconds += (cur_end - cur_start).num_seconds();
                current = Some((start, end));
            }
            None => current = Some((start, end)),
        }
    }
    if let Some((cur_start, cur_end)) = current {
        covered_seconds += (cur_end - cur_start).num_seconds();
    }

    (covered_seconds as f64 / session_seconds as f64 * 100.0).clamp(0.0, 100.0)
}

/// Maximum number of simultaneously-open interaction intervals, treating
/// the bounds as inclusive.
pub fn peak_concurrent(intervals: &[(DateTime<Utc>, DateTime<Utc>)]) -> i32 {
    let mut events: Vec<(DateTime<Utc>, i32)> = Vec::with_capacity(intervals.len() * 2);
    for (start, end) in intervals {
        events.push((*start, 1));
        events.push((*end, -1));
    }
    // Starts sort before ends at the same instant so touching intervals
    // count as concurrent.
    events.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut current = 0;
    let mut peak = 0;
    for (_, delta) in events {
        current += delta;
        peak = peak.max(current);
    }
    peak
}
