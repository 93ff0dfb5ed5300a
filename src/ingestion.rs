//! One ingest tick: fetch the feeds, run the filter pipeline, persist.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::controllers::NewController;
use crate::controllers_repo::ControllersRepository;
use crate::errors::TraconError;
use crate::filters::FilterPipeline;
use crate::flights::NewFlight;
use crate::flights_repo::FlightsRepository;
use crate::transceivers::{EntityType, NewTransceiver};
use crate::transceivers_repo::TransceiversRepository;
use crate::vatsim_client::{TransceiverEntry, VatsimClient};

#[derive(Debug, Default, Clone, Copy)]
pub struct TickStats {
    pub pilots_seen: usize,
    pub controllers_seen: usize,
    pub flights_written: usize,
    pub controllers_written: usize,
    pub transceivers_written: usize,
    pub transceivers_unmatched: usize,
}

pub struct IngestService {
    client: VatsimClient,
    pipeline: Arc<FilterPipeline>,
    flights_repo: FlightsRepository,
    controllers_repo: ControllersRepository,
    transceivers_repo: TransceiversRepository,
    batch_size: usize,
}

impl IngestService {
    pub fn new(
        client: VatsimClient,
        pipeline: Arc<FilterPipeline>,
        flights_repo: FlightsRepository,
        controllers_repo: ControllersRepository,
        transceivers_repo: TransceiversRepository,
        batch_size: usize,
    ) -> Self {
        Self {
            client,
            pipeline,
            flights_repo,
            controllers_repo,
            transceivers_repo,
            batch_size,
        }
    }

    /// Fetch, filter and persist one poll. An `UpstreamUnavailable` error
    /// propagates to the scheduler, which skips the tick.
    pub async fn run_tick(&self) -> Result<TickStats, TraconError> {
        let snapshot = self.client.fetch_network_snapshot().await?;
        let transceiver_entries = self.client.fetch_transceivers().await?;

        let feed_timestamp = snapshot.general.update_timestamp;
        let now = Utc::now();

        metrics::gauge!("ingest.snapshot.pilots").set(snapshot.pilots.len() as f64);
        metrics::gauge!("ingest.snapshot.controllers").set(snapshot.controllers.len() as f64);

        let pilots = self.pipeline.filter_pilots(snapshot.pilots);
        let controllers = self.pipeline.filter_controllers(snapshot.controllers);
        let entries = self.pipeline.filter_transceivers(transceiver_entries);

        for (name, stats) in [
            ("boundary", &self.pipeline.boundary_stats),
            ("callsign", &self.pipeline.callsign_stats),
            ("controller_type", &self.pipeline.controller_type_stats),
            ("frequency", &self.pipeline.frequency_stats),
        ] {
            let totals = stats.totals();
            metrics::gauge!("filters.window.processed", "filter" => name)
                .set(totals.processed as f64);
            metrics::gauge!("filters.window.excluded", "filter" => name)
                .set(totals.excluded as f64);
        }

        let mut stats = TickStats {
            pilots_seen: pilots.len(),
            controllers_seen: controllers.len(),
            ..TickStats::default()
        };

        // Entity inference for transceivers keys off the records that
        // survived filtering, so stored radio observations always have a
        // stored owner.
        let pilot_cids: HashMap<String, i32> = pilots
            .iter()
            .map(|p| (p.callsign.clone(), p.cid))
            .collect();
        let controller_cids: HashMap<String, i32> = controllers
            .iter()
            .map(|c| (c.callsign.clone(), c.cid))
            .collect();

        let flight_rows = dedup_by_session(
            pilots
                .iter()
                .map(|record| NewFlight::from_record(record, now))
                .collect(),
            |row: &NewFlight| (row.callsign.clone(), row.logon_time),
        );

        let mut controller_rows = Vec::with_capacity(controllers.len());
        for record in &controllers {
            match NewController::from_record(record, now) {
                Ok(row) => controller_rows.push(row),
                Err(e) => {
                    // One bad frequency string drops that record only.
                    metrics::counter!("ingest.controller.parse_dropped").increment(1);
                    warn!("Dropping controller {}: {}", record.callsign, e);
                }
            }
        }
        let controller_rows = dedup_by_session(controller_rows, |row: &NewController| {
            (row.callsign.clone(), row.logon_time)
        });

        let (transceiver_rows, unmatched) = build_transceiver_rows(
            &entries,
            &pilot_cids,
            &controller_cids,
            feed_timestamp,
            now,
        );
        stats.transceivers_unmatched = unmatched;
        if unmatched > 0 {
            metrics::counter!("ingest.transceivers.unmatched").increment(unmatched as u64);
        }

        // Persist in source order: flights, controllers, then radios.
        stats.flights_written = self
            .flights_repo
            .upsert_batch(flight_rows, self.batch_size)
            .await
            .map_err(TraconError::DatabaseTransient)?;
        stats.controllers_written = self
            .controllers_repo
            .upsert_batch(controller_rows, self.batch_size)
            .await
            .map_err(TraconError::DatabaseTransient)?;
        stats.transceivers_written = self
            .transceivers_repo
            .insert_batch(transceiver_rows, self.batch_size)
            .await
            .map_err(TraconError::DatabaseTransient)?;

        info!(
            "Ingest tick: {} flights, {} controllers, {} transceiver rows ({} unmatched) at {}",
            stats.flights_written,
            stats.controllers_written,
            stats.transceivers_written,
            stats.transceivers_unmatched,
            feed_timestamp
        );
        metrics::counter!("ingest.ticks").increment(1);

        Ok(stats)
    }
}

/// Last observation wins when a poll carries duplicate session keys, while
/// source order is otherwise preserved.
fn dedup_by_session<T, K, F>(rows: Vec<T>, key_fn: F) -> Vec<T>
where
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut index_by_key: HashMap<K, usize> = HashMap::with_capacity(rows.len());
    let mut deduped: Vec<Option<T>> = Vec::with_capacity(rows.len());

    for row in rows {
        let key = key_fn(&row);
        match index_by_key.get(&key) {
            Some(&i) => deduped[i] = Some(row),
            None => {
                index_by_key.insert(key, deduped.len());
                deduped.push(Some(row));
            }
        }
    }
    deduped.into_iter().flatten().collect()
}

/// Flatten transceiver entries into insertable rows, inferring the entity
/// kind from the snapshot's surviving pilot and controller callsigns.
/// Entries owned by neither are counted and dropped.
fn build_transceiver_rows(
    entries: &[TransceiverEntry],
    pilot_cids: &HashMap<String, i32>,
    controller_cids: &HashMap<String, i32>,
    feed_timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
) -> (Vec<NewTransceiver>, usize) {
    let mut rows = Vec::new();
    let mut unmatched = 0usize;

    for entry in entries {
        let (entity_type, entity_id) = if let Some(cid) = pilot_cids.get(&entry.callsign) {
            (EntityType::Flight, Some(*cid))
        } else if let Some(cid) = controller_cids.get(&entry.callsign) {
            (EntityType::Atc, Some(*cid))
        } else {
            unmatched += 1;
            continue;
        };

        for radio in &entry.transceivers {
            rows.push(NewTransceiver::from_radio(
                &entry.callsign,
                radio,
                entity_type,
                entity_id,
                feed_timestamp,
                now,
            ));
        }
    }

    (rows, unmatched)
}
