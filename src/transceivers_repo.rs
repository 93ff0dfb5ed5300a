//! Append-only transceiver persistence and the timeline queries backing the
//! interaction detector.
//!
//! Every query here is bounded by a session time window first and an entity
//! set second, so the expensive frequency/time/distance matching never sees
//! more than one session's worth of rows.

use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use tracing::warn;

use crate::db::PgPool;
use crate::schema::transceivers;
use crate::transceivers::{EntityType, NewTransceiver, TransceiverObs};

#[derive(Clone)]
pub struct TransceiversRepository {
    pool: PgPool,
}

impl TransceiversRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a batch of observations in chunks. A failing chunk is retried
    /// once and then dropped with a counter; remaining chunks continue.
    pub async fn insert_batch(&self, rows: Vec<NewTransceiver>, batch_size: usize) -> Result<usize> {
        let pool = self.pool.clone();

        let written = tokio::task::spawn_blocking(move || {
            let mut written = 0usize;
            for chunk in rows.chunks(batch_size) {
                match Self::insert_chunk(&pool, chunk) {
                    Ok(n) => written += n,
                    Err(first_try) => {
                        warn!("Transceiver insert chunk failed, retrying once: {}", first_try);
                        match Self::insert_chunk(&pool, chunk) {
                            Ok(n) => written += n,
                            Err(e) => {
                                metrics::counter!("persistence.transceivers.failed_batches")
                                    .increment(1);
                                warn!(
                                    "Transceiver insert chunk of {} dropped after retry: {}",
                                    chunk.len(),
                                    e
                                );
                            }
                        }
                    }
                }
            }
            Ok::<usize, anyhow::Error>(written)
        })
        .await??;

        Ok(written)
    }

    fn insert_chunk(pool: &PgPool, chunk: &[NewTransceiver]) -> Result<usize> {
        let mut conn = pool.get()?;
        let n = diesel::insert_into(transceivers::table)
            .values(chunk)
            .execute(&mut conn)?;
        Ok(n)
    }

    /// One entity's radio timeline inside a session window.
    pub async fn timeline(
        &self,
        entity_type: EntityType,
        callsign: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TransceiverObs>> {
        let pool = self.pool.clone();

        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = transceivers::table
                .filter(transceivers::entity_type.eq(entity_type.as_str()))
                .filter(transceivers::callsign.eq(&callsign))
                .filter(transceivers::timestamp.between(start, end))
                .select((
                    transceivers::callsign,
                    transceivers::frequency,
                    transceivers::position_lat,
                    transceivers::position_lon,
                    transceivers::timestamp,
                ))
                .order(transceivers::timestamp.asc())
                .load::<TransceiverObs>(&mut conn)?;
            Ok::<Vec<TransceiverObs>, anyhow::Error>(rows)
        })
        .await??;

        Ok(rows)
    }

    /// Radio timelines for a set of candidate callsigns inside a window.
    pub async fn timelines_for(
        &self,
        entity_type: EntityType,
        callsigns: Vec<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TransceiverObs>> {
        if callsigns.is_empty() {
            return Ok(Vec::new());
        }
        let pool = self.pool.clone();

        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = transceivers::table
                .filter(transceivers::entity_type.eq(entity_type.as_str()))
                .filter(transceivers::callsign.eq_any(&callsigns))
                .filter(transceivers::timestamp.between(start, end))
                .select((
                    transceivers::callsign,
                    transceivers::frequency,
                    transceivers::position_lat,
                    transceivers::position_lon,
                    transceivers::timestamp,
                ))
                .order(transceivers::timestamp.asc())
                .load::<TransceiverObs>(&mut conn)?;
            Ok::<Vec<TransceiverObs>, anyhow::Error>(rows)
        })
        .await??;

        Ok(rows)
    }

    /// Distinct callsigns of one entity kind active inside a window. Used to
    /// pre-scope the controller-side detector to flights actually heard.
    pub async fn active_callsigns(
        &self,
        entity_type: EntityType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let pool = self.pool.clone();

        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = transceivers::table
                .filter(transceivers::entity_type.eq(entity_type.as_str()))
                .filter(transceivers::timestamp.between(start, end))
                .select(transceivers::callsign)
                .distinct()
                .load::<String>(&mut conn)?;
            Ok::<Vec<String>, anyhow::Error>(rows)
        })
        .await??;

        Ok(rows)
    }

    /// Distinct frequencies one entity used inside a window, in Hz.
    pub async fn distinct_frequencies(
        &self,
        entity_type: EntityType,
        callsign: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        let pool = self.pool.clone();

        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = transceivers::table
                .filter(transceivers::entity_type.eq(entity_type.as_str()))
                .filter(transceivers::callsign.eq(&callsign))
                .filter(transceivers::timestamp.between(start, end))
                .filter(transceivers::frequency.gt(0))
                .select(transceivers::frequency)
                .distinct()
                .order(transceivers::frequency.asc())
                .load::<i64>(&mut conn)?;
            Ok::<Vec<i64>, anyhow::Error>(rows)
        })
        .await??;

        Ok(rows)
    }
}
