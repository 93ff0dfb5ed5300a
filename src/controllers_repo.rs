//! Controller persistence: live-row upserts, completion candidates,
//! interaction pre-scoping lookups, and the finalize transaction.

use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::dsl::{exists, not};
use diesel::prelude::*;
use diesel::sql_types::{Text, Timestamptz};
use diesel::upsert::excluded;
use tracing::{debug, warn};

use crate::controllers::{Controller, NewController};
use crate::db::PgPool;
use crate::schema::{controller_summaries, controllers, controllers_archive};
use crate::summaries::NewControllerSummary;

/// Result of a finalize transaction for one `(callsign, logon_time)` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerFinalizeOutcome {
    Completed { summarized: bool, deleted: bool },
    Superseded,
}

#[derive(Debug)]
struct Superseded;

impl std::fmt::Display for Superseded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("live row superseded during finalize")
    }
}

impl std::error::Error for Superseded {}

#[derive(Clone)]
pub struct ControllersRepository {
    pool: PgPool,
}

impl ControllersRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert a batch of observations on `(callsign, logon_time)`.
    pub async fn upsert_batch(&self, rows: Vec<NewController>, batch_size: usize) -> Result<usize> {
        let pool = self.pool.clone();

        let written = tokio::task::spawn_blocking(move || {
            let mut written = 0usize;
            for chunk in rows.chunks(batch_size) {
                match Self::upsert_chunk(&pool, chunk) {
                    Ok(n) => written += n,
                    Err(first_try) => {
                        warn!("Controller upsert chunk failed, retrying once: {}", first_try);
                        match Self::upsert_chunk(&pool, chunk) {
                            Ok(n) => written += n,
                            Err(e) => {
                                metrics::counter!("persistence.controllers.failed_batches")
                                    .increment(1);
                                warn!("Controller upsert chunk dropped after retry: {}", e);
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

    fn upsert_chunk(pool: &PgPool, chunk: &[NewController]) -> Result<usize> {
        let mut conn = pool.get()?;
        let n = diesel::insert_into(controllers::table)
            .values(chunk)
            .on_conflict((controllers::callsign, controllers::logon_time))
            .do_update()
            .set((
                controllers::cid.eq(excluded(controllers::cid)),
                controllers::name.eq(excluded(controllers::name)),
                controllers::rating.eq(excluded(controllers::rating)),
                controllers::facility.eq(excluded(controllers::facility)),
                controllers::frequency.eq(excluded(controllers::frequency)),
                controllers::server.eq(excluded(controllers::server)),
                controllers::visual_range.eq(excluded(controllers::visual_range)),
                controllers::text_atis.eq(excluded(controllers::text_atis)),
                controllers::last_updated.eq(excluded(controllers::last_updated)),
                controllers::update_count.eq(controllers::update_count + 1),
                controllers::updated_at.eq(excluded(controllers::updated_at)),
            ))
            .execute(&mut conn)?;
        Ok(n)
    }

    /// Non-observer controllers whose session interval overlaps `[start, end]`.
    /// This is the pre-scoping step for the interaction detector.
    pub async fn overlapping_sessions(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Controller>> {
        let pool = self.pool.clone();

        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = controllers::table
                .filter(controllers::logon_time.le(end))
                .filter(controllers::last_updated.ge(start))
                .filter(controllers::facility.ne(0i16))
                .select(Controller::as_select())
                .load::<Controller>(&mut conn)?;
            Ok::<Vec<Controller>, anyhow::Error>(rows)
        })
        .await??;

        Ok(rows)
    }

    /// Live sessions past the completion threshold that have neither a
    /// summary nor an archive row yet, oldest first.
    pub async fn completion_candidates(&self, cutoff: DateTime<Utc>) -> Result<Vec<Controller>> {
        let pool = self.pool.clone();

        let candidates = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = controllers::table
                .filter(controllers::last_updated.lt(cutoff))
                .filter(not(exists(
                    controller_summaries::table.filter(
                        controller_summaries::callsign
                            .eq(controllers::callsign)
                            .and(controller_summaries::session_start_time.eq(controllers::logon_time)),
                    ),
                )))
                .filter(not(exists(
                    controllers_archive::table.filter(
                        controllers_archive::callsign
                            .eq(controllers::callsign)
                            .and(controllers_archive::logon_time.eq(controllers::logon_time)),
                    ),
                )))
                .select(Controller::as_select())
                .order(controllers::last_updated.asc())
                .load::<Controller>(&mut conn)?;
            Ok::<Vec<Controller>, anyhow::Error>(rows)
        })
        .await??;

        Ok(candidates)
    }

    /// Finalize one completed controller session in a single transaction.
    /// Mirrors the flight-side finalize: summary insert, archive copy, and
    /// a retention-gated delete, all rolled back if the row moved.
    pub async fn finalize_session(
        &self,
        callsign: String,
        logon_time: DateTime<Utc>,
        observed_last_updated: DateTime<Utc>,
        summary: Option<NewControllerSummary>,
        retention_cutoff: DateTime<Utc>,
    ) -> Result<ControllerFinalizeOutcome> {
        let pool = self.pool.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let result = conn.transaction::<ControllerFinalizeOutcome, anyhow::Error, _>(|conn| {
                let current: DateTime<Utc> = controllers::table
                    .filter(
                        controllers::callsign
                            .eq(&callsign)
                            .and(controllers::logon_time.eq(logon_time)),
                    )
                    .select(controllers::last_updated)
                    .for_update()
                    .first(conn)?;

                if current != observed_last_updated {
                    return Err(Superseded.into());
                }

                let summarized = match &summary {
                    Some(row) => {
                        diesel::insert_into(controller_summaries::table)
                            .values(row)
                            .on_conflict((
                                controller_summaries::callsign,
                                controller_summaries::session_start_time,
                            ))
                            .do_nothing()
                            .execute(conn)?
                            > 0
                    }
                    None => false,
                };

                diesel::sql_query(
                    "INSERT INTO controllers_archive \
                         (callsign, cid, name, rating, facility, frequency, server, \
                          visual_range, text_atis, logon_time, last_updated, update_count, \
                          created_at, updated_at, archived_at) \
                     SELECT callsign, cid, name, rating, facility, frequency, server, \
                            visual_range, text_atis, logon_time, last_updated, update_count, \
                            created_at, updated_at, now() \
                     FROM controllers WHERE callsign = $1 AND logon_time = $2 \
                     ON CONFLICT (callsign, logon_time) DO NOTHING",
                )
                .bind::<Text, _>(&callsign)
                .bind::<Timestamptz, _>(logon_time)
                .execute(conn)?;

                let deleted = if current < retention_cutoff {
                    diesel::delete(
                        controllers::table.filter(
                            controllers::callsign
                                .eq(&callsign)
                                .and(controllers::logon_time.eq(logon_time)),
                        ),
                    )
                    .execute(conn)?
                        > 0
                } else {
                    false
                };

                Ok(ControllerFinalizeOutcome::Completed {
                    summarized,
                    deleted,
                })
            });

            match result {
                Ok(outcome) => Ok(outcome),
                Err(e) if e.downcast_ref::<Superseded>().is_some() => {
                    debug!("Controller session superseded during finalize, will retry next pass");
                    Ok(ControllerFinalizeOutcome::Superseded)
                }
                Err(e) => Err(e),
            }
        })
        .await??;

        Ok(outcome)
    }

    /// Delete live rows past retention that already have an archive row.
    pub async fn retention_sweep(&self, retention_cutoff: DateTime<Utc>) -> Result<usize> {
        let pool = self.pool.clone();

        let deleted = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let n = diesel::sql_query(
                "DELETE FROM controllers USING controllers_archive \
                 WHERE controllers_archive.callsign = controllers.callsign \
                   AND controllers_archive.logon_time = controllers.logon_time \
                   AND controllers.last_updated < $1",
            )
            .bind::<Timestamptz, _>(retention_cutoff)
            .execute(&mut conn)?;
            Ok::<usize, anyhow::Error>(n)
        })
        .await??;

        if deleted > 0 {
            debug!("Retention sweep deleted {} controller rows", deleted);
        }
        Ok(deleted)
    }
}
