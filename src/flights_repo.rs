//! Flight persistence: live-row upserts, completion candidates, and the
//! per-session finalize transaction (summary + archive + retention delete).

use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::dsl::{exists, not};
use diesel::prelude::*;
use diesel::sql_types::{Text, Timestamptz};
use diesel::upsert::excluded;
use tracing::{debug, warn};

use crate::db::PgPool;
use crate::flights::{Flight, NewFlight};
use crate::schema::{flight_summaries, flights, flights_archive};
use crate::summaries::NewFlightSummary;

/// Result of a finalize transaction for one `(callsign, logon_time)` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Summary (when provided) and archive row committed; the live row was
    /// deleted if its retention window had already expired.
    Completed { summarized: bool, deleted: bool },
    /// A newer observation landed while the session was being finalized.
    /// Everything for this key was rolled back; a later pass retries.
    Superseded,
}

/// Sentinel used to roll back the finalize transaction when the live row
/// moved under us.
#[derive(Debug)]
struct Superseded;

impl std::fmt::Display for Superseded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("live row superseded during finalize")
    }
}

impl std::error::Error for Superseded {}

#[derive(Clone)]
pub struct FlightsRepository {
    pool: PgPool,
}

impl FlightsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert a batch of observations on `(callsign, logon_time)`.
    ///
    /// A failing chunk is retried once on a fresh connection, then skipped;
    /// the rest of the batch continues. Returns the number of rows written.
    pub async fn upsert_batch(&self, rows: Vec<NewFlight>, batch_size: usize) -> Result<usize> {
        let pool = self.pool.clone();

        let written = tokio::task::spawn_blocking(move || {
            let mut written = 0usize;
            for chunk in rows.chunks(batch_size) {
                match Self::upsert_chunk(&pool, chunk) {
                    Ok(n) => written += n,
                    Err(first_try) => {
                        warn!("Flight upsert chunk failed, retrying once: {}", first_try);
                        match Self::upsert_chunk(&pool, chunk) {
                            Ok(n) => written += n,
                            Err(e) => {
                                metrics::counter!("persistence.flights.failed_batches")
                                    .increment(1);
                                warn!("Flight upsert chunk dropped after retry: {}", e);
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

    fn upsert_chunk(pool: &PgPool, chunk: &[NewFlight]) -> Result<usize> {
        let mut conn = pool.get()?;
        let n = diesel::insert_into(flights::table)
            .values(chunk)
            .on_conflict((flights::callsign, flights::logon_time))
            .do_update()
            .set((
                flights::cid.eq(excluded(flights::cid)),
                flights::name.eq(excluded(flights::name)),
                flights::server.eq(excluded(flights::server)),
                flights::aircraft_type.eq(excluded(flights::aircraft_type)),
                flights::departure.eq(excluded(flights::departure)),
                flights::arrival.eq(excluded(flights::arrival)),
                flights::route.eq(excluded(flights::route)),
                flights::cruise_tas.eq(excluded(flights::cruise_tas)),
                flights::deptime.eq(excluded(flights::deptime)),
                flights::altitude.eq(excluded(flights::altitude)),
                flights::heading.eq(excluded(flights::heading)),
                flights::groundspeed.eq(excluded(flights::groundspeed)),
                flights::transponder.eq(excluded(flights::transponder)),
                flights::latitude.eq(excluded(flights::latitude)),
                flights::longitude.eq(excluded(flights::longitude)),
                flights::last_updated.eq(excluded(flights::last_updated)),
                flights::last_updated_api.eq(excluded(flights::last_updated_api)),
                flights::update_count.eq(flights::update_count + 1),
                flights::updated_at.eq(excluded(flights::updated_at)),
            ))
            .execute(&mut conn)?;
        Ok(n)
    }

    /// Live sessions past the completion threshold that have neither a
    /// summary nor an archive row yet, oldest first.
    pub async fn completion_candidates(&self, cutoff: DateTime<Utc>) -> Result<Vec<Flight>> {
        let pool = self.pool.clone();

        let candidates = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = flights::table
                .filter(flights::last_updated.lt(cutoff))
                .filter(not(exists(
                    flight_summaries::table.filter(
                        flight_summaries::callsign
                            .eq(flights::callsign)
                            .and(flight_summaries::logon_time.eq(flights::logon_time)),
                    ),
                )))
                .filter(not(exists(
                    flights_archive::table.filter(
                        flights_archive::callsign
                            .eq(flights::callsign)
                            .and(flights_archive::logon_time.eq(flights::logon_time)),
                    ),
                )))
                .select(Flight::as_select())
                .order(flights::last_updated.asc())
                .load::<Flight>(&mut conn)?;
            Ok::<Vec<Flight>, anyhow::Error>(rows)
        })
        .await??;

        Ok(candidates)
    }

    /// Finalize one completed session in a single transaction: insert the
    /// summary (if the plan was complete), copy the live row into the
    /// archive, and delete the live row if retention has expired.
    ///
    /// `observed_last_updated` is the value the candidate query saw; it is
    /// re-checked under a row lock before any destructive step, and a newer
    /// observation rolls the whole key back.
    pub async fn finalize_session(
        &self,
        callsign: String,
        logon_time: DateTime<Utc>,
        observed_last_updated: DateTime<Utc>,
        summary: Option<NewFlightSummary>,
        retention_cutoff: DateTime<Utc>,
    ) -> Result<FinalizeOutcome> {
        let pool = self.pool.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let result = conn.transaction::<FinalizeOutcome, anyhow::Error, _>(|conn| {
                let current: DateTime<Utc> = flights::table
                    .filter(
                        flights::callsign
                            .eq(&callsign)
                            .and(flights::logon_time.eq(logon_time)),
                    )
                    .select(flights::last_updated)
                    .for_update()
                    .first(conn)?;

                if current != observed_last_updated {
                    return Err(Superseded.into());
                }

                let summarized = match &summary {
                    Some(row) => {
                        diesel::insert_into(flight_summaries::table)
                            .values(row)
                            .on_conflict((flight_summaries::callsign, flight_summaries::logon_time))
                            .do_nothing()
                            .execute(conn)?
                            > 0
                    }
                    None => false,
                };

                diesel::sql_query(
                    "INSERT INTO flights_archive \
                         (callsign, cid, name, server, aircraft_type, departure, arrival, \
                          route, cruise_tas, deptime, altitude, heading, groundspeed, \
                          transponder, latitude, longitude, logon_time, last_updated, \
                          last_updated_api, update_count, created_at, updated_at, archived_at) \
                     SELECT callsign, cid, name, server, aircraft_type, departure, arrival, \
                            route, cruise_tas, deptime, altitude, heading, groundspeed, \
                            transponder, latitude, longitude, logon_time, last_updated, \
                            last_updated_api, update_count, created_at, updated_at, now() \
                     FROM flights WHERE callsign = $1 AND logon_time = $2 \
                     ON CONFLICT (callsign, logon_time) DO NOTHING",
                )
                .bind::<Text, _>(&callsign)
                .bind::<Timestamptz, _>(logon_time)
                .execute(conn)?;

                let deleted = if current < retention_cutoff {
                    diesel::delete(
                        flights::table.filter(
                            flights::callsign
                                .eq(&callsign)
                                .and(flights::logon_time.eq(logon_time)),
                        ),
                    )
                    .execute(conn)?
                        > 0
                } else {
                    false
                };

                Ok(FinalizeOutcome::Completed {
                    summarized,
                    deleted,
                })
            });

            match result {
                Ok(outcome) => Ok(outcome),
                Err(e) if e.downcast_ref::<Superseded>().is_some() => {
                    debug!("Flight session superseded during finalize, will retry next pass");
                    Ok(FinalizeOutcome::Superseded)
                }
                Err(e) => Err(e),
            }
        })
        .await??;

        Ok(outcome)
    }

    /// Delete live rows past retention that already have an archive row.
    /// The age check and the delete are one statement, so a session that
    /// received a fresh observation is left alone.
    pub async fn retention_sweep(&self, retention_cutoff: DateTime<Utc>) -> Result<usize> {
        let pool = self.pool.clone();

        let deleted = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let n = diesel::sql_query(
                "DELETE FROM flights USING flights_archive \
                 WHERE flights_archive.callsign = flights.callsign \
                   AND flights_archive.logon_time = flights.logon_time \
                   AND flights.last_updated < $1",
            )
            .bind::<Timestamptz, _>(retention_cutoff)
            .execute(&mut conn)?;
            Ok::<usize, anyhow::Error>(n)
        })
        .await??;

        if deleted > 0 {
            debug!("Retention sweep deleted {} flight rows", deleted);
        }
        Ok(deleted)
    }
}
