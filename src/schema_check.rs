//! Startup schema validation with embedded-migration remediation.
//!
//! Every required table and column is checked against
//! `information_schema.columns`. On mismatch the discrepancies are logged,
//! the bundled migrations run once, and validation repeats; a second
//! failure refuses writes.

use anyhow::Result;
use diesel::prelude::*;
use diesel::sql_types::Text;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::{error, info, warn};

use crate::db::PgPool;
use crate::errors::TraconError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Minimum schema surface the engine relies on.
const REQUIRED_TABLES: &[(&str, &[&str])] = &[
    (
        "flights",
        &[
            "id",
            "callsign",
            "cid",
            "name",
            "server",
            "aircraft_type",
            "departure",
            "arrival",
            "route",
            "cruise_tas",
            "deptime",
            "altitude",
            "heading",
            "groundspeed",
            "transponder",
            "latitude",
            "longitude",
            "logon_time",
            "last_updated",
            "last_updated_api",
            "update_count",
            "created_at",
            "updated_at",
        ],
    ),
    (
        "controllers",
        &[
            "id",
            "callsign",
            "cid",
            "name",
            "rating",
            "facility",
            "frequency",
            "server",
            "visual_range",
            "text_atis",
            "logon_time",
            "last_updated",
            "update_count",
            "created_at",
            "updated_at",
        ],
    ),
    (
        "transceivers",
        &[
            "id",
            "callsign",
            "transceiver_id",
            "frequency",
            "position_lat",
            "position_lon",
            "height_msl",
            "height_agl",
            "entity_type",
            "entity_id",
            "timestamp",
            "updated_at",
        ],
    ),
    ("flights_archive", &["id", "callsign", "logon_time", "last_updated", "archived_at"]),
    (
        "controllers_archive",
        &["id", "callsign", "logon_time", "last_updated", "archived_at"],
    ),
    (
        "flight_summaries",
        &[
            "id",
            "callsign",
            "logon_time",
            "completion_time",
            "session_duration_minutes",
            "total_updates",
            "controller_callsigns",
            "controller_time_percentage",
            "created_at",
        ],
    ),
    (
        "controller_summaries",
        &[
            "id",
            "callsign",
            "session_start_time",
            "session_end_time",
            "session_duration_minutes",
            "total_aircraft_handled",
            "peak_aircraft_count",
            "frequencies_used",
            "aircraft_details",
            "created_at",
        ],
    ),
];

#[derive(QueryableByName)]
struct ColumnRow {
    #[diesel(sql_type = Text)]
    column_name: String,
}

/// Validate the schema, remediate once with the bundled migrations, and
/// refuse to serve writes if the schema is still wrong.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), TraconError> {
    let pool = pool.clone();

    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| TraconError::DatabaseFatal(format!("no connection for schema check: {}", e)))?;

        let discrepancies = validate_schema(&mut conn)
            .map_err(|e| TraconError::DatabaseFatal(format!("schema inspection failed: {}", e)))?;
        if discrepancies.is_empty() {
            info!("Database schema validation passed");
            return Ok(());
        }

        for discrepancy in &discrepancies {
            warn!("Schema mismatch: {}", discrepancy);
        }
        info!("Running bundled migrations to remediate schema");
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| TraconError::DatabaseFatal(format!("migration run failed: {}", e)))?;

        let discrepancies = validate_schema(&mut conn)
            .map_err(|e| TraconError::DatabaseFatal(format!("schema inspection failed: {}", e)))?;
        if discrepancies.is_empty() {
            info!("Database schema remediated and validated");
            Ok(())
        } else {
            for discrepancy in &discrepancies {
                error!("Schema still invalid: {}", discrepancy);
            }
            Err(TraconError::DatabaseFatal(format!(
                "schema invalid after migration: {} discrepancies",
                discrepancies.len()
            )))
        }
    })
    .await
    .map_err(|e| TraconError::DatabaseFatal(format!("schema check task failed: {}", e)))?
}

/// Returns one message per missing table or column; empty means valid.
fn validate_schema(conn: &mut PgConnection) -> Result<Vec<String>> {
    let mut discrepancies = Vec::new();

    for (table, required_columns) in REQUIRED_TABLES {
        let rows: Vec<ColumnRow> = diesel::sql_query(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1",
        )
        .bind::<Text, _>(*table)
        .load(conn)?;

        if rows.is_empty() {
            discrepancies.push(format!("missing required table: {}", table));
            continue;
        }

        let existing: std::collections::HashSet<String> =
            rows.into_iter().map(|r| r.column_name).collect();
        let missing: Vec<&str> = required_columns
            .iter()
            .filter(|c| !existing.contains(**c))
            .copied()
            .collect();
        if !missing.is_empty() {
            discrepancies.push(format!(
                "table '{}' missing columns: {}",
                table,
                missing.join(", ")
            ));
        }
    }

    Ok(discrepancies)
}
