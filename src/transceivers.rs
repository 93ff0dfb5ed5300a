//! Transceiver observation models.
//!
//! Transceivers are append-only: every poll adds a timestamped row per radio
//! per callsign. The table is partitioned logically by `entity_type`.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::schema::transceivers;
use crate::vatsim_client::TransceiverRadio;

/// Which side of the network a radio belongs to. The transceivers feed does
/// not say; the kind is inferred from the snapshot's pilot/controller lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Flight,
    Atc,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Flight => "flight",
            EntityType::Atc => "atc",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Insertable transceiver observation.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = transceivers)]
pub struct NewTransceiver {
    pub callsign: String,
    pub transceiver_id: i32,
    pub frequency: i64,
    pub position_lat: Option<f64>,
    pub position_lon: Option<f64>,
    pub height_msl: Option<f64>,
    pub height_agl: Option<f64>,
    pub entity_type: String,
    pub entity_id: Option<i32>,
    pub timestamp: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewTransceiver {
    pub fn from_radio(
        callsign: &str,
        radio: &TransceiverRadio,
        entity_type: EntityType,
        entity_id: Option<i32>,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            callsign: callsign.to_string(),
            transceiver_id: radio.id,
            frequency: radio.frequency,
            position_lat: radio.lat_deg,
            position_lon: radio.lon_deg,
            height_msl: radio.height_msl_m,
            height_agl: radio.height_agl_m,
            entity_type: entity_type.as_str().to_string(),
            entity_id,
            timestamp,
            updated_at: now,
        }
    }

    /// Frequency in MHz rounded to 3 decimal places, the form used by the
    /// exclusion filter and summaries.
    pub fn frequency_mhz(&self) -> f64 {
        hz_to_mhz_rounded(self.frequency)
    }
}

/// Convert integer Hz to MHz rounded to 3 decimal places.
pub fn hz_to_mhz_rounded(frequency_hz: i64) -> f64 {
    (frequency_hz as f64 / 1_000_000.0 * 1000.0).round() / 1000.0
}

/// The slice of a transceiver row the interaction detector works with.
#[derive(Debug, Clone, Queryable)]
pub struct TransceiverObs {
    pub callsign: String,
    pub frequency: i64,
    pub position_lat: Option<f64>,
    pub position_lon: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl TransceiverObs {
    pub fn frequency_mhz(&self) -> f64 {
        hz_to_mhz_rounded(self.frequency)
    }
}
