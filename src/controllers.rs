//! Controller row models and the facility classification.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::errors::TraconError;
use crate::schema::controllers;
use crate::vatsim_client::ControllerRecord;

/// Facility code carried by every controller record.
///
/// Observers (code 0) are not controlling positions and are excluded from
/// interaction detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facility {
    Observer,
    FlightService,
    Delivery,
    Ground,
    Tower,
    Approach,
    Center,
}

impl Facility {
    pub fn from_code(code: i16) -> Option<Facility> {
        match code {
            0 => Some(Facility::Observer),
            1 => Some(Facility::FlightService),
            2 => Some(Facility::Delivery),
            3 => Some(Facility::Ground),
            4 => Some(Facility::Tower),
            5 => Some(Facility::Approach),
            6 => Some(Facility::Center),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Facility::Observer => "OBS",
            Facility::FlightService => "FSS",
            Facility::Delivery => "DEL",
            Facility::Ground => "GND",
            Facility::Tower => "TWR",
            Facility::Approach => "APP",
            Facility::Center => "CTR",
        }
    }

    /// Canonical service range in nautical miles, for pre-scoping tighter
    /// than the uniform proximity bound. Observers have no range.
    pub fn canonical_range_nm(&self) -> Option<f64> {
        match self {
            Facility::Observer => None,
            Facility::FlightService => Some(400.0),
            Facility::Delivery => Some(5.0),
            Facility::Ground => Some(15.0),
            Facility::Tower => Some(15.0),
            Facility::Approach => Some(60.0),
            Facility::Center => Some(400.0),
        }
    }
}

/// Human-readable controller type for an arbitrary facility code.
/// Unknown codes fall back to the bare number.
pub fn facility_type_label(code: i16) -> String {
    match Facility::from_code(code) {
        Some(facility) => facility.as_str().to_string(),
        None => code.to_string(),
    }
}

/// A live controller row, keyed by `(callsign, logon_time)`.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = controllers)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Controller {
    pub id: i64,
    pub callsign: String,
    pub cid: i32,
    pub name: String,
    pub rating: i16,
    pub facility: i16,
    pub frequency: i64,
    pub server: String,
    pub visual_range: i32,
    pub text_atis: Option<String>,
    pub logon_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub update_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Controller {
    pub fn is_observer(&self) -> bool {
        self.facility == 0
    }

    pub fn session_duration_minutes(&self) -> i32 {
        (self.last_updated - self.logon_time).num_minutes().max(0) as i32
    }
}

/// Insertable form of a controller observation.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = controllers)]
pub struct NewController {
    pub callsign: String,
    pub cid: i32,
    pub name: String,
    pub rating: i16,
    pub facility: i16,
    pub frequency: i64,
    pub server: String,
    pub visual_range: i32,
    pub text_atis: Option<String>,
    pub logon_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewController {
    /// Build an insertable row, normalizing the MHz frequency string to Hz.
    pub fn from_record(record: &ControllerRecord, now: DateTime<Utc>) -> Result<Self, TraconError> {
        Ok(Self {
            callsign: record.callsign.clone(),
            cid: record.cid,
            name: record.name.clone(),
            rating: record.rating,
            facility: record.facility,
            frequency: record.frequency_hz()?,
            server: record.server.clone(),
            visual_range: record.visual_range,
            text_atis: record.text_atis_joined(),
            logon_time: record.logon_time,
            last_updated: now,
            updated_at: now,
        })
    }
}
