//! Flight row models.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::schema::flights;
use crate::vatsim_client::PilotRecord;

/// A live flight row: the most recent observation of one pilot session,
/// keyed by `(callsign, logon_time)`.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = flights)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Flight {
    pub id: i64,
    pub callsign: String,
    pub cid: i32,
    pub name: String,
    pub server: String,
    pub aircraft_type: String,
    pub departure: String,
    pub arrival: String,
    pub route: String,
    pub cruise_tas: String,
    pub deptime: String,
    pub altitude: i32,
    pub heading: i32,
    pub groundspeed: i32,
    pub transponder: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub logon_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub last_updated_api: Option<DateTime<Utc>>,
    pub update_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flight {
    /// A summary is only produced for flights with a complete plan.
    pub fn has_complete_plan(&self) -> bool {
        !self.departure.is_empty() && !self.arrival.is_empty()
    }

    pub fn session_duration_minutes(&self) -> i32 {
        (self.last_updated - self.logon_time).num_minutes().max(0) as i32
    }
}

/// Insertable form of a flight observation.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = flights)]
pub struct NewFlight {
    pub callsign: String,
    pub cid: i32,
    pub name: String,
    pub server: String,
    pub aircraft_type: String,
    pub departure: String,
    pub arrival: String,
    pub route: String,
    pub cruise_tas: String,
    pub deptime: String,
    pub altitude: i32,
    pub heading: i32,
    pub groundspeed: i32,
    pub transponder: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub logon_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub last_updated_api: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl NewFlight {
    pub fn from_record(record: &PilotRecord, now: DateTime<Utc>) -> Self {
        let plan = record.flight_plan.clone().unwrap_or_default();
        Self {
            callsign: record.callsign.clone(),
            cid: record.cid,
            name: record.name.clone(),
            server: record.server.clone(),
            aircraft_type: plan.aircraft_short,
            departure: plan.departure,
            arrival: plan.arrival,
            route: plan.route,
            cruise_tas: plan.cruise_tas,
            deptime: plan.deptime,
            altitude: record.altitude,
            heading: record.heading,
            groundspeed: record.groundspeed,
            transponder: record.transponder.clone(),
            latitude: record.latitude,
            longitude: record.longitude,
            logon_time: record.logon_time,
            last_updated: now,
            last_updated_api: Some(record.last_updated),
            updated_at: now,
        }
    }
}
