//! Durable session summary models and interaction array shapes.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{controller_summaries, flight_summaries};

/// One controller a flight talked to, as stored in
/// `flight_summaries.controller_callsigns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerInteraction {
    pub controller_callsign: String,
    #[serde(rename = "type")]
    pub controller_type: String,
    pub frequency_mhz: f64,
    pub time_minutes: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// One aircraft a controller worked, as stored in
/// `controller_summaries.aircraft_details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftInteraction {
    pub callsign: String,
    pub frequency_mhz: f64,
    pub time_minutes: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = flight_summaries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FlightSummary {
    pub id: i64,
    pub callsign: String,
    pub logon_time: DateTime<Utc>,
    pub cid: i32,
    pub aircraft_type: String,
    pub departure: String,
    pub arrival: String,
    pub route: String,
    pub deptime: String,
    pub completion_time: DateTime<Utc>,
    pub session_duration_minutes: i32,
    pub total_updates: i32,
    pub controller_callsigns: serde_json::Value,
    pub controller_time_percentage: f64,
    pub created_at: DateTime<Utc>,
}

impl FlightSummary {
    pub fn interactions(&self) -> Vec<ControllerInteraction> {
        serde_json::from_value(self.controller_callsigns.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = flight_summaries)]
pub struct NewFlightSummary {
    pub callsign: String,
    pub logon_time: DateTime<Utc>,
    pub cid: i32,
    pub aircraft_type: String,
    pub departure: String,
    pub arrival: String,
    pub route: String,
    pub deptime: String,
    pub completion_time: DateTime<Utc>,
    pub session_duration_minutes: i32,
    pub total_updates: i32,
    pub controller_callsigns: serde_json::Value,
    pub controller_time_percentage: f64,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = controller_summaries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ControllerSummary {
    pub id: i64,
    pub callsign: String,
    pub session_start_time: DateTime<Utc>,
    pub session_end_time: DateTime<Utc>,
    pub session_duration_minutes: i32,
    pub cid: i32,
    pub name: String,
    pub rating: i16,
    pub facility: i16,
    pub server: String,
    pub total_aircraft_handled: i32,
    pub peak_aircraft_count: i32,
    pub frequencies_used: serde_json::Value,
    pub aircraft_details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ControllerSummary {
    pub fn interactions(&self) -> Vec<AircraftInteraction> {
        serde_json::from_value(self.aircraft_details.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = controller_summaries)]
pub struct NewControllerSummary {
    pub callsign: String,
    pub session_start_time: DateTime<Utc>,
    pub session_end_time: DateTime<Utc>,
    pub session_duration_minutes: i32,
    pub cid: i32,
    pub name: String,
    pub rating: i16,
    pub facility: i16,
    pub server: String,
    pub total_aircraft_handled: i32,
    pub peak_aircraft_count: i32,
    pub frequencies_used: serde_json::Value,
    pub aircraft_details: serde_json::Value,
}
