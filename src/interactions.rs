//! Flight/controller interaction detection.
//!
//! Joins a flight's transceiver timeline against candidate controllers'
//! timelines under a three-predicate match: frequency proximity, time
//! proximity, and great-circle distance. Candidate sets and time windows are
//! narrowed in SQL before any pairwise matching happens; the pairwise step
//! only ever sees one session's worth of rows.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::InteractionConfig;
use crate::controllers::facility_type_label;
use crate::controllers_repo::ControllersRepository;
use crate::geodesy::haversine_nm;
use crate::summaries::{AircraftInteraction, ControllerInteraction};
use crate::transceivers::{EntityType, TransceiverObs};
use crate::transceivers_repo::TransceiversRepository;

/// Round integer Hz to the kHz grid used for frequency comparison.
/// Working in integer kHz keeps the tolerance check exact at the boundary.
fn khz(frequency_hz: i64) -> i64 {
    ((frequency_hz as f64) / 1000.0).round() as i64
}

/// The three-predicate match. All bounds are inclusive.
pub fn predicates_match(
    atc: &TransceiverObs,
    flight: &TransceiverObs,
    config: &InteractionConfig,
) -> bool {
    let tolerance_khz = (config.frequency_tolerance_mhz * 1000.0).round() as i64;
    if (khz(atc.frequency) - khz(flight.frequency)).abs() > tolerance_khz {
        return false;
    }

    let dt_ms = (atc.timestamp - flight.timestamp).num_milliseconds().abs();
    if dt_ms > config.time_window_seconds * 1000 {
        return false;
    }

    // Both sides need a position to verify geographic proximity.
    let (Some(atc_lat), Some(atc_lon)) = (atc.position_lat, atc.position_lon) else {
        return false;
    };
    let (Some(flight_lat), Some(flight_lon)) = (flight.position_lat, flight.position_lon) else {
        return false;
    };

    haversine_nm(atc_lat, atc_lon, flight_lat, flight_lon) <= config.proximity_nm
}

/// One matched pair, reduced to what grouping needs.
struct Match {
    atc_khz: i64,
    flight_timestamp: DateTime<Utc>,
}

/// Collapse matches for one counterpart into the summary fields: mode
/// frequency, first/last seen, and elapsed whole minutes.
fn reduce_matches(matches: &[Match]) -> (f64, DateTime<Utc>, DateTime<Utc>, i64) {
    let mut frequency_counts: HashMap<i64, usize> = HashMap::new();
    for m in matches {
        *frequency_counts.entry(m.atc_khz).or_insert(0) += 1;
    }
    // Mode; ties break toward the lower frequency so output is deterministic.
    let mode_khz = frequency_counts
        .into_iter()
        .max_by_key(|(freq, count)| (*count, -freq))
        .map(|(freq, _)| freq)
        .unwrap_or(0);

    let first_seen = matches.iter().map(|m| m.flight_timestamp).min().unwrap();
    let last_seen = matches.iter().map(|m| m.flight_timestamp).max().unwrap();
    let time_minutes = (last_seen - first_seen).num_minutes();

    (mode_khz as f64 / 1000.0, first_seen, last_seen, time_minutes)
}

/// Group matching ATC/flight observation pairs by controller callsign and
/// emit the flight-side interaction array, ordered by first contact.
pub fn group_controller_interactions(
    flight_obs: &[TransceiverObs],
    atc_obs: &[TransceiverObs],
    facility_by_callsign: &HashMap<String, i16>,
    config: &InteractionConfig,
) -> Vec<ControllerInteraction> {
    let mut matches_by_controller: HashMap<&str, Vec<Match>> = HashMap::new();

    for atc in atc_obs {
        for flight in flight_obs {
            if predicates_match(atc, flight, config) {
                matches_by_controller
                    .entry(atc.callsign.as_str())
                    .or_default()
                    .push(Match {
                        atc_khz: khz(atc.frequency),
                        flight_timestamp: flight.timestamp,
                    });
            }
        }
    }

    let mut interactions: Vec<ControllerInteraction> = matches_by_controller
        .into_iter()
        .map(|(callsign, matches)| {
            let (frequency_mhz, first_seen, last_seen, time_minutes) = reduce_matches(&matches);
            let facility = facility_by_callsign.get(callsign).copied().unwrap_or(-1);
            ControllerInteraction {
                controller_callsign: callsign.to_string(),
                controller_type: facility_type_label(facility),
                frequency_mhz,
                time_minutes,
                first_seen,
                last_seen,
            }
        })
        .collect();

    interactions.sort_by(|a, b| {
        a.first_seen
            .cmp(&b.first_seen)
            .then_with(|| a.controller_callsign.cmp(&b.controller_callsign))
    });
    interactions
}

/// The mirror grouping: matches keyed by flight callsign, emitted as the
/// controller-side aircraft interaction array.
pub fn group_aircraft_interactions(
    atc_obs: &[TransceiverObs],
    flight_obs: &[TransceiverObs],
    config: &InteractionConfig,
) -> Vec<AircraftInteraction> {
    let mut matches_by_flight: HashMap<&str, Vec<Match>> = HashMap::new();

    for atc in atc_obs {
        for flight in flight_obs {
            if predicates_match(atc, flight, config) {
                matches_by_flight
                    .entry(flight.callsign.as_str())
                    .or_default()
                    .push(Match {
                        atc_khz: khz(atc.frequency),
                        flight_timestamp: flight.timestamp,
                    });
            }
        }
    }

    let mut interactions: Vec<AircraftInteraction> = matches_by_flight
        .into_iter()
        .map(|(callsign, matches)| {
            let (frequency_mhz, first_seen, last_seen, time_minutes) = reduce_matches(&matches);
            AircraftInteraction {
                callsign: callsign.to_string(),
                frequency_mhz,
                time_minutes,
                first_seen,
                last_seen,
            }
        })
        .collect();

    interactions.sort_by(|a, b| {
        a.first_seen
            .cmp(&b.first_seen)
            .then_with(|| a.callsign.cmp(&b.callsign))
    });
    interactions
}

/// Database-backed detector: pre-scopes candidates and timelines, then runs
/// the pure grouping above.
#[derive(Clone)]
pub struct InteractionDetector {
    controllers_repo: ControllersRepository,
    transceivers_repo: TransceiversRepository,
    config: InteractionConfig,
}

impl InteractionDetector {
    pub fn new(
        controllers_repo: ControllersRepository,
        transceivers_repo: TransceiversRepository,
        config: InteractionConfig,
    ) -> Self {
        Self {
            controllers_repo,
            transceivers_repo,
            config,
        }
    }

    /// Controllers a completed flight session talked to.
    pub async fn controller_interactions_for_flight(
        &self,
        callsign: &str,
        session_start: DateTime<Utc>,
        session_end: DateTime<Utc>,
    ) -> Result<Vec<ControllerInteraction>> {
        // Candidate controllers: sessions overlapping the flight's window,
        // observers excluded in SQL.
        let candidates = self
            .controllers_repo
            .overlapping_sessions(session_start, session_end)
            .await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut facility_by_callsign: HashMap<String, i16> = HashMap::new();
        for controller in &candidates {
            facility_by_callsign.insert(controller.callsign.clone(), controller.facility);
        }
        let candidate_callsigns: Vec<String> = facility_by_callsign.keys().cloned().collect();

        let flight_obs = self
            .transceivers_repo
            .timeline(
                EntityType::Flight,
                callsign.to_string(),
                session_start,
                session_end,
            )
            .await?;
        if flight_obs.is_empty() {
            return Ok(Vec::new());
        }

        let atc_obs = self
            .transceivers_repo
            .timelines_for(EntityType::Atc, candidate_callsigns, session_start, session_end)
            .await?;

        debug!(
            flight = callsign,
            flight_obs = flight_obs.len(),
            atc_obs = atc_obs.len(),
            candidates = candidates.len(),
            "Matching flight against candidate controllers"
        );

        Ok(group_controller_interactions(
            &flight_obs,
            &atc_obs,
            &facility_by_callsign,
            &self.config,
        ))
    }

    /// Aircraft a completed controller session worked. Mirror of the flight
    /// side: candidate flights are those with any transceiver record inside
    /// the controller's window.
    pub async fn aircraft_interactions_for_controller(
        &self,
        callsign: &str,
        session_start: DateTime<Utc>,
        session_end: DateTime<Utc>,
    ) -> Result<Vec<AircraftInteraction>> {
        let atc_obs = self
            .transceivers_repo
            .timeline(
                EntityType::Atc,
                callsign.to_string(),
                session_start,
                session_end,
            )
            .await?;
        if atc_obs.is_empty() {
            return Ok(Vec::new());
        }

        let candidate_flights = self
            .transceivers_repo
            .active_callsigns(EntityType::Flight, session_start, session_end)
            .await?;
        if candidate_flights.is_empty() {
            return Ok(Vec::new());
        }

        let flight_obs = self
            .transceivers_repo
            .timelines_for(EntityType::Flight, candidate_flights, session_start, session_end)
            .await?;

        debug!(
            controller = callsign,
            atc_obs = atc_obs.len(),
            flight_obs = flight_obs.len(),
            "Matching controller against active flights"
        );

        Ok(group_aircraft_interactions(&atc_obs, &flight_obs, &self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(callsign: &str, frequency_hz: i64, lat: f64, lon: f64, timestamp: &str) -> TransceiverObs {
        TransceiverObs {
            callsign: callsign.to_string(),
            frequency: frequency_hz,
            position_lat: Some(lat),
            position_lon: Some(lon),
            timestamp: timestamp.parse().unwrap(),
        }
    }

    fn config() -> InteractionConfig {
        InteractionConfig::default()
    }

    #[test]
    fn test_simple_match_emits_one_tower_interaction() {
        // Flight and tower on 124.700, 30 seconds apart, under a mile away.
        let flight = [obs(
            "JST211",
            124_700_000,
            -35.3076,
            149.1913,
            "2025-07-10T03:00:00Z",
        )];
        let atc = [obs(
            "CB_TWR",
            124_700_000,
            -35.3000,
            149.2000,
            "2025-07-10T03:00:30Z",
        )];
        let facilities = HashMap::from([("CB_TWR".to_string(), 4i16)]);

        let interactions = group_controller_interactions(&flight, &atc, &facilities, &config());
        assert_eq!(interactions.len(), 1);
        let interaction = &interactions[0];
        assert_eq!(interaction.controller_callsign, "CB_TWR");
        assert_eq!(interaction.controller_type, "TWR");
        assert_eq!(interaction.frequency_mhz, 124.7);
        assert_eq!(interaction.time_minutes, 0);
        assert_eq!(interaction.first_seen, interaction.last_seen);
        assert_eq!(
            interaction.first_seen,
            "2025-07-10T03:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn test_frequency_mismatch_excluded() {
        let flight = [obs(
            "JST211",
            124_700_000,
            -35.3076,
            149.1913,
            "2025-07-10T03:00:00Z",
        )];
        let atc = [obs(
            "CB_TWR",
            124_800_000,
            -35.3000,
            149.2000,
            "2025-07-10T03:00:00Z",
        )];
        let facilities = HashMap::from([("CB_TWR".to_string(), 4i16)]);

        let interactions = group_controller_interactions(&flight, &atc, &facilities, &config());
        assert!(interactions.is_empty());
    }

    #[test]
    fn test_distance_mismatch_excluded() {
        // Adelaide controller, Sydney aircraft: ~622 NM on the same
        // frequency at the same instant.
        let flight = [obs(
            "QFA500",
            124_700_000,
            -33.9393,
            151.1647,
            "2025-07-10T03:00:00Z",
        )];
        let atc = [obs(
            "AD_APP",
            124_700_000,
            -34.9524,
            138.5320,
            "2025-07-10T03:00:00Z",
        )];
        let facilities = HashMap::from([("AD_APP".to_string(), 5i16)]);

        let interactions = group_controller_interactions(&flight, &atc, &facilities, &config());
        assert!(interactions.is_empty());
    }

    #[test]
    fn test_time_mismatch_excluded() {
        let flight = [obs(
            "JST211",
            124_700_000,
            -35.3076,
            149.1913,
            "2025-07-10T03:00:00Z",
        )];
        let atc = [obs(
            "CB_TWR",
            124_700_000,
            -35.3000,
            149.2000,
            "2025-07-10T03:03:01Z",
        )];
        let facilities = HashMap::from([("CB_TWR".to_string(), 4i16)]);

        let interactions = group_controller_interactions(&flight, &atc, &facilities, &config());
        assert!(interactions.is_empty());
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let flight = obs(
            "JST211",
            124_700_000,
            -35.3076,
            149.1913,
            "2025-07-10T03:00:00Z",
        );
        // Exactly 5 kHz away and exactly 180 seconds later.
        let atc = obs(
            "CB_TWR",
            124_705_000,
            -35.3000,
            149.2000,
            "2025-07-10T03:03:00Z",
        );
        assert!(predicates_match(&atc, &flight, &config()));

        // Exactly at the distance bound: set the bound to the computed
        // distance and confirm <= keeps the pair.
        let exact = haversine_nm(-35.3000, 149.2000, -35.3076, 149.1913);
        let tight = InteractionConfig {
            proximity_nm: exact,
            ..config()
        };
        assert!(predicates_match(&atc, &flight, &tight));

        // Any tighter bound drops it.
        let too_tight = InteractionConfig {
            proximity_nm: exact - 1e-9,
            ..config()
        };
        assert!(!predicates_match(&atc, &flight, &too_tight));
    }

    #[test]
    fn test_missing_position_never_matches() {
        let flight = TransceiverObs {
            callsign: "JST211".to_string(),
            frequency: 124_700_000,
            position_lat: None,
            position_lon: None,
            timestamp: "2025-07-10T03:00:00Z".parse().unwrap(),
        };
        let atc = obs(
            "CB_TWR",
            124_700_000,
            -35.3000,
            149.2000,
            "2025-07-10T03:00:00Z",
        );
        assert!(!predicates_match(&atc, &flight, &config()));
    }

    #[test]
    fn test_mode_frequency_and_span() {
        // Three contacts on 124.700, one on 124.705: mode is 124.700.
        let flight = [
            obs("JST211", 124_700_000, -35.30, 149.19, "2025-07-10T03:00:00Z"),
            obs("JST211", 124_700_000, -35.31, 149.20, "2025-07-10T03:02:00Z"),
            obs("JST211", 124_700_000, -35.32, 149.21, "2025-07-10T03:04:00Z"),
            obs("JST211", 124_705_000, -35.33, 149.22, "2025-07-10T03:06:30Z"),
        ];
        let atc = [
            obs("CB_TWR", 124_700_000, -35.30, 149.20, "2025-07-10T03:00:10Z"),
            obs("CB_TWR", 124_700_000, -35.30, 149.20, "2025-07-10T03:02:10Z"),
            obs("CB_TWR", 124_700_000, -35.30, 149.20, "2025-07-10T03:04:10Z"),
            obs("CB_TWR", 124_705_000, -35.30, 149.20, "2025-07-10T03:06:40Z"),
        ];
        let facilities = HashMap::from([("CB_TWR".to_string(), 4i16)]);

        let interactions = group_controller_interactions(&flight, &atc, &facilities, &config());
        assert_eq!(interactions.len(), 1);
        let interaction = &interactions[0];
        assert_eq!(interaction.frequency_mhz, 124.7);
        assert_eq!(
            interaction.first_seen,
            "2025-07-10T03:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(
            interaction.last_seen,
            "2025-07-10T03:06:30Z".parse::<DateTime<Utc>>().unwrap()
        );
        // 6.5 minutes elapsed, floored.
        assert_eq!(interaction.time_minutes, 6);
    }

    #[test]
    fn test_output_ordered_by_first_seen() {
        let flight = [
            obs("JST211", 124_700_000, -35.30, 149.19, "2025-07-10T03:00:00Z"),
            obs("JST211", 118_700_000, -35.30, 149.19, "2025-07-10T02:30:00Z"),
        ];
        let atc = [
            obs("CB_TWR", 124_700_000, -35.30, 149.20, "2025-07-10T03:00:10Z"),
            obs("CB_GND", 118_700_000, -35.30, 149.20, "2025-07-10T02:30:10Z"),
        ];
        let facilities = HashMap::from([
            ("CB_TWR".to_string(), 4i16),
            ("CB_GND".to_string(), 3i16),
        ]);

        let interactions = group_controller_interactions(&flight, &atc, &facilities, &config());
        assert_eq!(interactions.len(), 2);
        assert_eq!(interactions[0].controller_callsign, "CB_GND");
        assert_eq!(interactions[0].controller_type, "GND");
        assert_eq!(interactions[1].controller_callsign, "CB_TWR");
    }

    #[test]
    fn test_aircraft_grouping_mirrors_flight_grouping() {
        let flight = [
            obs("JST211", 124_700_000, -35.30, 149.19, "2025-07-10T03:00:00Z"),
            obs("QFA12", 124_700_000, -35.28, 149.18, "2025-07-10T03:01:00Z"),
        ];
        let atc = [obs(
            "CB_TWR",
            124_700_000,
            -35.30,
            149.20,
            "2025-07-10T03:00:30Z",
        )];

        let aircraft = group_aircraft_interactions(&atc, &flight, &config());
        assert_eq!(aircraft.len(), 2);
        assert_eq!(aircraft[0].callsign, "JST211");
        assert_eq!(aircraft[1].callsign, "QFA12");

        // Same pairs as seen from the flight side.
        let facilities = HashMap::from([("CB_TWR".to_string(), 4i16)]);
        for flight_obs in [&flight[..1], &flight[1..]] {
            let controllers =
                group_controller_interactions(flight_obs, &atc, &facilities, &config());
            assert_eq!(controllers.len(), 1);
            assert_eq!(controllers[0].controller_callsign, "CB_TWR");
        }
    }
}
