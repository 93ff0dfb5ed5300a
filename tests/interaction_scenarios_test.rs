//! Scenario tests for the interaction matcher: literal inputs from known
//! network situations, checked against the expected interaction arrays.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracon::config::InteractionConfig;
use tracon::interactions::{
    group_aircraft_interactions, group_controller_interactions, predicates_match,
};
use tracon::transceivers::TransceiverObs;

fn ts(raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap()
}

fn obs(callsign: &str, frequency_hz: i64, lat: f64, lon: f64, timestamp: &str) -> TransceiverObs {
    TransceiverObs {
        callsign: callsign.to_string(),
        frequency: frequency_hz,
        position_lat: Some(lat),
        position_lon: Some(lon),
        timestamp: ts(timestamp),
    }
}

/// Jetstar into Canberra: tower transceiver half a mile away, 30 seconds
/// later, same frequency. One TWR interaction expected.
#[test]
fn simple_match_produces_tower_interaction() {
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

    let interactions = group_controller_interactions(
        &flight,
        &atc,
        &facilities,
        &InteractionConfig::default(),
    );

    assert_eq!(interactions.len(), 1);
    assert_eq!(interactions[0].controller_callsign, "CB_TWR");
    assert_eq!(interactions[0].controller_type, "TWR");
    assert_eq!(interactions[0].frequency_mhz, 124.7);
    assert_eq!(interactions[0].time_minutes, 0);
    assert_eq!(interactions[0].first_seen, ts("2025-07-10T03:00:00Z"));
    assert_eq!(interactions[0].last_seen, ts("2025-07-10T03:00:00Z"));
}

/// Same geometry and instant, but the aircraft is on 124.700 and the
/// controller on 124.800: a 100 kHz gap is far past the 5 kHz tolerance.
#[test]
fn frequency_mismatch_produces_nothing() {
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

    let interactions = group_controller_interactions(
        &flight,
        &atc,
        &facilities,
        &InteractionConfig::default(),
    );
    assert!(interactions.is_empty());
}

/// Adelaide approach versus a Sydney departure: same frequency, same
/// instant, roughly 622 NM apart. No interaction.
#[test]
fn distance_mismatch_produces_nothing() {
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

    let interactions = group_controller_interactions(
        &flight,
        &atc,
        &facilities,
        &InteractionConfig::default(),
    );
    assert!(interactions.is_empty());
}

/// All three predicates hold at exactly their bounds: 5 kHz, 180 seconds.
/// Inclusive comparison keeps the pair.
#[test]
fn boundary_values_are_included() {
    let config = InteractionConfig::default();
    let flight = obs(
        "JST211",
        124_700_000,
        -35.3076,
        149.1913,
        "2025-07-10T03:00:00Z",
    );
    let atc = obs(
        "CB_TWR",
        124_705_000,
        -35.3000,
        149.2000,
        "2025-07-10T03:03:00Z",
    );
    assert!(predicates_match(&atc, &flight, &config));

    // One second past the window drops it.
    let late = obs(
        "CB_TWR",
        124_705_000,
        -35.3000,
        149.2000,
        "2025-07-10T03:03:01Z",
    );
    assert!(!predicates_match(&late, &flight, &config));

    // One kHz past the tolerance drops it.
    let off_frequency = obs(
        "CB_TWR",
        124_706_000,
        -35.3000,
        149.2000,
        "2025-07-10T03:03:00Z",
    );
    assert!(!predicates_match(&off_frequency, &flight, &config));
}

/// Flight F1 works two controllers; both groupings are computed from the
/// same observations, so each side lists the other.
#[test]
fn bidirectional_consistency_across_both_groupings() {
    let config = InteractionConfig::default();

    let flight_obs = vec![
        obs("F1", 118_700_000, -35.30, 149.19, "2025-07-10T03:00:00Z"),
        obs("F1", 118_700_000, -35.30, 149.19, "2025-07-10T03:05:00Z"),
        obs("F1", 124_700_000, -35.31, 149.20, "2025-07-10T03:20:00Z"),
        obs("F1", 124_700_000, -35.32, 149.21, "2025-07-10T03:25:00Z"),
    ];
    let atc_obs = vec![
        obs("C1", 118_700_000, -35.30, 149.20, "2025-07-10T03:00:30Z"),
        obs("C1", 118_700_000, -35.30, 149.20, "2025-07-10T03:05:30Z"),
        obs("C2", 124_700_000, -35.30, 149.20, "2025-07-10T03:20:30Z"),
        obs("C2", 124_700_000, -35.30, 149.20, "2025-07-10T03:25:30Z"),
    ];
    let facilities = HashMap::from([("C1".to_string(), 3i16), ("C2".to_string(), 4i16)]);

    // Flight side: F1 lists exactly {C1, C2}, ordered by first contact.
    let controllers =
        group_controller_interactions(&flight_obs, &atc_obs, &facilities, &config);
    let listed: Vec<&str> = controllers
        .iter()
        .map(|i| i.controller_callsign.as_str())
        .collect();
    assert_eq!(listed, vec!["C1", "C2"]);

    // Controller side: each controller's matching observations list F1.
    for controller in ["C1", "C2"] {
        let own_obs: Vec<TransceiverObs> = atc_obs
            .iter()
            .filter(|o| o.callsign == controller)
            .cloned()
            .collect();
        let aircraft = group_aircraft_interactions(&own_obs, &flight_obs, &config);
        let listed: Vec<&str> = aircraft.iter().map(|i| i.callsign.as_str()).collect();
        assert_eq!(listed, vec!["F1"], "controller {} should list F1", controller);
    }
}

/// The grouping is a pure function of its inputs: running it twice yields
/// identical arrays, which is what makes repeated summarization passes
/// idempotent upstream.
#[test]
fn grouping_is_deterministic() {
    let config = InteractionConfig::default();
    let flight_obs: Vec<TransceiverObs> = (0..20)
        .map(|i| {
            obs(
                "F1",
                124_700_000 + (i % 3) * 5_000,
                -35.30 - i as f64 * 0.01,
                149.19 + i as f64 * 0.01,
                "2025-07-10T03:00:00Z",
            )
        })
        .map(|mut o| {
            o.timestamp += Duration::seconds(30);
            o
        })
        .collect();
    let atc_obs = vec![
        obs("C1", 124_700_000, -35.30, 149.20, "2025-07-10T03:00:40Z"),
        obs("C2", 124_705_000, -35.30, 149.20, "2025-07-10T03:00:50Z"),
    ];
    let facilities = HashMap::from([("C1".to_string(), 6i16), ("C2".to_string(), 5i16)]);

    let first = group_controller_interactions(&flight_obs, &atc_obs, &facilities, &config);
    let second = group_controller_interactions(&flight_obs, &atc_obs, &facilities, &config);
    assert_eq!(first, second);
    assert!(!first.is_empty());
}
