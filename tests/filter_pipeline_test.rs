//! Flow-level tests for the filter pipeline: a synthetic poll pushed
//! through every stage, checked against the stored-record invariants.

use std::io::Write;

use tracon::config::FilterConfig;
use tracon::filters::FilterPipeline;
use tracon::transceivers::hz_to_mhz_rounded;
use tracon::vatsim_client::{
    ControllerRecord, PilotRecord, TransceiverEntry, TransceiverRadio,
};

fn pilot(callsign: &str, lat: f64, lon: f64) -> PilotRecord {
    PilotRecord {
        callsign: callsign.to_string(),
        cid: 1,
        name: String::new(),
        server: String::new(),
        latitude: Some(lat),
        longitude: Some(lon),
        altitude: 10_000,
        groundspeed: 250,
        heading: 90,
        transponder: "1200".to_string(),
        logon_time: "2025-07-10T02:00:00Z".parse().unwrap(),
        last_updated: "2025-07-10T04:00:00Z".parse().unwrap(),
        flight_plan: None,
    }
}

fn controller(callsign: &str, facility: i16) -> ControllerRecord {
    ControllerRecord {
        callsign: callsign.to_string(),
        cid: 2,
        name: String::new(),
        rating: 3,
        facility,
        frequency: "124.700".to_string(),
        server: String::new(),
        visual_range: 50,
        text_atis: None,
        logon_time: "2025-07-10T01:00:00Z".parse().unwrap(),
        last_updated: "2025-07-10T04:00:00Z".parse().unwrap(),
    }
}

fn entry(callsign: &str, frequencies_hz: &[i64]) -> TransceiverEntry {
    TransceiverEntry {
        callsign: callsign.to_string(),
        transceivers: frequencies_hz
            .iter()
            .enumerate()
            .map(|(i, hz)| TransceiverRadio {
                id: i as i32,
                frequency: *hz,
                lat_deg: Some(-35.3),
                lon_deg: Some(149.2),
                height_msl_m: Some(1000.0),
                height_agl_m: Some(400.0),
            })
            .collect(),
    }
}

fn pipeline_config(dir: &tempfile::TempDir) -> FilterConfig {
    let path = dir.path().join("boundary.json");
    let mut file = std::fs::File::create(&path).unwrap();
    // Box around the Canberra area.
    write!(
        file,
        "[[148.0, -36.0], [151.0, -36.0], [151.0, -34.0], [148.0, -34.0], [148.0, -36.0]]"
    )
    .unwrap();

    FilterConfig {
        boundary_enabled: true,
        boundary_polygon_file: Some(path),
        callsign_enabled: true,
        callsign_patterns: vec!["^QFA".to_string(), "^JST".to_string(), "^CB_".to_string()],
        controller_type_enabled: true,
        include_observers: false,
        frequency_enabled: true,
        excluded_frequencies_mhz: vec![122.8, 121.5],
    }
}

#[test]
fn full_poll_respects_every_stage() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = FilterPipeline::new(pipeline_config(&dir)).unwrap();

    let pilots = vec![
        pilot("JST211", -35.3, 149.2),  // inside, matching callsign
        pilot("JST999", -33.9, 151.2),  // matching callsign, outside boundary
        pilot("UAL5", -35.3, 149.2),    // inside, non-matching callsign
    ];
    let kept_pilots = pipeline.filter_pilots(pilots);
    assert_eq!(kept_pilots.len(), 1);
    assert_eq!(kept_pilots[0].callsign, "JST211");

    let controllers = vec![
        controller("CB_TWR", 4),
        controller("CB_OBS", 0), // observer, dropped
    ];
    let kept_controllers = pipeline.filter_controllers(controllers);
    assert_eq!(kept_controllers.len(), 1);
    assert_eq!(kept_controllers[0].callsign, "CB_TWR");

    let entries = vec![
        entry("JST211", &[124_700_000, 122_800_000]),
        entry("CB_TWR", &[121_500_000]), // only an excluded frequency
        entry("DAL9", &[124_700_000]),   // non-matching callsign
    ];
    let kept_entries = pipeline.filter_transceivers(entries);

    // Every stored radio is on a non-excluded frequency and belongs to a
    // matching callsign.
    assert_eq!(kept_entries.len(), 1);
    assert_eq!(kept_entries[0].callsign, "JST211");
    for radio in kept_entries.iter().flat_map(|e| &e.transceivers) {
        let mhz = hz_to_mhz_rounded(radio.frequency);
        assert!(mhz != 122.8 && mhz != 121.5, "excluded frequency stored");
    }
}

#[test]
fn stages_can_be_disabled_independently() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = pipeline_config(&dir);
    config.boundary_enabled = false;
    config.callsign_enabled = false;
    config.frequency_enabled = false;
    config.include_observers = true;
    let pipeline = FilterPipeline::new(config).unwrap();

    let kept = pipeline.filter_pilots(vec![pilot("ANY1", -60.0, 10.0)]);
    assert_eq!(kept.len(), 1);

    let kept = pipeline.filter_controllers(vec![controller("SOME_OBS", 0)]);
    assert_eq!(kept.len(), 1);

    let kept = pipeline.filter_transceivers(vec![entry("ANY1", &[122_800_000])]);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].transceivers.len(), 1);
}

#[test]
fn pipeline_statistics_accumulate_per_stage() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = FilterPipeline::new(pipeline_config(&dir)).unwrap();

    pipeline.filter_pilots(vec![
        pilot("JST211", -35.3, 149.2),
        pilot("UAL5", -35.3, 149.2),
    ]);
    pipeline.filter_transceivers(vec![entry("JST211", &[122_800_000, 124_700_000])]);

    let boundary = pipeline.boundary_stats.totals();
    assert_eq!(boundary.processed, 2);
    assert_eq!(boundary.included, 2);

    // Callsign stats cover both pilot and transceiver streams.
    let callsign = pipeline.callsign_stats.totals();
    assert_eq!(callsign.processed, 3);
    assert_eq!(callsign.included, 2);

    let frequency = pipeline.frequency_stats.totals();
    assert_eq!(frequency.processed, 2);
    assert_eq!(frequency.excluded, 1);
}
