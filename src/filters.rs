//! Multi-stage record filtering between fetch and persistence.
//!
//! Fixed stage order: boundary (flights), callsign pattern (flights and
//! transceivers), controller type (controllers), frequency exclusion
//! (transceivers). Each stage can be disabled independently and keeps a
//! rolling 7-day inclusion/exclusion window.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::FilterConfig;
use crate::errors::TraconError;
use crate::geodesy::Boundary;
use crate::transceivers::hz_to_mhz_rounded;
use crate::vatsim_client::{ControllerRecord, PilotRecord, TransceiverEntry};

const STATS_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DayCounts {
    pub processed: u64,
    pub included: u64,
    pub excluded: u64,
}

/// Per-filter daily statistics over a rolling window.
///
/// Updates come from concurrent ingest ticks, so the map sits behind a
/// mutex; a day older than the window is pruned on every update.
#[derive(Debug, Default)]
pub struct FilterStats {
    window: Mutex<BTreeMap<NaiveDate, DayCounts>>,
}

impl FilterStats {
    fn record(&self, day: NaiveDate, processed: u64, included: u64) {
        let mut window = self
            .window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let entry = window.entry(day).or_default();
        entry.processed += processed;
        entry.included += included;
        entry.excluded += processed - included;

        let cutoff = day - chrono::Duration::days(STATS_WINDOW_DAYS);
        window.retain(|d, _| *d > cutoff);
    }

    /// Totals across the surviving window.
    pub fn totals(&self) -> DayCounts {
        let window = self
            .window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut totals = DayCounts::default();
        for counts in window.values() {
            totals.processed += counts.processed;
            totals.included += counts.included;
            totals.excluded += counts.excluded;
        }
        totals
    }

    pub fn daily_breakdown(&self) -> BTreeMap<NaiveDate, DayCounts> {
        self.window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

pub struct FilterPipeline {
    config: FilterConfig,
    boundary: Option<Arc<Boundary>>,
    patterns: Vec<Regex>,
    excluded_khz: HashSet<i64>,
    pub boundary_stats: FilterStats,
    pub callsign_stats: FilterStats,
    pub controller_type_stats: FilterStats,
    pub frequency_stats: FilterStats,
}

impl FilterPipeline {
    pub fn new(config: FilterConfig) -> Result<Self, TraconError> {
        let boundary = match (&config.boundary_enabled, &config.boundary_polygon_file) {
            (true, Some(path)) => Some(Boundary::load(path)?),
            (true, None) => {
                info!("Boundary filter enabled but no polygon configured; stage is a no-op");
                None
            }
            _ => None,
        };

        let mut patterns = Vec::with_capacity(config.callsign_patterns.len());
        for raw in &config.callsign_patterns {
            let regex = Regex::new(raw).map_err(|e| {
                TraconError::config(format!("invalid callsign pattern {:?}: {}", raw, e))
            })?;
            patterns.push(regex);
        }

        // Comparison happens on MHz rounded to 3 decimals; keep the excluded
        // set as integer kHz so float identity is not involved.
        let excluded_khz = config
            .excluded_frequencies_mhz
            .iter()
            .map(|mhz| (mhz * 1000.0).round() as i64)
            .collect();

        if !config.excluded_frequencies_mhz.is_empty() {
            info!(
                "Frequency filter excluding: {} MHz",
                config
                    .excluded_frequencies_mhz
                    .iter()
                    .map(|f| format!("{:.3}", f))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        Ok(Self {
            config,
            boundary,
            patterns,
            excluded_khz,
            boundary_stats: FilterStats::default(),
            callsign_stats: FilterStats::default(),
            controller_type_stats: FilterStats::default(),
            frequency_stats: FilterStats::default(),
        })
    }

    /// Stages 1 and 2 for pilot records: boundary, then callsign pattern.
    pub fn filter_pilots(&self, pilots: Vec<PilotRecord>) -> Vec<PilotRecord> {
        let today = Utc::now().date_naive();

        let processed = pilots.len() as u64;
        let after_boundary: Vec<PilotRecord> = if self.boundary_active() {
            pilots
                .into_iter()
                .filter(|pilot| self.pilot_inside_boundary(pilot))
                .collect()
        } else {
            pilots
        };
        self.boundary_stats
            .record(today, processed, after_boundary.len() as u64);

        let processed = after_boundary.len() as u64;
        let included: Vec<PilotRecord> = if self.callsign_active() {
            after_boundary
                .into_iter()
                .filter(|pilot| self.callsign_matches(&pilot.callsign))
                .collect()
        } else {
            after_boundary
        };
        self.callsign_stats
            .record(today, processed, included.len() as u64);

        if included.len() as u64 != processed {
            debug!(
                "Callsign filter: {} pilots -> {}",
                processed,
                included.len()
            );
        }
        included
    }

    /// Stage 3 for controller records: drop observers unless configured in.
    pub fn filter_controllers(&self, controllers: Vec<ControllerRecord>) -> Vec<ControllerRecord> {
        let today = Utc::now().date_naive();
        let processed = controllers.len() as u64;

        let included: Vec<ControllerRecord> =
            if self.config.controller_type_enabled && !self.config.include_observers {
                controllers.into_iter().filter(|c| c.facility != 0).collect()
            } else {
                controllers
            };

        self.controller_type_stats
            .record(today, processed, included.len() as u64);
        included
    }

    /// Stages 2 and 4 for transceiver entries: callsign pattern at the entry
    /// level, frequency exclusion per radio.
    pub fn filter_transceivers(&self, entries: Vec<TransceiverEntry>) -> Vec<TransceiverEntry> {
        let today = Utc::now().date_naive();

        let processed = entries.len() as u64;
        let after_callsign: Vec<TransceiverEntry> = if self.callsign_active() {
            entries
                .into_iter()
                .filter(|entry| self.callsign_matches(&entry.callsign))
                .collect()
        } else {
            entries
        };
        self.callsign_stats
            .record(today, processed, after_callsign.len() as u64);

        if !self.config.frequency_enabled || self.excluded_khz.is_empty() {
            return after_callsign;
        }

        let mut radios_processed = 0u64;
        let mut radios_included = 0u64;
        let filtered: Vec<TransceiverEntry> = after_callsign
            .into_iter()
            .map(|mut entry| {
                radios_processed += entry.transceivers.len() as u64;
                entry
                    .transceivers
                    .retain(|radio| !self.frequency_excluded(radio.frequency));
                radios_included += entry.transceivers.len() as u64;
                entry
            })
            .filter(|entry| !entry.transceivers.is_empty())
            .collect();

        self.frequency_stats
            .record(today, radios_processed, radios_included);

        if radios_included != radios_processed {
            info!(
                "Frequency filter: {} radios -> {} (excluded {})",
                radios_processed,
                radios_included,
                radios_processed - radios_included
            );
        }
        filtered
    }

    fn boundary_active(&self) -> bool {
        self.config.boundary_enabled && self.boundary.is_some()
    }

    fn callsign_active(&self) -> bool {
        self.config.callsign_enabled && !self.patterns.is_empty()
    }

    fn pilot_inside_boundary(&self, pilot: &PilotRecord) -> bool {
        let Some(boundary) = &self.boundary else {
            return true;
        };
        match (pilot.latitude, pilot.longitude) {
            (Some(lat), Some(lon)) => boundary.contains(lat, lon),
            // Records without a position cannot be placed and are excluded.
            _ => {
                warn!(
                    "Pilot {} has no position; excluded by boundary filter",
                    pilot.callsign
                );
                false
            }
        }
    }

    fn callsign_matches(&self, callsign: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(callsign))
    }

    fn frequency_excluded(&self, frequency_hz: i64) -> bool {
        if frequency_hz <= 0 {
            // Null/zero frequencies pass through unchanged.
            return false;
        }
        let khz = (hz_to_mhz_rounded(frequency_hz) * 1000.0).round() as i64;
        self.excluded_khz.contains(&khz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vatsim_client::TransceiverRadio;
    use std::io::Write;
    use std::path::PathBuf;

    fn pilot(callsign: &str, lat: Option<f64>, lon: Option<f64>) -> PilotRecord {
        PilotRecord {
            callsign: callsign.to_string(),
            cid: 1,
            name: String::new(),
            server: String::new(),
            latitude: lat,
            longitude: lon,
            altitude: 0,
            groundspeed: 0,
            heading: 0,
            transponder: String::new(),
            logon_time: "2025-07-10T02:00:00Z".parse().unwrap(),
            last_updated: "2025-07-10T04:00:00Z".parse().unwrap(),
            flight_plan: None,
        }
    }

    fn controller(callsign: &str, facility: i16) -> ControllerRecord {
        ControllerRecord {
            callsign: callsign.to_string(),
            cid: 1,
            name: String::new(),
            rating: 3,
            facility,
            frequency: "124.700".to_string(),
            server: String::new(),
            visual_range: 0,
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
                    lat_deg: Some(-35.0),
                    lon_deg: Some(149.0),
                    height_msl_m: None,
                    height_agl_m: None,
                })
                .collect(),
        }
    }

    fn config() -> FilterConfig {
        FilterConfig {
            boundary_enabled: false,
            boundary_polygon_file: None,
            callsign_enabled: true,
            callsign_patterns: vec![],
            controller_type_enabled: true,
            include_observers: false,
            frequency_enabled: true,
            excluded_frequencies_mhz: vec![],
        }
    }

    fn boundary_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("box.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            "[[148.0, -36.0], [151.0, -36.0], [151.0, -34.0], [148.0, -34.0], [148.0, -36.0]]"
        )
        .unwrap();
        path
    }

    #[test]
    fn test_boundary_filter_excludes_outside_and_missing_positions() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.boundary_enabled = true;
        cfg.boundary_polygon_file = Some(boundary_file(&dir));
        let pipeline = FilterPipeline::new(cfg).unwrap();

        let pilots = vec![
            pilot("INSIDE", Some(-35.3), Some(149.2)),
            pilot("OUTSIDE", Some(-33.9), Some(151.2)),
            pilot("NOPOS", None, None),
        ];
        let kept = pipeline.filter_pilots(pilots);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].callsign, "INSIDE");

        let totals = pipeline.boundary_stats.totals();
        assert_eq!(totals.processed, 3);
        assert_eq!(totals.included, 1);
        assert_eq!(totals.excluded, 2);
    }

    #[test]
    fn test_callsign_filter_empty_patterns_pass_through() {
        let pipeline = FilterPipeline::new(config()).unwrap();
        let kept = pipeline.filter_pilots(vec![pilot("ANY123", Some(0.0), Some(0.0))]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_callsign_filter_applies_to_pilots_and_transceivers() {
        let mut cfg = config();
        cfg.callsign_patterns = vec!["^QFA".to_string(), "^JST".to_string()];
        let pipeline = FilterPipeline::new(cfg).unwrap();

        let kept = pipeline.filter_pilots(vec![
            pilot("QFA1", Some(0.0), Some(0.0)),
            pilot("JST211", Some(0.0), Some(0.0)),
            pilot("UAL5", Some(0.0), Some(0.0)),
        ]);
        assert_eq!(kept.len(), 2);

        let kept = pipeline.filter_transceivers(vec![
            entry("JST211", &[124_700_000]),
            entry("DAL9", &[124_700_000]),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].callsign, "JST211");
    }

    #[test]
    fn test_controller_type_filter_drops_observers() {
        let pipeline = FilterPipeline::new(config()).unwrap();
        let kept = pipeline.filter_controllers(vec![
            controller("CB_TWR", 4),
            controller("SOMEONE_OBS", 0),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].callsign, "CB_TWR");
    }

    #[test]
    fn test_controller_type_filter_include_observers() {
        let mut cfg = config();
        cfg.include_observers = true;
        let pipeline = FilterPipeline::new(cfg).unwrap();
        let kept = pipeline.filter_controllers(vec![controller("SOMEONE_OBS", 0)]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_frequency_filter_excludes_listed_and_passes_zero() {
        let mut cfg = config();
        cfg.excluded_frequencies_mhz = vec![122.8, 121.5];
        let pipeline = FilterPipeline::new(cfg).unwrap();

        let kept = pipeline.filter_transceivers(vec![entry(
            "JST211",
            &[122_800_000, 121_500_000, 124_700_000, 0],
        )]);
        assert_eq!(kept.len(), 1);
        let frequencies: Vec<i64> = kept[0].transceivers.iter().map(|r| r.frequency).collect();
        assert_eq!(frequencies, vec![124_700_000, 0]);

        let totals = pipeline.frequency_stats.totals();
        assert_eq!(totals.processed, 4);
        assert_eq!(totals.excluded, 2);
    }

    #[test]
    fn test_frequency_filter_drops_entry_when_all_radios_excluded() {
        let mut cfg = config();
        cfg.excluded_frequencies_mhz = vec![122.8];
        let pipeline = FilterPipeline::new(cfg).unwrap();
        let kept = pipeline.filter_transceivers(vec![entry("UNICOM_ONLY", &[122_800_000])]);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_frequency_rounding_matches_near_values() {
        let mut cfg = config();
        cfg.excluded_frequencies_mhz = vec![122.8];
        let pipeline = FilterPipeline::new(cfg).unwrap();
        // 122.800400 rounds to 122.800 and is excluded.
        assert!(pipeline.frequency_excluded(122_800_400));
        // 122.800600 rounds to 122.801 and passes.
        assert!(!pipeline.frequency_excluded(122_800_600));
    }

    #[test]
    fn test_stats_window_prunes_old_days() {
        let stats = FilterStats::default();
        let day0 = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        stats.record(day0, 100, 90);
        stats.record(day0 + chrono::Duration::days(3), 50, 40);
        assert_eq!(stats.totals().processed, 150);

        // Eight days later the first bucket falls out of the window.
        stats.record(day0 + chrono::Duration::days(8), 10, 10);
        let breakdown = stats.daily_breakdown();
        assert!(!breakdown.contains_key(&day0));
        assert_eq!(stats.totals().processed, 60);
        assert_eq!(stats.totals().excluded, 10);
    }
}
