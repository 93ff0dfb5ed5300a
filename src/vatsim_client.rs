//! Client for the VATSIM v3 data feeds.
//!
//! Three JSON endpoints: the network snapshot (pilots + controllers), the
//! transceivers feed, and the status document. Responses are parsed
//! per-record so one malformed entry never discards a whole poll.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::VatsimConfig;
use crate::errors::TraconError;

const BACKOFF_BASE_MS: u64 = 50;
const BACKOFF_CAP_MS: u64 = 5_000;

/// Feed-level metadata attached to every snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralInfo {
    pub update_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub connected_clients: Option<i32>,
    #[serde(default)]
    pub unique_users: Option<i32>,
}

/// Filed flight plan carried by a pilot record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlightPlan {
    #[serde(default)]
    pub aircraft_short: String,
    #[serde(default)]
    pub departure: String,
    #[serde(default)]
    pub arrival: String,
    #[serde(default)]
    pub route: String,
    #[serde(default)]
    pub cruise_tas: String,
    #[serde(default)]
    pub deptime: String,
}

/// One pilot as reported by the snapshot feed.
#[derive(Debug, Clone, Deserialize)]
pub struct PilotRecord {
    pub callsign: String,
    pub cid: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub altitude: i32,
    #[serde(default)]
    pub groundspeed: i32,
    #[serde(default)]
    pub heading: i32,
    #[serde(default)]
    pub transponder: String,
    pub logon_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub flight_plan: Option<FlightPlan>,
}

/// One controller as reported by the snapshot feed.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerRecord {
    pub callsign: String,
    pub cid: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rating: i16,
    pub facility: i16,
    /// The feed encodes this as an MHz string ("124.700").
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub visual_range: i32,
    #[serde(default)]
    pub text_atis: Option<Vec<String>>,
    pub logon_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl ControllerRecord {
    /// Normalize the MHz string to integer Hz at the boundary.
    pub fn frequency_hz(&self) -> Result<i64, TraconError> {
        mhz_string_to_hz(&self.frequency)
    }

    pub fn text_atis_joined(&self) -> Option<String> {
        self.text_atis
            .as_ref()
            .filter(|lines| !lines.is_empty())
            .map(|lines| lines.join(" "))
    }
}

/// Convert an MHz string like "124.700" to integer Hz.
pub fn mhz_string_to_hz(raw: &str) -> Result<i64, TraconError> {
    let mhz: f64 = raw
        .trim()
        .parse()
        .map_err(|_| TraconError::parse(format!("invalid MHz frequency {:?}", raw)))?;
    if !(0.0..=1_000_000.0).contains(&mhz) {
        return Err(TraconError::parse(format!(
            "frequency {} MHz is outside a plausible range",
            mhz
        )));
    }
    Ok((mhz * 1_000_000.0).round() as i64)
}

/// One radio in the transceivers feed.
#[derive(Debug, Clone, Deserialize)]
pub struct TransceiverRadio {
    pub id: i32,
    /// Already integer Hz in this feed.
    pub frequency: i64,
    #[serde(default, rename = "latDeg")]
    pub lat_deg: Option<f64>,
    #[serde(default, rename = "lonDeg")]
    pub lon_deg: Option<f64>,
    #[serde(default, rename = "heightMslM")]
    pub height_msl_m: Option<f64>,
    #[serde(default, rename = "heightAglM")]
    pub height_agl_m: Option<f64>,
}

/// All radios reported for one callsign.
#[derive(Debug, Clone, Deserialize)]
pub struct TransceiverEntry {
    pub callsign: String,
    #[serde(default)]
    pub transceivers: Vec<TransceiverRadio>,
}

/// The status document enumerating feed endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkStatus {
    pub data: StatusData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    #[serde(default)]
    pub v3: Vec<String>,
    #[serde(default)]
    pub transceivers: Vec<String>,
}

/// A parsed, per-record-validated network snapshot.
#[derive(Debug, Clone)]
pub struct NetworkSnapshot {
    pub general: GeneralInfo,
    pub pilots: Vec<PilotRecord>,
    pub controllers: Vec<ControllerRecord>,
}

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    general: GeneralInfo,
    #[serde(default)]
    pilots: Vec<serde_json::Value>,
    #[serde(default)]
    controllers: Vec<serde_json::Value>,
}

pub struct VatsimClient {
    http: reqwest::Client,
    config: VatsimConfig,
}

impl VatsimClient {
    pub fn new(config: VatsimConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { http, config })
    }

    /// Fetch and parse the network snapshot.
    ///
    /// Records missing required fields are dropped individually with a
    /// counter increment; the response as a whole survives.
    pub async fn fetch_network_snapshot(&self) -> Result<NetworkSnapshot, TraconError> {
        let response = self.get_with_retry(&self.config.data_url).await?;
        let raw: RawSnapshot = response
            .json()
            .await
            .map_err(|e| TraconError::parse(format!("malformed snapshot body: {}", e)))?;

        let pilots = parse_records::<PilotRecord>(raw.pilots, "pilot");
        let controllers = parse_records::<ControllerRecord>(raw.controllers, "controller");

        debug!(
            pilots = pilots.len(),
            controllers = controllers.len(),
            update_timestamp = %raw.general.update_timestamp,
            "Fetched network snapshot"
        );

        Ok(NetworkSnapshot {
            general: raw.general,
            pilots,
            controllers,
        })
    }

    /// Fetch the transceivers feed.
    pub async fn fetch_transceivers(&self) -> Result<Vec<TransceiverEntry>, TraconError> {
        let response = self.get_with_retry(&self.config.transceivers_url).await?;
        let raw: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| TraconError::parse(format!("malformed transceivers body: {}", e)))?;

        let entries = parse_records::<TransceiverEntry>(raw, "transceiver");
        debug!(entries = entries.len(), "Fetched transceivers feed");
        Ok(entries)
    }

    /// Fetch the status document. Used at startup to log the feed layout.
    pub async fn fetch_status(&self) -> Result<NetworkStatus, TraconError> {
        let response = self.get_with_retry(&self.config.status_url).await?;
        response
            .json()
            .await
            .map_err(|e| TraconError::parse(format!("malformed status body: {}", e)))
    }

    /// GET with exponential backoff. 5xx and transport errors retry up to
    /// the configured attempt count; 4xx fails immediately.
    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response, TraconError> {
        let attempts = self.config.retry_attempts + 1;
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
            }

            match self.http.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status.is_client_error() {
                        return Err(TraconError::UpstreamUnavailable(format!(
                            "{} returned {}",
                            url, status
                        )));
                    }
                    last_error = format!("{} returned {}", url, status);
                    warn!(
                        "Fetch of {} failed with {} (attempt {}/{})",
                        url,
                        status,
                        attempt + 1,
                        attempts
                    );
                }
                Err(e) => {
                    last_error = format!("request to {} failed: {}", url, e);
                    warn!(
                        "Fetch of {} failed: {} (attempt {}/{})",
                        url,
                        e,
                        attempt + 1,
                        attempts
                    );
                }
            }
            metrics::counter!("vatsim.fetch.retry").increment(1);
        }

        metrics::counter!("vatsim.fetch.exhausted").increment(1);
        Err(TraconError::UpstreamUnavailable(last_error))
    }
}

/// Backoff before retry `k` (0-based): 50ms * 2^k, capped at 5s.
fn backoff_delay(k: u32) -> Duration {
    let ms = BACKOFF_BASE_MS.saturating_mul(1u64 << k.min(16));
    Duration::from_millis(ms.min(BACKOFF_CAP_MS))
}

/// Deserialize each element independently, dropping failures.
fn parse_records<T: serde::de::DeserializeOwned>(
    values: Vec<serde_json::Value>,
    kind: &str,
) -> Vec<T> {
    let mut records = Vec::with_capacity(values.len());
    for value in values {
        match serde_json::from_value::<T>(value) {
            Ok(record) => records.push(record),
            Err(e) => {
                metrics::counter!("vatsim.parse.record_dropped", "kind" => kind.to_string())
                    .increment(1);
                debug!("Dropped malformed {} record: {}", kind, e);
            }
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(50));
        assert_eq!(backoff_delay(1), Duration::from_millis(100));
        assert_eq!(backoff_delay(2), Duration::from_millis(200));
        assert_eq!(backoff_delay(6), Duration::from_millis(3200));
        assert_eq!(backoff_delay(7), Duration::from_millis(5000));
        assert_eq!(backoff_delay(20), Duration::from_millis(5000));
    }

    #[test]
    fn test_mhz_string_to_hz() {
        assert_eq!(mhz_string_to_hz("124.700").unwrap(), 124_700_000);
        assert_eq!(mhz_string_to_hz("121.5").unwrap(), 121_500_000);
        assert_eq!(mhz_string_to_hz(" 118.000 ").unwrap(), 118_000_000);
        assert!(mhz_string_to_hz("tower").is_err());
        assert!(mhz_string_to_hz("").is_err());
    }

    #[test]
    fn test_pilot_records_tolerate_unknown_and_drop_incomplete() {
        let values: Vec<serde_json::Value> = serde_json::from_str(
            r#"[
                {
                    "callsign": "JST211",
                    "cid": 1000001,
                    "name": "Test Pilot",
                    "latitude": -35.3076,
                    "longitude": 149.1913,
                    "altitude": 24000,
                    "groundspeed": 410,
                    "heading": 270,
                    "transponder": "3000",
                    "logon_time": "2025-07-10T02:00:00Z",
                    "last_updated": "2025-07-10T04:00:00Z",
                    "qnh_i_hg": 29.92,
                    "flight_plan": {
                        "aircraft_short": "A320",
                        "departure": "YSSY",
                        "arrival": "YSCB",
                        "route": "DCT",
                        "deptime": "0200",
                        "unknown_field": true
                    }
                },
                {"callsign": "NOLOGON", "cid": 2}
            ]"#,
        )
        .unwrap();

        let pilots = parse_records::<PilotRecord>(values, "pilot");
        assert_eq!(pilots.len(), 1);
        let pilot = &pilots[0];
        assert_eq!(pilot.callsign, "JST211");
        assert_eq!(pilot.flight_plan.as_ref().unwrap().departure, "YSSY");
    }

    #[test]
    fn test_controller_record_frequency_and_atis() {
        let value: serde_json::Value = serde_json::from_str(
            r#"{
                "callsign": "CB_TWR",
                "cid": 900001,
                "name": "Canberra Tower",
                "rating": 3,
                "facility": 4,
                "frequency": "124.700",
                "server": "AUSTRALIA",
                "visual_range": 50,
                "text_atis": ["CANBERRA TOWER", "RWY 35 IN USE"],
                "logon_time": "2025-07-10T01:00:00Z",
                "last_updated": "2025-07-10T04:00:00Z"
            }"#,
        )
        .unwrap();

        let controller: ControllerRecord = serde_json::from_value(value).unwrap();
        assert_eq!(controller.frequency_hz().unwrap(), 124_700_000);
        assert_eq!(
            controller.text_atis_joined().unwrap(),
            "CANBERRA TOWER RWY 35 IN USE"
        );
    }

    #[test]
    fn test_transceiver_entry_field_names() {
        let entries: Vec<serde_json::Value> = serde_json::from_str(
            r#"[{
                "callsign": "JST211",
                "transceivers": [
                    {
                        "id": 0,
                        "frequency": 124700000,
                        "latDeg": -35.3076,
                        "lonDeg": 149.1913,
                        "heightMslM": 7315.2,
                        "heightAglM": 6700.0
                    }
                ]
            }]"#,
        )
        .unwrap();

        let parsed = parse_records::<TransceiverEntry>(entries, "transceiver");
        assert_eq!(parsed.len(), 1);
        let radio = &parsed[0].transceivers[0];
        assert_eq!(radio.frequency, 124_700_000);
        assert_eq!(radio.lat_deg, Some(-35.3076));
    }
}
