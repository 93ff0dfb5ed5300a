//! Runtime configuration, loaded from the environment.
//!
//! Every knob has a typed default; invalid values fail startup with a
//! message naming the offending variable.

use std::env;
use std::path::PathBuf;

use anyhow::Result;

use crate::errors::TraconError;

const AVIATION_BAND_MIN_MHZ: f64 = 118.0;
const AVIATION_BAND_MAX_MHZ: f64 = 137.0;

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, TraconError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| TraconError::config(format!("{} has invalid value {:?}", key, raw))),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool, TraconError> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(TraconError::config(format!(
                "{} must be a boolean, got {:?}",
                key, raw
            ))),
        },
        Err(_) => Ok(default),
    }
}

/// Database pool settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub max_overflow: u32,
    pub pool_recycle_seconds: u64,
    pub pool_timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
}

impl DatabaseConfig {
    pub fn load_from_env() -> Result<Self, TraconError> {
        let config = Self {
            url: env::var("DATABASE_URL")
                .map_err(|_| TraconError::config("DATABASE_URL is required"))?,
            pool_size: env_parse("DATABASE_POOL_SIZE", 10)?,
            max_overflow: env_parse("DATABASE_MAX_OVERFLOW", 20)?,
            pool_recycle_seconds: env_parse("DATABASE_POOL_RECYCLE", 180)?,
            pool_timeout_seconds: env_parse("DATABASE_POOL_TIMEOUT", 60)?,
            connect_timeout_seconds: env_parse("DATABASE_CONNECT_TIMEOUT", 30)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), TraconError> {
        if self.url.is_empty() {
            return Err(TraconError::config("DATABASE_URL is required"));
        }
        if self.pool_size < 1 {
            return Err(TraconError::config("DATABASE_POOL_SIZE must be at least 1"));
        }
        if self.pool_timeout_seconds < 1 {
            return Err(TraconError::config(
                "DATABASE_POOL_TIMEOUT must be at least 1",
            ));
        }
        if self.connect_timeout_seconds < 1 {
            return Err(TraconError::config(
                "DATABASE_CONNECT_TIMEOUT must be at least 1",
            ));
        }
        Ok(())
    }

    /// Hard cap on pool connections. r2d2 has a single maximum rather than a
    /// base size plus overflow, so the two knobs are summed here.
    pub fn max_connections(&self) -> u32 {
        self.pool_size + self.max_overflow
    }
}

/// Upstream feed endpoints and fetch policy.
#[derive(Debug, Clone)]
pub struct VatsimConfig {
    pub data_url: String,
    pub transceivers_url: String,
    pub status_url: String,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    pub user_agent: String,
    pub poll_interval_seconds: u64,
}

impl VatsimConfig {
    pub fn load_from_env() -> Result<Self, TraconError> {
        let config = Self {
            data_url: env_string(
                "VATSIM_DATA_URL",
                "https://data.vatsim.net/v3/vatsim-data.json",
            ),
            transceivers_url: env_string(
                "VATSIM_TRANSCEIVERS_URL",
                "https://data.vatsim.net/v3/transceivers-data.json",
            ),
            status_url: env_string("VATSIM_STATUS_URL", "https://status.vatsim.net/status.json"),
            timeout_seconds: env_parse("VATSIM_API_TIMEOUT", 30)?,
            retry_attempts: env_parse("VATSIM_API_RETRY_ATTEMPTS", 3)?,
            user_agent: env_string("VATSIM_USER_AGENT", "tracon/0.1"),
            poll_interval_seconds: env_parse("POLL_INTERVAL_SECONDS", 60)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), TraconError> {
        if self.data_url.is_empty() {
            return Err(TraconError::config("VATSIM_DATA_URL is required"));
        }
        if self.transceivers_url.is_empty() {
            return Err(TraconError::config("VATSIM_TRANSCEIVERS_URL is required"));
        }
        if self.status_url.is_empty() {
            return Err(TraconError::config("VATSIM_STATUS_URL is required"));
        }
        if self.timeout_seconds < 1 {
            return Err(TraconError::config("VATSIM_API_TIMEOUT must be at least 1"));
        }
        if self.poll_interval_seconds < 1 {
            return Err(TraconError::config(
                "POLL_INTERVAL_SECONDS must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Filter pipeline settings. Each stage can be disabled independently.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub boundary_enabled: bool,
    pub boundary_polygon_file: Option<PathBuf>,
    pub callsign_enabled: bool,
    pub callsign_patterns: Vec<String>,
    pub controller_type_enabled: bool,
    pub include_observers: bool,
    pub frequency_enabled: bool,
    pub excluded_frequencies_mhz: Vec<f64>,
}

impl FilterConfig {
    pub fn load_from_env() -> Result<Self, TraconError> {
        let callsign_patterns: Vec<String> = env::var("CALLSIGN_PATTERNS")
            .unwrap_or_default()
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        let mut excluded_frequencies_mhz = Vec::new();
        if let Ok(raw) = env::var("EXCLUDED_FREQUENCIES_MHZ") {
            for part in raw.split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                let freq: f64 = part.parse().map_err(|_| {
                    TraconError::config(format!(
                        "EXCLUDED_FREQUENCIES_MHZ contains invalid value {:?}",
                        part
                    ))
                })?;
                if !(AVIATION_BAND_MIN_MHZ..=AVIATION_BAND_MAX_MHZ).contains(&freq) {
                    return Err(TraconError::config(format!(
                        "EXCLUDED_FREQUENCIES_MHZ value {} is outside the {}-{} MHz band",
                        freq, AVIATION_BAND_MIN_MHZ, AVIATION_BAND_MAX_MHZ
                    )));
                }
                excluded_frequencies_mhz.push(freq);
            }
        }

        let boundary_polygon_file = env::var("BOUNDARY_POLYGON_FILE").ok().map(PathBuf::from);

        let config = Self {
            boundary_enabled: env_bool("BOUNDARY_FILTER_ENABLED", true)?,
            boundary_polygon_file,
            callsign_enabled: env_bool("CALLSIGN_FILTER_ENABLED", true)?,
            callsign_patterns,
            controller_type_enabled: env_bool("CONTROLLER_TYPE_FILTER_ENABLED", true)?,
            include_observers: env_bool("INCLUDE_OBSERVERS", false)?,
            frequency_enabled: env_bool("FREQUENCY_FILTER_ENABLED", true)?,
            excluded_frequencies_mhz,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), TraconError> {
        if self.boundary_enabled
            && let Some(path) = &self.boundary_polygon_file
            && !path.exists()
        {
            return Err(TraconError::config(format!(
                "BOUNDARY_POLYGON_FILE {:?} does not exist",
                path
            )));
        }
        for pattern in &self.callsign_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                TraconError::config(format!(
                    "CALLSIGN_PATTERNS contains invalid pattern {:?}: {}",
                    pattern, e
                ))
            })?;
        }
        Ok(())
    }
}

/// Session completion thresholds and retention windows.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub flight_completion_minutes: i64,
    pub controller_completion_minutes: i64,
    pub flight_retention_hours: i64,
    pub controller_retention_hours: i64,
    pub summary_pass_interval_minutes: u64,
}

impl CompletionConfig {
    pub fn load_from_env() -> Result<Self, TraconError> {
        let config = Self {
            flight_completion_minutes: env_parse("FLIGHT_COMPLETION_MINUTES", 14)?,
            controller_completion_minutes: env_parse("CONTROLLER_COMPLETION_MINUTES", 30)?,
            flight_retention_hours: env_parse("FLIGHT_RETENTION_HOURS", 168)?,
            controller_retention_hours: env_parse("CONTROLLER_RETENTION_HOURS", 168)?,
            summary_pass_interval_minutes: env_parse("SUMMARY_PASS_INTERVAL_MINUTES", 1)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), TraconError> {
        if self.flight_completion_minutes < 1 {
            return Err(TraconError::config(
                "FLIGHT_COMPLETION_MINUTES must be at least 1",
            ));
        }
        if self.controller_completion_minutes < 1 {
            return Err(TraconError::config(
                "CONTROLLER_COMPLETION_MINUTES must be at least 1",
            ));
        }
        if self.flight_retention_hours < 0 {
            return Err(TraconError::config(
                "FLIGHT_RETENTION_HOURS must be non-negative",
            ));
        }
        if self.controller_retention_hours < 0 {
            return Err(TraconError::config(
                "CONTROLLER_RETENTION_HOURS must be non-negative",
            ));
        }
        if self.summary_pass_interval_minutes < 1 {
            return Err(TraconError::config(
                "SUMMARY_PASS_INTERVAL_MINUTES must be at least 1",
            ));
        }
        Ok(())
    }
}

/// The three-predicate match tolerances for the interaction detector.
#[derive(Debug, Clone, Copy)]
pub struct InteractionConfig {
    pub frequency_tolerance_mhz: f64,
    pub time_window_seconds: i64,
    pub proximity_nm: f64,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            frequency_tolerance_mhz: 0.005,
            time_window_seconds: 180,
            proximity_nm: 300.0,
        }
    }
}

impl InteractionConfig {
    pub fn load_from_env() -> Result<Self, TraconError> {
        let config = Self {
            frequency_tolerance_mhz: env_parse("FREQUENCY_TOLERANCE_MHZ", 0.005)?,
            time_window_seconds: env_parse("TIME_WINDOW_SECONDS", 180)?,
            proximity_nm: env_parse("PROXIMITY_NM", 300.0)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), TraconError> {
        if self.frequency_tolerance_mhz < 0.0 {
            return Err(TraconError::config(
                "FREQUENCY_TOLERANCE_MHZ must be non-negative",
            ));
        }
        if self.time_window_seconds < 0 {
            return Err(TraconError::config(
                "TIME_WINDOW_SECONDS must be non-negative",
            ));
        }
        if self.proximity_nm < 0.0 {
            return Err(TraconError::config("PROXIMITY_NM must be non-negative"));
        }
        Ok(())
    }
}

/// Batch sizing and intra-pass parallelism.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub batch_size: usize,
    pub worker_count: usize,
}

impl ServiceConfig {
    pub fn load_from_env(default_workers: usize) -> Result<Self, TraconError> {
        let config = Self {
            batch_size: env_parse("SERVICE_BATCH_SIZE", 1000)?,
            worker_count: env_parse("WORKER_COUNT", default_workers)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), TraconError> {
        if self.batch_size < 1 {
            return Err(TraconError::config("SERVICE_BATCH_SIZE must be at least 1"));
        }
        if self.worker_count < 1 {
            return Err(TraconError::config("WORKER_COUNT must be at least 1"));
        }
        Ok(())
    }
}

/// Everything the process needs, loaded and validated at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub vatsim: VatsimConfig,
    pub filters: FilterConfig,
    pub completion: CompletionConfig,
    pub interaction: InteractionConfig,
    pub service: ServiceConfig,
}

impl AppConfig {
    pub fn load_from_env() -> Result<Self, TraconError> {
        let database = DatabaseConfig::load_from_env()?;
        let service = ServiceConfig::load_from_env(database.pool_size as usize)?;
        Ok(Self {
            database,
            vatsim: VatsimConfig::load_from_env()?,
            filters: FilterConfig::load_from_env()?,
            completion: CompletionConfig::load_from_env()?,
            interaction: InteractionConfig::load_from_env()?,
            service,
        })
    }
}
