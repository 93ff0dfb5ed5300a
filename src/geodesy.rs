//! Geographic predicates: coordinate parsing, great-circle distance, and
//! cached boundary polygons.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use geo::{Contains, Coord, LineString, Point, Polygon};
use once_cell::sync::Lazy;
use tracing::info;

use crate::errors::TraconError;

/// Earth radius in nautical miles.
pub const EARTH_RADIUS_NM: f64 = 3440.065;

/// Parse a textual coordinate into signed decimal degrees.
///
/// Accepted forms:
/// - plain decimal degrees (`-34.6467`, `149.8142`)
/// - `DDMMSS.SSS`: six digits before the decimal, split 2-2-2
/// - `DDDMMSS.SSS`: seven digits before the decimal, split 3-2-2
///
/// A leading `+`/`-` sign and surrounding whitespace are tolerated; any
/// other digit count before the decimal point is rejected.
pub fn parse_coordinate(raw: &str) -> Result<f64, TraconError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TraconError::parse("empty coordinate"));
    }

    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let integer_part = digits.split('.').next().unwrap_or(digits);
    if !integer_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(TraconError::parse(format!(
            "coordinate {:?} contains non-numeric characters",
            raw
        )));
    }

    let magnitude = match integer_part.len() {
        0..=3 => digits
            .parse::<f64>()
            .map_err(|_| TraconError::parse(format!("invalid decimal coordinate {:?}", raw)))?,
        6 => dms_to_degrees(digits, 2)?,
        7 => dms_to_degrees(digits, 3)?,
        n => {
            return Err(TraconError::parse(format!(
                "coordinate {:?} has unsupported digit count {} before the decimal point",
                raw, n
            )));
        }
    };

    Ok(if negative { -magnitude } else { magnitude })
}

/// Combine a `D{deg_width}MMSS.SSS` string into decimal degrees.
fn dms_to_degrees(digits: &str, deg_width: usize) -> Result<f64, TraconError> {
    let degrees: f64 = digits[..deg_width]
        .parse()
        .map_err(|_| TraconError::parse(format!("invalid degrees in {:?}", digits)))?;
    let minutes: f64 = digits[deg_width..deg_width + 2]
        .parse()
        .map_err(|_| TraconError::parse(format!("invalid minutes in {:?}", digits)))?;
    // Seconds keep the fractional part: "SS.SSS"
    let seconds: f64 = digits[deg_width + 2..]
        .parse()
        .map_err(|_| TraconError::parse(format!("invalid seconds in {:?}", digits)))?;

    Ok(degrees + minutes / 60.0 + seconds / 3600.0)
}

/// Great-circle distance between two points, in nautical miles.
///
/// Haversine with the intermediate term clamped so identical or antipodal
/// inputs cannot drift outside the domain of `asin`.
pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let a = a.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_NM * a.sqrt().asin()
}

/// A geographic boundary loaded from a polygon file.
///
/// The file holds the outer ring as a JSON list of `[lon, lat]` pairs.
pub struct Boundary {
    path: PathBuf,
    polygon: Polygon<f64>,
}

/// Parsed boundaries keyed by path. Loading a polygon is file I/O plus ring
/// construction, so repeated lookups (one per ingest tick) hit the cache.
/// Single writer on load, read-only afterwards.
static BOUNDARY_CACHE: Lazy<RwLock<HashMap<PathBuf, Arc<Boundary>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

impl Boundary {
    /// Load a boundary polygon, returning the cached value on repeat calls
    /// for the same path.
    pub fn load(path: &Path) -> Result<Arc<Boundary>, TraconError> {
        let key = path.to_path_buf();

        if let Some(boundary) = BOUNDARY_CACHE
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
        {
            return Ok(boundary.clone());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            TraconError::config(format!("failed to read boundary file {:?}: {}", path, e))
        })?;
        let ring: Vec<[f64; 2]> = serde_json::from_str(&contents).map_err(|e| {
            TraconError::config(format!(
                "boundary file {:?} is not a JSON list of [lon, lat] pairs: {}",
                path, e
            ))
        })?;
        if ring.len() < 3 {
            return Err(TraconError::config(format!(
                "boundary file {:?} needs at least 3 vertices, found {}",
                path,
                ring.len()
            )));
        }

        let exterior: LineString<f64> = ring
            .iter()
            .map(|[lon, lat]| Coord { x: *lon, y: *lat })
            .collect();
        let boundary = Arc::new(Boundary {
            path: key.clone(),
            polygon: Polygon::new(exterior, vec![]),
        });

        info!(
            "Loaded boundary polygon from {:?} ({} vertices)",
            path,
            ring.len()
        );

        let mut cache = BOUNDARY_CACHE
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = cache.entry(key).or_insert(boundary);
        Ok(entry.clone())
    }

    /// Point-in-polygon test for a position in decimal degrees.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.polygon.contains(&Point::new(lon, lat))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
