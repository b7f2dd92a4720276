//! Runtime configuration read from `FLOODMAP_*` environment variables.
//!
//! Every value has a default. A variable that is set but cannot be parsed
//! falls back to the default and is logged.

use std::env;
use std::time::Duration;

use tracing::warn;

use crate::aggregation::DEFAULT_MAX_AGE;
use crate::model::{Area, Coordinate};
use crate::remote::DEFAULT_API_BASE;
use crate::sync::DEFAULT_QUIET_PERIOD;

/// Default database path if not specified via environment variable.
pub const DEFAULT_DB_PATH: &str = "sqlite:floodmap.db?mode=rwc";

/// Highest web map zoom level accepted as a hint.
const MAX_ZOOM: u8 = 22;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_url: String,
    pub api_token: Option<String>,
    pub database_url: String,
    pub sync_debounce: Duration,
    pub severity_max_age: Duration,
    pub is_authenticated: bool,
    /// Zoom hint for station fetches, from `FLOODMAP_ZOOM`.
    pub zoom: Option<u8>,
    /// Area to evaluate on startup, from `id,lat,lon,radius_m`.
    pub area: Option<Area>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_BASE.to_string(),
            api_token: None,
            database_url: DEFAULT_DB_PATH.to_string(),
            sync_debounce: DEFAULT_QUIET_PERIOD,
            severity_max_age: DEFAULT_MAX_AGE,
            is_authenticated: false,
            zoom: None,
            area: None,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let sync_debounce = get("FLOODMAP_SYNC_DEBOUNCE_MS")
            .and_then(|v| parse_or_warn::<u64>("FLOODMAP_SYNC_DEBOUNCE_MS", &v))
            .map(Duration::from_millis)
            .unwrap_or(defaults.sync_debounce);

        let severity_max_age = get("FLOODMAP_SEVERITY_MAX_AGE_SECS")
            .and_then(|v| parse_or_warn::<u64>("FLOODMAP_SEVERITY_MAX_AGE_SECS", &v))
            .map(Duration::from_secs)
            .unwrap_or(defaults.severity_max_age);

        let is_authenticated = get("FLOODMAP_AUTHENTICATED")
            .and_then(|v| parse_flag(&v))
            .unwrap_or(defaults.is_authenticated);

        let zoom = get("FLOODMAP_ZOOM")
            .and_then(|v| parse_or_warn::<u8>("FLOODMAP_ZOOM", &v))
            .filter(|z| {
                if *z > MAX_ZOOM {
                    warn!(zoom = *z, "Ignoring out-of-range FLOODMAP_ZOOM");
                }
                *z <= MAX_ZOOM
            });

        let area = get("FLOODMAP_AREA").and_then(|v| {
            let area = parse_area(&v);
            if area.is_none() {
                warn!(value = %v, "Ignoring malformed FLOODMAP_AREA");
            }
            area
        });

        Self {
            api_url: get("FLOODMAP_API_URL").unwrap_or(defaults.api_url),
            api_token: get("FLOODMAP_API_TOKEN"),
            database_url: get("FLOODMAP_DATABASE_URL").unwrap_or(defaults.database_url),
            sync_debounce,
            severity_max_age,
            is_authenticated,
            zoom,
            area,
        }
    }
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    let parsed = value.parse().ok();
    if parsed.is_none() {
        warn!(key, value, "Ignoring unparsable configuration value");
    }
    parsed
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `id,lat,lon,radius_m`.
fn parse_area(value: &str) -> Option<Area> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [id, lat, lon, radius] = parts.as_slice() else {
        return None;
    };

    let lat: f64 = lat.parse().ok()?;
    let lon: f64 = lon.parse().ok()?;
    let radius: f64 = radius.parse().ok()?;

    let valid = !id.is_empty()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon)
        && radius.is_finite()
        && radius > 0.0;

    valid.then(|| Area::new(id, Coordinate::new(lat, lon), radius))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);

        assert_eq!(config, Config::default());
        assert_eq!(config.api_url, "http://localhost:8080/api");
        assert_eq!(config.sync_debounce, Duration::from_millis(500));
        assert_eq!(config.severity_max_age, Duration::from_secs(300));
        assert!(!config.is_authenticated);
        assert!(config.area.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("FLOODMAP_API_URL", "https://floods.example/api"),
            ("FLOODMAP_API_TOKEN", "secret"),
            ("FLOODMAP_DATABASE_URL", "sqlite::memory:"),
            ("FLOODMAP_SYNC_DEBOUNCE_MS", "250"),
            ("FLOODMAP_SEVERITY_MAX_AGE_SECS", "60"),
            ("FLOODMAP_AUTHENTICATED", "yes"),
            ("FLOODMAP_ZOOM", "12"),
            ("FLOODMAP_AREA", "district-1, 10.776, 106.700, 2500"),
        ]);

        assert_eq!(config.api_url, "https://floods.example/api");
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.sync_debounce, Duration::from_millis(250));
        assert_eq!(config.severity_max_age, Duration::from_secs(60));
        assert!(config.is_authenticated);
        assert_eq!(config.zoom, Some(12));

        let area = config.area.unwrap();
        assert_eq!(area.id, "district-1");
        assert_eq!(area.radius_m, 2500.0);
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = config_from(&[
            ("FLOODMAP_SYNC_DEBOUNCE_MS", "soon"),
            ("FLOODMAP_SEVERITY_MAX_AGE_SECS", "-5"),
            ("FLOODMAP_AUTHENTICATED", "maybe"),
            ("FLOODMAP_ZOOM", "40"),
            ("FLOODMAP_API_TOKEN", "   "),
        ]);

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_malformed_area() {
        assert!(parse_area("district-1,10.7,106.7").is_none());
        assert!(parse_area("district-1,95.0,106.7,1000").is_none());
        assert!(parse_area("district-1,10.7,106.7,0").is_none());
        assert!(parse_area(",10.7,106.7,1000").is_none());
        assert!(parse_area("district-1,10.7,106.7,1000").is_some());
    }
}
