//! Data models for floodmap.
//!
//! Two families of types live here:
//!
//! - **Layer settings**: the persisted map-layer preferences ([`LayerSettings`])
//!   and the pieces they are built from ([`BaseMap`], [`Overlay`], [`Overlays`]).
//! - **Flood severity**: station observations ([`StationReading`]), the areas
//!   they are aggregated into ([`Area`], [`AreaStatus`]) and the wire types of
//!   the flood-severity endpoint ([`StationFeatureCollection`]).
//!
//! Settings are immutable values. Every change goes through one of the
//! `with_*` methods, which consume the record and return the updated copy.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Storage key for the guest settings record in local storage.
pub const LAYER_SETTINGS_KEY: &str = "layer-settings";

/// Lowest and highest accepted opacity percentage.
pub const OPACITY_MIN: u8 = 0;
pub const OPACITY_MAX: u8 = 100;

const DEFAULT_FLOOD_OPACITY: u8 = 80;
const DEFAULT_WEATHER_OPACITY: u8 = 60;

// ============================================================================
// Layer settings
// ============================================================================

/// Underlying tile rendering mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseMap {
    #[default]
    Standard,
    Satellite,
}

/// An independently toggleable map layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overlay {
    Flood,
    Traffic,
    Weather,
}

impl Overlay {
    pub const ALL: [Overlay; 3] = [Overlay::Flood, Overlay::Traffic, Overlay::Weather];

    /// Whether the overlay is rendered with adjustable transparency.
    pub fn supports_opacity(self) -> bool {
        matches!(self, Overlay::Flood | Overlay::Weather)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Overlay::Flood => "flood",
            Overlay::Traffic => "traffic",
            Overlay::Weather => "weather",
        }
    }
}

impl fmt::Display for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Overlay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Overlay::ALL
            .into_iter()
            .find(|o| o.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown overlay '{}'", s))
    }
}

/// Enabled flags for every overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Overlays {
    pub flood: bool,
    pub traffic: bool,
    pub weather: bool,
}

impl Default for Overlays {
    fn default() -> Self {
        Self {
            flood: true,
            traffic: false,
            weather: false,
        }
    }
}

impl Overlays {
    pub fn is_enabled(&self, overlay: Overlay) -> bool {
        match overlay {
            Overlay::Flood => self.flood,
            Overlay::Traffic => self.traffic,
            Overlay::Weather => self.weather,
        }
    }

    /// Return a copy with the given overlay flipped.
    pub fn toggled(mut self, overlay: Overlay) -> Self {
        match overlay {
            Overlay::Flood => self.flood = !self.flood,
            Overlay::Traffic => self.traffic = !self.traffic,
            Overlay::Weather => self.weather = !self.weather,
        }
        self
    }
}

/// Clamp an arbitrary requested opacity into `[0, 100]`.
pub fn clamp_opacity(value: i64) -> u8 {
    value.clamp(i64::from(OPACITY_MIN), i64::from(OPACITY_MAX)) as u8
}

/// The persisted map-layer configuration.
///
/// Serialized as camelCase JSON, which is the shape both the local store and
/// the remote preferences endpoint use:
///
/// ```json
/// {
///     "baseMap": "satellite",
///     "overlays": { "flood": true, "traffic": false, "weather": true },
///     "opacity": { "flood": 80, "weather": 60 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayerSettings {
    pub base_map: BaseMap,
    pub overlays: Overlays,
    /// Opacity percentage per overlay. Only opacity-capable overlays have an
    /// entry, and every value is within `[0, 100]`.
    #[serde(deserialize_with = "deserialize_opacity")]
    pub opacity: BTreeMap<Overlay, u8>,
}

impl Default for LayerSettings {
    fn default() -> Self {
        Self {
            base_map: BaseMap::default(),
            overlays: Overlays::default(),
            opacity: BTreeMap::from([
                (Overlay::Flood, DEFAULT_FLOOD_OPACITY),
                (Overlay::Weather, DEFAULT_WEATHER_OPACITY),
            ]),
        }
    }
}

impl LayerSettings {
    /// Opacity of an overlay, `None` for overlays without transparency.
    pub fn opacity(&self, overlay: Overlay) -> Option<u8> {
        self.opacity.get(&overlay).copied()
    }

    pub fn with_overlay_toggled(mut self, overlay: Overlay) -> Self {
        self.overlays = self.overlays.toggled(overlay);
        self
    }

    pub fn with_base_map(mut self, base_map: BaseMap) -> Self {
        self.base_map = base_map;
        self
    }

    /// Return a copy with the overlay's opacity set to `value` clamped into
    /// `[0, 100]`. Overlays without transparency are left untouched.
    pub fn with_opacity(mut self, overlay: Overlay, value: i64) -> Self {
        if overlay.supports_opacity() {
            self.opacity.insert(overlay, clamp_opacity(value));
        }
        self
    }

    /// Re-establish the record invariants after decoding data from outside.
    ///
    /// Drops opacity entries for overlays without transparency, clamps the
    /// rest and fills in defaults for missing opacity-capable overlays.
    pub fn normalized(mut self) -> Self {
        let defaults = LayerSettings::default();
        self.opacity.retain(|overlay, _| overlay.supports_opacity());
        for value in self.opacity.values_mut() {
            *value = clamp_opacity(i64::from(*value));
        }
        for (overlay, value) in defaults.opacity {
            self.opacity.entry(overlay).or_insert(value);
        }
        self
    }
}

/// Decode the opacity map leniently: unknown overlay names are skipped and
/// out-of-range or fractional numbers are clamped instead of failing the
/// whole record.
fn deserialize_opacity<'de, D>(deserializer: D) -> Result<BTreeMap<Overlay, u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, f64>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(name, value)| {
            let overlay = name.parse::<Overlay>().ok()?;
            if !overlay.supports_opacity() || !value.is_finite() {
                return None;
            }
            Some((overlay, clamp_opacity(value.round() as i64)))
        })
        .collect())
}

/// Which backend a settings read or write goes to.
///
/// Derived from the caller's authentication flag on every call and never
/// stored, so it cannot drift from the authentication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTarget {
    Local,
    Remote,
}

impl SyncTarget {
    pub fn for_auth(is_authenticated: bool) -> Self {
        if is_authenticated {
            SyncTarget::Remote
        } else {
            SyncTarget::Local
        }
    }
}

// ============================================================================
// Flood severity
// ============================================================================

/// Flood severity classification of a station or an area.
///
/// Ranked severities are ordered `Safe < Caution < Warning < Critical`.
/// `Unknown` has no rank and never takes part in a maximum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Safe,
    Caution,
    Warning,
    Critical,
    #[default]
    Unknown,
}

impl Severity {
    /// Ordinal rank table.
    pub fn rank(self) -> Option<u8> {
        match self {
            Severity::Safe => Some(0),
            Severity::Caution => Some(1),
            Severity::Warning => Some(2),
            Severity::Critical => Some(3),
            Severity::Unknown => None,
        }
    }

    /// Inverse of [`Severity::rank`].
    pub fn from_rank(rank: u8) -> Self {
        match rank {
            0 => Severity::Safe,
            1 => Severity::Caution,
            2 => Severity::Warning,
            3 => Severity::Critical,
            _ => Severity::Unknown,
        }
    }

    /// Parse a wire classification. Anything unrecognized is `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "safe" | "normal" => Severity::Safe,
            "caution" => Severity::Caution,
            "warning" => Severity::Warning,
            "critical" => Severity::Critical,
            _ => Severity::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::Safe => "Safe",
            Severity::Caution => "Caution",
            Severity::Warning => "Warning",
            Severity::Critical => "Critical",
            Severity::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map_or(Severity::Unknown, Severity::parse))
    }
}

/// A single sensor observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationReading {
    pub station_id: String,
    #[serde(default)]
    pub station_code: String,
    #[serde(default)]
    pub station_name: String,
    /// `None` while the station is silent.
    #[serde(default)]
    pub water_level: Option<f64>,
    #[serde(default)]
    pub unit: String,
    /// Classification reported by the station itself.
    pub severity: Severity,
    pub measured_at: DateTime<Utc>,
}

impl StationReading {
    /// The water level if it is a usable measurement.
    pub fn valid_water_level(&self) -> Option<f64> {
        self.water_level.filter(|level| level.is_finite() && *level >= 0.0)
    }

    /// The severity this reading contributes to an aggregate.
    ///
    /// A missing or negative water level makes the reading `Unknown`
    /// regardless of the reported classification.
    pub fn effective_severity(&self) -> Severity {
        match self.valid_water_level() {
            Some(_) => self.severity,
            None => Severity::Unknown,
        }
    }

    /// Human-readable reading, e.g. `"3.00 m"` or `"no reading"`.
    pub fn level_label(&self) -> String {
        match self.valid_water_level() {
            Some(level) if self.unit.is_empty() => format!("{:.2}", level),
            Some(level) => format!("{:.2} {}", level, self.unit),
            None => "no reading".to_string(),
        }
    }

    /// Display name, falling back to the code and then the id.
    pub fn display_name(&self) -> &str {
        [&self.station_name, &self.station_code]
            .into_iter()
            .find(|s| !s.is_empty())
            .map_or(self.station_id.as_str(), |s| s.as_str())
    }
}

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance in meters.
    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;

        let lat1_rad = self.latitude.to_radians();
        let lat2_rad = other.latitude.to_radians();
        let delta_lat = (other.latitude - self.latitude).to_radians();
        let delta_lon = (other.longitude - self.longitude).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }
}

/// A circular area that station readings are aggregated into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Area {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub center: Coordinate,
    pub radius_m: f64,
}

impl Area {
    pub fn new(id: &str, center: Coordinate, radius_m: f64) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            center,
            radius_m,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Radius containment test.
    pub fn contains(&self, point: &Coordinate) -> bool {
        self.center.distance_m(point) <= self.radius_m
    }
}

/// Aggregated flood status of an area.
///
/// Computed fresh on every aggregation pass and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaStatus {
    pub area_id: String,
    pub severity: Severity,
    /// Ordinal rank of `severity`, 0 when unknown.
    pub severity_level: u8,
    pub summary: String,
    #[serde(default)]
    pub contributing_stations: Vec<StationReading>,
    /// When the aggregation ran, not when any station measured.
    pub evaluated_at: DateTime<Utc>,
}

// ============================================================================
// Flood severity endpoint wire types
// ============================================================================

/// Bounding box filter for the flood-severity endpoint, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    /// Smallest axis-aligned box enclosing the area's circle.
    pub fn around(area: &Area) -> Self {
        const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

        let lat_delta = area.radius_m / METERS_PER_DEGREE_LAT;
        let cos_lat = area.center.latitude.to_radians().cos().abs().max(0.01);
        let lon_delta = (lat_delta / cos_lat).min(180.0);

        Self {
            west: area.center.longitude - lon_delta,
            south: (area.center.latitude - lat_delta).max(-90.0),
            east: area.center.longitude + lon_delta,
            north: (area.center.latitude + lat_delta).min(90.0),
        }
    }

    /// `west,south,east,north` as used in the `bbox` query parameter.
    pub fn to_query_value(&self) -> String {
        format!(
            "{:.6},{:.6},{:.6},{:.6}",
            self.west, self.south, self.east, self.north
        )
    }
}

/// GeoJSON feature collection returned by the flood-severity endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationFeatureCollection {
    #[serde(default)]
    pub features: Vec<StationFeature>,
}

/// A station as a GeoJSON point feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationFeature {
    #[serde(default)]
    pub geometry: Option<PointGeometry>,
    pub properties: StationProperties,
}

/// GeoJSON point geometry. Coordinates are `[longitude, latitude]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointGeometry {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Vec<f64>,
}

/// Station feature properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationProperties {
    pub id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub water_level: Option<f64>,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    /// Operational status, e.g. "active" or "offline".
    #[serde(default)]
    pub status: String,
}

impl StationFeature {
    pub fn coordinate(&self) -> Option<Coordinate> {
        let geometry = self.geometry.as_ref()?;
        match geometry.coordinates.as_slice() {
            [lon, lat, ..] if lon.is_finite() && lat.is_finite() => {
                Some(Coordinate::new(*lat, *lon))
            }
            _ => None,
        }
    }

    pub fn to_reading(&self) -> StationReading {
        let p = &self.properties;
        StationReading {
            station_id: p.id.clone(),
            station_code: p.code.clone(),
            station_name: p.name.clone(),
            water_level: p.water_level,
            unit: p.unit.clone(),
            severity: p.severity,
            measured_at: p.timestamp,
        }
    }
}
