//! Station-to-area flood severity aggregation.
//!
//! [`compute_area_status`] reduces the readings of an area's contributing
//! stations to one [`AreaStatus`]:
//!
//! 1. No readings: severity `Unknown`, level 0, "no data" summary.
//! 2. Otherwise the area takes the highest ranked severity among readings
//!    (`safe < caution < warning < critical`). Readings that are `Unknown`,
//!    silent or negative are left out of the maximum but still listed as
//!    contributing stations.
//! 3. The summary names the dominant station: highest severity, then highest
//!    water level, then smallest station id.
//!
//! An area is never reported safer than its worst ranked contributing station.
//!
//! [`AggregationPipeline`] wraps this with station fetching and a shared
//! [`SeverityCache`].

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::StoreResult;
use crate::model::{Area, AreaStatus, BoundingBox, Overlays, Severity, StationFeature, StationReading};
use crate::remote::FloodApi;

/// How long a cached area status is served before it is recomputed.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);

/// Compute an area's flood status from its contributing station readings.
///
/// # Arguments
///
/// * `area` - The area being evaluated
/// * `readings` - Readings already associated with the area
/// * `now` - Aggregation time, stamped as `evaluated_at`
pub fn compute_area_status(
    area: &Area,
    readings: &[StationReading],
    now: DateTime<Utc>,
) -> AreaStatus {
    let dominant = readings
        .iter()
        .filter(|r| r.effective_severity().rank().is_some())
        .max_by(|a, b| dominance(a, b));

    let severity = dominant.map_or(Severity::Unknown, |r| r.effective_severity());
    let severity_level = severity.rank().unwrap_or(0);
    let summary = generate_summary(area, readings, dominant, severity);

    AreaStatus {
        area_id: area.id.clone(),
        severity,
        severity_level,
        summary,
        contributing_stations: readings.to_vec(),
        evaluated_at: now,
    }
}

/// Total order used to pick the dominant station.
fn dominance(a: &StationReading, b: &StationReading) -> Ordering {
    let level = |r: &StationReading| r.valid_water_level().unwrap_or(f64::NEG_INFINITY);

    a.effective_severity()
        .rank()
        .cmp(&b.effective_severity().rank())
        .then_with(|| level(a).total_cmp(&level(b)))
        // Smaller id wins, so it must compare as greater.
        .then_with(|| b.station_id.cmp(&a.station_id))
}

fn station_label(reading: &StationReading) -> String {
    let name = reading.display_name();
    if name == reading.station_id {
        name.to_string()
    } else {
        format!("{} ({})", name, reading.station_id)
    }
}

/// Generate a human-readable summary for an area.
fn generate_summary(
    area: &Area,
    readings: &[StationReading],
    dominant: Option<&StationReading>,
    severity: Severity,
) -> String {
    let area_name = area.display_name();

    let Some(station) = dominant else {
        return if readings.is_empty() {
            format!("No station data available for {}.", area_name)
        } else {
            format!(
                "No usable readings from {} station(s) in {}.",
                readings.len(),
                area_name
            )
        };
    };

    let silent = readings
        .iter()
        .filter(|r| r.effective_severity() == Severity::Unknown)
        .count();

    let mut summary = match severity {
        Severity::Critical | Severity::Warning => format!(
            "{}: {} reports {} in {}.",
            severity.label().to_uppercase(),
            station_label(station),
            station.level_label(),
            area_name
        ),
        _ => format!(
            "{} in {}. Highest reading {} at {}.",
            severity.label(),
            area_name,
            station.level_label(),
            station_label(station)
        ),
    };

    if silent > 0 {
        summary.push_str(&format!(" {} station(s) without data.", silent));
    }

    summary
}

/// Status reported when station data could not be fetched.
fn unavailable_status(area: &Area, now: DateTime<Utc>) -> AreaStatus {
    AreaStatus {
        area_id: area.id.clone(),
        severity: Severity::Unknown,
        severity_level: 0,
        summary: format!("Station data for {} is currently unavailable.", area.display_name()),
        contributing_stations: Vec::new(),
        evaluated_at: now,
    }
}

/// Bring a server-provided status onto the local clock, no later than
/// `received_at`, so it orders correctly against local recomputes.
fn clamp_to_local_clock(mut status: AreaStatus, received_at: DateTime<Utc>) -> AreaStatus {
    if status.evaluated_at > received_at {
        debug!(
            area_id = %status.area_id,
            evaluated_at = %status.evaluated_at,
            "Server status stamped in the future, using receive time"
        );
        status.evaluated_at = received_at;
    }
    status
}

/// Raise a server-provided status to at least its worst contributing station.
fn with_station_floor(mut status: AreaStatus) -> AreaStatus {
    let worst = status
        .contributing_stations
        .iter()
        .filter_map(|r| r.effective_severity().rank())
        .max();

    match (status.severity.rank(), worst) {
        (Some(reported), Some(worst)) if worst > reported => {
            status.severity = Severity::from_rank(worst);
        }
        (None, Some(worst)) => status.severity = Severity::from_rank(worst),
        _ => {}
    }
    status.severity_level = status.severity.rank().unwrap_or(0);
    status
}

/// Readings of the stations that lie within the area's radius.
pub fn stations_within(area: &Area, features: &[StationFeature]) -> Vec<StationReading> {
    features
        .iter()
        .filter(|f| f.coordinate().is_some_and(|c| area.contains(&c)))
        .map(StationFeature::to_reading)
        .collect()
}

/// Latest computed status per area.
///
/// Results are accepted last-write-wins by `evaluated_at`: a result computed
/// earlier than the cached one is rejected even if it arrives later.
#[derive(Clone, Default)]
pub struct SeverityCache {
    entries: Arc<RwLock<HashMap<String, AreaStatus>>>,
}

impl SeverityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `status` unless a newer one is cached. Returns whether it was stored.
    pub async fn offer(&self, status: AreaStatus) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(&status.area_id) {
            Some(cached) if cached.evaluated_at > status.evaluated_at => {
                debug!(
                    area_id = %status.area_id,
                    "Discarding area status older than cached result"
                );
                false
            }
            _ => {
                entries.insert(status.area_id.clone(), status);
                true
            }
        }
    }

    pub async fn get(&self, area_id: &str) -> Option<AreaStatus> {
        self.entries.read().await.get(area_id).cloned()
    }

    /// Cached status evaluated no longer than `max_age` before `now`.
    ///
    /// Entries stamped after `now` are stale.
    pub async fn fresh(
        &self,
        area_id: &str,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Option<AreaStatus> {
        self.get(area_id).await.filter(|status| {
            now.signed_duration_since(status.evaluated_at)
                .to_std()
                .is_ok_and(|age| age <= max_age)
        })
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

/// Fetches station data and reduces it to cached per-area status.
#[derive(Clone)]
pub struct AggregationPipeline {
    api: Arc<dyn FloodApi>,
    cache: SeverityCache,
    max_age: Duration,
    zoom: Option<u8>,
}

impl AggregationPipeline {
    pub fn new(api: Arc<dyn FloodApi>) -> Self {
        Self {
            api,
            cache: SeverityCache::new(),
            max_age: DEFAULT_MAX_AGE,
            zoom: None,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Zoom hint forwarded to the flood-severity endpoint.
    pub fn with_zoom(mut self, zoom: Option<u8>) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn cache(&self) -> &SeverityCache {
        &self.cache
    }

    /// Status for display, or `None` while the flood overlay is off.
    ///
    /// Serves a fresh cached result when there is one, otherwise resolves
    /// the area anew.
    pub async fn area_status(&self, area: &Area, overlays: &Overlays) -> Option<AreaStatus> {
        if !overlays.flood {
            return None;
        }

        // Serve from cache while fresh
        if let Some(cached) = self.cache.fresh(&area.id, Utc::now(), self.max_age).await {
            debug!(area_id = %area.id, "Serving cached area status");
            return Some(cached);
        }

        Some(self.resolve(area).await)
    }

    /// Resolve an area's status, preferring the server-side computation.
    ///
    /// Falls back to recomputing from raw station data when the server has
    /// no status or fails, and to an uncached `Unknown` status when station
    /// data is unavailable too.
    #[instrument(skip(self, area), fields(area_id = %area.id))]
    pub async fn resolve(&self, area: &Area) -> AreaStatus {
        // Server-side status first
        match self.api.fetch_area_status(&area.id).await {
            Ok(Some(status)) if status.area_id == area.id => {
                let status = clamp_to_local_clock(status, Utc::now());
                return self.accept(with_station_floor(status)).await;
            }
            Ok(_) => debug!("No server-side area status, recomputing"),
            Err(e) => warn!(error = %e, "Area status request failed, recomputing"),
        }

        // Recompute from raw stations, never caching a failure
        match self.refresh(area).await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Station data unavailable");
                unavailable_status(area, Utc::now())
            }
        }
    }

    /// Recompute an area's status from raw station data.
    #[instrument(skip(self, area), fields(area_id = %area.id))]
    pub async fn refresh(&self, area: &Area) -> StoreResult<AreaStatus> {
        let features = self
            .api
            .fetch_flood_severity(Some(BoundingBox::around(area)), self.zoom)
            .await?;

        // Keep only stations inside the radius
        let readings = stations_within(area, &features);
        let status = compute_area_status(area, &readings, Utc::now());

        info!(
            stations = readings.len(),
            severity = %status.severity,
            level = status.severity_level,
            "Area status computed"
        );

        Ok(self.accept(status).await)
    }

    /// Offer a result to the cache and return whichever is current.
    async fn accept(&self, status: AreaStatus) -> AreaStatus {
        if self.cache.offer(status.clone()).await {
            return status;
        }
        match self.cache.get(&status.area_id).await {
            Some(newer) => newer,
            None => status,
        }
    }
}
