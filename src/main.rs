//! Floodmap - loads the user's map layer settings and reports flood severity
//! for a configured area.
//!
//! # Environment
//!
//! - `FLOODMAP_API_URL` - Base URL of the flood map API
//! - `FLOODMAP_API_TOKEN` - Bearer token for authenticated users
//! - `FLOODMAP_DATABASE_URL` - Local preference store
//! - `FLOODMAP_AUTHENTICATED` - Whether the session is signed in
//! - `FLOODMAP_AREA` - Area to evaluate, as `id,lat,lon,radius_m`
//! - `FLOODMAP_ZOOM` - Zoom hint for station fetches

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use floodmap::aggregation::AggregationPipeline;
use floodmap::config::Config;
use floodmap::preferences::PreferenceStore;
use floodmap::remote::ApiClient;
use floodmap::settings::SettingsController;
use floodmap::storage::SqliteKeyValueStore;
use floodmap::sync::SyncController;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("floodmap=info".parse()?))
        .init();

    let config = Config::from_env();
    info!(
        api_url = %config.api_url,
        db_url = %config.database_url,
        is_authenticated = config.is_authenticated,
        "Starting Floodmap"
    );

    let local = Arc::new(SqliteKeyValueStore::new(&config.database_url).await?);
    info!("Local store initialized");

    let client = Arc::new(ApiClient::with_base_url(&config.api_url).with_token(config.api_token.clone()));

    let store = PreferenceStore::new(local, client.clone());
    let sync = SyncController::with_quiet_period(store.clone(), config.sync_debounce);
    let settings = SettingsController::new(store, sync);

    settings.initialize(config.is_authenticated).await;
    let current = settings.settings();
    info!(
        base_map = ?current.base_map,
        flood = current.overlays.flood,
        traffic = current.overlays.traffic,
        weather = current.overlays.weather,
        "Layer settings loaded"
    );

    match &config.area {
        Some(area) => {
            let pipeline = AggregationPipeline::new(client)
                .with_max_age(config.severity_max_age)
                .with_zoom(config.zoom);
            match pipeline.area_status(area, &current.overlays).await {
                Some(status) => info!(
                    area_id = %status.area_id,
                    severity = %status.severity,
                    level = status.severity_level,
                    stations = status.contributing_stations.len(),
                    "{}",
                    status.summary
                ),
                None => info!("Flood overlay is off, skipping area status"),
            }
        }
        None => info!("No area configured"),
    }

    if let Err(e) = settings.flush().await {
        warn!(error = %e, "Failed to persist pending layer settings");
    }

    Ok(())
}
