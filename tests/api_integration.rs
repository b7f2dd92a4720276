//! Integration tests against a stand-in flood map API.
//!
//! Each test starts an axum server on an ephemeral local port and drives the
//! crate through its public API over real HTTP and a real SQLite store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use floodmap::aggregation::AggregationPipeline;
use floodmap::error::StoreError;
use floodmap::model::{
    Area, BaseMap, Coordinate, LAYER_SETTINGS_KEY, LayerSettings, Overlay, Severity,
};
use floodmap::preferences::{MigrationOutcome, PreferenceStore};
use floodmap::remote::{ApiClient, FloodApi, PreferencesApi};
use floodmap::settings::SettingsController;
use floodmap::storage::{KeyValueStore, SqliteKeyValueStore};
use floodmap::sync::SyncController;

#[derive(Clone, Default)]
struct MockState {
    preferences: Arc<Mutex<Option<Value>>>,
    puts: Arc<Mutex<Vec<Value>>>,
    authorization: Arc<Mutex<Option<String>>>,
    severity_queries: Arc<Mutex<Vec<String>>>,
    area_status: Arc<Mutex<Option<Value>>>,
}

async fn get_preferences(
    State(state): State<MockState>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    *state.authorization.lock().unwrap() = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match state.preferences.lock().unwrap().clone() {
        Some(value) => Ok(Json(value)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn put_preferences(State(state): State<MockState>, Json(body): Json<Value>) -> StatusCode {
    state.puts.lock().unwrap().push(body.clone());
    *state.preferences.lock().unwrap() = Some(body);
    StatusCode::NO_CONTENT
}

async fn get_flood_severity(
    State(state): State<MockState>,
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> Json<Value> {
    if let Some(bbox) = params.get("bbox") {
        state.severity_queries.lock().unwrap().push(bbox.clone());
    }

    Json(json!({
        "type": "FeatureCollection",
        "features": [
            station("S1", 10.777, 106.701, json!(1.2), "caution"),
            station("S2", 10.775, 106.699, json!(3.0), "critical"),
            station("S3", 10.776, 106.700, Value::Null, "critical"),
            station("S4", 11.400, 106.700, json!(9.0), "critical"),
        ]
    }))
}

async fn get_area_status(
    State(state): State<MockState>,
    Path(area_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    match state.area_status.lock().unwrap().clone() {
        Some(status) if status["areaId"] == area_id.as_str() => Ok(Json(status)),
        _ => Err(StatusCode::NOT_FOUND),
    }
}

fn station(id: &str, lat: f64, lon: f64, level: Value, severity: &str) -> Value {
    json!({
        "type": "Feature",
        "geometry": { "type": "Point", "coordinates": [lon, lat] },
        "properties": {
            "id": id,
            "code": format!("HCM-{}", id),
            "name": "",
            "waterLevel": level,
            "unit": "m",
            "severity": severity,
            "timestamp": "2024-09-01T03:00:00Z",
            "status": "active"
        }
    })
}

/// Start the stand-in API and return its base URL.
async fn spawn_mock_api(state: MockState) -> String {
    let app = Router::new()
        .route(
            "/api/preferences/layers",
            get(get_preferences).put(put_preferences),
        )
        .route("/api/flood/severity", get(get_flood_severity))
        .route("/api/areas/:id/status", get(get_area_status))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}/api", addr)
}

fn district() -> Area {
    Area::new("district-1", Coordinate::new(10.776, 106.700), 3_000.0).with_name("District 1")
}

#[tokio::test]
async fn test_fetch_preferences_with_token() {
    let state = MockState::default();
    *state.preferences.lock().unwrap() = Some(json!({
        "baseMap": "satellite",
        "overlays": { "flood": true, "traffic": true, "weather": false },
        "opacity": { "flood": 150, "weather": 40 }
    }));
    let base_url = spawn_mock_api(state.clone()).await;
    let client = ApiClient::with_base_url(&base_url).with_token(Some("abc123".to_string()));

    let settings = client.fetch_preferences().await.unwrap();

    assert_eq!(settings.base_map, BaseMap::Satellite);
    assert!(settings.overlays.traffic);
    assert_eq!(settings.opacity(Overlay::Flood), Some(100));
    assert_eq!(
        state.authorization.lock().unwrap().as_deref(),
        Some("Bearer abc123")
    );
}

#[tokio::test]
async fn test_missing_profile_is_status_error() {
    let base_url = spawn_mock_api(MockState::default()).await;
    let client = ApiClient::with_base_url(&base_url);

    let result = client.fetch_preferences().await;

    assert!(matches!(result, Err(StoreError::Status(404))));
}

#[tokio::test]
async fn test_put_preferences_sends_camel_case() {
    let state = MockState::default();
    let base_url = spawn_mock_api(state.clone()).await;
    let client = ApiClient::with_base_url(&base_url);
    let settings = LayerSettings::default()
        .with_base_map(BaseMap::Satellite)
        .with_opacity(Overlay::Weather, 35);

    client.put_preferences(&settings).await.unwrap();

    let puts = state.puts.lock().unwrap();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0]["baseMap"], "satellite");
    assert_eq!(puts[0]["opacity"]["weather"], 35);
}

#[tokio::test]
async fn test_unreachable_api_is_remote_error() {
    let client = ApiClient::with_base_url("http://127.0.0.1:1/api");

    let result = client.fetch_preferences().await;

    assert!(matches!(result, Err(StoreError::Remote(_))));
}

#[tokio::test]
async fn test_guest_settings_from_sqlite() {
    let local = Arc::new(SqliteKeyValueStore::new("sqlite::memory:").await.unwrap());
    local
        .set(
            LAYER_SETTINGS_KEY,
            r#"{"baseMap":"satellite","overlays":{"flood":true,"traffic":false,"weather":true},"opacity":{"flood":80,"weather":60}}"#,
        )
        .await
        .unwrap();
    let store = PreferenceStore::new(local, Arc::new(ApiClient::with_base_url("http://127.0.0.1:1/api")));

    let settings = store.load(false).await.unwrap();

    assert_eq!(settings.base_map, BaseMap::Satellite);
    assert!(settings.overlays.weather);
    assert_eq!(settings.opacity(Overlay::Weather), Some(60));
}

#[tokio::test]
async fn test_authenticated_session_end_to_end() {
    let state = MockState::default();
    *state.preferences.lock().unwrap() = Some(serde_json::to_value(LayerSettings::default()).unwrap());
    let base_url = spawn_mock_api(state.clone()).await;

    let local = Arc::new(SqliteKeyValueStore::new("sqlite::memory:").await.unwrap());
    let store = PreferenceStore::new(local, Arc::new(ApiClient::with_base_url(&base_url)));
    let sync = SyncController::with_quiet_period(store.clone(), Duration::from_millis(50));
    let settings = SettingsController::new(store, sync);

    settings.initialize(true).await;
    assert!(settings.is_loaded());
    assert!(settings.last_error().is_none());

    settings.toggle_overlay(Overlay::Traffic, true);
    assert!(settings.set_opacity(Overlay::Flood, 30, true));
    assert!(!settings.set_opacity(Overlay::Traffic, 30, true));
    settings.flush().await.unwrap();

    let puts = state.puts.lock().unwrap();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0]["overlays"]["traffic"], true);
    assert_eq!(puts[0]["opacity"]["flood"], 30);
    assert!(puts[0]["opacity"].get("traffic").is_none());
}

#[tokio::test]
async fn test_guest_migration_to_profile() {
    let state = MockState::default();
    let base_url = spawn_mock_api(state.clone()).await;
    let local = Arc::new(SqliteKeyValueStore::new("sqlite::memory:").await.unwrap());
    let store = PreferenceStore::new(local.clone(), Arc::new(ApiClient::with_base_url(&base_url)));

    let guest = LayerSettings::default().with_base_map(BaseMap::Satellite);
    store.save(&guest, false).await.unwrap();

    let outcome = store.migrate_guest_to_authenticated().await.unwrap();

    assert_eq!(outcome, MigrationOutcome::Migrated);
    assert!(local.get(LAYER_SETTINGS_KEY).await.unwrap().is_none());
    assert_eq!(state.puts.lock().unwrap()[0]["baseMap"], "satellite");
    assert_eq!(store.load(true).await.unwrap(), guest);

    let again = store.migrate_guest_to_authenticated().await.unwrap();
    assert_eq!(again, MigrationOutcome::NothingToMigrate);
    assert_eq!(state.puts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_migration_keeps_guest_record() {
    let local = Arc::new(SqliteKeyValueStore::new("sqlite::memory:").await.unwrap());
    let store = PreferenceStore::new(
        local.clone(),
        Arc::new(ApiClient::with_base_url("http://127.0.0.1:1/api")),
    );
    store.save(&LayerSettings::default(), false).await.unwrap();

    assert!(store.migrate_guest_to_authenticated().await.is_err());
    assert!(local.get(LAYER_SETTINGS_KEY).await.unwrap().is_some());
}

#[tokio::test]
async fn test_flood_severity_features() {
    let state = MockState::default();
    let base_url = spawn_mock_api(state.clone()).await;
    let client = ApiClient::with_base_url(&base_url);

    let features = client.fetch_flood_severity(None, Some(12)).await.unwrap();

    assert_eq!(features.len(), 4);
    let s3 = features[2].to_reading();
    assert_eq!(s3.water_level, None);
    assert_eq!(s3.effective_severity(), Severity::Unknown);
    assert!(state.severity_queries.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_area_status_recomputed_from_stations() {
    let state = MockState::default();
    let base_url = spawn_mock_api(state.clone()).await;
    let pipeline = AggregationPipeline::new(Arc::new(ApiClient::with_base_url(&base_url)));

    let status = pipeline
        .area_status(&district(), &LayerSettings::default().overlays)
        .await
        .unwrap();

    assert_eq!(status.severity, Severity::Critical);
    assert_eq!(status.severity_level, 3);
    assert!(status.summary.contains("S2"));
    assert!(status.summary.contains("District 1"));
    // S4 lies outside the radius; S3 is listed but has no reading
    assert_eq!(status.contributing_stations.len(), 3);
    assert_eq!(state.severity_queries.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_area_status_prefers_server() {
    let state = MockState::default();
    *state.area_status.lock().unwrap() = Some(json!({
        "areaId": "district-1",
        "severity": "warning",
        "severityLevel": 2,
        "summary": "Warning in District 1",
        "evaluatedAt": "2024-09-01T03:05:00Z"
    }));
    let base_url = spawn_mock_api(state.clone()).await;
    let client = ApiClient::with_base_url(&base_url);

    assert!(client.fetch_area_status("district-9").await.unwrap().is_none());

    let pipeline = AggregationPipeline::new(Arc::new(client));
    let status = pipeline.resolve(&district()).await;

    assert_eq!(status.severity, Severity::Warning);
    assert_eq!(status.summary, "Warning in District 1");
    assert!(status.contributing_stations.is_empty());
    assert!(state.severity_queries.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_area_status_hidden_with_flood_overlay_off() {
    let state = MockState::default();
    let base_url = spawn_mock_api(state.clone()).await;
    let pipeline = AggregationPipeline::new(Arc::new(ApiClient::with_base_url(&base_url)));
    let overlays = LayerSettings::default()
        .with_overlay_toggled(Overlay::Flood)
        .overlays;

    assert!(pipeline.area_status(&district(), &overlays).await.is_none());
    assert!(state.severity_queries.lock().unwrap().is_empty());
}
