//! Client for the remote flood map API.
//!
//! Three groups of endpoints are consumed:
//!
//! - `GET /preferences/layers`, `PUT /preferences/layers`: the authenticated
//!   user's [`LayerSettings`]
//! - `GET /flood/severity?bbox=w,s,e,n&zoom=z`: station features as GeoJSON
//! - `GET /areas/{id}/status`: server-side [`AreaStatus`], when available
//!
//! The traits are the seams the rest of the crate depends on; [`ApiClient`]
//! is the reqwest implementation of both.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::model::{AreaStatus, BoundingBox, LayerSettings, StationFeature, StationFeatureCollection};

/// Default base URL for the API.
pub const DEFAULT_API_BASE: &str = "http://localhost:8080/api";

/// Remote profile storage for layer preferences.
#[async_trait]
pub trait PreferencesApi: Send + Sync {
    async fn fetch_preferences(&self) -> StoreResult<LayerSettings>;

    async fn put_preferences(&self, settings: &LayerSettings) -> StoreResult<()>;
}

/// Remote flood data.
#[async_trait]
pub trait FloodApi: Send + Sync {
    /// Fetch station features, optionally limited to a bounding box.
    async fn fetch_flood_severity(
        &self,
        bbox: Option<BoundingBox>,
        zoom: Option<u8>,
    ) -> StoreResult<Vec<StationFeature>>;

    /// Fetch the server-computed status for an area. `None` when the server
    /// has no status for it.
    async fn fetch_area_status(&self, area_id: &str) -> StoreResult<Option<AreaStatus>>;
}

/// HTTP client for the flood map API.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiClient {
    /// Create a client against the default base URL.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_API_BASE)
    }

    /// Create a client with a custom base URL.
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Attach a bearer token to every request.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn preferences_url(&self) -> String {
        format!("{}/preferences/layers", self.base_url)
    }

    fn flood_severity_url(&self, bbox: Option<BoundingBox>, zoom: Option<u8>) -> String {
        let mut params = Vec::new();
        if let Some(bbox) = bbox {
            params.push(format!(
                "bbox={}",
                urlencoding::encode(&bbox.to_query_value())
            ));
        }
        if let Some(zoom) = zoom {
            params.push(format!("zoom={}", zoom));
        }

        let mut url = format!("{}/flood/severity", self.base_url);
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }

    fn area_status_url(&self, area_id: &str) -> String {
        format!(
            "{}/areas/{}/status",
            self.base_url,
            urlencoding::encode(area_id)
        )
    }
}

/// Map non-success statuses to [`StoreError::Status`].
fn check_status(response: Response) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(StoreError::Status(status.as_u16()))
    }
}

#[async_trait]
impl PreferencesApi for ApiClient {
    async fn fetch_preferences(&self) -> StoreResult<LayerSettings> {
        let url = self.preferences_url();
        debug!(%url, "Fetching layer preferences");

        let response = self.authorized(self.client.get(&url)).send().await?;
        let settings = check_status(response)?.json::<LayerSettings>().await?;
        Ok(settings)
    }

    async fn put_preferences(&self, settings: &LayerSettings) -> StoreResult<()> {
        let url = self.preferences_url();
        debug!(%url, "Writing layer preferences");

        let response = self
            .authorized(self.client.put(&url))
            .json(settings)
            .send()
            .await?;
        check_status(response)?;
        Ok(())
    }
}

#[async_trait]
impl FloodApi for ApiClient {
    async fn fetch_flood_severity(
        &self,
        bbox: Option<BoundingBox>,
        zoom: Option<u8>,
    ) -> StoreResult<Vec<StationFeature>> {
        let url = self.flood_severity_url(bbox, zoom);
        debug!(%url, "Fetching flood severity stations");

        let response = self.authorized(self.client.get(&url)).send().await?;
        let collection = check_status(response)?
            .json::<StationFeatureCollection>()
            .await?;
        Ok(collection.features)
    }

    async fn fetch_area_status(&self, area_id: &str) -> StoreResult<Option<AreaStatus>> {
        let url = self.area_status_url(area_id);
        debug!(%url, "Fetching area status");

        let response = self.authorized(self.client.get(&url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = check_status(response)?.json::<AreaStatus>().await?;
        Ok(Some(status))
    }
}
