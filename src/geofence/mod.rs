use crate::config::GeofenceConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// A geofence as served by the external geofence service. Polygons are
/// owned and evaluated by that service; fleetwatch only consumes the
/// lookup results.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeofenceRef {
    pub id: i64,
    pub name: String,
    /// Ordered ring of [lat, lon] pairs, implicitly closed
    #[serde(default)]
    pub polygon: Vec<[f64; 2]>,
}

/// Geofence lookup seam. Implementations never fail the caller: any
/// transport or decode problem degrades to an empty result set, which
/// membership tracking treats as "inside nothing".
#[async_trait]
pub trait GeofenceLocator: Send + Sync {
    /// Geofences whose polygon contains the point
    async fn containing_point(&self, lat: f64, lon: f64) -> Vec<GeofenceRef>;

    /// Geofences within `radius_m` meters of the point
    async fn near_point(&self, lat: f64, lon: f64, radius_m: f64) -> Vec<GeofenceRef>;
}

/// HTTP client for the geofence service, with a bounded request timeout
pub struct HttpGeofenceClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpGeofenceClient {
    pub fn new(config: &GeofenceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to build geofence HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<GeofenceRef>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("Geofence request failed")?
            .error_for_status()
            .context("Geofence service returned an error status")?;

        response
            .json()
            .await
            .context("Failed to decode geofence response")
    }
}

#[async_trait]
impl GeofenceLocator for HttpGeofenceClient {
    async fn containing_point(&self, lat: f64, lon: f64) -> Vec<GeofenceRef> {
        let url = format!(
            "{}/api/geofences/containing?lat={}&lon={}",
            self.base_url, lat, lon
        );

        match self.fetch(&url).await {
            Ok(geofences) => geofences,
            Err(e) => {
                warn!(error = %e, lat, lon, "Containment lookup failed, treating as empty");
                Vec::new()
            }
        }
    }

    async fn near_point(&self, lat: f64, lon: f64, radius_m: f64) -> Vec<GeofenceRef> {
        let url = format!(
            "{}/api/geofences/near?lat={}&lon={}&radius={}",
            self.base_url, lat, lon, radius_m
        );

        match self.fetch(&url).await {
            Ok(geofences) => geofences,
            Err(e) => {
                warn!(error = %e, lat, lon, radius_m, "Proximity lookup failed, treating as empty");
                Vec::new()
            }
        }
    }
}

/// Locator used when geofencing is disabled: every point is inside
/// nothing and near nothing.
pub struct NullGeofenceLocator;

#[async_trait]
impl GeofenceLocator for NullGeofenceLocator {
    async fn containing_point(&self, _lat: f64, _lon: f64) -> Vec<GeofenceRef> {
        Vec::new()
    }

    async fn near_point(&self, _lat: f64, _lon: f64, _radius_m: f64) -> Vec<GeofenceRef> {
        Vec::new()
    }
}
