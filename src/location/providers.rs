//! Position acquisition backends: IP geolocation, fixed coordinates, and a
//! platform that cannot locate at all.

use super::source::PositionAcquisition;
use super::types::{AcquisitionOptions, PositionError};
use crate::geo::Coordinate;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

// ─── IP-based geolocation ───────────────────────────────────────

const IP_API_URL: &str = "https://ipapi.co/json/";
const USER_AGENT: &str = "NearbyEats/0.3 (restaurant-discovery)";

#[derive(Deserialize)]
struct IpApiResult {
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(default)]
    error: Option<bool>,
    #[serde(default)]
    reason: Option<String>,
}

/// Locates the host by its public IP address.
#[derive(Debug, Clone)]
pub struct IpGeolocation {
    endpoint: String,
}

impl IpGeolocation {
    pub fn new() -> Self {
        Self { endpoint: IP_API_URL.to_string() }
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into() }
    }
}

impl Default for IpGeolocation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PositionAcquisition for IpGeolocation {
    async fn current_position(&self, options: &AcquisitionOptions) -> Result<Coordinate, PositionError> {
        let endpoint = self.endpoint.clone();
        let timeout = options.timeout;

        let result = tokio::task::spawn_blocking(move || {
            let response = ureq::get(&endpoint)
                .set("User-Agent", USER_AGENT)
                .timeout(timeout)
                .call()
                .map_err(classify_transport)?;
            response.into_json::<IpApiResult>().map_err(|_| PositionError::Unavailable)
        })
        .await
        .map_err(|_| PositionError::Unavailable)??;

        parse_ip_result(result)
    }
}

fn classify_transport(err: ureq::Error) -> PositionError {
    match err {
        ureq::Error::Status(401, _) | ureq::Error::Status(403, _) => PositionError::PermissionDenied,
        ureq::Error::Status(..) => PositionError::Unavailable,
        ureq::Error::Transport(t) => {
            debug!(error = %t, "ip geolocation transport failure");
            if t.to_string().to_lowercase().contains("timed out") {
                PositionError::Timeout
            } else {
                PositionError::Unavailable
            }
        }
    }
}

fn parse_ip_result(r: IpApiResult) -> Result<Coordinate, PositionError> {
    if r.error.unwrap_or(false) {
        debug!(reason = ?r.reason, "ip geolocation refused");
        return Err(PositionError::Unavailable);
    }
    let lat = r.latitude.ok_or(PositionError::Unavailable)?;
    let lng = r.longitude.ok_or(PositionError::Unavailable)?;
    Coordinate::checked(lat, lng).map_err(|_| PositionError::Unavailable)
}

// ─── Manual coordinates ─────────────────────────────────────────

/// Always reports the same coordinate (manual `--lat/--lng` input).
#[derive(Debug, Clone, Copy)]
pub struct FixedPosition(pub Coordinate);

#[async_trait]
impl PositionAcquisition for FixedPosition {
    async fn current_position(&self, _options: &AcquisitionOptions) -> Result<Coordinate, PositionError> {
        self.0.validate().map_err(|_| PositionError::Unavailable)?;
        Ok(self.0)
    }
}

// ─── No location facility ───────────────────────────────────────

/// A platform with no location facility.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedPlatform;

#[async_trait]
impl PositionAcquisition for UnsupportedPlatform {
    async fn current_position(&self, _options: &AcquisitionOptions) -> Result<Coordinate, PositionError> {
        Err(PositionError::Unsupported)
    }
}
