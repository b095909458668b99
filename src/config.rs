//! Application configuration at ~/.nearby/config.json.
//!
//! Every field has a default, so a missing file is a valid configuration.
//! Environment variables override the file:
//!   NEARBY_PROVIDER        live | edge | synthetic
//!   NEARBY_PLACES_API_KEY  key for the direct places API
//!   NEARBY_EDGE_URL        intermediary function endpoint
//!   NEARBY_MAPS_API_KEY    map SDK credential

use crate::geo::Coordinate;
use crate::location::{AcquisitionOptions, FALLBACK_COORDINATE};
use crate::map::{MapOptions, MapSettings};
use crate::venues::{EdgeFunction, LiveApi, ProviderKind, SearchSettings, SyntheticGenerator, VenueProvider};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub credential: Option<String>,
    pub initial_zoom: u8,
    pub target_zoom: Option<u8>,
    pub idle_timeout_ms: u64,
    pub settle_delay_ms: u64,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            credential: None,
            initial_zoom: 13,
            target_zoom: Some(15),
            idle_timeout_ms: 5_000,
            settle_delay_ms: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Explicit provider. When unset: live if an API key is present, then
    /// edge if a URL is present, otherwise synthetic.
    pub provider: Option<ProviderKind>,
    pub places_api_key: Option<String>,
    pub edge_url: Option<String>,
    pub edge_bearer: Option<String>,
    pub radius_meters: u32,
    pub freshness_secs: u64,
    pub provider_timeout_secs: u64,
    pub debounce_ms: u64,
    pub synthetic_radius_miles: f64,
    pub fallback: Coordinate,
    pub position_timeout_secs: u64,
    pub map: MapConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: None,
            places_api_key: None,
            edge_url: None,
            edge_bearer: None,
            radius_meters: 1609,
            freshness_secs: 300,
            provider_timeout_secs: 10,
            debounce_ms: 500,
            synthetic_radius_miles: 1.0,
            fallback: FALLBACK_COORDINATE,
            position_timeout_secs: 10,
            map: MapConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from the default path, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::default_path())?;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Load from a specific file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file; using defaults");
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Read { path: path.to_path_buf(), source }),
        };
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".nearby")
            .join("config.json")
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// `load`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(kind) = get("NEARBY_PROVIDER") {
            self.provider = Some(kind.parse().map_err(ConfigError::Invalid)?);
        }
        if let Some(key) = get("NEARBY_PLACES_API_KEY") {
            self.places_api_key = Some(key);
        }
        if let Some(url) = get("NEARBY_EDGE_URL") {
            self.edge_url = Some(url);
        }
        if let Some(key) = get("NEARBY_MAPS_API_KEY") {
            self.map.credential = Some(key);
        }
        Ok(())
    }

    pub fn provider_kind(&self) -> ProviderKind {
        match self.provider {
            Some(kind) => kind,
            None if self.places_api_key.is_some() => ProviderKind::Live,
            None if self.edge_url.is_some() => ProviderKind::Edge,
            None => ProviderKind::Synthetic,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.radius_meters == 0 {
            return Err(ConfigError::Invalid("radius_meters must be positive".into()));
        }
        if self.freshness_secs == 0 || self.provider_timeout_secs == 0 || self.position_timeout_secs == 0 {
            return Err(ConfigError::Invalid("freshness and timeout windows must be positive".into()));
        }
        if self.synthetic_radius_miles.is_nan() || self.synthetic_radius_miles <= 0.0 {
            return Err(ConfigError::Invalid("synthetic_radius_miles must be positive".into()));
        }
        self.fallback
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("fallback: {}", e)))?;

        match self.provider_kind() {
            ProviderKind::Live if self.places_api_key.is_none() => {
                Err(ConfigError::Invalid("live provider requires places_api_key".into()))
            }
            ProviderKind::Edge if self.edge_url.is_none() => {
                Err(ConfigError::Invalid("edge provider requires edge_url".into()))
            }
            _ => Ok(()),
        }
    }

    /// Construct the configured venue provider.
    pub fn build_provider(&self) -> Result<Arc<dyn VenueProvider>, ConfigError> {
        self.validate()?;
        let timeout = self.provider_timeout();
        let provider: Arc<dyn VenueProvider> = match self.provider_kind() {
            ProviderKind::Live => {
                let key = self.places_api_key.clone().unwrap_or_default();
                Arc::new(LiveApi::new(key, timeout))
            }
            ProviderKind::Edge => {
                let url = self.edge_url.clone().unwrap_or_default();
                Arc::new(EdgeFunction::new(url, self.edge_bearer.clone(), timeout))
            }
            ProviderKind::Synthetic => Arc::new(SyntheticGenerator::new(self.synthetic_radius_miles)),
        };
        Ok(provider)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            radius_meters: self.radius_meters,
            freshness: Duration::from_secs(self.freshness_secs),
            provider_timeout: self.provider_timeout(),
            synthetic_radius_miles: self.synthetic_radius_miles,
        }
    }

    pub fn acquisition_options(&self) -> AcquisitionOptions {
        AcquisitionOptions {
            timeout: Duration::from_secs(self.position_timeout_secs),
            ..AcquisitionOptions::default()
        }
    }

    pub fn map_settings(&self) -> MapSettings {
        MapSettings {
            credential: self.map.credential.clone(),
            options: MapOptions { center: self.fallback, zoom: self.map.initial_zoom, ..MapOptions::default() },
            target_zoom: self.map.target_zoom,
            settle_delay: Duration::from_millis(self.map.settle_delay_ms),
            idle_timeout: Duration::from_millis(self.map.idle_timeout_ms),
            ..MapSettings::default()
        }
    }
}
