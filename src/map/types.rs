//! Map-side value types: lifecycle state, init errors, rating tiers and
//! marker specs.

use crate::geo::Coordinate;
use crate::location::FALLBACK_COORDINATE;
use crate::venues::VenueRecord;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

const ICON_BASE: &str = "https://maps.google.com/mapfiles/ms/icons";

/// Map initialization failures. Terminal for the attempt; a caller retries
/// by running initialization again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapInitError {
    #[error("map SDK failed to load: {0}")]
    SdkLoadFailed(String),
    #[error("map credential is missing")]
    MissingCredential,
}

impl MapInitError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SdkLoadFailed(_) => "sdk_load_failed",
            Self::MissingCredential => "missing_credential",
        }
    }
}

/// Initialization lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MapState {
    #[default]
    Uninitialized,
    LoadingSdk,
    Constructing,
    Ready,
    Failed(MapInitError),
}

impl MapState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::LoadingSdk | Self::Constructing)
    }

    pub fn error(&self) -> Option<&MapInitError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for MapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::LoadingSdk => write!(f, "loading-sdk"),
            Self::Constructing => write!(f, "constructing"),
            Self::Ready => write!(f, "ready"),
            Self::Failed(_) => write!(f, "failed"),
        }
    }
}

/// Visual category of a marker, derived from the venue rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MarkerTier {
    A,
    B,
    C,
    D,
}

impl MarkerTier {
    pub fn from_rating(rating: f64) -> Self {
        if rating >= 4.5 {
            Self::A
        } else if rating >= 4.0 {
            Self::B
        } else if rating >= 3.0 {
            Self::C
        } else {
            Self::D
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Self::A => "green",
            Self::B => "yellow",
            Self::C => "orange",
            Self::D => "red",
        }
    }

    pub fn icon_url(self) -> String {
        format!("{}/{}-dot.png", ICON_BASE, self.color())
    }
}

/// Opaque handle of a marker owned by a map surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MarkerId(pub u64);

/// Opaque handle of an event listener attached to a map surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ListenerId(pub u64);

/// Everything the SDK needs to draw one venue marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerSpec {
    pub venue_id: String,
    pub position: Coordinate,
    pub title: String,
    pub tier: MarkerTier,
    pub icon_url: String,
}

impl MarkerSpec {
    pub fn for_venue(venue: &VenueRecord) -> Self {
        let tier = MarkerTier::from_rating(venue.rating);
        Self {
            venue_id: venue.id.clone(),
            position: venue.coordinate,
            title: venue.name.clone(),
            tier,
            icon_url: tier.icon_url(),
        }
    }
}

/// Construction options passed to the SDK.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapOptions {
    pub center: Coordinate,
    pub zoom: u8,
    pub map_type_control: bool,
    pub street_view_control: bool,
    pub fullscreen_control: bool,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            center: FALLBACK_COORDINATE,
            zoom: 13,
            map_type_control: false,
            street_view_control: false,
            fullscreen_control: false,
        }
    }
}

/// Controller tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct MapSettings {
    pub credential: Option<String>,
    pub options: MapOptions,
    /// Zoom applied after a re-center settles. `None` keeps the current zoom.
    pub target_zoom: Option<u8>,
    pub settle_delay: Duration,
    /// How long to wait for the first idle signal before declaring the map ready.
    pub idle_timeout: Duration,
    pub sdk_timeout: Duration,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            credential: None,
            options: MapOptions::default(),
            target_zoom: Some(15),
            settle_delay: Duration::from_millis(300),
            idle_timeout: Duration::from_secs(5),
            sdk_timeout: Duration::from_secs(10),
        }
    }
}

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub removed: Vec<String>,
    pub kept: usize,
    /// The map was not ready; the list is held until it is.
    pub deferred: bool,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }
}
