//! Core types for position acquisition.

use crate::geo::Coordinate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Downtown Seattle. Used whenever acquisition fails so downstream
/// components always have something to render.
pub const FALLBACK_COORDINATE: Coordinate = Coordinate::new(47.6062, -122.3321);

/// Why a position could not be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PositionError {
    #[error("Location access denied")]
    PermissionDenied,
    #[error("Location information unavailable")]
    Unavailable,
    #[error("Location request timed out")]
    Timeout,
    #[error("Location detection not supported")]
    Unsupported,
}

impl PositionError {
    /// User-facing message explaining the failure and the fallback.
    pub fn message(&self) -> &'static str {
        match self {
            Self::PermissionDenied => {
                "Location access denied. Showing restaurants near the default location."
            }
            Self::Unavailable => "Your location is currently unavailable. Showing the default location.",
            Self::Timeout => "Finding your location took too long. Showing the default location.",
            Self::Unsupported => "Browser does not support automatic detection",
        }
    }
}

/// Where a fix came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionOrigin {
    Platform,
    Fallback,
}

impl fmt::Display for PositionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Platform => write!(f, "Platform"),
            Self::Fallback => write!(f, "Fallback"),
        }
    }
}

/// The result of one `request_position` call. Always carries a coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub coordinate: Coordinate,
    pub origin: PositionOrigin,
    #[serde(default)]
    pub error: Option<PositionError>,
}

impl PositionFix {
    pub fn acquired(coordinate: Coordinate) -> Self {
        Self { coordinate, origin: PositionOrigin::Platform, error: None }
    }

    pub fn fallback(coordinate: Coordinate, error: PositionError) -> Self {
        Self { coordinate, origin: PositionOrigin::Fallback, error: Some(error) }
    }

    pub fn message(&self) -> Option<&'static str> {
        self.error.map(|e| e.message())
    }
}

/// Acquisition lifecycle: `Idle -> Acquiring -> {Resolved | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionState {
    Idle,
    Acquiring,
    Resolved(Coordinate),
    Failed(PositionError),
}

/// Options handed to the platform acquisition call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Accept a cached platform fix no older than this.
    pub maximum_age: Duration,
}

impl Default for AcquisitionOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(10),
            maximum_age: Duration::from_secs(60),
        }
    }
}
