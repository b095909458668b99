//! Great-circle geometry on a spherical Earth.
//!
//! Every venue distance in the crate goes through [`distance_miles`], so
//! provider-reported distances are never trusted.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use thiserror::Error;

const DEG: f64 = PI / 180.0;

/// Mean Earth radius in statute miles.
pub const EARTH_RADIUS_MILES: f64 = 3959.0;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("Invalid coordinate ({lat}, {lng}). Lat: -90..90, Lng: -180..180")]
pub struct InvalidCoordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Build a coordinate, rejecting NaN and out-of-range values.
    pub fn checked(lat: f64, lng: f64) -> Result<Self, InvalidCoordinate> {
        let c = Self { lat, lng };
        c.validate()?;
        Ok(c)
    }

    pub fn validate(&self) -> Result<(), InvalidCoordinate> {
        let ok = self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng);
        if ok {
            Ok(())
        } else {
            Err(InvalidCoordinate { lat: self.lat, lng: self.lng })
        }
    }

    /// Coordinate snapped to a fixed number of decimal places, as integers.
    /// Used for cache keys so nearby fixes share a search.
    pub fn grid_cell(&self, decimals: u32) -> (i64, i64) {
        let scale = 10f64.powi(decimals as i32);
        (
            (self.lat * scale).round() as i64,
            (self.lng * scale).round() as i64,
        )
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ns = if self.lat >= 0.0 { 'N' } else { 'S' };
        let ew = if self.lng >= 0.0 { 'E' } else { 'W' };
        write!(f, "{:.4}\u{00B0}{}, {:.4}\u{00B0}{}", self.lat.abs(), ns, self.lng.abs(), ew)
    }
}

/// Haversine distance in miles, rounded to one decimal place.
pub fn distance_miles(a: Coordinate, b: Coordinate) -> Result<f64, InvalidCoordinate> {
    a.validate()?;
    b.validate()?;
    Ok(round_tenth(haversine_miles(a, b)))
}

fn haversine_miles(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = (b.lat - a.lat) * DEG;
    let d_lng = (b.lng - a.lng) * DEG;
    let h = (d_lat / 2.0).sin().powi(2)
        + (a.lat * DEG).cos() * (b.lat * DEG).cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_MILES * c
}

fn round_tenth(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Point reached by travelling `miles` from `origin` along `bearing_deg`
/// (clockwise from north).
pub fn destination(origin: Coordinate, bearing_deg: f64, miles: f64) -> Coordinate {
    let delta = miles / EARTH_RADIUS_MILES;
    let theta = bearing_deg * DEG;
    let phi1 = origin.lat * DEG;
    let lambda1 = origin.lng * DEG;

    let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
    let lambda2 = lambda1
        + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

    // normalize to -180..180
    let lng = ((lambda2 / DEG + 540.0) % 360.0) - 180.0;
    Coordinate::new(phi2 / DEG, lng)
}
