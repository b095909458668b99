//! Position acquisition for the discovery pipeline.
//!
//! Wraps a platform acquisition capability, coalesces concurrent requests,
//! and always resolves to a usable coordinate (the well-known fallback when
//! acquisition fails).

pub mod providers;
pub mod source;
pub mod types;

pub use providers::{FixedPosition, IpGeolocation, UnsupportedPlatform};
pub use source::{PositionAcquisition, PositionSource};
pub use types::{AcquisitionOptions, PositionError, PositionFix, PositionOrigin, PositionState, FALLBACK_COORDINATE};
