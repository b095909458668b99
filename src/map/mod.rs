//! Interactive map lifecycle and marker synchronization.

pub mod controller;
pub mod headless;
pub mod sdk;
pub mod types;

pub use controller::{open_map_session, MapSession, MapSyncController, MarkerClicks};
pub use headless::{HeadlessConfig, HeadlessSdk, HeadlessSurface};
pub use sdk::{MapSdk, MapSurface};
pub use types::{MapInitError, MapOptions, MapSettings, MapState, MarkerId, MarkerSpec, MarkerTier, ReconcileReport};
