//! Capability seams for the third-party map rendering SDK.

use super::types::{ListenerId, MapInitError, MapOptions, MarkerId, MarkerSpec};
use crate::geo::Coordinate;
use async_trait::async_trait;
use std::sync::Arc;

pub type EventCallback = Arc<dyn Fn() + Send + Sync>;

/// Loads the SDK and constructs map instances.
#[async_trait]
pub trait MapSdk: Send + Sync {
    async fn load(&self, credential: &str) -> Result<(), MapInitError>;

    async fn construct(&self, container: &str, options: &MapOptions) -> Result<Arc<dyn MapSurface>, MapInitError>;
}

/// A constructed map instance.
pub trait MapSurface: Send + Sync {
    /// Register a callback for the "idle" event (viewport settled).
    fn add_idle_listener(&self, callback: EventCallback) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);

    fn pan_to(&self, center: Coordinate);

    fn set_zoom(&self, zoom: u8);

    fn add_marker(&self, spec: &MarkerSpec, on_click: EventCallback) -> MarkerId;

    fn remove_marker(&self, id: MarkerId);
}
