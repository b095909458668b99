//! In-memory map SDK.
//!
//! Records every marker, listener, pan and zoom so the server can publish a
//! marker manifest and tests can inspect what the controller did.

use super::sdk::{EventCallback, MapSdk, MapSurface};
use super::types::{ListenerId, MapInitError, MapOptions, MarkerId, MarkerSpec};
use crate::geo::Coordinate;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Behaviour knobs for the headless SDK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessConfig {
    /// When set, `load` fails with this message.
    pub load_failure: Option<String>,
    /// Delay before the first idle event fires. `None` means it never fires.
    pub idle_after: Option<Duration>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self { load_failure: None, idle_after: Some(Duration::ZERO) }
    }
}

#[derive(Default)]
pub struct HeadlessSdk {
    config: Mutex<HeadlessConfig>,
    loads: AtomicUsize,
    surfaces: Mutex<Vec<HeadlessSurface>>,
}

impl HeadlessSdk {
    pub fn new(config: HeadlessConfig) -> Self {
        Self { config: Mutex::new(config), ..Default::default() }
    }

    /// Change behaviour for later loads, e.g. to let a retry succeed.
    pub fn reconfigure(&self, config: HeadlessConfig) {
        *lock(&self.config) = config;
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// The most recently constructed surface.
    pub fn latest_surface(&self) -> Option<HeadlessSurface> {
        lock(&self.surfaces).last().cloned()
    }

    pub fn surface_count(&self) -> usize {
        lock(&self.surfaces).len()
    }
}

#[async_trait]
impl MapSdk for HeadlessSdk {
    async fn load(&self, _credential: &str) -> Result<(), MapInitError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        match lock(&self.config).load_failure.clone() {
            Some(msg) => Err(MapInitError::SdkLoadFailed(msg)),
            None => Ok(()),
        }
    }

    async fn construct(&self, container: &str, options: &MapOptions) -> Result<Arc<dyn MapSurface>, MapInitError> {
        let idle_after = lock(&self.config).idle_after;
        let surface = HeadlessSurface::new(container, options, idle_after);
        lock(&self.surfaces).push(surface.clone());
        Ok(Arc::new(surface))
    }
}

struct SurfaceState {
    center: Coordinate,
    zoom: u8,
    pans: Vec<Coordinate>,
    markers: BTreeMap<MarkerId, (MarkerSpec, EventCallback)>,
    listeners: BTreeMap<u64, EventCallback>,
    idle_fired: bool,
}

struct SurfaceInner {
    container: String,
    idle_after: Option<Duration>,
    next_id: AtomicU64,
    state: Mutex<SurfaceState>,
}

/// A recorded map instance. Clones share the same state.
#[derive(Clone)]
pub struct HeadlessSurface {
    inner: Arc<SurfaceInner>,
}

impl HeadlessSurface {
    fn new(container: &str, options: &MapOptions, idle_after: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(SurfaceInner {
                container: container.to_string(),
                idle_after,
                next_id: AtomicU64::new(1),
                state: Mutex::new(SurfaceState {
                    center: options.center,
                    zoom: options.zoom,
                    pans: Vec::new(),
                    markers: BTreeMap::new(),
                    listeners: BTreeMap::new(),
                    idle_fired: false,
                }),
            }),
        }
    }

    pub fn container(&self) -> &str {
        &self.inner.container
    }

    pub fn center(&self) -> Coordinate {
        self.state().center
    }

    pub fn zoom(&self) -> u8 {
        self.state().zoom
    }

    pub fn pans(&self) -> Vec<Coordinate> {
        self.state().pans.clone()
    }

    /// Marker specs in creation order.
    pub fn markers(&self) -> Vec<MarkerSpec> {
        self.state().markers.values().map(|(spec, _)| spec.clone()).collect()
    }

    pub fn marker_count(&self) -> usize {
        self.state().markers.len()
    }

    pub fn listener_count(&self) -> usize {
        self.state().listeners.len()
    }

    /// Fire the idle event to every registered listener.
    pub fn fire_idle(&self) {
        let callbacks: Vec<EventCallback> = {
            let mut state = self.state();
            state.idle_fired = true;
            state.listeners.values().cloned().collect()
        };
        for callback in callbacks {
            callback();
        }
    }

    /// Simulate a click on the marker for `venue_id`. Returns false if absent.
    pub fn click(&self, venue_id: &str) -> bool {
        let callback = self
            .state()
            .markers
            .values()
            .find(|(spec, _)| spec.venue_id == venue_id)
            .map(|(_, cb)| Arc::clone(cb));
        match callback {
            Some(cb) => {
                cb();
                true
            }
            None => false,
        }
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, SurfaceState> {
        lock(&self.inner.state)
    }
}

impl MapSurface for HeadlessSurface {
    fn add_idle_listener(&self, callback: EventCallback) -> ListenerId {
        let id = self.next_id();
        let already_idle = {
            let mut state = self.state();
            state.listeners.insert(id, Arc::clone(&callback));
            state.idle_fired
        };
        if already_idle {
            callback();
        } else if let Some(delay) = self.inner.idle_after {
            let surface = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                surface.fire_idle();
            });
        }
        ListenerId(id)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.state().listeners.remove(&id.0);
    }

    fn pan_to(&self, center: Coordinate) {
        let mut state = self.state();
        state.center = center;
        state.pans.push(center);
    }

    fn set_zoom(&self, zoom: u8) {
        self.state().zoom = zoom;
    }

    fn add_marker(&self, spec: &MarkerSpec, on_click: EventCallback) -> MarkerId {
        let id = MarkerId(self.next_id());
        self.state().markers.insert(id, (spec.clone(), on_click));
        id
    }

    fn remove_marker(&self, id: MarkerId) {
        self.state().markers.remove(&id);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::types::MarkerTier;
    use std::sync::atomic::AtomicBool;

    fn spec(id: &str) -> MarkerSpec {
        MarkerSpec {
            venue_id: id.into(),
            position: Coordinate::new(47.61, -122.33),
            title: id.to_uppercase(),
            tier: MarkerTier::B,
            icon_url: MarkerTier::B.icon_url(),
        }
    }

    #[tokio::test]
    async fn test_load_failure() {
        let sdk = HeadlessSdk::new(HeadlessConfig { load_failure: Some("offline".into()), idle_after: None });
        assert_eq!(sdk.load("key").await, Err(MapInitError::SdkLoadFailed("offline".into())));
        assert_eq!(sdk.load_count(), 1);
    }

    #[tokio::test]
    async fn test_markers_and_clicks() {
        let sdk = HeadlessSdk::default();
        sdk.construct("map", &MapOptions::default()).await.unwrap();
        let surface = sdk.latest_surface().unwrap();

        let clicked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&clicked);
        let id = surface.add_marker(&spec("v1"), Arc::new(move || flag.store(true, Ordering::SeqCst)));
        assert_eq!(surface.marker_count(), 1);
        assert!(surface.click("v1"));
        assert!(clicked.load(Ordering::SeqCst));
        assert!(!surface.click("v2"));

        surface.remove_marker(id);
        assert_eq!(surface.marker_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_fires_after_delay() {
        let sdk = HeadlessSdk::new(HeadlessConfig { load_failure: None, idle_after: Some(Duration::from_secs(1)) });
        sdk.construct("map", &MapOptions::default()).await.unwrap();
        let surface = sdk.latest_surface().unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let listener = surface.add_idle_listener(Arc::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(fired.load(Ordering::SeqCst));

        surface.remove_listener(listener);
        assert_eq!(surface.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_pan_and_zoom_recorded() {
        let sdk = HeadlessSdk::default();
        let map = sdk.construct("map", &MapOptions::default()).await.unwrap();
        map.pan_to(Coordinate::new(40.7128, -74.006));
        map.set_zoom(15);
        let surface = sdk.latest_surface().unwrap();
        assert_eq!(surface.center(), Coordinate::new(40.7128, -74.006));
        assert_eq!(surface.pans().len(), 1);
        assert_eq!(surface.zoom(), 15);
        assert_eq!(surface.container(), "map");
    }
}
