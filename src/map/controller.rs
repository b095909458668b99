//! Map lifecycle and marker reconciliation.
//!
//! Initialization: uninitialized → loading-sdk → constructing → ready | failed.
//! The idle wait is bounded; if the constructed map never reports idle the
//! controller goes ready anyway.
//!
//! Reconciliation keeps exactly one marker per venue id passed in. Ids in
//! both the old and the new list keep their marker handle.

use super::sdk::{EventCallback, MapSdk, MapSurface};
use super::types::{ListenerId, MapInitError, MapSettings, MapState, MarkerId, MarkerSpec, ReconcileReport};
use crate::geo::Coordinate;
use crate::venues::{SearchState, VenueRecord};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receives the venue id of every clicked marker.
pub type MarkerClicks = mpsc::UnboundedReceiver<String>;

#[derive(Default)]
struct Live {
    surface: Option<Arc<dyn MapSurface>>,
    markers: HashMap<String, MarkerId>,
    listeners: Vec<ListenerId>,
    /// Latest venue list received before the map was ready.
    pending: Option<Vec<VenueRecord>>,
    center: Option<Coordinate>,
    settle: Option<JoinHandle<()>>,
    /// Revision of the last list applied or parked.
    revision: u64,
}

pub struct MapSyncController {
    sdk: Arc<dyn MapSdk>,
    settings: MapSettings,
    state: watch::Sender<MapState>,
    live: Mutex<Live>,
    clicks: mpsc::UnboundedSender<String>,
    revisions: AtomicU64,
    init: tokio::sync::Mutex<()>,
}

impl MapSyncController {
    pub fn new(sdk: Arc<dyn MapSdk>, settings: MapSettings) -> (Self, MarkerClicks) {
        let (clicks, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(MapState::Uninitialized);
        let controller = Self {
            sdk,
            settings,
            state,
            live: Mutex::new(Live::default()),
            clicks,
            revisions: AtomicU64::new(0),
            init: tokio::sync::Mutex::new(()),
        };
        (controller, rx)
    }

    pub fn settings(&self) -> &MapSettings {
        &self.settings
    }

    pub fn state(&self) -> MapState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MapState> {
        self.state.subscribe()
    }

    /// The map instance, once ready.
    pub fn surface(&self) -> Option<Arc<dyn MapSurface>> {
        self.live().surface.clone()
    }

    pub fn marker_count(&self) -> usize {
        self.live().markers.len()
    }

    pub fn marker_handle(&self, venue_id: &str) -> Option<MarkerId> {
        self.live().markers.get(venue_id).copied()
    }

    pub fn listener_count(&self) -> usize {
        self.live().listeners.len()
    }

    /// Load the SDK, construct the map in `container` and wait for it to
    /// settle. A no-op when already ready. After a failure, calling this
    /// again is the manual retry.
    pub async fn initialize(&self, container: &str) -> Result<(), MapInitError> {
        let _init = self.init.lock().await;
        if self.state.borrow().is_ready() {
            return Ok(());
        }

        match self.bring_up(container).await {
            Ok(surface) => {
                // The parked list keeps the revision it was parked under, so a
                // newer reconcile landing before it is applied wins.
                let pending = {
                    let mut live = self.live();
                    if let Some(center) = live.center {
                        surface.pan_to(center);
                    }
                    live.surface = Some(surface);
                    let revision = live.revision;
                    live.pending.take().map(|venues| (revision, venues))
                };
                self.state.send_replace(MapState::Ready);
                info!(container, "map ready");
                if let Some((revision, venues)) = pending {
                    self.apply(revision, &venues);
                }
                Ok(())
            }
            Err(e) => {
                warn!(container, error = %e, "map initialization failed");
                self.state.send_replace(MapState::Failed(e.clone()));
                Err(e)
            }
        }
    }

    /// Alias of `initialize` for callers reacting to a failed state.
    pub async fn retry(&self, container: &str) -> Result<(), MapInitError> {
        self.initialize(container).await
    }

    async fn bring_up(&self, container: &str) -> Result<Arc<dyn MapSurface>, MapInitError> {
        let credential = self
            .settings
            .credential
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(MapInitError::MissingCredential)?;

        self.state.send_replace(MapState::LoadingSdk);
        match tokio::time::timeout(self.settings.sdk_timeout, self.sdk.load(credential)).await {
            Ok(loaded) => loaded?,
            Err(_) => return Err(MapInitError::SdkLoadFailed("timed out loading map SDK".into())),
        }

        self.state.send_replace(MapState::Constructing);
        let surface = self.sdk.construct(container, &self.settings.options).await?;
        self.wait_idle(&surface).await;
        Ok(surface)
    }

    async fn wait_idle(&self, surface: &Arc<dyn MapSurface>) {
        let (tx, rx) = oneshot::channel::<()>();
        let tx = Mutex::new(Some(tx));
        let listener = surface.add_idle_listener(Arc::new(move || {
            if let Some(tx) = lock(&tx).take() {
                let _ = tx.send(());
            }
        }));
        self.live().listeners.push(listener);

        if tokio::time::timeout(self.settings.idle_timeout, rx).await.is_err() {
            warn!(
                timeout_ms = self.settings.idle_timeout.as_millis() as u64,
                "map never reported idle; continuing with unsettled viewport"
            );
        }

        surface.remove_listener(listener);
        self.live().listeners.retain(|l| *l != listener);
    }

    /// Bring the markers in line with `venues`. Before the map is ready the
    /// list is parked and applied on readiness; a newer list replaces it.
    pub fn reconcile(&self, venues: &[VenueRecord]) -> ReconcileReport {
        let revision = self.revisions.fetch_add(1, Ordering::SeqCst) + 1;
        self.apply(revision, venues)
    }

    fn apply(&self, revision: u64, venues: &[VenueRecord]) -> ReconcileReport {
        let mut live = self.live();
        if revision < live.revision {
            debug!(revision, current = live.revision, "discarding superseded marker update");
            return ReconcileReport::default();
        }
        live.revision = revision;

        let Some(surface) = live.surface.clone() else {
            live.pending = Some(venues.to_vec());
            return ReconcileReport { deferred: true, ..Default::default() };
        };

        let mut incoming: HashSet<&str> = HashSet::with_capacity(venues.len());
        let mut report = ReconcileReport::default();

        for venue in venues {
            if !incoming.insert(venue.id.as_str()) {
                continue;
            }
            if live.markers.contains_key(&venue.id) {
                report.kept += 1;
                continue;
            }
            let id = surface.add_marker(&MarkerSpec::for_venue(venue), self.click_forwarder(&venue.id));
            live.markers.insert(venue.id.clone(), id);
            report.created.push(venue.id.clone());
        }

        let stale: Vec<String> = live.markers.keys().filter(|id| !incoming.contains(id.as_str())).cloned().collect();
        for venue_id in stale {
            if let Some(marker) = live.markers.remove(&venue_id) {
                surface.remove_marker(marker);
            }
            report.removed.push(venue_id);
        }

        debug!(
            created = report.created.len(),
            removed = report.removed.len(),
            kept = report.kept,
            "markers reconciled"
        );
        report
    }

    fn click_forwarder(&self, venue_id: &str) -> EventCallback {
        let tx = self.clicks.clone();
        let id = venue_id.to_string();
        Arc::new(move || {
            let _ = tx.send(id.clone());
        })
    }

    /// Re-center on a new user position. The target zoom, if any, is applied
    /// after the settle delay; a newer position cancels a pending zoom.
    /// Returns whether a map was there to pan.
    pub fn set_position(&self, coordinate: Coordinate) -> bool {
        let mut live = self.live();
        live.center = Some(coordinate);
        let Some(surface) = live.surface.clone() else {
            return false;
        };

        surface.pan_to(coordinate);
        if let Some(handle) = live.settle.take() {
            handle.abort();
        }
        if let Some(zoom) = self.settings.target_zoom {
            let delay = self.settings.settle_delay;
            live.settle = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                surface.set_zoom(zoom);
            }));
        }
        true
    }

    /// Follow a search state channel, reconciling against the latest venue
    /// list. Intermediate lists that were replaced before this task got to
    /// them are skipped.
    pub fn follow(self: &Arc<Self>, mut states: watch::Receiver<SearchState>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let venues = states.borrow_and_update().venues.clone();
                controller.reconcile(&venues);
                if states.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Destroy every marker, detach every listener and drop the map.
    /// Returns the number of markers destroyed.
    pub fn teardown(&self) -> usize {
        let mut live = self.live();
        if let Some(handle) = live.settle.take() {
            handle.abort();
        }
        let markers: Vec<MarkerId> = live.markers.drain().map(|(_, m)| m).collect();
        let listeners: Vec<ListenerId> = live.listeners.drain(..).collect();
        let destroyed = markers.len();
        if let Some(surface) = live.surface.take() {
            for marker in markers {
                surface.remove_marker(marker);
            }
            for listener in listeners {
                surface.remove_listener(listener);
            }
        }
        live.pending = None;
        drop(live);

        self.state.send_replace(MapState::Uninitialized);
        if destroyed > 0 {
            debug!(destroyed, "map torn down");
        }
        destroyed
    }

    /// Initialize and hand back a guard that tears the map down when
    /// released or dropped.
    pub async fn open_session(self: &Arc<Self>, container: &str) -> Result<MapSession, MapInitError> {
        self.initialize(container).await?;
        Ok(MapSession { controller: Some(Arc::clone(self)) })
    }

    fn live(&self) -> MutexGuard<'_, Live> {
        lock(&self.live)
    }
}

impl Drop for MapSyncController {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Scoped ownership of an initialized map.
pub struct MapSession {
    controller: Option<Arc<MapSyncController>>,
}

impl MapSession {
    pub fn controller(&self) -> Option<&Arc<MapSyncController>> {
        self.controller.as_ref()
    }

    /// Tear down now. Returns the number of markers destroyed.
    pub fn release(mut self) -> usize {
        self.controller.take().map(|c| c.teardown()).unwrap_or(0)
    }
}

impl Drop for MapSession {
    fn drop(&mut self) {
        if let Some(controller) = self.controller.take() {
            controller.teardown();
        }
    }
}

/// Open a map session on a fresh controller.
pub async fn open_map_session(
    sdk: Arc<dyn MapSdk>,
    settings: MapSettings,
    container: &str,
) -> Result<(MapSession, MarkerClicks), MapInitError> {
    let (controller, clicks) = MapSyncController::new(sdk, settings);
    let session = Arc::new(controller).open_session(container).await?;
    Ok((session, clicks))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::headless::{HeadlessConfig, HeadlessSdk};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;
    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    fn venue(id: &str, rating: f64) -> VenueRecord {
        VenueRecord {
            id: id.into(),
            name: format!("Venue {}", id),
            category: "Italian".into(),
            rating,
            price_tier: Some(2),
            coordinate: Coordinate::new(47.61, -122.33),
            distance_miles: 0.5,
            address: "1 Main St".into(),
            phone: String::new(),
            is_open: true,
            photo_reference: None,
        }
    }

    fn settings() -> MapSettings {
        MapSettings { credential: Some("test-key".into()), ..Default::default() }
    }

    fn controller(config: HeadlessConfig) -> (Arc<MapSyncController>, MarkerClicks, Arc<HeadlessSdk>) {
        let sdk = Arc::new(HeadlessSdk::new(config));
        let (c, clicks) = MapSyncController::new(sdk.clone(), settings());
        (Arc::new(c), clicks, sdk)
    }

    #[tokio::test]
    async fn test_initialize_ready() {
        let (c, _clicks, sdk) = controller(HeadlessConfig::default());
        c.initialize("map").await.unwrap();
        assert_eq!(c.state(), MapState::Ready);
        assert!(c.surface().is_some());
        assert_eq!(c.listener_count(), 0);
        c.initialize("map").await.unwrap();
        assert_eq!(sdk.load_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_credential_is_terminal() {
        let sdk = Arc::new(HeadlessSdk::default());
        let (c, _clicks) = MapSyncController::new(sdk.clone(), MapSettings::default());
        assert_eq!(c.initialize("map").await, Err(MapInitError::MissingCredential));
        assert_eq!(c.state(), MapState::Failed(MapInitError::MissingCredential));
        assert_eq!(sdk.load_count(), 0);
    }

    #[tokio::test]
    async fn test_load_failure_then_manual_retry() {
        let (c, _clicks, sdk) =
            controller(HeadlessConfig { load_failure: Some("network".into()), ..Default::default() });
        let err = c.initialize("map").await.unwrap_err();
        assert_eq!(err, MapInitError::SdkLoadFailed("network".into()));
        assert!(c.state().error().is_some());
        assert_eq!(sdk.load_count(), 1);

        sdk.reconfigure(HeadlessConfig::default());
        c.retry("map").await.unwrap();
        assert!(c.state().is_ready());
        assert_eq!(sdk.load_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_forces_ready() {
        let (c, _clicks, sdk) = controller(HeadlessConfig { load_failure: None, idle_after: None });
        let started = tokio::time::Instant::now();
        c.initialize("map").await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(c.state(), MapState::Ready);
        assert_eq!(sdk.latest_surface().unwrap().listener_count(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_idempotent() {
        let (c, _clicks, sdk) = controller(HeadlessConfig::default());
        c.initialize("map").await.unwrap();
        let venues = vec![venue("v1", 4.6), venue("v2", 3.2)];

        let first = c.reconcile(&venues);
        assert_eq!(first.created, vec!["v1", "v2"]);
        let second = c.reconcile(&venues);
        assert!(second.is_noop());
        assert_eq!(second.kept, 2);
        assert_eq!(sdk.latest_surface().unwrap().marker_count(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_churn() {
        let (c, _clicks, sdk) = controller(HeadlessConfig::default());
        c.initialize("map").await.unwrap();
        c.reconcile(&[venue("v1", 4.0), venue("v2", 4.0), venue("v3", 4.0)]);
        let v2_before = c.marker_handle("v2").unwrap();

        let report = c.reconcile(&[venue("v2", 4.0), venue("v4", 4.0)]);
        let mut removed = report.removed.clone();
        removed.sort();
        assert_eq!(removed, vec!["v1", "v3"]);
        assert_eq!(report.created, vec!["v4"]);
        assert_eq!(report.kept, 1);
        assert_eq!(c.marker_handle("v2"), Some(v2_before));
        assert_eq!(c.marker_count(), 2);

        let surface = sdk.latest_surface().unwrap();
        let mut ids: Vec<String> = surface.markers().into_iter().map(|m| m.venue_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["v2", "v4"]);
    }

    #[tokio::test]
    async fn test_duplicate_ids_get_one_marker() {
        let (c, _clicks, _sdk) = controller(HeadlessConfig::default());
        c.initialize("map").await.unwrap();
        let report = c.reconcile(&[venue("v1", 4.0), venue("v1", 4.0)]);
        assert_eq!(report.created.len(), 1);
        assert_eq!(c.marker_count(), 1);
    }

    #[tokio::test]
    async fn test_pending_list_applied_on_ready() {
        let (c, _clicks, _sdk) = controller(HeadlessConfig::default());
        assert!(c.reconcile(&[venue("v1", 4.0)]).deferred);
        assert!(c.reconcile(&[venue("v2", 4.0), venue("v3", 4.0)]).deferred);
        c.initialize("map").await.unwrap();
        assert_eq!(c.marker_count(), 2);
        assert!(c.marker_handle("v1").is_none());
    }

    /// Reconciles `venues` from inside the controller's "map ready" log line,
    /// i.e. after the map went live but before the parked list is applied.
    struct ReconcileOnReady {
        controller: Arc<MapSyncController>,
        venues: Vec<VenueRecord>,
        fired: AtomicBool,
    }

    struct Message(String);

    impl Visit for Message {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{:?}", value);
            }
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for ReconcileOnReady {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut message = Message(String::new());
            event.record(&mut message);
            if message.0 == "map ready" && !self.fired.swap(true, Ordering::SeqCst) {
                self.controller.reconcile(&self.venues);
            }
        }
    }

    #[tokio::test]
    async fn test_reconcile_at_ready_beats_parked_list() {
        let (c, _clicks, _sdk) = controller(HeadlessConfig::default());
        assert!(c.reconcile(&[venue("stale", 4.0)]).deferred);

        let hook = ReconcileOnReady {
            controller: Arc::clone(&c),
            venues: vec![venue("fresh", 4.0)],
            fired: AtomicBool::new(false),
        };
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(hook));
        c.initialize("map").await.unwrap();

        assert!(c.marker_handle("fresh").is_some());
        assert!(c.marker_handle("stale").is_none());
        assert_eq!(c.marker_count(), 1);
    }

    #[tokio::test]
    async fn test_click_forwarded() {
        let (c, mut clicks, sdk) = controller(HeadlessConfig::default());
        c.initialize("map").await.unwrap();
        c.reconcile(&[venue("v7", 4.9)]);
        let surface = sdk.latest_surface().unwrap();
        assert_eq!(surface.markers()[0].icon_url, "https://maps.google.com/mapfiles/ms/icons/green-dot.png");
        assert!(surface.click("v7"));
        assert_eq!(clicks.recv().await.as_deref(), Some("v7"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recenter_then_zoom_after_settle() {
        let (c, _clicks, sdk) = controller(HeadlessConfig::default());
        assert!(!c.set_position(Coordinate::new(40.0, -75.0)));
        c.initialize("map").await.unwrap();
        let surface = sdk.latest_surface().unwrap();
        assert_eq!(surface.center(), Coordinate::new(40.0, -75.0));

        assert!(c.set_position(Coordinate::new(40.7128, -74.006)));
        assert_eq!(surface.center(), Coordinate::new(40.7128, -74.006));
        assert_eq!(surface.zoom(), 13);
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(surface.zoom(), 15);
    }

    #[tokio::test]
    async fn test_teardown_releases_everything() {
        let (c, _clicks, sdk) = controller(HeadlessConfig::default());
        c.initialize("map").await.unwrap();
        c.reconcile(&[venue("v1", 4.0), venue("v2", 4.0)]);
        assert_eq!(c.teardown(), 2);

        let surface = sdk.latest_surface().unwrap();
        assert_eq!(surface.marker_count(), 0);
        assert_eq!(surface.listener_count(), 0);
        assert_eq!(c.state(), MapState::Uninitialized);
        assert!(c.surface().is_none());
    }

    #[tokio::test]
    async fn test_session_drop_tears_down() {
        let sdk = Arc::new(HeadlessSdk::default());
        let (c, _clicks) = MapSyncController::new(sdk.clone(), settings());
        let c = Arc::new(c);
        {
            let _session = c.open_session("map").await.unwrap();
            c.reconcile(&[venue("v1", 4.0)]);
            assert_eq!(sdk.latest_surface().unwrap().marker_count(), 1);
        }
        assert_eq!(sdk.latest_surface().unwrap().marker_count(), 0);
        assert_eq!(c.state(), MapState::Uninitialized);
    }

    #[tokio::test]
    async fn test_session_release() {
        let sdk = Arc::new(HeadlessSdk::default());
        let (session, _clicks) = open_map_session(sdk.clone(), settings(), "map").await.unwrap();
        session.controller().unwrap().reconcile(&[venue("v1", 4.0), venue("v2", 2.0)]);
        assert_eq!(session.release(), 2);
        assert_eq!(sdk.latest_surface().unwrap().marker_count(), 0);
    }

    #[tokio::test]
    async fn test_follow_reconciles_latest_state() {
        let (c, _clicks, _sdk) = controller(HeadlessConfig::default());
        c.initialize("map").await.unwrap();
        let (tx, rx) = watch::channel(SearchState::default());
        let task = c.follow(rx);

        tx.send_replace(SearchState { venues: vec![venue("v1", 4.0)], ..Default::default() });
        tx.send_replace(SearchState { venues: vec![venue("v2", 4.0), venue("v3", 4.0)], ..Default::default() });
        drop(tx);
        task.await.unwrap();
        assert_eq!(c.marker_count(), 2);
        assert!(c.marker_handle("v2").is_some());
    }
}
