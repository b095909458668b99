//! End-to-end: position → search → markers, through the public API.

use async_trait::async_trait;
use nearby_eats::geo::{self, Coordinate};
use nearby_eats::location::{
    AcquisitionOptions, PositionAcquisition, PositionError, PositionOrigin, PositionSource, FALLBACK_COORDINATE,
};
use nearby_eats::map::{HeadlessConfig, HeadlessSdk, MapSettings, MapSyncController};
use nearby_eats::venues::types::{NearbyRequest, ProviderPage, RawGeometry, RawLatLng, RawVenue};
use nearby_eats::venues::{
    ContinuationToken, FilterSet, ProviderError, ProviderKind, SearchSettings, VenueFeed, VenueProvider,
    VenueSearchService,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Denied;

#[async_trait]
impl PositionAcquisition for Denied {
    async fn current_position(&self, _options: &AcquisitionOptions) -> Result<Coordinate, PositionError> {
        Err(PositionError::PermissionDenied)
    }
}

/// Serves queued pages, then empty ones.
struct Queue {
    pages: Mutex<VecDeque<Result<ProviderPage, ProviderError>>>,
    calls: Mutex<usize>,
}

impl Queue {
    fn new(pages: Vec<Result<ProviderPage, ProviderError>>) -> Arc<Self> {
        Arc::new(Self { pages: Mutex::new(pages.into()), calls: Mutex::new(0) })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    fn next(&self) -> Result<ProviderPage, ProviderError> {
        *self.calls.lock().unwrap() += 1;
        self.pages.lock().unwrap().pop_front().unwrap_or_else(|| Ok(ProviderPage::ok(vec![], None)))
    }
}

#[async_trait]
impl VenueProvider for Queue {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Live
    }

    async fn fetch_nearby(&self, _request: &NearbyRequest) -> Result<ProviderPage, ProviderError> {
        self.next()
    }

    async fn fetch_page(&self, _token: &ContinuationToken) -> Result<ProviderPage, ProviderError> {
        self.next()
    }
}

fn raw(id: &str, tag: &str, rating: f64, miles_north: f64) -> RawVenue {
    let at = geo::destination(FALLBACK_COORDINATE, 0.0, miles_north);
    RawVenue {
        place_id: id.into(),
        name: format!("{} place", id),
        types: vec![tag.into()],
        rating: Some(rating),
        price_level: Some(2),
        geometry: RawGeometry { location: RawLatLng { lat: at.lat, lng: at.lng } },
        vicinity: Some("Pike St".into()),
        formatted_address: None,
        formatted_phone_number: None,
        opening_hours: None,
        photos: vec![],
        distance: None,
    }
}

fn map_controller() -> (Arc<MapSyncController>, nearby_eats::map::MarkerClicks, Arc<HeadlessSdk>) {
    let sdk = Arc::new(HeadlessSdk::new(HeadlessConfig::default()));
    let settings = MapSettings { credential: Some("key".into()), ..Default::default() };
    let (controller, clicks) = MapSyncController::new(sdk.clone(), settings);
    (Arc::new(controller), clicks, sdk)
}

#[tokio::test]
async fn test_denied_position_still_yields_venues_and_markers() {
    let source = PositionSource::new(Arc::new(Denied));
    let fix = source.request_position().await;
    assert_eq!(fix.coordinate, FALLBACK_COORDINATE);
    assert_eq!(fix.origin, PositionOrigin::Fallback);
    assert_eq!(fix.error, Some(PositionError::PermissionDenied));

    let provider = Queue::new(vec![Ok(ProviderPage::ok(
        vec![
            raw("a", "thai_restaurant", 4.7, 2.1),
            raw("b", "pizza_restaurant", 4.2, 0.4),
            raw("c", "cafe", 3.1, 1.0),
        ],
        None,
    ))]);
    let service = VenueSearchService::new(provider.clone(), SearchSettings::default());
    let outcome = service.search(fix.coordinate, "", &FilterSet::default()).await.unwrap();
    let distances: Vec<f64> = outcome.venues.iter().map(|v| v.distance_miles).collect();
    assert_eq!(distances, vec![0.4, 1.0, 2.1]);

    let (map, mut clicks, sdk) = map_controller();
    map.initialize("map").await.unwrap();
    map.set_position(fix.coordinate);
    let report = map.reconcile(&outcome.venues);
    assert_eq!(report.created.len(), 3);

    let surface = sdk.latest_surface().unwrap();
    let colors: Vec<&str> = surface.markers().iter().map(|m| m.tier.color()).collect();
    assert_eq!(colors, vec!["yellow", "orange", "green"]);

    assert!(surface.click("c"));
    assert_eq!(clicks.recv().await.as_deref(), Some("c"));

    // Same inputs inside the freshness window: no second provider call.
    service.search(fix.coordinate, "", &FilterSet::default()).await.unwrap();
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_provider_outage_degrades_to_synthetic() {
    let provider = Queue::new(vec![Err(ProviderError::QuotaExceeded)]);
    let service = VenueSearchService::new(provider, SearchSettings::default());
    let outcome = service.search(FALLBACK_COORDINATE, "", &FilterSet::default()).await.unwrap();

    assert!(!outcome.venues.is_empty());
    assert!(outcome.results.synthetic);
    assert_eq!(outcome.error, Some(ProviderError::QuotaExceeded));
    for venue in &outcome.venues {
        assert!(venue.distance_miles <= 1.1, "{} at {}", venue.id, venue.distance_miles);
    }

    let state = service.state();
    assert!(state.synthetic);
    assert!(state.error.is_some());
    assert!(!state.loading);
}

#[tokio::test(start_paused = true)]
async fn test_feed_drives_map_through_state_channel() {
    let provider = Queue::new(vec![
        Ok(ProviderPage::ok(vec![raw("v1", "thai_restaurant", 4.0, 0.2), raw("v2", "cafe", 4.0, 0.3)], None)),
        Ok(ProviderPage::ok(vec![raw("v2", "cafe", 4.0, 0.3), raw("v4", "bakery", 4.0, 0.5)], None)),
    ]);
    let service = Arc::new(VenueSearchService::new(provider.clone(), SearchSettings::default()));
    let feed = VenueFeed::new(Arc::clone(&service), Duration::from_millis(500));

    let (map, _clicks, _sdk) = map_controller();
    map.initialize("map").await.unwrap();
    let follower = map.follow(feed.subscribe());

    feed.set_coordinate(FALLBACK_COORDINATE);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(map.marker_count(), 2);
    let v2 = map.marker_handle("v2");

    feed.set_query("coffee");
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(provider.calls(), 2);
    assert_eq!(map.marker_count(), 2);
    assert!(map.marker_handle("v1").is_none());
    assert!(map.marker_handle("v4").is_some());
    assert_eq!(map.marker_handle("v2"), v2);

    follower.abort();
    assert_eq!(map.teardown(), 2);
}
