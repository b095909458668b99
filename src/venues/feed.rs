//! Venue feed: the caller-side orchestration between changing inputs
//! (position, query, filters) and the search service.
//!
//! Every input change reschedules one debounced search. The inputs are read
//! under a single lock when the search fires, so a search never mixes a new
//! query with a stale coordinate.

use super::debounce::Debouncer;
use super::service::VenueSearchService;
use super::types::{FilterSet, SearchState};
use crate::geo::Coordinate;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Current search inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedInputs {
    pub coordinate: Option<Coordinate>,
    pub query: String,
    pub filters: FilterSet,
}

pub struct VenueFeed {
    service: Arc<VenueSearchService>,
    inputs: Arc<Mutex<FeedInputs>>,
    debouncer: Debouncer,
}

impl VenueFeed {
    pub fn new(service: Arc<VenueSearchService>, debounce: Duration) -> Self {
        Self {
            service,
            inputs: Arc::new(Mutex::new(FeedInputs::default())),
            debouncer: Debouncer::new(debounce),
        }
    }

    pub fn service(&self) -> &Arc<VenueSearchService> {
        &self.service
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.service.subscribe()
    }

    pub fn inputs(&self) -> FeedInputs {
        lock(&self.inputs).clone()
    }

    pub fn set_coordinate(&self, coordinate: Coordinate) {
        lock(&self.inputs).coordinate = Some(coordinate);
        self.schedule();
    }

    pub fn set_query(&self, query: impl Into<String>) {
        lock(&self.inputs).query = query.into();
        self.schedule();
    }

    pub fn set_filters(&self, filters: FilterSet) {
        lock(&self.inputs).filters = filters;
        self.schedule();
    }

    /// Whether a debounced search is waiting to fire.
    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    fn schedule(&self) {
        let service = Arc::clone(&self.service);
        let inputs = Arc::clone(&self.inputs);
        self.debouncer.schedule(async move {
            let snapshot = lock(&inputs).clone();
            let Some(coordinate) = snapshot.coordinate else {
                debug!("no coordinate yet; skipping search");
                return;
            };
            if let Err(e) = service.search(coordinate, &snapshot.query, &snapshot.filters).await {
                warn!(error = %e, "debounced search rejected");
            }
        });
    }
}

fn lock(inputs: &Mutex<FeedInputs>) -> MutexGuard<'_, FeedInputs> {
    inputs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venues::providers::VenueProvider;
    use crate::venues::service::SearchSettings;
    use crate::venues::types::{
        ContinuationToken, NearbyRequest, ProviderError, ProviderKind, ProviderPage, RawGeometry, RawLatLng,
        RawVenue,
    };
    use async_trait::async_trait;

    #[derive(Default)]
    struct Recording {
        requests: Mutex<Vec<NearbyRequest>>,
    }

    #[async_trait]
    impl VenueProvider for Recording {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Live
        }

        async fn fetch_nearby(&self, request: &NearbyRequest) -> Result<ProviderPage, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            let c = request.coordinate;
            Ok(ProviderPage::ok(
                vec![RawVenue {
                    place_id: "v1".into(),
                    name: "Thai Garden".into(),
                    types: vec!["thai_restaurant".into()],
                    rating: Some(4.4),
                    price_level: Some(2),
                    geometry: RawGeometry { location: RawLatLng { lat: c.lat + 0.001, lng: c.lng } },
                    vicinity: None,
                    formatted_address: None,
                    formatted_phone_number: None,
                    opening_hours: None,
                    photos: vec![],
                    distance: None,
                }],
                None,
            ))
        }

        async fn fetch_page(&self, _token: &ContinuationToken) -> Result<ProviderPage, ProviderError> {
            Ok(ProviderPage::ok(vec![], None))
        }
    }

    fn feed() -> (VenueFeed, Arc<Recording>) {
        let provider = Arc::new(Recording::default());
        let service = Arc::new(VenueSearchService::new(provider.clone(), SearchSettings::default()));
        (VenueFeed::new(service, Duration::from_millis(500)), provider)
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_debounced_to_one_call() {
        let (feed, provider) = feed();
        feed.set_coordinate(Coordinate::new(47.6062, -122.3321));
        for q in ["t", "th", "tha", "thai"] {
            feed.set_query(q);
            tokio::time::sleep(Duration::from_millis(120)).await;
        }
        tokio::time::sleep(Duration::from_millis(600)).await;

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].query.as_deref(), Some("thai"));
        assert_eq!(feed.service().state().venues.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_uses_latest_coordinate() {
        let (feed, provider) = feed();
        feed.set_query("thai");
        feed.set_coordinate(Coordinate::new(47.6062, -122.3321));
        tokio::time::sleep(Duration::from_millis(100)).await;
        feed.set_coordinate(Coordinate::new(40.7128, -74.006));
        tokio::time::sleep(Duration::from_millis(600)).await;

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].coordinate, Coordinate::new(40.7128, -74.006));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_search_without_coordinate() {
        let (feed, provider) = feed();
        feed.set_query("sushi");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(provider.requests.lock().unwrap().is_empty());
        assert_eq!(feed.inputs().query, "sushi");
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_change_served_from_cache() {
        let (feed, provider) = feed();
        let mut rx = feed.subscribe();
        feed.set_coordinate(Coordinate::new(47.6062, -122.3321));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(rx.borrow_and_update().venues.len(), 1);

        feed.set_filters(FilterSet { cuisine: "italian".parse().unwrap(), ..Default::default() });
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(rx.borrow_and_update().venues.is_empty());
        assert_eq!(provider.requests.lock().unwrap().len(), 1);
    }
}
