//! Venue search service: orchestrates cache, provider and fallback.
//!
//! Search flow:  fresh cache entry → shared in-flight call for the same key →
//!               provider (bounded by a timeout) → synthetic placeholders on failure
//! Paging flow:  cached continuation token → provider page delay → next page,
//!               merged into the cached set and re-sorted (fetch time unchanged)

use super::cache::{ResultCache, DEFAULT_FRESHNESS};
use super::category;
use super::providers::{SyntheticGenerator, VenueProvider};
use super::types::{
    CacheKey, ContinuationToken, FilterSet, NearbyRequest, ProviderError, ProviderKind, ProviderPage, RawVenue,
    SearchError, SearchOutcome, SearchResultSet, SearchState, VenueRecord,
};
use crate::geo::{self, Coordinate};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Tunables for one service instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSettings {
    pub radius_meters: u32,
    pub freshness: Duration,
    pub provider_timeout: Duration,
    pub synthetic_radius_miles: f64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            radius_meters: 1609,
            freshness: DEFAULT_FRESHNESS,
            provider_timeout: Duration::from_secs(10),
            synthetic_radius_miles: 1.0,
        }
    }
}

type FetchResult = Result<Arc<SearchResultSet>, ProviderError>;
type InFlight = Shared<BoxFuture<'static, FetchResult>>;

/// Inputs of the most recently issued search.
#[derive(Debug, Clone)]
struct ActiveSearch {
    generation: u64,
    key: CacheKey,
    coordinate: Coordinate,
    query: String,
    filters: FilterSet,
}

/// Consumer-facing state plus the generation allowed to write it.
struct Publisher {
    generation: AtomicU64,
    state: watch::Sender<SearchState>,
}

impl Publisher {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn loading(&self) {
        self.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });
    }

    fn publish(&self, generation: u64, outcome: &SearchOutcome) {
        if !self.is_current(generation) {
            debug!(generation, "discarding superseded search result");
            return;
        }
        self.state.send_replace(SearchState {
            venues: outcome.venues.clone(),
            loading: false,
            error: outcome.error.as_ref().map(|e| e.to_string()),
            has_more: outcome.has_more(),
            synthetic: outcome.results.synthetic,
        });
    }
}

/// Searches for venues near a coordinate.
///
/// Provider work runs on spawned tasks: a caller that stops waiting does not
/// stop the fetch, so the cache, the in-flight registry and the published
/// state are always settled.
pub struct VenueSearchService {
    provider: Arc<dyn VenueProvider>,
    fallback: SyntheticGenerator,
    cache: Arc<ResultCache>,
    settings: SearchSettings,
    in_flight: Arc<Mutex<HashMap<CacheKey, InFlight>>>,
    active: Mutex<Option<ActiveSearch>>,
    provider_calls: Arc<AtomicU64>,
    paging: Arc<tokio::sync::Mutex<()>>,
    publisher: Arc<Publisher>,
}

impl VenueSearchService {
    pub fn new(provider: Arc<dyn VenueProvider>, settings: SearchSettings) -> Self {
        let cache = Arc::new(ResultCache::new(settings.freshness));
        Self::with_cache(provider, cache, settings)
    }

    /// Create a service around an existing cache (for testing or sharing).
    pub fn with_cache(provider: Arc<dyn VenueProvider>, cache: Arc<ResultCache>, settings: SearchSettings) -> Self {
        let (state, _) = watch::channel(SearchState::default());
        Self {
            provider,
            fallback: SyntheticGenerator::new(settings.synthetic_radius_miles),
            cache,
            settings,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            active: Mutex::new(None),
            provider_calls: Arc::new(AtomicU64::new(0)),
            paging: Arc::new(tokio::sync::Mutex::new(())),
            publisher: Arc::new(Publisher { generation: AtomicU64::new(0), state }),
        }
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Number of provider calls issued (searches and pages).
    pub fn provider_calls(&self) -> u64 {
        self.provider_calls.load(Ordering::SeqCst)
    }

    /// Watch the consumer-facing state. Only the latest search publishes.
    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.publisher.state.subscribe()
    }

    pub fn state(&self) -> SearchState {
        self.publisher.state.borrow().clone()
    }

    /// Search around `coordinate`. Provider failures do not fail the call:
    /// the outcome carries synthetic venues plus the provider error.
    pub async fn search(
        &self,
        coordinate: Coordinate,
        query: &str,
        filters: &FilterSet,
    ) -> Result<SearchOutcome, SearchError> {
        coordinate.validate()?;
        let key = CacheKey::new(coordinate, query);
        let generation = self.begin(ActiveSearch {
            generation: 0,
            key: key.clone(),
            coordinate,
            query: query.to_string(),
            filters: filters.clone(),
        });

        if let Some(hit) = self.cache.get(&key) {
            debug!(key = %key, "venue cache hit");
            let outcome = make_outcome(hit, filters, None, true);
            self.publisher.publish(generation, &outcome);
            return Ok(outcome);
        }
        debug!(key = %key, "venue cache miss");

        self.publisher.loading();

        let request = NearbyRequest {
            coordinate,
            radius_meters: self.settings.radius_meters,
            query: Some(query.trim().to_string()).filter(|q| !q.is_empty()),
        };

        let fetch = self.fetch_shared(key.clone(), request);
        let fallback = self.fallback.clone();
        let publisher = Arc::clone(&self.publisher);
        let provider_kind = self.provider.kind();
        let filters = filters.clone();
        let query = query.to_string();

        let settle = tokio::spawn(async move {
            let outcome = match fetch.await {
                Ok(set) => make_outcome(set, &filters, None, false),
                Err(e) => {
                    warn!(error = %e, provider = %provider_kind, "venue provider failed; serving synthetic venues");
                    let set = Arc::new(synthesize(&fallback, coordinate, &query, &key));
                    make_outcome(set, &filters, Some(e), false)
                }
            };
            publisher.publish(generation, &outcome);
            outcome
        });
        settle.await.map_err(|e| SearchError::Interrupted(e.to_string()))
    }

    /// Fetch the next page for the current search and append it.
    pub async fn load_more(&self, token: &ContinuationToken) -> Result<SearchOutcome, SearchError> {
        let paging = Arc::clone(&self.paging).lock_owned().await;

        let active = self.active_search().ok_or(SearchError::NoActiveSearch)?;
        let existing = self.cache.get(&active.key).ok_or(SearchError::NoContinuation)?;
        match &existing.continuation {
            None => return Err(SearchError::NoContinuation),
            Some(current) if current != token => return Err(SearchError::StaleContinuation),
            Some(_) => {}
        }

        let ready_at = existing.continuation_issued + self.provider.page_delay();
        if ready_at > Instant::now() {
            debug!(wait_ms = (ready_at - Instant::now()).as_millis() as u64, "waiting for continuation token");
            tokio::time::sleep_until(ready_at).await;
        }

        self.publisher.loading();
        self.provider_calls.fetch_add(1, Ordering::SeqCst);

        let provider = Arc::clone(&self.provider);
        let cache = Arc::clone(&self.cache);
        let publisher = Arc::clone(&self.publisher);
        let timeout = self.settings.provider_timeout;
        let token = token.clone();

        let page_task = tokio::spawn(async move {
            // Held until the page is merged, even if the caller stops waiting.
            let _paging = paging;
            let started = Instant::now();
            let outcome = match with_timeout(timeout, provider.fetch_page(&token)).await {
                Ok(page) => {
                    info!(
                        provider = %provider.kind(),
                        results = page.results.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "venue page fetched"
                    );
                    let fresh = build_venues(&page.results, active.coordinate);
                    let set = Arc::new(existing.with_page(fresh, page.next_page_token.map(ContinuationToken)));
                    cache.put(active.key.clone(), Arc::clone(&set));
                    make_outcome(set, &active.filters, None, false)
                }
                Err(e) => {
                    warn!(error = %e, "venue page fetch failed; keeping current results");
                    make_outcome(existing, &active.filters, Some(e), false)
                }
            };
            publisher.publish(active.generation, &outcome);
            outcome
        });
        page_task.await.map_err(|e| SearchError::Interrupted(e.to_string()))
    }

    /// Drop the cached entry for the current inputs and search again.
    pub async fn reload(&self) -> Result<SearchOutcome, SearchError> {
        let active = self.active_search().ok_or(SearchError::NoActiveSearch)?;
        self.cache.invalidate(&active.key);
        self.search(active.coordinate, &active.query, &active.filters).await
    }

    /// Load more for whatever search is current, if it has a next page.
    pub async fn load_more_current(&self) -> Result<SearchOutcome, SearchError> {
        let active = self.active_search().ok_or(SearchError::NoActiveSearch)?;
        let token = self
            .cache
            .get(&active.key)
            .and_then(|set| set.continuation.clone())
            .ok_or(SearchError::NoContinuation)?;
        self.load_more(&token).await
    }

    fn begin(&self, mut search: ActiveSearch) -> u64 {
        let mut active = lock(&self.active);
        let generation = self.publisher.generation.fetch_add(1, Ordering::SeqCst) + 1;
        search.generation = generation;
        *active = Some(search);
        generation
    }

    fn active_search(&self) -> Option<ActiveSearch> {
        lock(&self.active).clone()
    }

    /// Join the in-flight call for `key`, or start one on its own task.
    fn fetch_shared(&self, key: CacheKey, request: NearbyRequest) -> InFlight {
        let mut in_flight = lock(&self.in_flight);
        if let Some(existing) = in_flight.get(&key) {
            debug!(key = %key, "joining in-flight venue search");
            return existing.clone();
        }

        let provider = Arc::clone(&self.provider);
        let cache = Arc::clone(&self.cache);
        let registry = Arc::clone(&self.in_flight);
        let timeout = self.settings.provider_timeout;
        let fut_key = key.clone();

        self.provider_calls.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let result = with_timeout(timeout, provider.fetch_nearby(&request)).await.map(|page| {
                info!(
                    provider = %provider.kind(),
                    status = %page.status,
                    results = page.results.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "venue search fetched"
                );
                Arc::new(build_result_set(page, request.coordinate, provider.kind()))
            });
            if let Ok(set) = &result {
                cache.put(fut_key.clone(), Arc::clone(set));
            }
            lock(&registry).remove(&fut_key);
            result
        });

        let registry = Arc::clone(&self.in_flight);
        let task_key = key.clone();
        let fut = async move {
            handle.await.unwrap_or_else(|e| {
                lock(&registry).remove(&task_key);
                Err(ProviderError::Transport(format!("venue search task failed: {}", e)))
            })
        }
        .boxed()
        .shared();

        in_flight.insert(key, fut.clone());
        fut
    }
}

fn synthesize(generator: &SyntheticGenerator, coordinate: Coordinate, query: &str, key: &CacheKey) -> SearchResultSet {
    let raw = generator.generate(coordinate, query, key.seed());
    build_result_set(ProviderPage::ok(raw, None), coordinate, ProviderKind::Synthetic)
}

async fn with_timeout<F>(timeout: Duration, call: F) -> Result<ProviderPage, ProviderError>
where
    F: std::future::Future<Output = Result<ProviderPage, ProviderError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(page) => page.and_then(ProviderPage::into_result),
        Err(_) => Err(ProviderError::Timeout),
    }
}

fn make_outcome(results: Arc<SearchResultSet>, filters: &FilterSet, error: Option<ProviderError>, from_cache: bool) -> SearchOutcome {
    SearchOutcome {
        venues: filters.apply(&results.venues),
        results,
        error,
        from_cache,
    }
}

fn build_result_set(page: ProviderPage, user: Coordinate, kind: ProviderKind) -> SearchResultSet {
    let venues = build_venues(&page.results, user);
    let synthetic = kind == ProviderKind::Synthetic;
    SearchResultSet::new(venues, page.next_page_token.map(ContinuationToken), kind, synthetic)
}

/// Turn raw provider entries into venue records relative to `user`.
/// Entries with malformed coordinates and repeated ids are dropped.
pub fn build_venues(raw: &[RawVenue], user: Coordinate) -> Vec<VenueRecord> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter(|r| seen.insert(r.place_id.clone()))
        .filter_map(|r| match to_venue(r, user) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(id = %r.place_id, error = %e, "skipping venue with malformed location");
                None
            }
        })
        .collect()
}

fn to_venue(raw: &RawVenue, user: Coordinate) -> Result<VenueRecord, geo::InvalidCoordinate> {
    let coordinate = Coordinate::checked(raw.geometry.location.lat, raw.geometry.location.lng)?;
    let distance_miles = geo::distance_miles(user, coordinate)?;
    Ok(VenueRecord {
        id: raw.place_id.clone(),
        name: raw.name.clone(),
        category: category::cuisine_for_tags(&raw.types, &raw.name).to_string(),
        rating: raw.rating.unwrap_or(0.0).clamp(0.0, 5.0),
        price_tier: raw.price_level.map(|p| p.clamp(1, 4)),
        coordinate,
        distance_miles,
        address: raw
            .vicinity
            .clone()
            .or_else(|| raw.formatted_address.clone())
            .unwrap_or_default(),
        phone: raw.formatted_phone_number.clone().unwrap_or_default(),
        is_open: raw.opening_hours.as_ref().and_then(|h| h.open_now).unwrap_or(false),
        photo_reference: raw.photos.first().map(|p| p.photo_reference.clone()),
    })
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
