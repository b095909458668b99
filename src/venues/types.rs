//! Core types for venue search: records, result sets, filters, cache keys,
//! and the raw provider wire shapes.

use super::category;
use crate::geo::Coordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

/// Decimal places kept from the coordinate when building a cache key
/// (~110 m of latitude).
pub const CACHE_GRID_DECIMALS: u32 = 3;

// ─── Venue records ──────────────────────────────────────────────

/// A restaurant as shown to the user. Built fresh from provider data on every
/// search; `distance_miles` is always recomputed from the user's coordinate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VenueRecord {
    pub id: String,
    pub name: String,
    /// Cuisine label from the fixed vocabulary (e.g. "Italian").
    pub category: String,
    pub rating: f64,
    /// 1 (cheap) to 4 (expensive); `None` when the provider gives no price.
    pub price_tier: Option<u8>,
    pub coordinate: Coordinate,
    pub distance_miles: f64,
    pub address: String,
    pub phone: String,
    pub is_open: bool,
    pub photo_reference: Option<String>,
}

/// Opaque provider handle for the next page of a paged result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(pub String);

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which provider variant produced a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(alias = "liveapi")]
    Live,
    #[serde(alias = "edgefunction")]
    Edge,
    Synthetic,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Edge => write!(f, "edge"),
            Self::Synthetic => write!(f, "synthetic"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" | "liveapi" | "places" => Ok(Self::Live),
            "edge" | "edgefunction" | "function" => Ok(Self::Edge),
            "synthetic" | "mock" => Ok(Self::Synthetic),
            _ => Err(format!("Unknown provider '{}'. Use 'live', 'edge' or 'synthetic'.", s)),
        }
    }
}

/// A complete search result, sorted ascending by distance. Stored whole in
/// the cache; never partially updated.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultSet {
    pub venues: Vec<VenueRecord>,
    pub continuation: Option<ContinuationToken>,
    pub fetched_at: DateTime<Utc>,
    /// Monotonic twin of `fetched_at`; drives freshness.
    #[serde(skip)]
    pub fetched_instant: Instant,
    /// When `continuation` was handed out; drives the page delay.
    #[serde(skip)]
    pub continuation_issued: Instant,
    /// True when the venues are locally generated placeholders.
    pub synthetic: bool,
    pub provider: ProviderKind,
}

impl SearchResultSet {
    pub fn new(
        mut venues: Vec<VenueRecord>,
        continuation: Option<ContinuationToken>,
        provider: ProviderKind,
        synthetic: bool,
    ) -> Self {
        sort_by_distance(&mut venues);
        let now = Instant::now();
        Self {
            venues,
            continuation,
            fetched_at: Utc::now(),
            fetched_instant: now,
            continuation_issued: now,
            synthetic,
            provider,
        }
    }

    /// This set with the next page merged in (first id wins) and re-sorted.
    /// The fetch time is kept: freshness counts from the first page.
    pub fn with_page(&self, page: Vec<VenueRecord>, continuation: Option<ContinuationToken>) -> Self {
        let mut seen: HashSet<String> = self.venues.iter().map(|v| v.id.clone()).collect();
        let mut venues = self.venues.clone();
        venues.extend(page.into_iter().filter(|v| seen.insert(v.id.clone())));
        sort_by_distance(&mut venues);
        Self {
            venues,
            continuation,
            fetched_at: self.fetched_at,
            fetched_instant: self.fetched_instant,
            continuation_issued: Instant::now(),
            synthetic: self.synthetic,
            provider: self.provider,
        }
    }

    pub fn has_more(&self) -> bool {
        self.continuation.is_some()
    }
}

/// Stable ascending sort by distance.
pub fn sort_by_distance(venues: &mut [VenueRecord]) {
    venues.sort_by(|a, b| a.distance_miles.total_cmp(&b.distance_miles));
}

// ─── Cache key ──────────────────────────────────────────────────

/// Identity of a search: snapped coordinate plus normalized query.
/// Filters are applied after fetching and are not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub cell: (i64, i64),
    pub query: String,
}

impl CacheKey {
    pub fn new(coordinate: Coordinate, query: &str) -> Self {
        Self {
            cell: coordinate.grid_cell(CACHE_GRID_DECIMALS),
            query: normalize_query(query),
        }
    }

    /// Deterministic seed for placeholder generation at this key.
    pub fn seed(&self) -> u64 {
        // FNV-1a; stable across runs, unlike the std hasher.
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        let bytes = self
            .cell
            .0
            .to_le_bytes()
            .into_iter()
            .chain(self.cell.1.to_le_bytes())
            .chain(self.query.bytes());
        for b in bytes {
            h ^= u64::from(b);
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
        h
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}|{}", self.cell.0, self.cell.1, self.query)
    }
}

/// Lowercase, trim, collapse inner whitespace.
pub fn normalize_query(q: &str) -> String {
    q.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

// ─── Filters ────────────────────────────────────────────────────

/// Cuisine filter: everything, or one category id from the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CuisineFilter {
    #[default]
    All,
    Category(String),
}

impl FromStr for CuisineFilter {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim().to_lowercase();
        if id.is_empty() || id == "all" {
            Ok(Self::All)
        } else {
            Ok(Self::Category(id))
        }
    }
}

impl fmt::Display for CuisineFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Category(id) => write!(f, "{}", id),
        }
    }
}

/// Client-side predicate over a result set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterSet {
    pub cuisine: CuisineFilter,
    /// `None` means any price.
    pub price_level: Option<u8>,
    pub min_rating: f64,
    /// `None` means no distance limit.
    pub max_distance_miles: Option<f64>,
}

impl FilterSet {
    pub fn matches(&self, venue: &VenueRecord) -> bool {
        if let CuisineFilter::Category(id) = &self.cuisine {
            if !category::category_includes(id, &venue.category) {
                return false;
            }
        }
        if let Some(price) = self.price_level {
            if venue.price_tier != Some(price) {
                return false;
            }
        }
        if let Some(max) = self.max_distance_miles {
            if venue.distance_miles > max {
                return false;
            }
        }
        venue.rating >= self.min_rating
    }

    /// Matching venues, in their original order.
    pub fn apply(&self, venues: &[VenueRecord]) -> Vec<VenueRecord> {
        venues.iter().filter(|v| self.matches(v)).cloned().collect()
    }
}

/// Parse a price filter: "all" or empty for any price, otherwise a tier 1-4.
pub fn parse_price_level(s: &str) -> Result<Option<u8>, String> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("all") {
        return Ok(None);
    }
    match s.parse::<u8>() {
        Ok(tier @ 1..=4) => Ok(Some(tier)),
        _ => Err(format!("Invalid price level '{}'. Use 1-4 or 'all'.", s)),
    }
}

// ─── Errors ─────────────────────────────────────────────────────

/// Venue provider failures. Cloneable so one in-flight call can be shared.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("Venue provider rejected the credentials (REQUEST_DENIED)")]
    AuthInvalid,
    #[error("Venue provider quota exceeded (OVER_QUERY_LIMIT)")]
    QuotaExceeded,
    #[error("Venue provider unreachable: {0}")]
    Transport(String),
    #[error("Venue provider returned status {0}")]
    BadStatus(String),
    #[error("Venue provider timed out")]
    Timeout,
}

impl ProviderError {
    /// Short machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthInvalid => "auth_invalid",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Transport(_) => "transport",
            Self::BadStatus(_) => "bad_status",
            Self::Timeout => "timeout",
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }
}

/// Caller mistakes, or a search task that died. Provider failures are
/// reported in [`SearchOutcome`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SearchError {
    #[error(transparent)]
    InvalidCoordinate(#[from] crate::geo::InvalidCoordinate),
    #[error("No search has been issued yet")]
    NoActiveSearch,
    #[error("No further results: the current search has no continuation token")]
    NoContinuation,
    #[error("Continuation token does not belong to the current search")]
    StaleContinuation,
    #[error("Search task ended before producing a result: {0}")]
    Interrupted(String),
}

// ─── Search outcome and consumer state ──────────────────────────

/// What a `search` or `load_more` call resolves to.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Full result set (unfiltered), shared with the cache.
    pub results: Arc<SearchResultSet>,
    /// `results.venues` after the caller's filters, distance order preserved.
    pub venues: Vec<VenueRecord>,
    /// Populated when the provider failed and `results` is synthetic.
    pub error: Option<ProviderError>,
    pub from_cache: bool,
}

impl SearchOutcome {
    pub fn has_more(&self) -> bool {
        self.results.has_more()
    }
}

/// Snapshot consumed by the view layer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchState {
    pub venues: Vec<VenueRecord>,
    pub loading: bool,
    pub error: Option<String>,
    pub has_more: bool,
    pub synthetic: bool,
}

// ─── Provider wire format ───────────────────────────────────────

/// A nearby-search request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyRequest {
    pub coordinate: Coordinate,
    pub radius_meters: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawLatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawGeometry {
    pub location: RawLatLng,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct RawOpeningHours {
    #[serde(default)]
    pub open_now: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawPhoto {
    pub photo_reference: String,
}

/// One venue as returned by a places-style provider.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawVenue {
    pub place_id: String,
    pub name: String,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub price_level: Option<u8>,
    pub geometry: RawGeometry,
    #[serde(default)]
    pub vicinity: Option<String>,
    #[serde(default)]
    pub formatted_address: Option<String>,
    #[serde(default)]
    pub formatted_phone_number: Option<String>,
    #[serde(default)]
    pub opening_hours: Option<RawOpeningHours>,
    #[serde(default)]
    pub photos: Vec<RawPhoto>,
    /// Provider's own distance estimate. Ignored.
    #[serde(default)]
    pub distance: Option<f64>,
}

/// A provider response page.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProviderPage {
    pub status: String,
    #[serde(default)]
    pub results: Vec<RawVenue>,
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ProviderPage {
    pub fn ok(results: Vec<RawVenue>, next_page_token: Option<String>) -> Self {
        Self { status: "OK".into(), results, next_page_token, error_message: None }
    }

    /// Map the provider status onto success or a typed error.
    /// `ZERO_RESULTS` is a success with no venues.
    pub fn into_result(self) -> Result<Self, ProviderError> {
        match self.status.as_str() {
            "OK" => Ok(self),
            "ZERO_RESULTS" => Ok(Self { results: Vec::new(), next_page_token: None, ..self }),
            "REQUEST_DENIED" => Err(ProviderError::AuthInvalid),
            "OVER_QUERY_LIMIT" => Err(ProviderError::QuotaExceeded),
            other => Err(ProviderError::BadStatus(other.to_string())),
        }
    }
}
