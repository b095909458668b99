//! Venue providers: Google-style places API, an intermediary function
//! endpoint, and the synthetic placeholder generator.

use super::types::{
    CacheKey, ContinuationToken, NearbyRequest, ProviderError, ProviderKind, ProviderPage, RawGeometry,
    RawLatLng, RawOpeningHours, RawPhoto, RawVenue,
};
use crate::geo::{self, Coordinate};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = "NearbyEats/0.3 (restaurant-discovery)";

/// A remote (or local) source of raw venue data.
#[async_trait]
pub trait VenueProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// First page of venues around `request.coordinate`.
    async fn fetch_nearby(&self, request: &NearbyRequest) -> Result<ProviderPage, ProviderError>;

    /// A follow-up page for a continuation token from an earlier response.
    async fn fetch_page(&self, token: &ContinuationToken) -> Result<ProviderPage, ProviderError>;

    /// Minimum wait between receiving a continuation token and redeeming it.
    fn page_delay(&self) -> Duration {
        Duration::ZERO
    }
}

// ─── Places API ─────────────────────────────────────────────────

const PLACES_NEARBY_URL: &str = "https://maps.googleapis.com/maps/api/place/nearbysearch/json";

/// Places API tokens become valid a short while after they are issued.
pub const PLACES_PAGE_DELAY: Duration = Duration::from_secs(2);

/// Direct geocoded-places API.
#[derive(Debug, Clone)]
pub struct LiveApi {
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl LiveApi {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self { api_key: api_key.into(), base_url: PLACES_NEARBY_URL.to_string(), timeout }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn nearby_url(&self, request: &NearbyRequest) -> String {
        let keyword = match request.query.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => format!("&keyword={}", url_encode(q)),
            _ => String::new(),
        };
        format!(
            "{}?location={},{}&radius={}&type=restaurant{}&key={}",
            self.base_url,
            request.coordinate.lat,
            request.coordinate.lng,
            request.radius_meters,
            keyword,
            url_encode(&self.api_key),
        )
    }

    fn page_url(&self, token: &ContinuationToken) -> String {
        format!("{}?pagetoken={}&key={}", self.base_url, url_encode(&token.0), url_encode(&self.api_key))
    }
}

#[async_trait]
impl VenueProvider for LiveApi {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Live
    }

    async fn fetch_nearby(&self, request: &NearbyRequest) -> Result<ProviderPage, ProviderError> {
        get_page(self.nearby_url(request), self.timeout).await
    }

    async fn fetch_page(&self, token: &ContinuationToken) -> Result<ProviderPage, ProviderError> {
        get_page(self.page_url(token), self.timeout).await
    }

    fn page_delay(&self) -> Duration {
        PLACES_PAGE_DELAY
    }
}

async fn get_page(url: String, timeout: Duration) -> Result<ProviderPage, ProviderError> {
    blocking(move || {
        let response = ureq::get(&url)
            .set("User-Agent", USER_AGENT)
            .timeout(timeout)
            .call()
            .map_err(classify_ureq)?;
        response
            .into_json::<ProviderPage>()
            .map_err(|e| ProviderError::BadStatus(format!("invalid response body: {}", e)))
    })
    .await
}

// ─── Function endpoint ──────────────────────────────────────────

/// An intermediary function endpoint that proxies the places API and
/// returns the same page shape.
#[derive(Debug, Clone)]
pub struct EdgeFunction {
    url: String,
    bearer: Option<String>,
    timeout: Duration,
}

impl EdgeFunction {
    pub fn new(url: impl Into<String>, bearer: Option<String>, timeout: Duration) -> Self {
        Self { url: url.into(), bearer, timeout }
    }

    async fn post(&self, body: serde_json::Value) -> Result<ProviderPage, ProviderError> {
        let url = self.url.clone();
        let bearer = self.bearer.clone();
        let timeout = self.timeout;
        blocking(move || {
            let mut req = ureq::post(&url).set("User-Agent", USER_AGENT).timeout(timeout);
            if let Some(token) = bearer {
                req = req.set("Authorization", &format!("Bearer {}", token));
            }
            let response = req.send_json(body).map_err(classify_ureq)?;
            response
                .into_json::<ProviderPage>()
                .map_err(|e| ProviderError::BadStatus(format!("invalid response body: {}", e)))
        })
        .await
    }
}

#[async_trait]
impl VenueProvider for EdgeFunction {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Edge
    }

    async fn fetch_nearby(&self, request: &NearbyRequest) -> Result<ProviderPage, ProviderError> {
        self.post(serde_json::json!({
            "lat": request.coordinate.lat,
            "lng": request.coordinate.lng,
            "radius": request.radius_meters,
            "query": request.query,
        }))
        .await
    }

    async fn fetch_page(&self, token: &ContinuationToken) -> Result<ProviderPage, ProviderError> {
        self.post(serde_json::json!({ "pagetoken": token.0 })).await
    }

    fn page_delay(&self) -> Duration {
        PLACES_PAGE_DELAY
    }
}

// ─── Shared HTTP plumbing ───────────────────────────────────────

async fn blocking<F>(call: F) -> Result<ProviderPage, ProviderError>
where
    F: FnOnce() -> Result<ProviderPage, ProviderError> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| ProviderError::Transport(e.to_string()))?
}

fn classify_ureq(err: ureq::Error) -> ProviderError {
    match err {
        ureq::Error::Status(401, _) | ureq::Error::Status(403, _) => ProviderError::AuthInvalid,
        ureq::Error::Status(429, _) => ProviderError::QuotaExceeded,
        ureq::Error::Status(code, _) => ProviderError::BadStatus(format!("HTTP {}", code)),
        ureq::Error::Transport(t) => {
            let msg = t.to_string();
            debug!(error = %msg, "venue provider transport failure");
            if msg.to_lowercase().contains("timed out") {
                ProviderError::Timeout
            } else {
                ProviderError::Transport(msg)
            }
        }
    }
}

fn url_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

// ─── Synthetic placeholders ─────────────────────────────────────

struct Template {
    name: &'static str,
    tag: &'static str,
    rating: f64,
    price_level: u8,
}

const TEMPLATES: &[Template] = &[
    Template { name: "Pizza Palace", tag: "pizza_restaurant", rating: 4.2, price_level: 2 },
    Template { name: "Burger Barn", tag: "hamburger_restaurant", rating: 4.0, price_level: 2 },
    Template { name: "Sushi Spot", tag: "sushi_restaurant", rating: 4.5, price_level: 3 },
    Template { name: "Taco Time", tag: "mexican_restaurant", rating: 3.8, price_level: 1 },
    Template { name: "Coffee Corner", tag: "cafe", rating: 4.3, price_level: 2 },
    Template { name: "Thai Garden", tag: "thai_restaurant", rating: 4.4, price_level: 2 },
    Template { name: "Steakhouse Supreme", tag: "steak_house", rating: 4.6, price_level: 4 },
    Template { name: "Vegan Vibes", tag: "vegan_restaurant", rating: 4.1, price_level: 2 },
    Template { name: "Deli Delight", tag: "deli", rating: 3.9, price_level: 1 },
    Template { name: "Pasta Paradise", tag: "italian_restaurant", rating: 4.0, price_level: 2 },
];

/// Generates plausible placeholder venues around a coordinate. Output is
/// deterministic for a given seed, so one location always shows the same
/// placeholders.
#[derive(Debug, Clone)]
pub struct SyntheticGenerator {
    radius_miles: f64,
}

impl SyntheticGenerator {
    pub fn new(radius_miles: f64) -> Self {
        Self { radius_miles }
    }

    pub fn radius_miles(&self) -> f64 {
        self.radius_miles
    }

    /// Placeholder venues within `radius_miles` of `center`. A query narrows
    /// the templates by name or tag; if nothing matches, all are returned.
    pub fn generate(&self, center: Coordinate, query: &str, seed: u64) -> Vec<RawVenue> {
        let mut rng = StdRng::seed_from_u64(seed);
        let q = query.trim().to_lowercase();
        let matching: Vec<(usize, &Template)> = TEMPLATES
            .iter()
            .enumerate()
            .filter(|(_, t)| q.is_empty() || t.name.to_lowercase().contains(&q) || t.tag.contains(&q))
            .collect();
        let chosen: Vec<(usize, &Template)> = if matching.is_empty() { TEMPLATES.iter().enumerate().collect() } else { matching };

        chosen
            .into_iter()
            .map(|(index, t)| {
                let n = index + 1;
                let bearing = rng.gen_range(0.0..360.0);
                let miles = if self.radius_miles > 0.0 { rng.gen_range(0.0..self.radius_miles) } else { 0.0 };
                let location = geo::destination(center, bearing, miles);
                RawVenue {
                    place_id: format!("synthetic_{}", n),
                    name: t.name.to_string(),
                    types: vec![t.tag.to_string(), "restaurant".to_string()],
                    rating: Some(t.rating),
                    price_level: Some(t.price_level),
                    geometry: RawGeometry { location: RawLatLng { lat: location.lat, lng: location.lng } },
                    vicinity: Some(format!("{} Main St", rng.gen_range(1..=9999))),
                    formatted_address: None,
                    formatted_phone_number: Some(format!(
                        "(206) {}-{}",
                        rng.gen_range(100..=999),
                        rng.gen_range(1000..=9999)
                    )),
                    opening_hours: Some(RawOpeningHours { open_now: Some(rng.gen_bool(0.8)) }),
                    photos: vec![RawPhoto { photo_reference: format!("https://picsum.photos/400/300?random={}", n) }],
                    distance: None,
                }
            })
            .collect()
    }
}

#[async_trait]
impl VenueProvider for SyntheticGenerator {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Synthetic
    }

    async fn fetch_nearby(&self, request: &NearbyRequest) -> Result<ProviderPage, ProviderError> {
        let query = request.query.as_deref().unwrap_or("");
        let seed = CacheKey::new(request.coordinate, query).seed();
        Ok(ProviderPage::ok(self.generate(request.coordinate, query, seed), None))
    }

    async fn fetch_page(&self, _token: &ContinuationToken) -> Result<ProviderPage, ProviderError> {
        Ok(ProviderPage::ok(Vec::new(), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEATTLE: Coordinate = Coordinate::new(47.6062, -122.3321);

    #[test]
    fn test_synthetic_within_radius() {
        let gen = SyntheticGenerator::new(1.0);
        let venues = gen.generate(SEATTLE, "", 42);
        assert_eq!(venues.len(), 10);
        for v in &venues {
            let at = Coordinate::new(v.geometry.location.lat, v.geometry.location.lng);
            assert!(geo::distance_miles(SEATTLE, at).unwrap() <= 1.05);
            assert!(v.place_id.starts_with("synthetic_"));
        }
    }

    #[test]
    fn test_synthetic_deterministic_for_seed() {
        let gen = SyntheticGenerator::new(1.0);
        assert_eq!(gen.generate(SEATTLE, "", 7), gen.generate(SEATTLE, "", 7));
        assert_ne!(gen.generate(SEATTLE, "", 7), gen.generate(SEATTLE, "", 8));
    }

    #[test]
    fn test_synthetic_query_narrows_templates() {
        let gen = SyntheticGenerator::new(1.0);
        let venues = gen.generate(SEATTLE, "pizza", 1);
        assert_eq!(venues.len(), 1);
        assert_eq!(venues[0].name, "Pizza Palace");
        // unknown query falls back to the full set
        assert_eq!(gen.generate(SEATTLE, "xyz", 1).len(), 10);
    }

    #[test]
    fn test_nearby_url() {
        let api = LiveApi::new("k&ey", Duration::from_secs(5)).with_base_url("http://test/nearby");
        let url = api.nearby_url(&NearbyRequest {
            coordinate: SEATTLE,
            radius_meters: 1609,
            query: Some("thai food".into()),
        });
        assert_eq!(
            url,
            "http://test/nearby?location=47.6062,-122.3321&radius=1609&type=restaurant&keyword=thai%20food&key=k%26ey"
        );
        let page = api.page_url(&ContinuationToken("a b".into()));
        assert_eq!(page, "http://test/nearby?pagetoken=a%20b&key=k%26ey");
    }

    #[test]
    fn test_url_encode() {
        assert_eq!(url_encode("São Paulo"), "S%C3%A3o%20Paulo");
        assert_eq!(url_encode("a-b_c.d~"), "a-b_c.d~");
    }

    #[tokio::test]
    async fn test_synthetic_provider_pages() {
        let gen = SyntheticGenerator::new(1.0);
        let page = gen
            .fetch_nearby(&NearbyRequest { coordinate: SEATTLE, radius_meters: 1609, query: None })
            .await
            .unwrap();
        assert_eq!(page.status, "OK");
        assert_eq!(page.results.len(), 10);
        assert!(page.next_page_token.is_none());
    }
}
