use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::geo::Coordinate;
use crate::location::{PositionFix, PositionOrigin};
use crate::map::MarkerSpec;
use crate::venues::{
    cuisine_categories, parse_price_level, CuisineCategory, CuisineFilter, FilterSet, ProviderKind, SearchError, SearchOutcome,
    VenueRecord,
};

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
}

pub(super) struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody { error: self.1, code: self.0.as_u16() };
        (self.0, Json(body)).into_response()
    }
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    ApiError(status, msg.into())
}

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        let status = match e {
            SearchError::InvalidCoordinate(_) => StatusCode::BAD_REQUEST,
            SearchError::NoActiveSearch | SearchError::StaleContinuation => StatusCode::CONFLICT,
            SearchError::NoContinuation => StatusCode::NOT_FOUND,
            SearchError::Interrupted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        api_error(status, e.to_string())
    }
}

// ─── Shared response shapes ──────────────────────────────────────

#[derive(Serialize)]
pub struct ProviderFailure {
    pub code: &'static str,
    pub message: String,
}

#[derive(Serialize)]
pub struct VenuesResponse {
    pub venues: Vec<VenueRecord>,
    pub total: usize,
    pub has_more: bool,
    pub synthetic: bool,
    pub provider: ProviderKind,
    pub from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProviderFailure>,
    pub elapsed_ms: u64,
}

impl VenuesResponse {
    fn from_outcome(outcome: SearchOutcome, started: Instant) -> Self {
        Self {
            total: outcome.results.venues.len(),
            has_more: outcome.has_more(),
            synthetic: outcome.results.synthetic,
            provider: outcome.results.provider,
            from_cache: outcome.from_cache,
            error: outcome.error.as_ref().map(|e| ProviderFailure { code: e.code(), message: e.to_string() }),
            elapsed_ms: started.elapsed().as_millis() as u64,
            venues: outcome.venues,
        }
    }
}

// ─── GET /api/venues ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct VenuesQuery {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub query: Option<String>,
    pub cuisine: Option<String>,
    pub price: Option<String>,
    pub min_rating: Option<f64>,
    pub max_distance: Option<f64>,
}

impl VenuesQuery {
    fn filters(&self) -> Result<FilterSet, ApiError> {
        let price_level = match self.price.as_deref() {
            Some(p) => parse_price_level(p).map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?,
            None => None,
        };
        let cuisine = match self.cuisine.as_deref() {
            Some(c) => c.parse::<CuisineFilter>().unwrap_or_default(),
            None => CuisineFilter::All,
        };
        Ok(FilterSet {
            cuisine,
            price_level,
            min_rating: self.min_rating.unwrap_or(0.0),
            max_distance_miles: self.max_distance,
        })
    }
}

pub async fn venues(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VenuesQuery>,
) -> Result<Json<VenuesResponse>, ApiError> {
    let started = Instant::now();
    let filters = params.filters()?;

    let coordinate = match (params.lat, params.lng) {
        (Some(lat), Some(lng)) => Coordinate::new(lat, lng),
        (None, None) => state.position.request_position().await.coordinate,
        _ => return Err(api_error(StatusCode::BAD_REQUEST, "Provide both 'lat' and 'lng', or neither")),
    };
    let query = params.query.as_deref().unwrap_or("");

    let outcome = state.search.search(coordinate, query, &filters).await?;
    state.sync_markers();

    info!(
        lat = coordinate.lat,
        lng = coordinate.lng,
        results = outcome.venues.len(),
        cached = outcome.from_cache,
        "GET /api/venues"
    );
    Ok(Json(VenuesResponse::from_outcome(outcome, started)))
}

// ─── GET /api/venues/more ────────────────────────────────────────

pub async fn more_venues(State(state): State<Arc<AppState>>) -> Result<Json<VenuesResponse>, ApiError> {
    let started = Instant::now();
    let outcome = state.search.load_more_current().await?;
    state.sync_markers();
    Ok(Json(VenuesResponse::from_outcome(outcome, started)))
}

// ─── GET /api/categories ─────────────────────────────────────────

pub async fn categories() -> Json<&'static [CuisineCategory]> {
    Json(cuisine_categories())
}

// ─── GET /api/markers ────────────────────────────────────────────

#[derive(Serialize)]
pub struct MarkersResponse {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub center: Option<Coordinate>,
    pub zoom: Option<u8>,
    pub markers: Vec<MarkerSpec>,
}

pub async fn markers(State(state): State<Arc<AppState>>) -> Json<MarkersResponse> {
    let map_state = state.map.state();
    let surface = state.map_sdk.latest_surface().filter(|_| map_state.is_ready());
    Json(MarkersResponse {
        state: map_state.to_string(),
        error: map_state.error().map(|e| e.to_string()),
        center: surface.as_ref().map(|s| s.center()),
        zoom: surface.as_ref().map(|s| s.zoom()),
        markers: surface.map(|s| s.markers()).unwrap_or_default(),
    })
}

// ─── GET /api/position ───────────────────────────────────────────

#[derive(Serialize)]
pub struct PositionResponse {
    pub coordinate: Coordinate,
    pub formatted: String,
    pub origin: PositionOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

impl From<PositionFix> for PositionResponse {
    fn from(fix: PositionFix) -> Self {
        Self {
            coordinate: fix.coordinate,
            formatted: fix.coordinate.to_string(),
            origin: fix.origin,
            error: fix.error.map(|e| format!("{:?}", e)),
            message: fix.message(),
        }
    }
}

pub async fn position(State(state): State<Arc<AppState>>) -> Json<PositionResponse> {
    let fix = state.position.request_position().await;
    state.map.set_position(fix.coordinate);
    Json(PositionResponse::from(fix))
}
