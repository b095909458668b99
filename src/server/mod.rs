mod handlers;
mod state;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::location::PositionAcquisition;
use crate::venues::VenueProvider;

pub use state::{AppState, MAP_CONTAINER};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/venues", get(handlers::venues))
        .route("/api/venues/more", get(handlers::more_venues))
        .route("/api/categories", get(handlers::categories))
        .route("/api/markers", get(handlers::markers))
        .route("/api/position", get(handlers::position))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Build the shared state and bring up the marker map.
pub async fn prepare(
    config: &AppConfig,
    provider: Arc<dyn VenueProvider>,
    acquisition: Arc<dyn PositionAcquisition>,
) -> Arc<AppState> {
    let state = Arc::new(AppState::new(config, provider, acquisition));
    if let Err(e) = state.map.initialize(MAP_CONTAINER).await {
        warn!(error = %e, "marker map unavailable");
    }
    state
}

pub async fn start(host: &str, port: u16, state: Arc<AppState>) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(%addr, "nearby server listening");
    eprintln!("  Nearby server listening on http://{}", addr);
    eprintln!("  Press Ctrl+C to stop.");

    axum::serve(listener, app).await
}
