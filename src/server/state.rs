use crate::config::AppConfig;
use crate::location::{PositionAcquisition, PositionSource};
use crate::map::{HeadlessSdk, MapSyncController};
use crate::venues::{VenueProvider, VenueSearchService};
use std::sync::Arc;

pub const MAP_CONTAINER: &str = "markers";
const HEADLESS_CREDENTIAL: &str = "headless";

pub struct AppState {
    pub search: Arc<VenueSearchService>,
    pub position: PositionSource,
    pub map: Arc<MapSyncController>,
    pub map_sdk: Arc<HeadlessSdk>,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        provider: Arc<dyn VenueProvider>,
        acquisition: Arc<dyn PositionAcquisition>,
    ) -> Self {
        let search = Arc::new(VenueSearchService::new(provider, config.search_settings()));
        let position = PositionSource::with_options(acquisition, config.acquisition_options(), config.fallback);

        let mut map_settings = config.map_settings();
        map_settings.credential.get_or_insert_with(|| HEADLESS_CREDENTIAL.to_string());
        let map_sdk = Arc::new(HeadlessSdk::default());
        // Clicks have no consumer over HTTP.
        let (map, _clicks) = MapSyncController::new(map_sdk.clone(), map_settings);

        Self { search, position, map: Arc::new(map), map_sdk }
    }

    /// Bring markers in line with the latest published search.
    pub fn sync_markers(&self) {
        let venues = self.search.state().venues;
        self.map.reconcile(&venues);
    }
}
