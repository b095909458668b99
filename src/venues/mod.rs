//! Venue discovery: provider access, result caching, filtering and paging.

pub mod cache;
pub mod category;
pub mod debounce;
pub mod feed;
pub mod providers;
pub mod service;
pub mod types;

pub use cache::ResultCache;
pub use category::{cuisine_categories, CuisineCategory};
pub use debounce::Debouncer;
pub use feed::VenueFeed;
pub use providers::{EdgeFunction, LiveApi, SyntheticGenerator, VenueProvider};
pub use service::{SearchSettings, VenueSearchService};
pub use types::{
    parse_price_level, ContinuationToken, CuisineFilter, FilterSet, ProviderError, ProviderKind, SearchError, SearchOutcome,
    SearchResultSet, SearchState, VenueRecord,
};
