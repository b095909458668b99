//! In-memory search result cache owned by one search service.
//!
//! TTL: the freshness window (5 minutes by default), measured from each
//! entry's `fetched_instant`. Entries are whole `SearchResultSet`s behind an
//! `Arc`, so a reader never sees venues from one fetch paired with a
//! continuation token from another.

use super::types::{CacheKey, SearchResultSet};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(5 * 60);

/// The result cache.
pub struct ResultCache {
    freshness: Duration,
    entries: Mutex<HashMap<CacheKey, Arc<SearchResultSet>>>,
}

impl ResultCache {
    pub fn new(freshness: Duration) -> Self {
        Self { freshness, entries: Mutex::new(HashMap::new()) }
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Look up a key. Returns None if missing or older than the freshness window.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<SearchResultSet>> {
        let entries = self.lock();
        let entry = entries.get(key)?;
        if self.is_fresh(entry, Instant::now()) {
            Some(Arc::clone(entry))
        } else {
            None
        }
    }

    /// Store a result set. Last writer wins by `fetched_instant`: an older
    /// result never replaces a newer one. Returns whether the entry was stored.
    pub fn put(&self, key: CacheKey, set: Arc<SearchResultSet>) -> bool {
        let mut entries = self.lock();
        if let Some(existing) = entries.get(&key) {
            if existing.fetched_instant > set.fetched_instant {
                return false;
            }
        }
        entries.insert(key, set);
        true
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, set| self.is_fresh(set, now));
        before - entries.len()
    }

    /// Number of entries, fresh or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_fresh(&self, set: &SearchResultSet, now: Instant) -> bool {
        now.saturating_duration_since(set.fetched_instant) < self.freshness
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<SearchResultSet>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_FRESHNESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;
    use crate::venues::types::{ContinuationToken, ProviderKind};

    fn key(q: &str) -> CacheKey {
        CacheKey::new(Coordinate::new(47.6062, -122.3321), q)
    }

    fn set(token: Option<&str>) -> Arc<SearchResultSet> {
        Arc::new(SearchResultSet::new(
            vec![],
            token.map(|t| ContinuationToken(t.into())),
            ProviderKind::Live,
            false,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_put_get() {
        let cache = ResultCache::default();
        let stored = set(Some("page2"));
        assert!(cache.put(key("thai"), Arc::clone(&stored)));
        let hit = cache.get(&key("Thai")).unwrap();
        assert!(Arc::ptr_eq(&hit, &stored));
        assert!(cache.get(&key("sushi")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expires_after_window() {
        let cache = ResultCache::new(Duration::from_secs(300));
        cache.put(key(""), set(None));
        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get(&key("")).is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&key("")).is_none());
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_older_result_never_overwrites_newer() {
        let cache = ResultCache::default();
        let older = set(Some("old"));
        tokio::time::advance(Duration::from_secs(1)).await;
        let newer = set(Some("new"));

        assert!(cache.put(key(""), Arc::clone(&newer)));
        assert!(!cache.put(key(""), older));
        let hit = cache.get(&key("")).unwrap();
        assert_eq!(hit.continuation, Some(ContinuationToken("new".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate() {
        let cache = ResultCache::default();
        cache.put(key("x"), set(None));
        assert!(cache.invalidate(&key("x")));
        assert!(!cache.invalidate(&key("x")));
        assert_eq!(cache.len(), 0);
    }
}
