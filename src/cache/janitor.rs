use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cache::store::{CacheError, CacheStore};
use crate::config::CachePolicies;

/// Enforces each cache's max-entry bound with pure FIFO eviction: when a
/// cache holds more than `max_entries` keys, the oldest-by-insertion keys are
/// deleted first. No usage tracking.
///
/// A per-cache mutex serializes janitor passes on the same cache; passes on
/// different caches (and router traffic) proceed concurrently. Trims run
/// asynchronously relative to the request that triggered them, so eviction
/// never adds latency to the read path.
pub struct Janitor {
    store: Arc<CacheStore>,
    passes: HashMap<String, Mutex<()>>,
}

impl Janitor {
    pub fn new(store: Arc<CacheStore>) -> Self {
        let passes = CachePolicies::names()
            .iter()
            .map(|name| (name.to_string(), Mutex::new(())))
            .collect();
        Self { store, passes }
    }

    /// Evict oldest-by-insertion entries beyond the cache's bound. Returns
    /// the number of entries evicted.
    pub async fn trim(&self, name: &str) -> Result<usize, CacheError> {
        let _pass = self.pass_lock(name)?.lock().await;

        let max_entries = self.store.config(name)?.max_entries;
        let keys = self.store.keys(name)?;
        if keys.len() <= max_entries {
            return Ok(0);
        }

        let excess = keys.len() - max_entries;
        for key in &keys[..excess] {
            self.store.delete(name, key)?;
            debug!(cache = name, key = key.as_str(), "evicted");
        }
        info!(cache = name, evicted = excess, "trimmed cache to bound");
        Ok(excess)
    }

    /// Reclaim disk held by TTL-expired entries. Purely space reclamation:
    /// `CacheStore::get` already treats expired entries as misses.
    pub async fn trim_expired(&self, name: &str) -> Result<usize, CacheError> {
        let _pass = self.pass_lock(name)?.lock().await;

        let stale = self.store.stale_keys(name)?;
        for key in &stale {
            self.store.delete(name, key)?;
        }
        if !stale.is_empty() {
            info!(cache = name, reclaimed = stale.len(), "dropped expired entries");
        }
        Ok(stale.len())
    }

    fn pass_lock(&self, name: &str) -> Result<&Mutex<()>, CacheError> {
        self.passes
            .get(name)
            .ok_or_else(|| CacheError::UnknownCache(name.to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::StoredResponse;
    use crate::config::{CacheConfig, CachePolicies, IMAGES_CACHE, Strategy};

    fn small_images_policies(max_entries: usize) -> CachePolicies {
        let mut policies = CachePolicies::default();
        policies.images = CacheConfig {
            max_age_ms: chrono::Duration::days(30).num_milliseconds(),
            max_entries,
            strategy: Strategy::CacheFirst,
        };
        policies
    }

    #[tokio::test]
    async fn test_trim_is_noop_under_bound() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CacheStore::open(dir.path(), &small_images_policies(5)).unwrap());
        let janitor = Janitor::new(store.clone());

        store.put(IMAGES_CACHE, "img1", &StoredResponse::ok(b"a".to_vec())).unwrap();
        assert_eq!(janitor.trim(IMAGES_CACHE).await.unwrap(), 0);
        assert_eq!(store.keys(IMAGES_CACHE).unwrap(), vec!["img1"]);
    }

    #[tokio::test]
    async fn test_trim_evicts_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CacheStore::open(dir.path(), &small_images_policies(2)).unwrap());
        let janitor = Janitor::new(store.clone());

        for key in ["img1", "img2", "img3"] {
            store.put(IMAGES_CACHE, key, &StoredResponse::ok(b"x".to_vec())).unwrap();
        }
        assert_eq!(janitor.trim(IMAGES_CACHE).await.unwrap(), 1);
        assert_eq!(store.keys(IMAGES_CACHE).unwrap(), vec!["img2", "img3"]);
    }

    #[tokio::test]
    async fn test_trim_retains_most_recent_m_after_many_puts() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CacheStore::open(dir.path(), &small_images_policies(3)).unwrap());
        let janitor = Janitor::new(store.clone());

        for i in 0..10 {
            store
                .put(IMAGES_CACHE, &format!("img{}", i), &StoredResponse::ok(b"x".to_vec()))
                .unwrap();
        }
        janitor.trim(IMAGES_CACHE).await.unwrap();
        assert_eq!(store.keys(IMAGES_CACHE).unwrap(), vec!["img7", "img8", "img9"]);
    }

    #[tokio::test]
    async fn test_trim_expired_reclaims_space() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CacheStore::open(dir.path(), &CachePolicies::default()).unwrap());
        let janitor = Janitor::new(store.clone());

        store.put(IMAGES_CACHE, "old", &StoredResponse::ok(b"x".to_vec())).unwrap();
        store.put(IMAGES_CACHE, "new", &StoredResponse::ok(b"y".to_vec())).unwrap();
        store.backdate(IMAGES_CACHE, "old", chrono::Duration::days(31));

        assert_eq!(janitor.trim_expired(IMAGES_CACHE).await.unwrap(), 1);
        assert_eq!(store.keys(IMAGES_CACHE).unwrap(), vec!["new"]);
    }

    #[tokio::test]
    async fn test_unknown_cache_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CacheStore::open(dir.path(), &CachePolicies::default()).unwrap());
        let janitor = Janitor::new(store);
        assert!(matches!(
            janitor.trim("bogus").await,
            Err(CacheError::UnknownCache(_))
        ));
    }
}
