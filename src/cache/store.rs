use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{CacheConfig, CachePolicies};

/// Manifest file name inside each cache directory
const MANIFEST_FILE: &str = "manifest.json";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("unknown cache: {0}")]
    UnknownCache(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A stored response: status, headers, and body bytes. The engine treats the
/// body as opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl StoredResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A cache hit: the stored response plus the write-time stamp used for TTL
/// arithmetic.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub cached_at: DateTime<Utc>,
    pub response: StoredResponse,
}

impl CacheEntry {
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.cached_at
    }
}

/// One manifest row: everything about an entry except its body bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestRecord {
    key: String,
    file: String,
    status: u16,
    headers: Vec<(String, String)>,
    cached_at: DateTime<Utc>,
    body_len: u64,
}

/// Per-cache manifest, persisted as JSON. `entries` is kept in insertion
/// order; that order is the eviction order.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    next_seq: u64,
    entries: Vec<ManifestRecord>,
}

struct CacheState {
    config: CacheConfig,
    dir: PathBuf,
    manifest: Manifest,
}

/// A set of named disk caches. Each cache holds a `manifest.json` (insertion
/// ordered key records) and one body file per entry.
///
/// `put` stamps `cached_at = now()` regardless of what the response claims
/// about its own freshness; `get` reports a miss for entries older than the
/// cache's `max_age_ms` even though the bytes are still physically present.
pub struct CacheStore {
    caches: HashMap<String, Mutex<CacheState>>,
}

impl CacheStore {
    /// Open (or create) the named caches under `root`. An unreadable manifest
    /// is discarded and the cache starts empty -- cache contents are always
    /// reconstructible from the network, unlike queue entries.
    pub fn open(root: impl AsRef<Path>, policies: &CachePolicies) -> Result<Self, CacheError> {
        let root = root.as_ref();
        let mut caches = HashMap::new();
        for name in CachePolicies::names() {
            let config = *policies.get(name).expect("policy table covers all names");
            let dir = root.join(name);
            std::fs::create_dir_all(&dir)?;
            let manifest = load_manifest(&dir.join(MANIFEST_FILE));
            caches.insert(
                name.to_string(),
                Mutex::new(CacheState {
                    config,
                    dir,
                    manifest,
                }),
            );
        }
        Ok(Self { caches })
    }

    /// Look up a fresh entry. Stale entries report a miss (lazy invalidation);
    /// the janitor reclaims their space later.
    pub fn get(&self, name: &str, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        self.lookup(name, key, false)
    }

    /// Look up an entry regardless of staleness. Used by the fetch strategies
    /// as the offline fallback: a stale response beats no response.
    pub fn get_ignore_staleness(
        &self,
        name: &str,
        key: &str,
    ) -> Result<Option<CacheEntry>, CacheError> {
        self.lookup(name, key, true)
    }

    fn lookup(
        &self,
        name: &str,
        key: &str,
        ignore_staleness: bool,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let state = self.state(name)?.lock().unwrap_or_else(|e| e.into_inner());
        let Some(record) = state.manifest.entries.iter().find(|r| r.key == key) else {
            return Ok(None);
        };

        if !ignore_staleness {
            let age = Utc::now() - record.cached_at;
            if age > state.config.max_age() {
                debug!(cache = name, key, age_ms = age.num_milliseconds(), "stale entry, reporting miss");
                return Ok(None);
            }
        }

        let body = match std::fs::read(state.dir.join(&record.file)) {
            Ok(body) => body,
            Err(e) => {
                warn!(cache = name, key, error = %e, "entry body unreadable, treating as miss");
                return Ok(None);
            }
        };
        Ok(Some(CacheEntry {
            key: record.key.clone(),
            cached_at: record.cached_at,
            response: StoredResponse {
                status: record.status,
                headers: record.headers.clone(),
                body,
            },
        }))
    }

    /// Store a response under `key`, stamping `cached_at = now()`. Replacing
    /// an existing key refreshes its stamp and moves it to the back of the
    /// insertion order (a refreshed entry is the newest).
    pub fn put(&self, name: &str, key: &str, response: &StoredResponse) -> Result<(), CacheError> {
        let mut state = self.state(name)?.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut *state;

        if let Some(pos) = state.manifest.entries.iter().position(|r| r.key == key) {
            let old = state.manifest.entries.remove(pos);
            let _ = std::fs::remove_file(state.dir.join(&old.file));
        }

        let seq = state.manifest.next_seq;
        state.manifest.next_seq += 1;
        let file = format!("{}.bin", seq);
        std::fs::write(state.dir.join(&file), &response.body)?;

        state.manifest.entries.push(ManifestRecord {
            key: key.to_string(),
            file,
            status: response.status,
            headers: response.headers.clone(),
            cached_at: Utc::now(),
            body_len: response.body.len() as u64,
        });
        persist_manifest(&state.dir, &state.manifest)?;
        debug!(cache = name, key, "cached response");
        Ok(())
    }

    /// Delete one entry. Returns whether the key was present.
    pub fn delete(&self, name: &str, key: &str) -> Result<bool, CacheError> {
        let mut state = self.state(name)?.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut *state;
        let Some(pos) = state.manifest.entries.iter().position(|r| r.key == key) else {
            return Ok(false);
        };
        let record = state.manifest.entries.remove(pos);
        let _ = std::fs::remove_file(state.dir.join(&record.file));
        persist_manifest(&state.dir, &state.manifest)?;
        Ok(true)
    }

    /// Drop every entry in one cache.
    pub fn clear(&self, name: &str) -> Result<(), CacheError> {
        let mut state = self.state(name)?.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut *state;
        for record in state.manifest.entries.drain(..) {
            let _ = std::fs::remove_file(state.dir.join(&record.file));
        }
        persist_manifest(&state.dir, &state.manifest)?;
        debug!(cache = name, "cleared cache");
        Ok(())
    }

    /// Keys in insertion order. Insertion order is the eviction order.
    pub fn keys(&self, name: &str) -> Result<Vec<String>, CacheError> {
        let state = self.state(name)?.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.manifest.entries.iter().map(|r| r.key.clone()).collect())
    }

    /// Keys whose entries have outlived the cache's TTL.
    pub fn stale_keys(&self, name: &str) -> Result<Vec<String>, CacheError> {
        let state = self.state(name)?.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        Ok(state
            .manifest
            .entries
            .iter()
            .filter(|r| now - r.cached_at > state.config.max_age())
            .map(|r| r.key.clone())
            .collect())
    }

    pub fn entry_count(&self, name: &str) -> Result<usize, CacheError> {
        let state = self.state(name)?.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.manifest.entries.len())
    }

    /// Total stored body bytes. Backs the cache-size report to UI observers.
    pub fn size_bytes(&self, name: &str) -> Result<u64, CacheError> {
        let state = self.state(name)?.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.manifest.entries.iter().map(|r| r.body_len).sum())
    }

    pub fn config(&self, name: &str) -> Result<CacheConfig, CacheError> {
        let state = self.state(name)?.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state.config)
    }

    fn state(&self, name: &str) -> Result<&Mutex<CacheState>, CacheError> {
        self.caches
            .get(name)
            .ok_or_else(|| CacheError::UnknownCache(name.to_string()))
    }

    /// Rewind an entry's `cached_at` stamp. Test hook for TTL checks without
    /// real sleeps.
    #[cfg(test)]
    pub(crate) fn backdate(&self, name: &str, key: &str, age: chrono::Duration) {
        let mut state = self.state(name).unwrap().lock().unwrap();
        if let Some(record) = state.manifest.entries.iter_mut().find(|r| r.key == key) {
            record.cached_at = Utc::now() - age;
        }
    }
}

fn load_manifest(path: &Path) -> Manifest {
    if !path.exists() {
        return Manifest::default();
    }
    match std::fs::read_to_string(path).map_err(|e| e.to_string()).and_then(|contents| {
        serde_json::from_str(&contents).map_err(|e| e.to_string())
    }) {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable cache manifest, starting empty");
            Manifest::default()
        }
    }
}

fn persist_manifest(dir: &Path, manifest: &Manifest) -> Result<(), CacheError> {
    let path = dir.join(MANIFEST_FILE);
    let tmp = dir.join("manifest.tmp");
    let contents = serde_json::to_string_pretty(manifest).map_err(std::io::Error::other)?;
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{API_CACHE, IMAGES_CACHE};
    use chrono::Duration;

    fn store() -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path(), &CachePolicies::default()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_then_get_returns_same_bytes() {
        let (_dir, store) = store();
        let response = StoredResponse::ok(b"{\"vehicles\":[]}".to_vec());
        store.put(API_CACHE, "/api/vehicles", &response).unwrap();

        let entry = store.get(API_CACHE, "/api/vehicles").unwrap().unwrap();
        assert_eq!(entry.response, response);
    }

    #[test]
    fn test_get_miss_on_absent_key() {
        let (_dir, store) = store();
        assert!(store.get(API_CACHE, "/api/nothing").unwrap().is_none());
    }

    #[test]
    fn test_stale_entry_reports_miss_without_eviction() {
        let (_dir, store) = store();
        store
            .put(API_CACHE, "/api/vehicles", &StoredResponse::ok(b"data".to_vec()))
            .unwrap();
        // Default api TTL is 5 minutes
        store.backdate(API_CACHE, "/api/vehicles", Duration::minutes(6));

        assert!(store.get(API_CACHE, "/api/vehicles").unwrap().is_none());
        // Bytes are still physically present
        assert_eq!(store.entry_count(API_CACHE).unwrap(), 1);
        assert!(store
            .get_ignore_staleness(API_CACHE, "/api/vehicles")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_put_refreshes_stamp_and_moves_to_back() {
        let (_dir, store) = store();
        store.put(IMAGES_CACHE, "img1", &StoredResponse::ok(b"a".to_vec())).unwrap();
        store.put(IMAGES_CACHE, "img2", &StoredResponse::ok(b"b".to_vec())).unwrap();
        store.backdate(IMAGES_CACHE, "img1", Duration::days(40));

        // Refresh img1: it becomes the newest entry again
        store.put(IMAGES_CACHE, "img1", &StoredResponse::ok(b"a2".to_vec())).unwrap();
        assert_eq!(store.keys(IMAGES_CACHE).unwrap(), vec!["img2", "img1"]);
        let entry = store.get(IMAGES_CACHE, "img1").unwrap().unwrap();
        assert_eq!(entry.response.body, b"a2");
        assert_eq!(store.entry_count(IMAGES_CACHE).unwrap(), 2);
    }

    #[test]
    fn test_delete_and_clear() {
        let (_dir, store) = store();
        store.put(IMAGES_CACHE, "img1", &StoredResponse::ok(b"a".to_vec())).unwrap();
        store.put(IMAGES_CACHE, "img2", &StoredResponse::ok(b"b".to_vec())).unwrap();

        assert!(store.delete(IMAGES_CACHE, "img1").unwrap());
        assert!(!store.delete(IMAGES_CACHE, "img1").unwrap());
        assert_eq!(store.keys(IMAGES_CACHE).unwrap(), vec!["img2"]);

        store.clear(IMAGES_CACHE).unwrap();
        assert_eq!(store.entry_count(IMAGES_CACHE).unwrap(), 0);
    }

    #[test]
    fn test_unknown_cache_is_an_error() {
        let (_dir, store) = store();
        match store.get("bogus", "key") {
            Err(CacheError::UnknownCache(name)) => assert_eq!(name, "bogus"),
            other => panic!("expected UnknownCache, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = CacheStore::open(dir.path(), &CachePolicies::default()).unwrap();
            store.put(IMAGES_CACHE, "img1", &StoredResponse::ok(b"bytes".to_vec())).unwrap();
        }
        let store = CacheStore::open(dir.path(), &CachePolicies::default()).unwrap();
        let entry = store.get(IMAGES_CACHE, "img1").unwrap().unwrap();
        assert_eq!(entry.response.body, b"bytes");
    }

    #[test]
    fn test_size_bytes_tracks_bodies() {
        let (_dir, store) = store();
        store.put(IMAGES_CACHE, "img1", &StoredResponse::ok(vec![0u8; 100])).unwrap();
        store.put(IMAGES_CACHE, "img2", &StoredResponse::ok(vec![0u8; 50])).unwrap();
        assert_eq!(store.size_bytes(IMAGES_CACHE).unwrap(), 150);
    }
}
