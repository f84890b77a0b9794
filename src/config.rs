//! Engine configuration management.
//!
//! This module defines the per-cache policy table (TTL, entry bound, fetch
//! strategy), the upload endpoints consumed by the sync coordinator, and the
//! on-disk locations for the durable queues and caches.
//!
//! Configuration is stored at `~/.config/garage-sync/config.json`.

use std::path::PathBuf;

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Application name used for config/data directory paths
const APP_NAME: &str = "garage-sync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

// ============================================================================
// Named caches
// ============================================================================

/// Pre-cached application shell assets (scripts, styles, fonts)
pub const STATIC_CACHE: &str = "static";

/// Runtime pages and uncategorized responses
pub const RUNTIME_CACHE: &str = "runtime";

/// Vehicle and receipt photos
pub const IMAGES_CACHE: &str = "images";

/// API responses
pub const API_CACHE: &str = "api";

// ============================================================================
// Defaults
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow uploads over mobile links while failing fast enough
/// that a drain pass does not hang indefinitely.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upload attempts before an entry is dropped as permanently failed.
/// 5 retries rides out flaky connectivity; a payload the server rejects
/// five times in a row is not going to start succeeding.
const DEFAULT_MAX_RETRIES: u32 = 5;

/// Seconds between periodic drain passes while online.
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

/// Fetch strategy applied to a content class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Serve from cache when fresh; only reach the network on miss/stale.
    CacheFirst,
    /// Always attempt the network first; fall back to cache on failure.
    NetworkFirst,
}

/// Policy for one named cache. Static configuration, not persisted per-entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entries older than this report a miss even before eviction runs.
    pub max_age_ms: i64,
    /// Oldest-by-insertion entries beyond this bound are evicted.
    pub max_entries: usize,
    pub strategy: Strategy,
}

impl CacheConfig {
    pub fn max_age(&self) -> Duration {
        Duration::milliseconds(self.max_age_ms)
    }
}

/// Policy table for the four named caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePolicies {
    #[serde(rename = "static")]
    pub static_assets: CacheConfig,
    pub runtime: CacheConfig,
    pub images: CacheConfig,
    pub api: CacheConfig,
}

impl Default for CachePolicies {
    fn default() -> Self {
        Self {
            // App shell changes only on deploy
            static_assets: CacheConfig {
                max_age_ms: Duration::days(7).num_milliseconds(),
                max_entries: 60,
                strategy: Strategy::CacheFirst,
            },
            runtime: CacheConfig {
                max_age_ms: Duration::days(1).num_milliseconds(),
                max_entries: 50,
                strategy: Strategy::NetworkFirst,
            },
            // Photos are immutable once uploaded, keep them a long time
            images: CacheConfig {
                max_age_ms: Duration::days(30).num_milliseconds(),
                max_entries: 100,
                strategy: Strategy::CacheFirst,
            },
            // API data goes stale quickly
            api: CacheConfig {
                max_age_ms: Duration::minutes(5).num_milliseconds(),
                max_entries: 40,
                strategy: Strategy::NetworkFirst,
            },
        }
    }
}

impl CachePolicies {
    /// All cache names in the table, in a stable order.
    pub fn names() -> [&'static str; 4] {
        [STATIC_CACHE, RUNTIME_CACHE, IMAGES_CACHE, API_CACHE]
    }

    pub fn get(&self, name: &str) -> Option<&CacheConfig> {
        match name {
            STATIC_CACHE => Some(&self.static_assets),
            RUNTIME_CACHE => Some(&self.runtime),
            IMAGES_CACHE => Some(&self.images),
            API_CACHE => Some(&self.api),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root directory for the durable queues and the named caches.
    pub data_dir: PathBuf,
    /// Multipart photo upload endpoint.
    pub photo_endpoint: String,
    /// JSON event submission endpoint.
    pub event_endpoint: String,
    pub max_retries: u32,
    pub sync_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub caches: CachePolicies,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            photo_endpoint: "https://garage.example.com/api/photos".to_string(),
            event_endpoint: "https://garage.example.com/api/events".to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            caches: CachePolicies::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

impl EngineConfig {
    pub fn load() -> std::io::Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents).map_err(std::io::Error::other)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME)
            .join(CONFIG_FILE)
    }
}

// ============================================================================
// Tests
// ============================================================================
