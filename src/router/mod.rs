//! Read-request routing and fetch strategies.
//!
//! This module classifies every outgoing read request into a content class
//! (api, image, static, document, other), maps the class to one named cache,
//! and applies that cache's strategy:
//!
//! - **cache-first** (images, static assets): a fresh hit returns with no
//!   network touch; on miss or stale the network is fetched and the result
//!   cached; on network failure stale bytes are served if present.
//! - **network-first** (api, documents): the network is tried first and the
//!   cache refreshed on success; on failure the cache is served regardless of
//!   staleness, and a document with no fallback gets the offline placeholder
//!   page rather than a raw error.
//!
//! Network access goes through the [`Fetcher`] trait so routing is testable
//! without a server.

pub mod classify;
pub mod fetch;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CacheError, CacheStore, Janitor, StoredResponse};

pub use classify::{classify, Destination, ReadRequest, RequestClass};
pub use fetch::{FetchError, Fetcher, HttpFetcher};

/// Served for document requests when the network is down and nothing is
/// cached. The router must never expose a blank broken page.
const OFFLINE_PAGE: &str = "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>Offline</title></head>\n<body><h1>You're offline</h1><p>This page isn't available offline yet. Your queued changes will sync when you're back online.</p></body>\n</html>\n";

#[derive(Error, Debug)]
pub enum RouteError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Dispatches read requests to a fetch strategy backed by the cache store.
pub struct Router {
    store: Arc<CacheStore>,
    janitor: Arc<Janitor>,
    fetcher: Arc<dyn Fetcher>,
}

impl Router {
    pub fn new(store: Arc<CacheStore>, janitor: Arc<Janitor>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            store,
            janitor,
            fetcher,
        }
    }

    /// Route one read request. Non-GET requests bypass caching entirely.
    pub async fn route(&self, request: &ReadRequest) -> Result<StoredResponse, RouteError> {
        if request.method != reqwest::Method::GET {
            return Ok(self.fetcher.fetch(request).await?);
        }

        let class = classify(request);
        let cache_name = class.cache_name();
        let strategy = self.store.config(cache_name)?.strategy;
        debug!(url = request.url.as_str(), ?class, cache = cache_name, "routing request");

        match strategy {
            crate::config::Strategy::CacheFirst => self.cache_first(cache_name, request).await,
            crate::config::Strategy::NetworkFirst => {
                self.network_first(cache_name, request, class == RequestClass::Document)
                    .await
            }
        }
    }

    async fn cache_first(
        &self,
        cache_name: &str,
        request: &ReadRequest,
    ) -> Result<StoredResponse, RouteError> {
        // The whole point of cache-first: a fresh hit never touches the
        // network, so it works with zero connectivity.
        if let Some(entry) = self.store.get(cache_name, &request.url)? {
            debug!(url = request.url.as_str(), cache = cache_name, "fresh hit");
            return Ok(entry.response);
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.cache_success(cache_name, request, &response)?;
                Ok(response)
            }
            Err(e) => {
                // Better a stale image than a broken one
                if let Some(entry) = self.store.get_ignore_staleness(cache_name, &request.url)? {
                    warn!(url = request.url.as_str(), error = %e, "network failed, serving stale");
                    return Ok(entry.response);
                }
                Err(e.into())
            }
        }
    }

    async fn network_first(
        &self,
        cache_name: &str,
        request: &ReadRequest,
        is_document: bool,
    ) -> Result<StoredResponse, RouteError> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.cache_success(cache_name, request, &response)?;
                Ok(response)
            }
            Err(e) => {
                // Offline content, even expired, beats an error for HTML/API
                if let Some(entry) = self.store.get_ignore_staleness(cache_name, &request.url)? {
                    warn!(url = request.url.as_str(), error = %e, "network failed, serving cached");
                    return Ok(entry.response);
                }
                if is_document {
                    warn!(url = request.url.as_str(), error = %e, "no fallback, serving offline page");
                    return Ok(offline_placeholder());
                }
                Err(e.into())
            }
        }
    }

    /// Cache a successful response and kick the janitor for that cache.
    /// Only 2xx responses are cached; errors are returned to the caller as-is.
    fn cache_success(
        &self,
        cache_name: &str,
        request: &ReadRequest,
        response: &StoredResponse,
    ) -> Result<(), CacheError> {
        if !response.is_success() {
            return Ok(());
        }
        self.store.put(cache_name, &request.url, response)?;

        // Detached: eviction must never add latency to the request path
        let janitor = Arc::clone(&self.janitor);
        let name = cache_name.to_string();
        tokio::spawn(async move {
            if let Err(e) = janitor.trim(&name).await {
                warn!(cache = name.as_str(), error = %e, "janitor trim failed");
            }
        });
        Ok(())
    }
}

fn offline_placeholder() -> StoredResponse {
    StoredResponse {
        status: 503,
        headers: vec![(
            "content-type".to_string(),
            "text/html; charset=utf-8".to_string(),
        )],
        body: OFFLINE_PAGE.as_bytes().to_vec(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CachePolicies;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted fetcher: pops the next outcome per call and counts calls.
    struct FakeFetcher {
        outcomes: Mutex<Vec<Result<StoredResponse, FetchError>>>,
        calls: AtomicUsize,
    }

    impl FakeFetcher {
        fn new(outcomes: Vec<Result<StoredResponse, FetchError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, _request: &ReadRequest) -> Result<StoredResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                return Err(FetchError::Network("no scripted outcome".to_string()));
            }
            outcomes.remove(0)
        }
    }

    fn router(
        outcomes: Vec<Result<StoredResponse, FetchError>>,
    ) -> (tempfile::TempDir, Arc<CacheStore>, Arc<FakeFetcher>, Router) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CacheStore::open(dir.path(), &CachePolicies::default()).unwrap());
        let janitor = Arc::new(Janitor::new(store.clone()));
        let fetcher = Arc::new(FakeFetcher::new(outcomes));
        let router = Router::new(store.clone(), janitor, fetcher.clone());
        (dir, store, fetcher, router)
    }

    fn image_request() -> ReadRequest {
        ReadRequest::get("https://garage.example.com/photos/v42.jpg")
    }

    fn api_request() -> ReadRequest {
        ReadRequest::get("https://garage.example.com/api/vehicles")
    }

    fn document_request() -> ReadRequest {
        ReadRequest::get("https://garage.example.com/garage").with_destination(Destination::Document)
    }

    #[tokio::test]
    async fn test_cache_first_fresh_hit_skips_network() {
        let (_dir, store, fetcher, router) = router(vec![]);
        store
            .put("images", &image_request().url, &StoredResponse::ok(b"jpeg".to_vec()))
            .unwrap();

        let response = router.route(&image_request()).await.unwrap();
        assert_eq!(response.body, b"jpeg");
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_first_miss_fetches_and_caches() {
        let (_dir, _store, fetcher, router) =
            router(vec![Ok(StoredResponse::ok(b"jpeg".to_vec()))]);

        let response = router.route(&image_request()).await.unwrap();
        assert_eq!(response.body, b"jpeg");
        assert_eq!(fetcher.calls(), 1);

        // Second read is served from cache
        let response = router.route(&image_request()).await.unwrap();
        assert_eq!(response.body, b"jpeg");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_first_serves_stale_on_network_failure() {
        let (_dir, store, _fetcher, router) =
            router(vec![Err(FetchError::Network("down".to_string()))]);
        let request = image_request();
        store.put("images", &request.url, &StoredResponse::ok(b"old".to_vec())).unwrap();
        store.backdate("images", &request.url, chrono::Duration::days(31));

        // Stale, so the router goes to the network; network fails; stale
        // bytes come back anyway.
        let response = router.route(&request).await.unwrap();
        assert_eq!(response.body, b"old");
    }

    #[tokio::test]
    async fn test_cache_first_propagates_failure_without_fallback() {
        let (_dir, _store, _fetcher, router) =
            router(vec![Err(FetchError::Network("down".to_string()))]);
        assert!(matches!(
            router.route(&image_request()).await,
            Err(RouteError::Fetch(_))
        ));
    }

    #[tokio::test]
    async fn test_network_first_refreshes_cache() {
        let (_dir, store, _fetcher, router) = router(vec![
            Ok(StoredResponse::ok(b"v1".to_vec())),
            Ok(StoredResponse::ok(b"v2".to_vec())),
        ]);
        let request = api_request();

        assert_eq!(router.route(&request).await.unwrap().body, b"v1");
        assert_eq!(router.route(&request).await.unwrap().body, b"v2");
        let entry = store.get("api", &request.url).unwrap().unwrap();
        assert_eq!(entry.response.body, b"v2");
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_expired_cache() {
        let (_dir, store, _fetcher, router) =
            router(vec![Err(FetchError::Timeout)]);
        let request = api_request();
        store.put("api", &request.url, &StoredResponse::ok(b"cached".to_vec())).unwrap();
        store.backdate("api", &request.url, chrono::Duration::hours(1));

        let response = router.route(&request).await.unwrap();
        assert_eq!(response.body, b"cached");
    }

    #[tokio::test]
    async fn test_api_failure_without_fallback_propagates() {
        let (_dir, _store, _fetcher, router) =
            router(vec![Err(FetchError::Network("down".to_string()))]);
        assert!(router.route(&api_request()).await.is_err());
    }

    #[tokio::test]
    async fn test_document_without_fallback_gets_offline_page() {
        let (_dir, _store, _fetcher, router) =
            router(vec![Err(FetchError::Network("down".to_string()))]);

        let response = router.route(&document_request()).await.unwrap();
        assert_eq!(response.status, 503);
        assert!(String::from_utf8_lossy(&response.body).contains("offline"));
    }

    #[tokio::test]
    async fn test_non_success_responses_are_not_cached() {
        let (_dir, store, _fetcher, router) = router(vec![Ok(StoredResponse {
            status: 500,
            headers: Vec::new(),
            body: b"boom".to_vec(),
        })]);
        let request = api_request();

        let response = router.route(&request).await.unwrap();
        assert_eq!(response.status, 500);
        assert!(store.get_ignore_staleness("api", &request.url).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_get_bypasses_cache() {
        let (_dir, store, fetcher, router) =
            router(vec![Ok(StoredResponse::ok(b"created".to_vec()))]);
        let request = ReadRequest::get("https://garage.example.com/api/vehicles")
            .with_method(reqwest::Method::POST);

        router.route(&request).await.unwrap();
        assert_eq!(fetcher.calls(), 1);
        assert!(store.get_ignore_staleness("api", &request.url).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_triggers_janitor_trim() {
        let dir = tempfile::tempdir().unwrap();
        let mut policies = CachePolicies::default();
        policies.api.max_entries = 2;
        let store = Arc::new(CacheStore::open(dir.path(), &policies).unwrap());
        let janitor = Arc::new(Janitor::new(store.clone()));
        let fetcher = Arc::new(FakeFetcher::new(
            (0..3).map(|i| Ok(StoredResponse::ok(format!("r{}", i).into_bytes()))).collect(),
        ));
        let router = Router::new(store.clone(), janitor, fetcher);

        for i in 0..3 {
            let request =
                ReadRequest::get(format!("https://garage.example.com/api/vehicles/{}", i));
            router.route(&request).await.unwrap();
        }
        // Trims run detached; give them a moment
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(store.entry_count("api").unwrap(), 2);
    }
}
