//! Engine composition root and control loop.
//!
//! `SyncEngine::new` constructs the stores once and passes them by reference
//! to the router, coordinator, and janitor -- no global state, so every
//! component can be unit-tested with a fake store or network seam.
//!
//! `run` consumes the engine into a task loop that reacts to three triggers:
//! inbound control messages from observers, connectivity edges on the online
//! watch channel, and the periodic maintenance tick.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheError, CacheStore, Janitor, StoredResponse};
use crate::config::{CachePolicies, EngineConfig};
use crate::notify::{CacheSize, ControlMessage, Notification, NotificationChannel};
use crate::queue::{QueueKind, QueueStore, StoreError};
use crate::router::{Fetcher, HttpFetcher, ReadRequest, RouteError, Router};
use crate::sync::{HttpUploader, SyncCoordinator, Uploader};

/// Buffer size for the inbound control message channel.
/// 32 is sufficient for bursts of observer messages with headroom.
const CONTROL_BUFFER_SIZE: usize = 32;

/// Maximum concurrent pre-warm fetches.
/// Limits parallel requests to avoid overwhelming the server on startup.
const MAX_CONCURRENT_PREWARM: usize = 10;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Queue(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// The assembled engine. Obtain handles with [`SyncEngine::handle`], then
/// consume the engine with [`SyncEngine::run`].
pub struct SyncEngine {
    config: EngineConfig,
    queue: Arc<QueueStore>,
    cache: Arc<CacheStore>,
    janitor: Arc<Janitor>,
    router: Arc<Router>,
    coordinator: Arc<SyncCoordinator>,
    notifier: NotificationChannel,
    control_tx: mpsc::Sender<ControlMessage>,
    control_rx: mpsc::Receiver<ControlMessage>,
    online_tx: Arc<watch::Sender<bool>>,
    online_rx: watch::Receiver<bool>,
}

impl SyncEngine {
    /// Build the engine with injected network seams.
    pub fn new(
        config: EngineConfig,
        fetcher: Arc<dyn Fetcher>,
        uploader: Arc<dyn Uploader>,
    ) -> Result<Self, EngineError> {
        let queue = Arc::new(QueueStore::open(config.data_dir.join("queue"))?);
        let cache = Arc::new(CacheStore::open(
            config.data_dir.join("caches"),
            &config.caches,
        )?);
        let janitor = Arc::new(Janitor::new(cache.clone()));
        let router = Arc::new(Router::new(cache.clone(), janitor.clone(), fetcher));
        let notifier = NotificationChannel::new();
        let coordinator = Arc::new(SyncCoordinator::new(
            queue.clone(),
            uploader,
            notifier.clone(),
            config.max_retries,
        ));

        let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER_SIZE);
        // Assume connectivity until told otherwise; the first failed upload
        // pass is harmless and the periodic tick replays leftovers.
        let (online_tx, online_rx) = watch::channel(true);

        Ok(Self {
            config,
            queue,
            cache,
            janitor,
            router,
            coordinator,
            notifier,
            control_tx,
            control_rx,
            online_tx: Arc::new(online_tx),
            online_rx,
        })
    }

    /// Build the engine with reqwest-backed network seams, sharing one
    /// connection pool between the read and write paths.
    pub fn with_http(config: EngineConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let fetcher = Arc::new(HttpFetcher::with_client(client.clone()));
        let uploader = Arc::new(HttpUploader::new(
            client,
            config.photo_endpoint.clone(),
            config.event_endpoint.clone(),
        ));
        Self::new(config, fetcher, uploader)
    }

    /// A cheap clonable handle for enqueueing writes, routing reads, and
    /// talking to the running engine loop.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            queue: self.queue.clone(),
            cache: self.cache.clone(),
            router: self.router.clone(),
            notifier: self.notifier.clone(),
            control: self.control_tx.clone(),
            online: self.online_tx.clone(),
        }
    }

    /// Run the control loop until every handle is dropped.
    pub async fn run(self) {
        let SyncEngine {
            config,
            cache,
            janitor,
            router,
            coordinator,
            notifier,
            control_tx,
            mut control_rx,
            mut online_rx,
            ..
        } = self;
        // The engine must not keep its own control channel alive, or the
        // loop would never observe all handles being dropped.
        drop(control_tx);

        info!("sync engine running");
        // First tick after a full interval; startup replay is driven by the
        // connectivity signal or an explicit SyncNow, not the clock.
        let period = Duration::from_secs(config.sync_interval_secs);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                message = control_rx.recv() => {
                    match message {
                        Some(message) => handle_control(
                            message, &cache, &router, &coordinator, &notifier,
                        ),
                        None => {
                            info!("all engine handles dropped, stopping");
                            break;
                        }
                    }
                }
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *online_rx.borrow_and_update() {
                        info!("connectivity restored, replaying queues");
                        spawn_drain(&coordinator);
                    } else {
                        debug!("connectivity lost");
                    }
                }
                _ = ticker.tick() => {
                    if *online_rx.borrow() {
                        spawn_drain(&coordinator);
                    }
                    spawn_expiry_sweep(&janitor);
                }
            }
        }
    }
}

fn handle_control(
    message: ControlMessage,
    cache: &Arc<CacheStore>,
    router: &Arc<Router>,
    coordinator: &Arc<SyncCoordinator>,
    notifier: &NotificationChannel,
) {
    debug!(?message, "control message");
    match message {
        ControlMessage::SyncNow => spawn_drain(coordinator),
        ControlMessage::ClearCache { name } => {
            let names: Vec<String> = match name {
                Some(name) => vec![name],
                None => CachePolicies::names().iter().map(|n| n.to_string()).collect(),
            };
            for name in names {
                if let Err(e) = cache.clear(&name) {
                    error!(cache = name.as_str(), error = %e, "clear failed");
                }
            }
        }
        ControlMessage::GetCacheSize { token } => {
            let mut report = Vec::new();
            for name in CachePolicies::names() {
                match (cache.entry_count(name), cache.size_bytes(name)) {
                    (Ok(entries), Ok(bytes)) => report.push(CacheSize {
                        name: name.to_string(),
                        entries,
                        bytes,
                    }),
                    (Err(e), _) | (_, Err(e)) => {
                        error!(cache = name, error = %e, "size report failed")
                    }
                }
            }
            notifier.publish(Notification::CacheSizeReport { token, report });
        }
        ControlMessage::CacheUrls { urls } => {
            let router = Arc::clone(router);
            tokio::spawn(prewarm(router, urls));
        }
    }
}

fn spawn_drain(coordinator: &Arc<SyncCoordinator>) {
    let coordinator = Arc::clone(coordinator);
    tokio::spawn(async move {
        coordinator.drain_all().await;
    });
}

fn spawn_expiry_sweep(janitor: &Arc<Janitor>) {
    let janitor = Arc::clone(janitor);
    tokio::spawn(async move {
        for name in CachePolicies::names() {
            if let Err(e) = janitor.trim_expired(name).await {
                warn!(cache = name, error = %e, "expiry sweep failed");
            }
        }
    });
}

/// Fetch the given URLs through the router with bounded concurrency,
/// populating whichever caches their classes map to.
async fn prewarm(router: Arc<Router>, urls: Vec<String>) {
    let total = urls.len();
    let warmed = stream::iter(urls)
        .map(|url| {
            let router = Arc::clone(&router);
            async move {
                let request = ReadRequest::get(&url);
                match router.route(&request).await {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(url = url.as_str(), error = %e, "pre-warm fetch failed");
                        false
                    }
                }
            }
        })
        .buffer_unordered(MAX_CONCURRENT_PREWARM)
        .filter(|ok| futures::future::ready(*ok))
        .count()
        .await;
    info!(warmed, total, "cache pre-warm complete");
}

/// Client-side handle onto a running engine.
/// Clone is cheap - everything inside is an Arc or a channel sender.
#[derive(Clone)]
pub struct EngineHandle {
    queue: Arc<QueueStore>,
    cache: Arc<CacheStore>,
    router: Arc<Router>,
    notifier: NotificationChannel,
    control: mpsc::Sender<ControlMessage>,
    online: Arc<watch::Sender<bool>>,
}

impl EngineHandle {
    /// Durably queue a photo for upload. Fails loudly if the store is
    /// unavailable; the caller owns the retry-or-surface decision.
    pub fn enqueue_photo(
        &self,
        bytes: Vec<u8>,
        filename: impl Into<String>,
        metadata: Value,
    ) -> Result<u64, StoreError> {
        self.queue.enqueue_photo(bytes, filename, metadata)
    }

    /// Durably queue an event record for submission.
    pub fn enqueue_event(&self, record: Value) -> Result<u64, StoreError> {
        self.queue.enqueue_event(record)
    }

    pub fn pending_count(&self, kind: QueueKind) -> Result<usize, StoreError> {
        self.queue.pending_count(kind)
    }

    /// Route a read request through the cache strategies.
    pub async fn route(&self, request: &ReadRequest) -> Result<StoredResponse, RouteError> {
        self.router.route(request).await
    }

    /// Send a control message to the engine loop. Returns `false` if the
    /// loop has stopped.
    pub async fn control(&self, message: ControlMessage) -> bool {
        self.control.send(message).await.is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// Report a connectivity change. A false-to-true edge triggers a replay
    /// of both queues.
    pub fn set_online(&self, online: bool) {
        self.online.send_if_modified(|current| {
            if *current != online {
                *current = online;
                true
            } else {
                false
            }
        });
    }

    /// Entry count for one named cache, for display.
    pub fn cache_entry_count(&self, name: &str) -> Result<usize, CacheError> {
        self.cache.entry_count(name)
    }
}
