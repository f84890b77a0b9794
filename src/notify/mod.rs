//! Fire-and-forget message bus between the engine and UI observers.
//!
//! Outbound: per-item upload outcomes and sync/cache reports, broadcast to
//! every currently-connected observer. Delivery is at-most-once per observer:
//! there is no replay buffer, and an observer that is not listening at
//! publish time (or that lags past the channel bound) misses the event. The
//! UI can always re-query authoritative state on reconnect.
//!
//! Inbound: control messages ("sync now", "clear caches", "report cache
//! size", "pre-warm these URLs") consumed by the engine loop. The cache-size
//! report is a request/response pattern layered over the broadcast side,
//! matched by a correlation token.

use tokio::sync::broadcast;
use tracing::debug;

use crate::queue::QueueKind;
use crate::sync::DrainReport;

/// Per-observer buffer bound. An observer that falls further behind than
/// this starts missing events.
const CHANNEL_CAPACITY: usize = 64;

/// Per-cache size summary, one row per named cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSize {
    pub name: String,
    pub entries: usize,
    pub bytes: u64,
}

/// Events published to UI observers.
#[derive(Debug, Clone)]
pub enum Notification {
    /// A queued photo landed; `response` is the server body, verbatim.
    PhotoUploaded { id: u64, response: String },
    /// A queued event landed; `response` is the server body, verbatim.
    EventUploaded { id: u64, response: String },
    /// An entry exceeded the retry ceiling and was dropped. The user's data
    /// needs re-entry; this is never silent.
    UploadFailedPermanently { kind: QueueKind, id: u64 },
    /// A drain pass finished for one collection.
    SyncCompleted { kind: QueueKind, report: DrainReport },
    /// Reply to [`ControlMessage::GetCacheSize`], matched by `token`.
    CacheSizeReport { token: u64, report: Vec<CacheSize> },
}

/// Control messages sent by UI observers to the engine.
#[derive(Debug, Clone)]
pub enum ControlMessage {
    /// Drain both queues now, regardless of the periodic schedule.
    SyncNow,
    /// Clear one named cache, or all of them when `name` is `None`.
    ClearCache { name: Option<String> },
    /// Request a [`Notification::CacheSizeReport`] carrying this token.
    GetCacheSize { token: u64 },
    /// Pre-warm the caches with the given URLs.
    CacheUrls { urls: Vec<String> },
}

/// Broadcast sender shared by everything that publishes engine events.
/// Clone is cheap; all clones feed the same observers.
#[derive(Clone)]
pub struct NotificationChannel {
    tx: broadcast::Sender<Notification>,
}

impl NotificationChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Broadcast to all currently-connected observers. Publishing with no
    /// observers is not an error; the event is simply dropped.
    pub fn publish(&self, notification: Notification) {
        match self.tx.send(notification) {
            Ok(observers) => debug!(observers, "published notification"),
            Err(_) => debug!("published notification with no observers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for NotificationChannel {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
