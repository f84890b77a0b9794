//! Offline-first synchronization and caching engine.
//!
//! `garage-sync` keeps a client application usable without network
//! connectivity: writes (photo uploads, event submissions) land in durable
//! on-disk queues and are replayed once connectivity returns, while reads are
//! served from tiered, policy-driven caches.
//!
//! The moving parts, leaves first:
//!
//! - [`queue::QueueStore`]: crash-safe queues for pending uploads
//! - [`cache::CacheStore`] / [`cache::Janitor`]: named TTL caches with
//!   bounded FIFO eviction
//! - [`router::Router`]: classifies read requests and applies a cache-first
//!   or network-first fetch strategy per content class
//! - [`sync::SyncCoordinator`]: drains the queues in insertion order,
//!   stopping a pass at the first failure to preserve replay order
//! - [`notify::NotificationChannel`]: broadcasts upload outcomes to UI
//!   observers and accepts control messages from them
//! - [`engine::SyncEngine`]: composition root that wires the above together
//!   and runs the control loop
//!
//! Network access goes through the [`router::Fetcher`] and [`sync::Uploader`]
//! traits, so every component is testable with fakes.

pub mod cache;
pub mod config;
pub mod engine;
pub mod notify;
pub mod queue;
pub mod router;
pub mod sync;

pub use cache::{CacheEntry, CacheError, CacheStore, Janitor, StoredResponse};
pub use config::{CacheConfig, CachePolicies, EngineConfig, Strategy};
pub use engine::{EngineError, EngineHandle, SyncEngine};
pub use notify::{ControlMessage, Notification, NotificationChannel};
pub use queue::{QueueEntry, QueueKind, QueuePayload, QueueStore, StoreError};
pub use router::{FetchError, Fetcher, HttpFetcher, ReadRequest, RequestClass, RouteError, Router};
pub use sync::{DrainReport, HttpUploader, SyncCoordinator, UploadError, Uploader};
