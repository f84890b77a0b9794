//! Named, policy-driven content caches.
//!
//! This module provides the `CacheStore`, a set of named disk caches
//! (`static`, `runtime`, `images`, `api`), each with an independent TTL and
//! max-entry bound, and the `Janitor` that enforces the entry bound with pure
//! FIFO eviction.
//!
//! The store stamps `cached_at` at write time and performs the staleness
//! check inline on `get` -- origin cache-control headers are never trusted
//! for expiry decisions, and no background sweep is needed for correctness.

pub mod janitor;
pub mod store;

pub use janitor::Janitor;
pub use store::{CacheEntry, CacheError, CacheStore, StoredResponse};
