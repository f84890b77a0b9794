//! Durable queues for pending offline writes.
//!
//! This module provides the `QueueStore`, a crash-safe, on-disk store holding
//! two append-only collections: pending photo uploads and pending event
//! submissions. Entries are assigned monotonically increasing ids; insertion
//! order is the replay order.
//!
//! Enqueue failures (full disk, unwritable directory) surface to the caller
//! as `StoreError` rather than dropping data silently.

pub mod store;

pub use store::{QueueEntry, QueueKind, QueuePayload, QueueStore, StoreError};
