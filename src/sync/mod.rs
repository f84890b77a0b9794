//! Background replay of the durable queues.
//!
//! The `SyncCoordinator` drains each collection (photos, events) in strict
//! insertion order when connectivity is available or on explicit trigger.
//! A pass stops at the first failed upload so a later entry never lands
//! before an earlier one; entries that keep failing past the retry ceiling
//! are dropped and reported, never retried forever.
//!
//! Uploads go through the `Uploader` trait; production uses the
//! reqwest-backed `HttpUploader`.

pub mod coordinator;
pub mod uploader;

pub use coordinator::{DrainReport, SyncCoordinator};
pub use uploader::{HttpUploader, UploadError, Uploader};
