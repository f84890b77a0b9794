use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::notify::{Notification, NotificationChannel};
use crate::queue::{QueueEntry, QueueKind, QueuePayload, QueueStore, StoreError};
use crate::sync::uploader::{UploadError, Uploader};

/// Outcome of one drain pass over one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries uploaded and removed this pass.
    pub uploaded: usize,
    /// Entries dropped for exceeding the retry ceiling.
    pub failed_permanently: usize,
    /// Whether the pass stopped at a failed entry, leaving later entries
    /// untouched for a future pass.
    pub stopped_early: bool,
}

impl DrainReport {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Replays the durable queues against the upload endpoints.
///
/// Drains of the same collection are serialized by a per-collection mutex to
/// preserve replay order; the two collections drain independently and may
/// proceed concurrently. The coordinator is the sole writer of `retry_count`
/// and the sole remover of queue entries.
pub struct SyncCoordinator {
    queue: Arc<QueueStore>,
    uploader: Arc<dyn Uploader>,
    notifier: NotificationChannel,
    /// Attempts beyond this count drop the entry as permanently failed.
    max_retries: u32,
    photo_pass: Mutex<()>,
    event_pass: Mutex<()>,
}

impl SyncCoordinator {
    pub fn new(
        queue: Arc<QueueStore>,
        uploader: Arc<dyn Uploader>,
        notifier: NotificationChannel,
        max_retries: u32,
    ) -> Self {
        Self {
            queue,
            uploader,
            notifier,
            max_retries,
            photo_pass: Mutex::new(()),
            event_pass: Mutex::new(()),
        }
    }

    /// Drain both collections concurrently. Store failures are logged; a
    /// broken store must not take down the engine loop.
    pub async fn drain_all(&self) {
        let (photos, events) = tokio::join!(
            self.drain(QueueKind::Photos),
            self.drain(QueueKind::Events)
        );
        for (kind, result) in [(QueueKind::Photos, photos), (QueueKind::Events, events)] {
            if let Err(e) = result {
                error!(kind = %kind, error = %e, "drain pass failed");
            }
        }
    }

    /// One drain pass: replay pending entries in insertion order, stopping at
    /// the first failure so entry N+1 never lands before entry N.
    pub async fn drain(&self, kind: QueueKind) -> Result<DrainReport, StoreError> {
        let _pass = self.pass_lock(kind).lock().await;

        let pending = self.queue.list_pending(kind)?;
        let mut report = DrainReport::default();

        for entry in &pending {
            match self.upload(entry).await {
                Ok(response) => {
                    // Remove before moving on: a crash between the upload and
                    // this remove re-sends the entry next pass (accepted
                    // at-least-once delivery; the endpoint de-duplicates).
                    self.queue.remove(kind, entry.id)?;
                    report.uploaded += 1;
                    self.notifier.publish(uploaded_notification(kind, entry.id, response));
                }
                Err(e) => {
                    let retries = self.queue.increment_retry(kind, entry.id)?;
                    warn!(kind = %kind, id = entry.id, retries, error = %e, "upload failed");

                    if retries > self.max_retries {
                        // Unbounded retry of a payload the server keeps
                        // rejecting would starve the queue behind it.
                        self.queue.remove(kind, entry.id)?;
                        report.failed_permanently += 1;
                        error!(kind = %kind, id = entry.id, retries, "entry dropped as permanently failed");
                        self.notifier.publish(Notification::UploadFailedPermanently {
                            kind,
                            id: entry.id,
                        });
                    }
                    report.stopped_early = true;
                    break;
                }
            }
        }

        if !report.is_empty() {
            info!(
                kind = %kind,
                uploaded = report.uploaded,
                dropped = report.failed_permanently,
                stopped_early = report.stopped_early,
                "drain pass complete"
            );
            self.notifier.publish(Notification::SyncCompleted { kind, report });
        }
        Ok(report)
    }

    async fn upload(&self, entry: &QueueEntry) -> Result<String, UploadError> {
        match &entry.payload {
            QueuePayload::Photo {
                filename,
                metadata,
                bytes,
            } => self.uploader.upload_photo(bytes, filename, metadata).await,
            QueuePayload::Event { record } => self.uploader.upload_event(record).await,
        }
    }

    fn pass_lock(&self, kind: QueueKind) -> &Mutex<()> {
        match kind {
            QueueKind::Photos => &self.photo_pass,
            QueueKind::Events => &self.event_pass,
        }
    }
}

fn uploaded_notification(kind: QueueKind, id: u64, response: String) -> Notification {
    match kind {
        QueueKind::Photos => Notification::PhotoUploaded { id, response },
        QueueKind::Events => Notification::EventUploaded { id, response },
    }
}

// ============================================================================
// Tests
// ============================================================================
