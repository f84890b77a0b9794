use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Extension for entry metadata files
const ENTRY_EXT: &str = "json";

/// Extension for photo payload sidecar files
const BLOB_EXT: &str = "bin";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("queue entry not found: {kind}/{id}")]
    NotFound { kind: QueueKind, id: u64 },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt queue entry at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// The two durable collections. Photos and events are independent streams
/// with no cross-collection ordering guarantees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Photos,
    Events,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Photos => "photos",
            QueueKind::Events => "events",
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a queued write. Photo bytes live in a sidecar file next to the
/// entry metadata and are loaded back in by `list_pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueuePayload {
    Photo {
        filename: String,
        /// Free-form metadata forwarded verbatim with the upload
        metadata: Value,
        #[serde(skip)]
        bytes: Vec<u8>,
    },
    Event {
        record: Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Monotonically assigned per collection; insertion order is replay order.
    pub id: u64,
    pub queued_at: DateTime<Utc>,
    /// Incremented by the sync coordinator on each failed upload attempt.
    pub retry_count: u32,
    pub payload: QueuePayload,
}

/// Crash-safe on-disk queue store.
///
/// Each collection is a directory of `<id>.json` entry files (photo bytes in
/// `<id>.bin`). Entry files are written via temp-file-then-rename so a crash
/// never leaves a half-written entry visible to `list_pending`.
pub struct QueueStore {
    root: PathBuf,
    next_photo_id: Mutex<u64>,
    next_event_id: Mutex<u64>,
}

impl QueueStore {
    /// Open (or create) the queue store rooted at `root`. Id counters resume
    /// from the highest id already on disk, so restarts never reuse an id.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for kind in [QueueKind::Photos, QueueKind::Events] {
            std::fs::create_dir_all(root.join(kind.as_str()))?;
        }
        let next_photo_id = max_id(&root.join(QueueKind::Photos.as_str()))? + 1;
        let next_event_id = max_id(&root.join(QueueKind::Events.as_str()))? + 1;
        Ok(Self {
            root,
            next_photo_id: Mutex::new(next_photo_id),
            next_event_id: Mutex::new(next_event_id),
        })
    }

    pub fn enqueue_photo(
        &self,
        bytes: Vec<u8>,
        filename: impl Into<String>,
        metadata: Value,
    ) -> Result<u64, StoreError> {
        self.enqueue(
            QueueKind::Photos,
            QueuePayload::Photo {
                filename: filename.into(),
                metadata,
                bytes,
            },
        )
    }

    pub fn enqueue_event(&self, record: Value) -> Result<u64, StoreError> {
        self.enqueue(QueueKind::Events, QueuePayload::Event { record })
    }

    fn enqueue(&self, kind: QueueKind, payload: QueuePayload) -> Result<u64, StoreError> {
        // Hold the counter lock across the write so ids are assigned in the
        // same order the entry files appear.
        let mut next = self.counter(kind).lock().unwrap_or_else(|e| e.into_inner());
        let id = *next;

        let entry = QueueEntry {
            id,
            queued_at: Utc::now(),
            retry_count: 0,
            payload,
        };

        // Sidecar first: the entry only becomes visible once the .json lands.
        if let QueuePayload::Photo { ref bytes, .. } = entry.payload {
            let blob_path = self.blob_path(kind, id);
            if let Err(e) = std::fs::write(&blob_path, bytes) {
                let _ = std::fs::remove_file(&blob_path);
                return Err(e.into());
            }
        }
        if let Err(e) = write_json_atomic(&self.entry_path(kind, id), &entry) {
            let _ = std::fs::remove_file(self.blob_path(kind, id));
            return Err(e);
        }

        *next = id + 1;
        debug!(kind = %kind, id, "queued entry");
        Ok(id)
    }

    /// All pending entries of one collection, in insertion order.
    ///
    /// A corrupt entry file is logged and skipped rather than poisoning the
    /// whole list; healthy entries must stay replayable.
    pub fn list_pending(&self, kind: QueueKind) -> Result<Vec<QueueEntry>, StoreError> {
        let dir = self.kind_dir(kind);
        let mut ids: Vec<u64> = Vec::new();
        for dirent in std::fs::read_dir(&dir)? {
            let path = dirent?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXT) {
                if let Some(id) = parse_id(&path) {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load_entry(kind, id) {
                Ok(entry) => entries.push(entry),
                Err(StoreError::Corrupt { path, source }) => {
                    warn!(kind = %kind, id, path = %path.display(), error = %source,
                          "skipping corrupt queue entry");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }

    pub fn pending_count(&self, kind: QueueKind) -> Result<usize, StoreError> {
        let mut count = 0;
        for dirent in std::fs::read_dir(self.kind_dir(kind))? {
            let path = dirent?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXT) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Remove an entry. Called by the sync coordinator only after a confirmed
    /// successful upload, or when the retry ceiling is exceeded.
    pub fn remove(&self, kind: QueueKind, id: u64) -> Result<(), StoreError> {
        let path = self.entry_path(kind, id);
        if !path.exists() {
            return Err(StoreError::NotFound { kind, id });
        }
        std::fs::remove_file(&path)?;
        let blob = self.blob_path(kind, id);
        if blob.exists() {
            std::fs::remove_file(&blob)?;
        }
        debug!(kind = %kind, id, "removed entry");
        Ok(())
    }

    /// Increment an entry's retry count, returning the new value.
    pub fn increment_retry(&self, kind: QueueKind, id: u64) -> Result<u32, StoreError> {
        let mut entry = self.load_meta(kind, id)?;
        entry.retry_count += 1;
        write_json_atomic(&self.entry_path(kind, id), &entry)?;
        Ok(entry.retry_count)
    }

    fn load_entry(&self, kind: QueueKind, id: u64) -> Result<QueueEntry, StoreError> {
        let mut entry = self.load_meta(kind, id)?;
        if let QueuePayload::Photo { ref mut bytes, .. } = entry.payload {
            *bytes = std::fs::read(self.blob_path(kind, id))?;
        }
        Ok(entry)
    }

    /// Load entry metadata without the photo sidecar.
    fn load_meta(&self, kind: QueueKind, id: u64) -> Result<QueueEntry, StoreError> {
        let path = self.entry_path(kind, id);
        if !path.exists() {
            return Err(StoreError::NotFound { kind, id });
        }
        let contents = std::fs::read_to_string(&path)?;
        serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt { path, source })
    }

    fn counter(&self, kind: QueueKind) -> &Mutex<u64> {
        match kind {
            QueueKind::Photos => &self.next_photo_id,
            QueueKind::Events => &self.next_event_id,
        }
    }

    fn kind_dir(&self, kind: QueueKind) -> PathBuf {
        self.root.join(kind.as_str())
    }

    fn entry_path(&self, kind: QueueKind, id: u64) -> PathBuf {
        self.kind_dir(kind).join(format!("{}.{}", id, ENTRY_EXT))
    }

    fn blob_path(&self, kind: QueueKind, id: u64) -> PathBuf {
        self.kind_dir(kind).join(format!("{}.{}", id, BLOB_EXT))
    }
}

/// Highest entry id present in a collection directory, or 0 if empty.
fn max_id(dir: &Path) -> Result<u64, StoreError> {
    let mut max = 0;
    for dirent in std::fs::read_dir(dir)? {
        let path = dirent?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXT) {
            if let Some(id) = parse_id(&path) {
                max = max.max(id);
            }
        }
    }
    Ok(max)
}

fn parse_id(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.parse().ok()
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    let contents = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
