// packages/tracker/src/recording/storage.rs
//! Durable snapshot of the event queue
//!
//! The whole queue is written as one JSON document. Writes go to a sibling
//! temporary file which is fsynced and then renamed over the live snapshot,
//! so a reader only ever sees the previous snapshot or the new one in full.

use crate::recording::event_queue::EventQueue;
use crate::recording::serializer;
use crate::utils::errors::{Result, TrackerError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Snapshot file store
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
    temp_path: PathBuf,
}

impl SnapshotStore {
    /// Create a store for `path`, creating its parent directory
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                TrackerError::PersistFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        let temp_path = temp_path_for(&path);
        Ok(Self { path, temp_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last snapshot
    ///
    /// A missing or empty file yields an empty queue. Records are not
    /// evicted here even if they exceed `max_length`.
    pub async fn restore(&self, max_length: usize) -> Result<EventQueue> {
        self.discard_stale_temp().await;

        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No snapshot at {:?}", self.path);
                return Ok(EventQueue::new(max_length));
            }
            Err(e) => {
                return Err(TrackerError::RestoreFailed(format!(
                    "Failed to read snapshot: {}",
                    e
                )))
            }
        };

        if bytes.is_empty() {
            return Ok(EventQueue::new(max_length));
        }

        let records = serializer::decode_batch(&bytes)
            .map_err(|e| TrackerError::RestoreFailed(format!("Malformed snapshot: {}", e)))?;

        info!("Restored {} events from {:?}", records.len(), self.path);
        Ok(EventQueue::with_records(records, max_length))
    }

    /// Atomically replace the snapshot with the current queue content
    pub async fn persist(&self, queue: &EventQueue) -> Result<()> {
        let bytes = serializer::encode_batch(queue.iter())?;

        if let Err(e) = self.write_temp(&bytes).await {
            self.discard_stale_temp().await;
            return Err(TrackerError::PersistFailed(format!(
                "Failed to write snapshot: {}",
                e
            )));
        }

        if let Err(e) = fs::rename(&self.temp_path, &self.path).await {
            self.discard_stale_temp().await;
            return Err(TrackerError::PersistFailed(format!(
                "Failed to replace snapshot: {}",
                e
            )));
        }

        sync_parent_dir(&self.path).await;

        debug!("Persisted {} events ({} bytes)", queue.len(), bytes.len());
        Ok(())
    }

    async fn write_temp(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(&self.temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn discard_stale_temp(&self) {
        match fs::remove_file(&self.temp_path).await {
            Ok(()) => debug!("Removed stale temporary snapshot {:?}", self.temp_path),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {:?}: {}", self.temp_path, e),
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    match path.file_name() {
        Some(name) => {
            let mut name = name.to_os_string();
            name.push(".tmp");
            path.with_file_name(name)
        }
        None => path.with_extension("tmp"),
    }
}

#[cfg(unix)]
async fn sync_parent_dir(path: &Path) {
    let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent,
        None => Path::new("."),
    };
    let result = match fs::File::open(parent).await {
        Ok(dir) => dir.sync_all().await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        debug!("Directory sync skipped for {:?}: {}", parent, e);
    }
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) {}
