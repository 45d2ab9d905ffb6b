// packages/tracker/src/utils/errors.rs
//! Error types for the event tracker
//!
//! None of these conditions is fatal: the writer logs them and keeps
//! processing subsequent commands.

use thiserror::Error;

/// Tracker error taxonomy
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// Endpoint URI could not be parsed or uses an unsupported scheme
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Snapshot exists but could not be read or decoded
    #[error("snapshot restore failed: {0}")]
    RestoreFailed(String),

    /// Snapshot could not be written; the previous snapshot is intact
    #[error("snapshot persist failed: {0}")]
    PersistFailed(String),

    /// Batch document could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Transport-level failure during upload
    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// Upload round trip did not complete in time
    #[error("upload timed out after {0:?}")]
    UploadTimeout(std::time::Duration),

    /// Collector answered with a non-success status
    #[error("upload rejected with status {status}")]
    UploadRejected { status: u16 },

    /// Writer task is no longer running
    #[error("writer is not running")]
    WorkerClosed,
}

impl TrackerError {
    /// Whether the failed batch stays queued for the next flush
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrackerError::UploadFailed(_)
                | TrackerError::UploadTimeout(_)
                | TrackerError::UploadRejected { .. }
        )
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(e: serde_json::Error) -> Self {
        TrackerError::Serialization(e.to_string())
    }
}

impl From<config::ConfigError> for TrackerError {
    fn from(e: config::ConfigError) -> Self {
        TrackerError::Config(e.to_string())
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, TrackerError>;
