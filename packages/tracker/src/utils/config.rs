// packages/tracker/src/utils/config.rs
//! Tracker configuration
//!
//! Loaded from an optional `tracker.{toml,yaml,json}` file followed by
//! `TRACKER__*` environment variables (e.g. `TRACKER__FLUSH_THRESHOLD=5`,
//! `TRACKER__APP__APP_ID=com.example`). Missing keys fall back to defaults.

use crate::utils::errors::{Result, TrackerError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default configuration file stem, resolved relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "tracker";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TRACKER";

/// Top-level tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Collector base URI
    pub endpoint: String,

    /// Path replacing the endpoint's own path, if set
    pub mount_path: Option<String>,

    /// Maximum number of buffered records
    pub max_length: usize,

    /// Queue length that triggers an immediate flush after an append
    pub flush_threshold: usize,

    /// Maximum number of records per upload
    pub upload_limit: usize,

    /// Periodic flush interval (seconds)
    pub flush_interval_secs: u64,

    /// Upper bound on a single upload round trip (seconds)
    pub upload_timeout_secs: u64,

    /// Capacity of the writer's command inbox
    pub worker_queue_capacity: usize,

    /// Directory holding the snapshot and device id files
    pub data_dir: PathBuf,

    /// Snapshot file name inside `data_dir`
    pub snapshot_file: String,

    /// Application identity reported with every event
    pub app: AppInfo,

    /// Logging options
    pub logging: LogConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:3000".to_string(),
            mount_path: None,
            max_length: 1000,
            flush_threshold: 10,
            upload_limit: 20,
            flush_interval_secs: 30,
            upload_timeout_secs: 30,
            worker_queue_capacity: 10_000,
            data_dir: PathBuf::from("./.event-tracker"),
            snapshot_file: "event_tracking.json".to_string(),
            app: AppInfo::default(),
            logging: LogConfig::default(),
        }
    }
}

/// Application identity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppInfo {
    pub app_id: Option<String>,
    pub app_version: Option<String>,
    pub app_build_number: Option<String>,

    /// Stable device identifier; generated and stored in `data_dir` when unset
    pub device_id: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from the default file and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from `file` (extension optional) and the environment
    pub fn load_from(file: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: TrackerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the writer cannot operate with
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_length", self.max_length as u64),
            ("flush_threshold", self.flush_threshold as u64),
            ("upload_limit", self.upload_limit as u64),
            ("flush_interval_secs", self.flush_interval_secs),
            ("upload_timeout_secs", self.upload_timeout_secs),
            ("worker_queue_capacity", self.worker_queue_capacity as u64),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(TrackerError::Config(format!("{} must be greater than zero", key)));
            }
        }

        if self.snapshot_file.is_empty() {
            return Err(TrackerError::Config("snapshot_file must not be empty".to_string()));
        }

        crate::recording::uploader::Endpoint::derive(&self.endpoint, self.mount_path.as_deref())?;

        Ok(())
    }

    /// Full path of the snapshot file
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}
