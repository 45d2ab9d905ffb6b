// packages/tracker/src/tracker.rs
//! Public tracking API
//!
//! `Tracker::track` assembles an [`EventRecord`] from sanitized user
//! attributes, the environment attributes and the reserved system fields,
//! then hands it to the writer. It never blocks and never fails.

use crate::environment;
use crate::recording::event::{
    AttributeValue, EventRecord, EVENT_RAW_KEY, TRACKED_AT_KEY, USER_ID_KEY,
};
use crate::recording::storage::SnapshotStore;
use crate::recording::uploader::{Endpoint, HttpUploader, Uploader};
use crate::recording::writer::{FlushOutcome, WriterConfig, WriterHandle, WriterStats};
use crate::utils::config::TrackerConfig;
use crate::utils::errors::Result;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{info, trace};

/// User-supplied attributes, as arbitrary JSON values
pub type Attributes = serde_json::Map<String, Value>;

/// Event tracker
pub struct Tracker {
    endpoint: Endpoint,
    environment: EventRecord,
    user_id: RwLock<Option<String>>,
    writer: WriterHandle,
}

impl Tracker {
    /// Create a tracker delivering to the configured HTTP endpoint
    pub async fn new(config: &TrackerConfig) -> Result<Self> {
        let endpoint = Endpoint::derive(&config.endpoint, config.mount_path.as_deref())?;
        let uploader = HttpUploader::new(endpoint.clone());
        Self::with_uploader(config, endpoint, uploader).await
    }

    /// Create a tracker with a custom uploader
    pub async fn with_uploader<U: Uploader>(
        config: &TrackerConfig,
        endpoint: Endpoint,
        uploader: U,
    ) -> Result<Self> {
        config.validate()?;

        let store = SnapshotStore::new(config.snapshot_path()).await?;
        let environment = environment::collect(config).await;
        let writer = WriterHandle::spawn(WriterConfig::from(config), store, uploader);

        info!("Event tracker ready, delivering to {}", endpoint);

        Ok(Self {
            endpoint,
            environment,
            user_id: RwLock::new(None),
            writer,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Track an event without custom attributes
    pub fn track(&self, event_name: &str) {
        self.track_with(event_name, None);
    }

    /// Track an event with custom attributes
    ///
    /// Attributes other than booleans, numbers and strings are dropped.
    /// Reserved and environment attributes take precedence over custom ones
    /// with the same name.
    pub fn track_with(&self, event_name: &str, attributes: Option<&Attributes>) {
        let record = self.build_record(event_name, attributes);
        trace!("Tracking {} ({} attributes)", event_name, record.len());
        self.writer.write(record);
    }

    /// Set or clear the identifier reported as `_user_id`
    pub fn set_user_id(&self, user_id: Option<String>) {
        *self.user_id.write() = user_id;
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }

    /// Flush once every previously tracked event has been queued
    pub async fn flush(&self) -> Result<FlushOutcome> {
        self.writer.flush().await
    }

    pub async fn stats(&self) -> Result<WriterStats> {
        self.writer.stats().await
    }

    /// Events dropped because the writer could not keep up
    pub fn rejected_count(&self) -> u64 {
        self.writer.rejected_count()
    }

    /// Attempt a final delivery, persist, and stop the writer
    pub async fn shutdown(self) -> Result<()> {
        self.writer.shutdown().await
    }

    fn build_record(&self, event_name: &str, attributes: Option<&Attributes>) -> EventRecord {
        let mut record = attributes.map(sanitize_attributes).unwrap_or_default();

        record.extend(
            self.environment
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );

        record.insert(EVENT_RAW_KEY, event_name);
        if let Some(user_id) = self.user_id() {
            record.insert(USER_ID_KEY, user_id);
        }
        record.insert(TRACKED_AT_KEY, AttributeValue::timestamp(Utc::now()));

        record
    }
}

/// Keep only boolean, numeric and string attributes
pub fn sanitize_attributes(attributes: &Attributes) -> EventRecord {
    attributes
        .iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::Bool(b) => AttributeValue::Bool(*b),
                Value::Number(n) => AttributeValue::Number(n.as_f64()?),
                Value::String(s) => AttributeValue::String(s.clone()),
                Value::Null | Value::Array(_) | Value::Object(_) => return None,
            };
            Some((key.clone(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::serializer;
    use crate::recording::uploader::UploadReceipt;
    use crate::utils::config::AppInfo;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::future::Future;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    #[derive(Clone, Default)]
    struct CapturingUploader {
        bodies: Arc<Mutex<Vec<Bytes>>>,
    }

    impl Uploader for CapturingUploader {
        fn upload(&self, body: Bytes) -> impl Future<Output = Result<UploadReceipt>> + Send {
            let bodies = Arc::clone(&self.bodies);
            async move {
                bodies.lock().push(body);
                Ok(UploadReceipt {
                    status: 200,
                    response_bytes: 0,
                })
            }
        }
    }

    fn attributes(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    async fn test_tracker() -> (TempDir, Tracker, CapturingUploader) {
        let dir = tempdir().unwrap();
        let config = TrackerConfig {
            data_dir: dir.path().to_path_buf(),
            flush_interval_secs: 3600,
            app: AppInfo {
                app_id: Some("com.example.app".into()),
                device_id: Some("device-1".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let endpoint = Endpoint::derive(&config.endpoint, Some("/event_tracking")).unwrap();
        let uploader = CapturingUploader::default();
        let tracker = Tracker::with_uploader(&config, endpoint, uploader.clone())
            .await
            .unwrap();
        (dir, tracker, uploader)
    }

    #[test]
    fn test_sanitize_attributes() {
        let sanitized = sanitize_attributes(&attributes(json!({
            "plan": "pro",
            "seats": 3,
            "ratio": 0.5,
            "trial": false,
            "nothing": null,
            "tags": ["a"],
            "nested": {"k": "v"}
        })));

        assert_eq!(sanitized.len(), 4);
        assert_eq!(sanitized.get("plan"), Some(&AttributeValue::String("pro".into())));
        assert_eq!(sanitized.get("seats"), Some(&AttributeValue::Number(3.0)));
        assert_eq!(sanitized.get("ratio"), Some(&AttributeValue::Number(0.5)));
        assert_eq!(sanitized.get("trial"), Some(&AttributeValue::Bool(false)));
    }

    #[tokio::test]
    async fn test_record_assembly() {
        let (_dir, tracker, _uploader) = test_tracker().await;

        let record = tracker.build_record(
            "purchase",
            Some(&attributes(json!({
                "amount": 9.99,
                "_event_raw": "spoofed",
                "_app_id": "spoofed"
            }))),
        );

        assert_eq!(record.event_name(), Some("purchase"));
        assert_eq!(record.get("amount"), Some(&AttributeValue::Number(9.99)));
        assert_eq!(
            record.get("_app_id").and_then(AttributeValue::as_str),
            Some("com.example.app")
        );
        assert!(!record.contains_key(USER_ID_KEY));
        assert!(record.get(TRACKED_AT_KEY).and_then(AttributeValue::as_timestamp).is_some());

        tracker.set_user_id(Some("user-42".into()));
        let record = tracker.build_record("login", None);
        assert_eq!(record.get(USER_ID_KEY).and_then(AttributeValue::as_str), Some("user-42"));

        tracker.set_user_id(None);
        assert!(!tracker.build_record("logout", None).contains_key(USER_ID_KEY));
    }

    #[tokio::test]
    async fn test_track_and_flush() {
        let (_dir, tracker, uploader) = test_tracker().await;
        assert_eq!(tracker.endpoint().uri().path(), "/event_tracking");

        tracker.track("app_open");
        tracker.track_with("search", Some(&attributes(json!({"query": "shoes"}))));

        assert_eq!(tracker.flush().await.unwrap(), FlushOutcome::Delivered(2));

        let body = uploader.bodies.lock()[0].clone();
        let records = serializer::decode_batch(&body).unwrap();
        let names: Vec<_> = records.iter().filter_map(EventRecord::event_name).collect();
        assert_eq!(names, vec!["app_open", "search"]);
        assert_eq!(records[1].get("query").and_then(AttributeValue::as_str), Some("shoes"));

        tracker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_events_survive_restart() {
        let dir = tempdir().unwrap();
        let config = TrackerConfig {
            data_dir: dir.path().to_path_buf(),
            flush_interval_secs: 3600,
            ..Default::default()
        };
        let endpoint = Endpoint::derive(&config.endpoint, None).unwrap();

        #[derive(Clone)]
        struct Offline;

        impl Uploader for Offline {
            fn upload(&self, _body: Bytes) -> impl Future<Output = Result<UploadReceipt>> + Send {
                async { Err(crate::utils::errors::TrackerError::UploadFailed("offline".into())) }
            }
        }

        let tracker = Tracker::with_uploader(&config, endpoint.clone(), Offline).await.unwrap();
        tracker.track("first");
        tracker.track("second");
        tracker.shutdown().await.unwrap();

        // Restarted process: the startup flush delivers what was buffered
        let uploader = CapturingUploader::default();
        let tracker = Tracker::with_uploader(&config, endpoint, uploader.clone()).await.unwrap();
        let stats = tracker.stats().await.unwrap();
        assert_eq!(stats.queue.current_size, 0);

        let records = serializer::decode_batch(&uploader.bodies.lock()[0]).unwrap();
        let names: Vec<_> = records.iter().filter_map(EventRecord::event_name).collect();
        assert_eq!(names, vec!["first", "second"]);

        tracker.shutdown().await.unwrap();
    }
}
