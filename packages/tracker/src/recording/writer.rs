// packages/tracker/src/recording/writer.rs
//! Single-owner writer task
//!
//! The writer owns the queue, the snapshot store and the uploader. Producers
//! and the periodic timer only submit [`Command`]s; the writer applies them
//! one at a time in submission order, so queue and snapshot are never
//! mutated concurrently and at most one upload is in flight.
//!
//! ```text
//! track() ──┐
//!           ├─> inbox (bounded) ──> Writer: append → evict → persist → flush?
//! timer ────┘                               flush: peek → encode → upload → remove → persist
//! ```

use crate::recording::event::EventRecord;
use crate::recording::event_queue::{EventQueue, QueueStats};
use crate::recording::serializer;
use crate::recording::storage::SnapshotStore;
use crate::recording::uploader::Uploader;
use crate::utils::config::TrackerConfig;
use crate::utils::errors::{Result, TrackerError};
use bytes::Bytes;
use metrics::{counter, gauge, histogram};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Writer configuration
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum number of buffered records
    pub max_length: usize,

    /// Queue length that triggers a flush right after an append
    pub flush_threshold: usize,

    /// Maximum records per upload
    pub upload_limit: usize,

    /// Periodic flush interval
    pub flush_interval: Duration,

    /// Upper bound on one upload round trip
    pub upload_timeout: Duration,

    /// Capacity of the command inbox
    pub inbox_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_length: 1000,
            flush_threshold: 10,
            upload_limit: 20,
            flush_interval: Duration::from_secs(30),
            upload_timeout: Duration::from_secs(30),
            inbox_capacity: 10_000,
        }
    }
}

impl From<&TrackerConfig> for WriterConfig {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            max_length: config.max_length,
            flush_threshold: config.flush_threshold,
            upload_limit: config.upload_limit,
            flush_interval: config.flush_interval(),
            upload_timeout: config.upload_timeout(),
            inbox_capacity: config.worker_queue_capacity,
        }
    }
}

/// Result of one flush attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued
    Empty,

    /// This many records were delivered and removed
    Delivered(usize),

    /// Upload failed; the queue is unchanged
    Failed,
}

/// Work items processed by the writer
enum Command {
    Track(EventRecord),
    Flush {
        reply: Option<oneshot::Sender<FlushOutcome>>,
    },
    Stats(oneshot::Sender<WriterStats>),
    Shutdown(oneshot::Sender<()>),
}

/// Writer statistics
#[derive(Debug, Clone, Default)]
pub struct WriterStats {
    pub queue: QueueStats,
    pub flushes_attempted: u64,
    pub uploads_succeeded: u64,
    pub uploads_failed: u64,

    /// Failed uploads since the last success
    pub consecutive_failures: u64,

    pub persist_failures: u64,
}

struct Writer<U> {
    config: WriterConfig,
    queue: EventQueue,
    store: SnapshotStore,
    uploader: U,
    stats: WriterStats,
}

impl<U: Uploader> Writer<U> {
    fn new(config: WriterConfig, store: SnapshotStore, uploader: U) -> Self {
        let queue = EventQueue::new(config.max_length);
        Self {
            config,
            queue,
            store,
            uploader,
            stats: WriterStats::default(),
        }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Command>) {
        self.startup().await;

        while let Some(command) = inbox.recv().await {
            match command {
                Command::Track(record) => self.track(record).await,
                Command::Flush { reply } => {
                    let outcome = self.flush().await;
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                }
                Command::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
                Command::Shutdown(reply) => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    return;
                }
            }
        }

        debug!("Writer inbox closed with {} events pending", self.queue.len());
    }

    /// Restore, trim to capacity, and try to deliver what survived a restart
    async fn startup(&mut self) {
        match self.store.restore(self.config.max_length).await {
            Ok(queue) => self.queue = queue,
            Err(e) => error!("Discarding unreadable snapshot: {}", e),
        }

        let evicted = self.queue.evict_overflow();
        if evicted > 0 {
            counter!("tracker_events_evicted_total").increment(evicted as u64);
        }
        gauge!("tracker_queue_length").set(self.queue.len() as f64);

        if !self.queue.is_empty() {
            self.flush().await;
        }
    }

    async fn track(&mut self, record: EventRecord) {
        let evicted = self.queue.append(record);
        counter!("tracker_events_tracked_total").increment(1);
        if evicted > 0 {
            counter!("tracker_events_evicted_total").increment(evicted as u64);
        }
        trace!("Queued event ({} pending)", self.queue.len());

        self.persist().await;

        if self.queue.len() >= self.config.flush_threshold {
            self.flush().await;
        }
    }

    /// Upload the oldest batch; remove it only once delivered
    async fn flush(&mut self) -> FlushOutcome {
        let batch = self.queue.peek_batch(self.config.upload_limit);
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }
        self.stats.flushes_attempted += 1;

        let body = match serializer::encode_batch(&batch) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                error!("Failed to encode batch of {} events: {}", batch.len(), e);
                return FlushOutcome::Failed;
            }
        };

        let started = Instant::now();
        let timeout = self.config.upload_timeout;
        let result = match tokio::time::timeout(timeout, self.uploader.upload(body)).await {
            Ok(result) => result,
            Err(_) => Err(TrackerError::UploadTimeout(timeout)),
        };
        histogram!("tracker_upload_duration_seconds").record(started.elapsed().as_secs_f64());

        match result {
            Ok(receipt) => {
                let delivered = self.queue.remove_front(batch.len());
                self.stats.uploads_succeeded += 1;
                self.stats.consecutive_failures = 0;
                counter!("tracker_uploads_succeeded_total").increment(1);
                counter!("tracker_events_delivered_total").increment(delivered as u64);
                debug!(
                    "Delivered {} events (status {}, {} pending)",
                    delivered,
                    receipt.status,
                    self.queue.len()
                );

                self.persist().await;
                FlushOutcome::Delivered(delivered)
            }
            Err(e) => {
                self.stats.uploads_failed += 1;
                self.stats.consecutive_failures += 1;
                counter!("tracker_uploads_failed_total").increment(1);
                warn!(
                    "Upload of {} events failed ({} in a row): {}",
                    batch.len(),
                    self.stats.consecutive_failures,
                    e
                );
                FlushOutcome::Failed
            }
        }
    }

    async fn persist(&mut self) {
        gauge!("tracker_queue_length").set(self.queue.len() as f64);
        if let Err(e) = self.store.persist(&self.queue).await {
            self.stats.persist_failures += 1;
            counter!("tracker_persist_failures_total").increment(1);
            error!("Failed to persist snapshot: {}", e);
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down writer with {} events pending", self.queue.len());
        if let FlushOutcome::Failed = self.flush().await {
            warn!("Final flush failed; events remain in the snapshot");
        }
        self.persist().await;
    }

    fn stats(&self) -> WriterStats {
        WriterStats {
            queue: self.queue.stats(),
            ..self.stats.clone()
        }
    }
}

/// Producer-side handle to a running writer
pub struct WriterHandle {
    inbox: mpsc::Sender<Command>,
    rejected: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

impl WriterHandle {
    /// Spawn the writer and its flush timer on the current tokio runtime
    pub fn spawn<U: Uploader>(config: WriterConfig, store: SnapshotStore, uploader: U) -> Self {
        info!(
            "Starting writer (max_length={}, flush_threshold={}, upload_limit={}, interval={:?})",
            config.max_length, config.flush_threshold, config.upload_limit, config.flush_interval
        );

        let (tx, rx) = mpsc::channel(config.inbox_capacity);
        let timer = spawn_timer(tx.clone(), config.flush_interval);
        let writer = Writer::new(config, store, uploader);
        let worker = tokio::spawn(writer.run(rx));

        Self {
            inbox: tx,
            rejected: Arc::new(AtomicU64::new(0)),
            worker: Some(worker),
            timer: Some(timer),
        }
    }

    /// Submit a record without waiting
    ///
    /// Never blocks and never fails; when the inbox is full the record is
    /// dropped and counted.
    pub fn write(&self, record: EventRecord) {
        match self.inbox.try_send(Command::Track(record)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                counter!("tracker_events_rejected_total").increment(1);
                warn!("Writer inbox full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Writer stopped, dropping event");
            }
        }
    }

    /// Ask for a flush without waiting for its outcome
    pub fn request_flush(&self) {
        if let Err(e) = self.inbox.try_send(Command::Flush { reply: None }) {
            debug!("Flush request not queued: {}", e);
        }
    }

    /// Flush after every previously submitted record has been applied
    pub async fn flush(&self) -> Result<FlushOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.send(Command::Flush { reply: Some(reply) }).await?;
        outcome.await.map_err(|_| TrackerError::WorkerClosed)
    }

    /// Snapshot of the writer's statistics
    pub async fn stats(&self) -> Result<WriterStats> {
        let (reply, stats) = oneshot::channel();
        self.send(Command::Stats(reply)).await?;
        stats.await.map_err(|_| TrackerError::WorkerClosed)
    }

    /// Records dropped because the inbox was full
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Stop the timer, apply pending commands, attempt a final flush and
    /// persist, then wait for the writer to exit
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }

        let (reply, done) = oneshot::channel();
        self.send(Command::Shutdown(reply)).await?;
        done.await.map_err(|_| TrackerError::WorkerClosed)?;

        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                error!("Writer task ended abnormally: {}", e);
            }
        }

        Ok(())
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.inbox
            .send(command)
            .await
            .map_err(|_| TrackerError::WorkerClosed)
    }
}

impl Drop for WriterHandle {
    fn drop(&mut self) {
        // The timer holds an inbox sender; stop it so the writer sees the
        // inbox close once the handle is gone.
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Periodically submit flush requests; never touches writer state
fn spawn_timer(inbox: mpsc::Sender<Command>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            match inbox.try_send(Command::Flush { reply: None }) {
                Ok(()) => trace!("Periodic flush requested"),
                Err(TrySendError::Full(_)) => debug!("Writer inbox full, skipping periodic flush"),
                Err(TrySendError::Closed(_)) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::uploader::UploadReceipt;
    use parking_lot::Mutex;
    use std::future::Future;
    use std::sync::atomic::AtomicBool;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::Notify;

    /// Records every body; fails while `fail` is set
    #[derive(Clone, Default)]
    struct MockUploader {
        bodies: Arc<Mutex<Vec<Bytes>>>,
        fail: Arc<AtomicBool>,
    }

    impl MockUploader {
        fn calls(&self) -> usize {
            self.bodies.lock().len()
        }

        fn batches(&self) -> Vec<Vec<EventRecord>> {
            self.bodies
                .lock()
                .iter()
                .map(|body| serializer::decode_batch(body).unwrap())
                .collect()
        }

        fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }
    }

    impl Uploader for MockUploader {
        fn upload(&self, body: Bytes) -> impl Future<Output = Result<UploadReceipt>> + Send {
            let bodies = Arc::clone(&self.bodies);
            let fail = self.fail.load(Ordering::SeqCst);
            async move {
                bodies.lock().push(body);
                if fail {
                    Err(TrackerError::UploadFailed("simulated transport failure".into()))
                } else {
                    Ok(UploadReceipt {
                        status: 200,
                        response_bytes: 0,
                    })
                }
            }
        }
    }

    /// Blocks every upload until released
    #[derive(Clone, Default)]
    struct GatedUploader {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    impl Uploader for GatedUploader {
        fn upload(&self, _body: Bytes) -> impl Future<Output = Result<UploadReceipt>> + Send {
            let entered = Arc::clone(&self.entered);
            let release = Arc::clone(&self.release);
            async move {
                entered.notify_one();
                release.notified().await;
                Ok(UploadReceipt {
                    status: 200,
                    response_bytes: 0,
                })
            }
        }
    }

    fn create_test_event(id: &str) -> EventRecord {
        EventRecord::new().with("id", id)
    }

    fn ids(records: &[EventRecord]) -> Vec<String> {
        records
            .iter()
            .filter_map(|r| r.get("id").and_then(|v| v.as_str()).map(str::to_string))
            .collect()
    }

    fn test_config() -> WriterConfig {
        WriterConfig {
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        }
    }

    async fn test_store() -> (TempDir, SnapshotStore) {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot.json")).await.unwrap();
        (dir, store)
    }

    async fn writer_with(ids: &[&str], config: WriterConfig) -> (TempDir, Writer<MockUploader>, MockUploader) {
        let (dir, store) = test_store().await;
        let uploader = MockUploader::default();
        let mut writer = Writer::new(config, store, uploader.clone());
        for id in ids {
            writer.queue.append(create_test_event(id));
        }
        (dir, writer, uploader)
    }

    #[tokio::test]
    async fn test_successful_flush_removes_exact_prefix() {
        let config = WriterConfig {
            upload_limit: 3,
            ..test_config()
        };
        let (_dir, mut writer, uploader) = writer_with(&["a", "b", "c", "d", "e"], config).await;

        assert_eq!(writer.flush().await, FlushOutcome::Delivered(3));

        let remaining: Vec<_> = writer.queue.iter().cloned().collect();
        assert_eq!(ids(&remaining), vec!["d", "e"]);
        assert_eq!(ids(&uploader.batches()[0]), vec!["a", "b", "c"]);

        // Removal is persisted
        let restored = writer.store.restore(10).await.unwrap();
        assert_eq!(restored.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_flush_leaves_queue_unchanged() {
        let config = WriterConfig {
            upload_limit: 3,
            ..test_config()
        };
        let (_dir, mut writer, uploader) = writer_with(&["a", "b", "c", "d", "e"], config).await;
        uploader.set_failing(true);

        let before: Vec<_> = writer.queue.iter().cloned().collect();
        assert_eq!(writer.flush().await, FlushOutcome::Failed);
        let after: Vec<_> = writer.queue.iter().cloned().collect();
        assert_eq!(before, after);
        assert_eq!(writer.stats.consecutive_failures, 1);

        // The same records are retried on the next flush
        uploader.set_failing(false);
        assert_eq!(writer.flush().await, FlushOutcome::Delivered(3));
        let batches = uploader.batches();
        assert_eq!(batches[0], batches[1]);
        assert_eq!(writer.stats.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_flush_empty_is_noop() {
        let (_dir, mut writer, uploader) = writer_with(&[], test_config()).await;
        assert_eq!(writer.flush().await, FlushOutcome::Empty);
        assert_eq!(uploader.calls(), 0);
    }

    #[tokio::test]
    async fn test_upload_timeout_is_failure() {
        #[derive(Clone)]
        struct HangingUploader;

        impl Uploader for HangingUploader {
            fn upload(&self, _body: Bytes) -> impl Future<Output = Result<UploadReceipt>> + Send {
                async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(UploadReceipt {
                        status: 200,
                        response_bytes: 0,
                    })
                }
            }
        }

        let (_dir, store) = test_store().await;
        let config = WriterConfig {
            upload_timeout: Duration::from_millis(50),
            ..test_config()
        };
        let mut writer = Writer::new(config, store, HangingUploader);
        writer.queue.append(create_test_event("a"));

        assert_eq!(writer.flush().await, FlushOutcome::Failed);
        assert_eq!(writer.queue.len(), 1);
        assert_eq!(writer.stats.uploads_failed, 1);
    }

    #[tokio::test]
    async fn test_threshold_triggers_flush_before_next_command() {
        let (_dir, store) = test_store().await;
        let uploader = MockUploader::default();
        let handle = WriterHandle::spawn(test_config(), store, uploader.clone());

        for i in 0..9 {
            handle.write(create_test_event(&i.to_string()));
        }
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.queue.current_size, 9);
        assert_eq!(uploader.calls(), 0);

        handle.write(create_test_event("9"));
        let stats = handle.stats().await.unwrap();
        assert_eq!(uploader.calls(), 1);
        assert_eq!(stats.queue.current_size, 0);
        assert_eq!(uploader.batches()[0].len(), 10);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_appends_applied_in_submission_order() {
        let (_dir, store) = test_store().await;
        let uploader = MockUploader::default();
        let handle = WriterHandle::spawn(test_config(), store, uploader.clone());

        handle.write(create_test_event("a"));
        handle.write(create_test_event("b"));
        handle.write(create_test_event("c"));
        assert_eq!(handle.flush().await.unwrap(), FlushOutcome::Delivered(3));

        assert_eq!(ids(&uploader.batches()[0]), vec!["a", "b", "c"]);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_restores_evicts_and_flushes() {
        let (dir, store) = test_store().await;
        let mut previous = EventQueue::new(100);
        for id in ["a", "b", "c", "d", "e"] {
            previous.append(create_test_event(id));
        }
        store.persist(&previous).await.unwrap();

        let uploader = MockUploader::default();
        let config = WriterConfig {
            max_length: 3,
            ..test_config()
        };
        let handle = WriterHandle::spawn(config, store, uploader.clone());

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.queue.current_size, 0);
        assert_eq!(ids(&uploader.batches()[0]), vec!["c", "d", "e"]);

        handle.shutdown().await.unwrap();
        drop(dir);
    }

    #[tokio::test]
    async fn test_malformed_snapshot_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, b"garbage").unwrap();
        let store = SnapshotStore::new(&path).await.unwrap();

        let uploader = MockUploader::default();
        let handle = WriterHandle::spawn(test_config(), store, uploader.clone());

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.queue.current_size, 0);
        assert_eq!(uploader.calls(), 0);

        // The writer keeps working after the failed restore
        handle.write(create_test_event("a"));
        assert_eq!(handle.flush().await.unwrap(), FlushOutcome::Delivered(1));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_periodic_timer_requests_flush() {
        let (_dir, store) = test_store().await;
        let uploader = MockUploader::default();
        let config = WriterConfig {
            flush_interval: Duration::from_millis(50),
            ..Default::default()
        };
        let handle = WriterHandle::spawn(config, store, uploader.clone());

        handle.write(create_test_event("a"));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(uploader.calls(), 1);
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.queue.current_size, 0);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_persists_undelivered_events() {
        let (dir, store) = test_store().await;
        let uploader = MockUploader::default();
        uploader.set_failing(true);
        let handle = WriterHandle::spawn(test_config(), store, uploader.clone());

        handle.write(create_test_event("a"));
        handle.write(create_test_event("b"));
        handle.shutdown().await.unwrap();
        assert_eq!(uploader.calls(), 1);

        let store = SnapshotStore::new(dir.path().join("snapshot.json")).await.unwrap();
        let restored: Vec<_> = store.restore(10).await.unwrap().iter().cloned().collect();
        assert_eq!(ids(&restored), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_full_inbox_drops_without_blocking() {
        let (_dir, store) = test_store().await;
        let uploader = GatedUploader::default();
        let config = WriterConfig {
            flush_threshold: 1,
            inbox_capacity: 1,
            ..test_config()
        };
        let handle = WriterHandle::spawn(config, store, uploader.clone());

        // The writer is now stuck inside the first upload
        handle.write(create_test_event("a"));
        uploader.entered.notified().await;

        handle.write(create_test_event("b"));
        handle.write(create_test_event("c"));
        assert_eq!(handle.rejected_count(), 1);

        uploader.release.notify_one();
    }
}
