// packages/tracker/src/recording/mod.rs
//! Event buffering, persistence and delivery
//!
//! - **Event**: Flat attribute record and its value union
//! - **Serializer**: Tagged JSON codec shared by snapshots and uploads
//! - **Event Queue**: Bounded FIFO with oldest-first eviction
//! - **Storage**: Atomic single-file snapshot of the queue
//! - **Uploader**: One HTTP `POST` per batch
//! - **Writer**: Single task owning all of the above
//!
//! # Architecture
//!
//! ```text
//! track() → inbox → Writer ─┬─> append + evict ──> persist (tmp + rename)
//!                   ▲       │
//!         timer ────┘       └─> flush: oldest batch → encode → upload
//!                                        ↓ success
//!                                remove prefix → persist
//! ```
//!
//! Delivery is at-least-once: a batch is removed only after the collector
//! answered with a success status, and a failed batch is retried as-is on
//! the next flush.

pub mod event;
pub mod event_queue;
pub mod serializer;
pub mod storage;
pub mod uploader;
pub mod writer;

// Re-export commonly used types
pub use event::{AttributeValue, EventRecord};
pub use event_queue::{EventQueue, QueueStats};
pub use storage::SnapshotStore;
pub use uploader::{Endpoint, HttpUploader, UploadReceipt, Uploader};
pub use writer::{FlushOutcome, WriterConfig, WriterHandle, WriterStats};
