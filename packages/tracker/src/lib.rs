// packages/tracker/src/lib.rs
//! Event Tracker Library
//!
//! Buffers client-generated events, persists them across restarts and
//! delivers them in batches to a remote collector.
//!
//! # Architecture
//!
//! - **tracker**: Public `track` API, attribute sanitization
//! - **environment**: Environment attributes attached to every event
//! - **recording**: Queue, snapshot store, uploader and writer task
//! - **observability**: Tracing and metrics setup
//! - **utils**: Configuration and error types
//!
//! # Example
//!
//! ```rust,no_run
//! use event_tracker::{Tracker, TrackerConfig};
//!
//! # async fn run() -> event_tracker::Result<()> {
//! let config = TrackerConfig::load()?;
//! let tracker = Tracker::new(&config).await?;
//! tracker.track("app_open");
//! tracker.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod environment;
pub mod observability;
pub mod recording;
pub mod tracker;
pub mod utils;

// Re-export commonly used types
pub use recording::{AttributeValue, EventRecord, FlushOutcome};
pub use tracker::{Attributes, Tracker};
pub use utils::config::TrackerConfig;
pub use utils::errors::{Result, TrackerError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
