// packages/tracker/src/utils/mod.rs
//! Common utilities shared by the tracker components
//!
//! - **config**: Layered configuration (file + environment)
//! - **errors**: Error taxonomy and `Result` alias

pub mod config;
pub mod errors;

pub use config::{AppInfo, LogConfig, TrackerConfig};
pub use errors::{Result, TrackerError};
