// packages/tracker/src/observability/mod.rs
//! Tracing and metrics initialization
//!
//! Logs go to stderr through `tracing-subscriber`; `RUST_LOG` overrides the
//! configured level. Metrics are recorded through the `metrics` facade and
//! rendered by a Prometheus recorder.

use crate::utils::config::LogConfig;
use crate::utils::errors::{Result, TrackerError};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            TrackerError::Config(format!("invalid log level {:?}: {}", config.level, e))
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_format {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| TrackerError::Config(format!("tracing already initialized: {}", e)))
}

/// Install the global Prometheus metrics recorder
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TrackerError::Config(format!("metrics recorder: {}", e)))
}
