// packages/tracker/src/main.rs
//! Event Tracker
//!
//! Reads one event per line from stdin and delivers it to the configured
//! collector. A line is an event name, optionally followed by a JSON object
//! of attributes:
//!
//! ```text
//! app_open
//! purchase {"amount": 9.99, "currency": "EUR"}
//! ```

use anyhow::Result;
use event_tracker::observability::{init_metrics, init_tracing};
use event_tracker::{Attributes, Tracker, TrackerConfig, VERSION};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = TrackerConfig::load()?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.logging)?;
    let metrics = init_metrics()?;

    info!("Starting event tracker v{}", VERSION);
    debug!("Configuration loaded: {:?}", config);

    let tracker = Tracker::new(&config).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => track_line(&tracker, &line),
                None => {
                    info!("Input closed, shutting down");
                    break;
                }
            },
            _ = &mut shutdown_signal => {
                info!("Received shutdown signal, cleaning up...");
                break;
            }
        }
    }

    let rejected = tracker.rejected_count();
    if rejected > 0 {
        warn!("{} events were dropped because the writer fell behind", rejected);
    }

    tracker.shutdown().await?;
    debug!("Final metrics:\n{}", metrics.render());
    Ok(())
}

fn track_line(tracker: &Tracker, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let (name, raw_attributes) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };

    if raw_attributes.is_empty() {
        tracker.track(name);
        return;
    }

    match serde_json::from_str::<Attributes>(raw_attributes) {
        Ok(attributes) => tracker.track_with(name, Some(&attributes)),
        Err(e) => {
            warn!("Ignoring attributes of {}: {}", name, e);
            tracker.track(name);
        }
    }
}
