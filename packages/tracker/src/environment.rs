// packages/tracker/src/environment.rs
//! Environment attributes attached to every event
//!
//! Collected once when the tracker starts. Unknown values are omitted
//! rather than sent as empty strings.

use crate::recording::event::EventRecord;
use crate::utils::config::TrackerConfig;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};
use ulid::Ulid;

/// File inside the data directory holding the generated device id
pub const DEVICE_ID_FILE: &str = "device_id";

/// Collect the fixed environment attributes for this process
pub async fn collect(config: &TrackerConfig) -> EventRecord {
    let mut attributes = EventRecord::new();
    let app = &config.app;

    insert_opt(&mut attributes, "_app_id", app.app_id.clone());
    insert_opt(&mut attributes, "_app_version", app.app_version.clone());
    insert_opt(&mut attributes, "_app_build_number", app.app_build_number.clone());

    let device_id = match &app.device_id {
        Some(id) => id.clone(),
        None => load_or_create_device_id(&config.data_dir).await,
    };
    attributes.insert("_device_id", device_id);
    attributes.insert("_device_os", std::env::consts::OS);
    attributes.insert("_device_arch", std::env::consts::ARCH);

    let locales = device_locales(|key| std::env::var(key).ok());
    if !locales.is_empty() {
        attributes.insert("_device_locales", locales.join(","));
        attributes.insert("_device_locale", locales[0].clone());
    }

    insert_opt(
        &mut attributes,
        "_device_timezone",
        std::env::var("TZ").ok().filter(|tz| !tz.is_empty()),
    );

    debug!("Collected {} environment attributes", attributes.len());
    attributes
}

fn insert_opt(attributes: &mut EventRecord, key: &str, value: Option<String>) {
    if let Some(value) = value {
        attributes.insert(key, value);
    }
}

/// Read the persisted device id, generating and storing one on first use
async fn load_or_create_device_id(data_dir: &Path) -> String {
    let path = data_dir.join(DEVICE_ID_FILE);

    if let Ok(existing) = fs::read_to_string(&path).await {
        let existing = existing.trim();
        if !existing.is_empty() {
            return existing.to_string();
        }
    }

    let id = Ulid::new().to_string();
    let result = match fs::create_dir_all(data_dir).await {
        Ok(()) => fs::write(&path, &id).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!("Failed to store device id at {:?}: {}", path, e);
    }
    id
}

/// Preferred locales as BCP 47 tags, most preferred first
///
/// Follows the POSIX lookup order: `LANGUAGE` (a colon-separated list),
/// then `LC_ALL`, `LC_MESSAGES`, `LANG`.
pub fn device_locales(lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    let mut tags = Vec::new();

    if let Some(language) = lookup("LANGUAGE") {
        tags.extend(language.split(':').filter_map(to_language_tag));
    }

    if tags.is_empty() {
        if let Some(tag) = ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|key| lookup(key))
            .find_map(|value| to_language_tag(&value))
        {
            tags.push(tag);
        }
    }

    tags.dedup();
    tags
}

/// Convert a POSIX locale name (`en_US.UTF-8@euro`) to a BCP 47 tag (`en-US`)
pub fn to_language_tag(posix: &str) -> Option<String> {
    let base = posix.split(|c: char| c == '.' || c == '@').next().unwrap_or_default().trim();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return None;
    }

    let mut parts = base.split(|c: char| c == '_' || c == '-');
    let language = parts.next()?.to_ascii_lowercase();
    if !(2..=8).contains(&language.len()) || !language.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    match parts.next() {
        Some(region) if is_region(region) => {
            Some(format!("{}-{}", language, region.to_ascii_uppercase()))
        }
        _ => Some(language),
    }
}

fn is_region(region: &str) -> bool {
    (region.len() == 2 && region.chars().all(|c| c.is_ascii_alphabetic()))
        || (region.len() == 3 && region.chars().all(|c| c.is_ascii_digit()))
}
