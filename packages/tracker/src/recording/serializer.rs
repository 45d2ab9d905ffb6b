// packages/tracker/src/recording/serializer.rs
//! Tagged JSON codec for event records
//!
//! Booleans, numbers and strings map to their JSON counterparts. Timestamps
//! become `{"$type": "date", "$date": "2024-01-31T12:00:00.000Z"}`.
//! Values that cannot be represented (non-finite numbers on encode, any
//! unknown shape on decode) are dropped from the record instead of failing
//! the whole document.

use crate::recording::event::{AttributeValue, EventRecord};
use crate::utils::errors::{Result, TrackerError};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Number, Value};
use tracing::{trace, warn};

/// Field holding the record array in snapshots and upload bodies
pub const EVENTS_FIELD: &str = "events";

const TYPE_TAG: &str = "$type";
const DATE_TAG: &str = "$date";
const DATE_TYPE: &str = "date";
const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Encode a single attribute value
pub fn encode_value(value: &AttributeValue) -> Option<Value> {
    match value {
        AttributeValue::Bool(b) => Some(Value::Bool(*b)),
        AttributeValue::Number(n) => Number::from_f64(*n).map(Value::Number),
        AttributeValue::String(s) => Some(Value::String(s.clone())),
        AttributeValue::Timestamp(t) => {
            let mut tagged = Map::with_capacity(2);
            tagged.insert(TYPE_TAG.to_string(), Value::String(DATE_TYPE.to_string()));
            tagged.insert(DATE_TAG.to_string(), Value::String(format_date(t)));
            Some(Value::Object(tagged))
        }
    }
}

/// Decode a single attribute value; `None` for unsupported shapes
pub fn decode_value(value: &Value) -> Option<AttributeValue> {
    match value {
        Value::Bool(b) => Some(AttributeValue::Bool(*b)),
        Value::Number(n) => n.as_f64().map(AttributeValue::Number),
        Value::String(s) => Some(AttributeValue::String(s.clone())),
        Value::Object(obj) => decode_tagged_date(obj).map(AttributeValue::Timestamp),
        Value::Null | Value::Array(_) => None,
    }
}

/// Encode a record as a JSON object
pub fn encode_record(record: &EventRecord) -> Map<String, Value> {
    let mut object = Map::with_capacity(record.len());
    for (key, value) in record.iter() {
        match encode_value(value) {
            Some(encoded) => {
                object.insert(key.clone(), encoded);
            }
            None => trace!("Dropping unencodable attribute {}", key),
        }
    }
    object
}

/// Decode a JSON object into a record, skipping unsupported attributes
pub fn decode_record(object: &Map<String, Value>) -> EventRecord {
    object
        .iter()
        .filter_map(|(key, value)| match decode_value(value) {
            Some(decoded) => Some((key.clone(), decoded)),
            None => {
                trace!("Dropping undecodable attribute {}", key);
                None
            }
        })
        .collect()
}

/// Build the `{"events": [...]}` document for the given records
pub fn batch_document<'a, I>(records: I) -> Value
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    let events: Vec<Value> = records
        .into_iter()
        .map(|record| Value::Object(encode_record(record)))
        .collect();

    let mut document = Map::with_capacity(1);
    document.insert(EVENTS_FIELD.to_string(), Value::Array(events));
    Value::Object(document)
}

/// Serialize records into a batch document
pub fn encode_batch<'a, I>(records: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    Ok(serde_json::to_vec(&batch_document(records))?)
}

/// Parse a batch document back into records, in document order
pub fn decode_batch(bytes: &[u8]) -> Result<Vec<EventRecord>> {
    let document: Value = serde_json::from_slice(bytes)?;

    let events = document
        .get(EVENTS_FIELD)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            TrackerError::Serialization(format!("document has no \"{}\" array", EVENTS_FIELD))
        })?;

    let mut records = Vec::with_capacity(events.len());
    for (index, entry) in events.iter().enumerate() {
        match entry.as_object() {
            Some(object) => records.push(decode_record(object)),
            None => warn!("Skipping non-object entry at index {}", index),
        }
    }

    Ok(records)
}

fn format_date(at: &DateTime<Utc>) -> String {
    at.format(DATE_FORMAT).to_string()
}

fn decode_tagged_date(object: &Map<String, Value>) -> Option<DateTime<Utc>> {
    if object.get(TYPE_TAG).and_then(Value::as_str) != Some(DATE_TYPE) {
        return None;
    }
    let raw = object.get(DATE_TAG).and_then(Value::as_str)?;
    parse_date(raw)
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let parsed = match DateTime::parse_from_rfc3339(raw) {
        Ok(at) => at.with_timezone(&Utc),
        Err(_) => {
            let naive = NaiveDateTime::parse_from_str(raw, DATE_FORMAT).ok()?;
            Utc.from_utc_datetime(&naive)
        }
    };
    Some(crate::recording::event::truncate_to_millis(parsed))
}
