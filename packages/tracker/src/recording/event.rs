// packages/tracker/src/recording/event.rs
//! Event record data model
//!
//! An event is a flat mapping from attribute name to one of four value
//! kinds. Nested structures are not representable.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Reserved attribute carrying the raw event name
pub const EVENT_RAW_KEY: &str = "_event_raw";

/// Reserved attribute carrying the current user id (omitted when anonymous)
pub const USER_ID_KEY: &str = "_user_id";

/// Reserved attribute carrying the capture timestamp
pub const TRACKED_AT_KEY: &str = "_tracked_at";

/// Attribute value union
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Number(f64),
    String(String),
    Timestamp(DateTime<Utc>),
}

impl AttributeValue {
    /// Timestamp value truncated to millisecond precision
    pub fn timestamp(at: DateTime<Utc>) -> Self {
        AttributeValue::Timestamp(truncate_to_millis(at))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            AttributeValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }
}

/// Drop sub-millisecond precision, which the wire format cannot carry
pub fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(value: DateTime<Utc>) -> Self {
        AttributeValue::timestamp(value)
    }
}

macro_rules! impl_number_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for AttributeValue {
                fn from(value: $ty) -> Self {
                    AttributeValue::Number(value as f64)
                }
            }
        )*
    };
}

impl_number_from!(f64, f32, i64, i32, i16, i8, u64, u32, u16, u8, usize, isize);

/// One observed occurrence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventRecord {
    attributes: BTreeMap<String, AttributeValue>,
}

impl EventRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute, replacing any previous value under the same name
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Builder-style `insert`
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        self.attributes.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.attributes.iter()
    }

    /// Raw event name, if this record was built by the tracker
    pub fn event_name(&self) -> Option<&str> {
        self.get(EVENT_RAW_KEY).and_then(AttributeValue::as_str)
    }
}

impl Extend<(String, AttributeValue)> for EventRecord {
    fn extend<I: IntoIterator<Item = (String, AttributeValue)>>(&mut self, iter: I) {
        self.attributes.extend(iter);
    }
}

impl FromIterator<(String, AttributeValue)> for EventRecord {
    fn from_iter<I: IntoIterator<Item = (String, AttributeValue)>>(iter: I) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for EventRecord {
    type Item = (String, AttributeValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, AttributeValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.attributes.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_numbers_normalize_to_f64() {
        assert_eq!(AttributeValue::from(3_i32), AttributeValue::Number(3.0));
        assert_eq!(AttributeValue::from(7_u64), AttributeValue::Number(7.0));
        assert_eq!(AttributeValue::from(1.5_f32), AttributeValue::Number(1.5));
    }

    #[test]
    fn test_timestamp_truncated_to_millis() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let value = AttributeValue::from(at);
        let stored = value.as_timestamp().unwrap();
        assert_eq!(stored.timestamp_subsec_nanos(), 123_000_000);
    }

    #[test]
    fn test_insert_replaces() {
        let mut record = EventRecord::new().with("k", "a");
        record.insert("k", true);
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("k"), Some(&AttributeValue::Bool(true)));
    }

    #[test]
    fn test_event_name() {
        let record = EventRecord::new().with(EVENT_RAW_KEY, "signup");
        assert_eq!(record.event_name(), Some("signup"));
        assert_eq!(EventRecord::new().event_name(), None);
    }
}
