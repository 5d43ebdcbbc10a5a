//! Core types for the Sensing Flux engine
//!
//! This module defines the values that flow from the raw event log to the
//! output streams: platform tags, event-type identifiers, typed field values and
//! normalized records.

use crate::schema::registry::{ColumnType, Stream};
use chrono::{DateTime, SecondsFormat};
use chrono_tz::Tz;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Source platform of a raw event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }

    /// Platform implied by a raw database file extension (`db` or `dbr`)
    pub fn from_extension(ext: &str) -> Option<Platform> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "db" => Some(Platform::Ios),
            "dbr" => Some(Platform::Android),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(other.to_string()),
        }
    }
}

/// Event-type tag of a raw record: an integer code or a string tag
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum EventTypeId {
    Code(i64),
    Tag(String),
}

impl From<i64> for EventTypeId {
    fn from(code: i64) -> Self {
        EventTypeId::Code(code)
    }
}

impl From<&str> for EventTypeId {
    fn from(tag: &str) -> Self {
        match tag.trim().parse::<i64>() {
            Ok(code) => EventTypeId::Code(code),
            Err(_) => EventTypeId::Tag(tag.to_string()),
        }
    }
}

impl fmt::Display for EventTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTypeId::Code(code) => write!(f, "{code}"),
            EventTypeId::Tag(tag) => f.write_str(tag),
        }
    }
}

impl<'de> Deserialize<'de> for EventTypeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Event logs store the id as an integer column, but text exports quote it.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Int(i64),
            Float(f64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Int(code) => Ok(EventTypeId::Code(code)),
            Repr::Float(value) if value.fract() == 0.0 && value.is_finite() => {
                Ok(EventTypeId::Code(value as i64))
            }
            Repr::Float(value) => Ok(EventTypeId::Tag(value.to_string())),
            Repr::Text(tag) => Ok(EventTypeId::from(tag.as_str())),
        }
    }
}

/// A single typed cell of a normalized record
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Tz>),
    Json(serde_json::Value),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Column type this value can be stored in, `None` for null
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            FieldValue::Null => None,
            FieldValue::Bool(_) => Some(ColumnType::Bool),
            FieldValue::Int(_) => Some(ColumnType::Int),
            FieldValue::Float(_) => Some(ColumnType::Float),
            FieldValue::Text(_) => Some(ColumnType::Text),
            FieldValue::Timestamp(_) => Some(ColumnType::Timestamp),
            FieldValue::Json(_) => Some(ColumnType::Json),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<&DateTime<Tz>> {
        match self {
            FieldValue::Timestamp(ts) => Some(ts),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => serializer.serialize_none(),
            FieldValue::Bool(v) => serializer.serialize_bool(*v),
            FieldValue::Int(v) => serializer.serialize_i64(*v),
            FieldValue::Float(v) => serializer.serialize_f64(*v),
            FieldValue::Text(v) => serializer.serialize_str(v),
            FieldValue::Timestamp(ts) => {
                serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, false))
            }
            FieldValue::Json(v) => v.serialize(serializer),
        }
    }
}

/// One output row, aligned with its stream's registry column set
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    stream: Stream,
    values: Vec<FieldValue>,
}

impl NormalizedRecord {
    pub fn new(stream: Stream, values: Vec<FieldValue>) -> Self {
        Self { stream, values }
    }

    /// All-null row for a stream, to be filled column by column
    pub fn empty(stream: Stream) -> Self {
        Self {
            stream,
            values: vec![FieldValue::Null; stream.columns().len()],
        }
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    /// Value of a named column, `None` if the stream has no such column
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.stream
            .column_index(column)
            .and_then(|idx| self.values.get(idx))
    }

    /// Set a named column; returns false if the stream has no such column
    pub fn set(&mut self, column: &str, value: FieldValue) -> bool {
        match self.stream.column_index(column) {
            Some(idx) if idx < self.values.len() => {
                self.values[idx] = value;
                true
            }
            _ => false,
        }
    }
}

impl Serialize for NormalizedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let columns = self.stream.columns();
        let mut map = serializer.serialize_map(Some(columns.len()))?;
        for (column, value) in columns.iter().zip(&self.values) {
            map.serialize_entry(column.name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Europe::Zurich;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_event_type_id_deserialization() {
        let ids: Vec<EventTypeId> =
            serde_json::from_str(r#"[151, "22", "HKQuantity", 9.0]"#).unwrap();
        assert_eq!(
            ids,
            vec![
                EventTypeId::Code(151),
                EventTypeId::Code(22),
                EventTypeId::Tag("HKQuantity".to_string()),
                EventTypeId::Code(9),
            ]
        );
    }

    #[test]
    fn test_platform_from_extension() {
        assert_eq!(Platform::from_extension("db"), Some(Platform::Ios));
        assert_eq!(Platform::from_extension(".dbr"), Some(Platform::Android));
        assert_eq!(Platform::from_extension("csv"), None);
        assert_eq!("Android".parse::<Platform>(), Ok(Platform::Android));
    }

    #[test]
    fn test_record_get_and_set() {
        let mut record = NormalizedRecord::empty(Stream::BatteryState);
        assert_eq!(record.values().len(), 3);
        assert!(record.set("battery_state", FieldValue::from("charging")));
        assert!(!record.set("no_such_column", FieldValue::Null));
        assert_eq!(
            record.get("battery_state").and_then(FieldValue::as_str),
            Some("charging")
        );
        assert_eq!(record.get("user_id"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_record_serializes_in_column_order() {
        let ts = Zurich.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap();
        let record = NormalizedRecord::new(
            Stream::HeartBeat,
            vec![
                FieldValue::Timestamp(ts),
                FieldValue::from("u1"),
                FieldValue::Float(61.5),
            ],
        );
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"timestamp":"2024-01-15T09:00:00+01:00","user_id":"u1","heart_beat":61.5}"#
        );
    }
}
