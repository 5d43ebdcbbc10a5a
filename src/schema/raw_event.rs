//! Raw event log rows
//!
//! One `RawEventRecord` is one row of a platform's event table, as handed over
//! by the ingestion adapter: a numeric epoch timestamp, an event-type tag, an
//! opaque payload and the owning user (plus a device id on iOS). A `RawBatch`
//! is the ordered record sequence of one source database file.

use crate::error::{BatchError, RecordPos};
use crate::types::{EventTypeId, Platform};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::borrow::Cow;

/// Opaque payload bytes, usually UTF-8 text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lossy text view, for logs and reports
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload(text.as_bytes().to_vec())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload(text.into_bytes())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload(bytes)
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string_lossy())
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Exports carry the blob as text or already expanded into JSON; expanded
        // values are re-serialized so decoding sees text. Raw bytes arrive in
        // the separate `payload_bytes` column.
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Null => Payload::default(),
            Value::String(text) => Payload::from(text),
            other => Payload::from(other.to_string()),
        })
    }
}

/// One raw event as stored by the sensing app
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawEventRecord {
    /// Platform-native epoch, in seconds for both platforms
    pub timestamp: f64,
    pub event_type: EventTypeId,
    pub payload: Payload,
    /// Present on iOS only
    pub device_id: Option<String>,
    pub user_id: String,
}

impl RawEventRecord {
    pub fn new(
        timestamp: f64,
        event_type: impl Into<EventTypeId>,
        payload: impl Into<Payload>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            event_type: event_type.into(),
            payload: payload.into(),
            device_id: None,
            user_id: user_id.into(),
        }
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Record-level contract: finite timestamp, non-empty user and tag
    fn check(&self, at: RecordPos) -> Result<(), BatchError> {
        if !self.timestamp.is_finite() {
            return Err(BatchError::InvalidTimestamp { at });
        }
        if self.user_id.trim().is_empty() {
            return Err(BatchError::MissingColumn {
                at,
                column: "user_id",
            });
        }
        if let EventTypeId::Tag(tag) = &self.event_type {
            if tag.trim().is_empty() {
                return Err(BatchError::MissingColumn {
                    at,
                    column: "event_type",
                });
            }
        }
        Ok(())
    }
}

/// Wire form of a record; mandatory columns are checked after parsing so the
/// error can name the column.
#[derive(Debug, Deserialize)]
struct RawLine {
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default, alias = "event_id")]
    event_type: Option<EventTypeId>,
    #[serde(default, alias = "data")]
    payload: Option<Payload>,
    /// Undecoded blob bytes, for exports that cannot carry it as text
    #[serde(default)]
    payload_bytes: Option<Vec<u8>>,
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

impl RawLine {
    fn into_record(
        self,
        at: RecordPos,
        default_user_id: Option<&str>,
    ) -> Result<RawEventRecord, BatchError> {
        let timestamp = match self.timestamp {
            None | Some(Value::Null) => {
                return Err(BatchError::MissingColumn {
                    at,
                    column: "timestamp",
                })
            }
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            Some(_) => None,
        }
        .ok_or(BatchError::InvalidTimestamp { at })?;

        let event_type = self.event_type.ok_or(BatchError::MissingColumn {
            at,
            column: "event_type",
        })?;

        let user_id = self
            .user_id
            .or_else(|| default_user_id.map(str::to_string))
            .ok_or(BatchError::MissingColumn {
                at,
                column: "user_id",
            })?;

        let payload = match (self.payload, self.payload_bytes) {
            (Some(text), Some(_)) if !text.is_empty() => {
                return Err(BatchError::ConflictingPayload { at })
            }
            (_, Some(bytes)) => Payload::from(bytes),
            (text, None) => text.unwrap_or_default(),
        };

        let record = RawEventRecord {
            timestamp,
            event_type,
            payload,
            device_id: self.device_id,
            user_id,
        };
        record.check(at)?;
        Ok(record)
    }
}

/// Ordered raw records of one source file, tagged with their platform
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawBatch {
    pub platform: Platform,
    /// Source location (usually the database file path), used in reports
    pub source: Option<String>,
    pub records: Vec<RawEventRecord>,
}

impl RawBatch {
    pub fn new(platform: Platform, records: Vec<RawEventRecord>) -> Self {
        Self {
            platform,
            source: None,
            records,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Parse NDJSON (one raw record per line).
    ///
    /// `default_user_id` fills records without a `user_id` column, which is how
    /// Android logs arrive (the user is encoded in the file name).
    pub fn parse_ndjson(
        platform: Platform,
        ndjson: &str,
        default_user_id: Option<&str>,
    ) -> Result<Self, BatchError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let raw: RawLine =
                serde_json::from_str(trimmed).map_err(|e| BatchError::InvalidRecord {
                    line: line_num + 1,
                    message: e.to_string(),
                })?;
            records.push(raw.into_record(RecordPos::Line(line_num + 1), default_user_id)?);
        }
        Ok(RawBatch::new(platform, records))
    }

    /// Parse a JSON array of raw records
    pub fn parse_array(
        platform: Platform,
        json: &str,
        default_user_id: Option<&str>,
    ) -> Result<Self, BatchError> {
        let lines: Vec<RawLine> = serde_json::from_str(json)?;
        let records = lines
            .into_iter()
            .enumerate()
            .map(|(idx, raw)| raw.into_record(RecordPos::Index(idx), default_user_id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RawBatch::new(platform, records))
    }

    /// Check the batch is a valid raw event sequence.
    ///
    /// This is the only fatal condition of the engine; payload problems are
    /// never reported here.
    pub fn validate(&self) -> Result<(), BatchError> {
        self.records
            .iter()
            .enumerate()
            .try_for_each(|(index, record)| record.check(RecordPos::Index(index)))
    }
}

/// User id encoded in an Android log file name (`<prefix>_<user>.dbr`)
pub fn android_user_id_from_file_name(path: &str) -> Option<String> {
    let file_name = path.rsplit(['/', '\\']).next()?;
    let user = file_name.split('_').nth(1)?.split('.').next()?;
    if user.is_empty() {
        None
    } else {
        Some(user.to_string())
    }
}
