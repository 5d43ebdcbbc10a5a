//! Output relation schema registry
//!
//! The fixed contract every output stream must satisfy: an ordered column list
//! with a type and a nullability flag per column. The same contract is realized
//! by the sink's table definitions, so column names follow the sink tables
//! (lower-cased) rather than the raw payload keys.

use crate::types::{FieldValue, NormalizedRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Named output streams, one per destination table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stream {
    Location,
    LocationMore,
    LocationPing,
    WifiConnected,
    WifiState,
    WifiScanned,
    Bluetooth,
    StepsIos,
    Steps,
    DeviceInfo,
    CallLog,
    Activity,
    Brightness,
    Screen,
    BatteryState,
    BatteryLevel,
    Sms,
    HeartBeat,
    AppUsage,
    Notifications,
}

impl Stream {
    pub const ALL: [Stream; 20] = [
        Stream::Location,
        Stream::LocationMore,
        Stream::LocationPing,
        Stream::WifiConnected,
        Stream::WifiState,
        Stream::WifiScanned,
        Stream::Bluetooth,
        Stream::StepsIos,
        Stream::Steps,
        Stream::DeviceInfo,
        Stream::CallLog,
        Stream::Activity,
        Stream::Brightness,
        Stream::Screen,
        Stream::BatteryState,
        Stream::BatteryLevel,
        Stream::Sms,
        Stream::HeartBeat,
        Stream::AppUsage,
        Stream::Notifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Location => "LOCATION",
            Stream::LocationMore => "LOCATION_MORE",
            Stream::LocationPing => "LOCATION_PING",
            Stream::WifiConnected => "WIFI_CONNECTED",
            Stream::WifiState => "WIFI_STATE",
            Stream::WifiScanned => "WIFI_SCANNED",
            Stream::Bluetooth => "BLUETOOTH",
            Stream::StepsIos => "STEPS_IOS",
            Stream::Steps => "STEPS",
            Stream::DeviceInfo => "DEVICE_INFO",
            Stream::CallLog => "CALL_LOG",
            Stream::Activity => "ACTIVITY",
            Stream::Brightness => "BRIGHTNESS",
            Stream::Screen => "SCREEN",
            Stream::BatteryState => "BATTERY_STATE",
            Stream::BatteryLevel => "BATTERY_LEVEL",
            Stream::Sms => "SMS",
            Stream::HeartBeat => "HEART_BEAT",
            Stream::AppUsage => "APP_USAGE",
            Stream::Notifications => "NOTIFICATIONS",
        }
    }

    /// Ordered column set of this stream
    pub fn columns(&self) -> &'static [Column] {
        columns(*self)
    }

    /// Position of a column within this stream's column set
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns().iter().position(|c| c.name == name)
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Stream::ALL
            .iter()
            .copied()
            .find(|stream| stream.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| wanted.to_string())
    }
}

/// Column value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Timezone-aware instant in the canonical zone
    Timestamp,
    Text,
    Float,
    Int,
    Bool,
    /// Free-form structured value, stored as JSON text by the sink
    Json,
}

/// One column of an output relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    pub nullable: bool,
}

const fn required(name: &'static str, ty: ColumnType) -> Column {
    Column {
        name,
        ty,
        nullable: false,
    }
}

const fn optional(name: &'static str, ty: ColumnType) -> Column {
    Column {
        name,
        ty,
        nullable: true,
    }
}

use ColumnType::{Bool, Float, Int, Json, Text, Timestamp};

const TIMESTAMP: Column = required("timestamp", Timestamp);
const USER_ID: Column = required("user_id", Text);

static LOCATION: [Column; 7] = [
    TIMESTAMP,
    USER_ID,
    optional("latitude", Float),
    optional("longitude", Float),
    optional("accuracy", Float),
    optional("altitude", Float),
    optional("source", Text),
];

// Column names keep the vendor's spelling ("newwork") used by the sink tables.
static LOCATION_MORE: [Column; 10] = [
    TIMESTAMP,
    USER_ID,
    optional("satellites", Int),
    optional("speed", Float),
    optional("newworklocationsource", Text),
    optional("bearing", Float),
    optional("hasbearing", Bool),
    optional("newworklocationtype", Text),
    optional("hasspeed", Bool),
    optional("travelstate", Text),
];

static LOCATION_PING: [Column; 3] = [TIMESTAMP, USER_ID, optional("ping", Bool)];

static WIFI_CONNECTED: [Column; 4] = [
    TIMESTAMP,
    USER_ID,
    optional("bssid", Text),
    optional("ssid", Text),
];

static WIFI_STATE: [Column; 4] = [
    TIMESTAMP,
    USER_ID,
    optional("wifi_connected", Bool),
    optional("wifi_enabled", Bool),
];

static WIFI_SCANNED: [Column; 7] = [
    TIMESTAMP,
    USER_ID,
    optional("bssid", Text),
    optional("ssid", Text),
    optional("frequency", Float),
    optional("capability", Text),
    optional("level", Float),
];

static BLUETOOTH: [Column; 6] = [
    TIMESTAMP,
    USER_ID,
    optional("bt_address", Text),
    optional("bt_rssi", Int),
    optional("bt_name", Text),
    optional("bt_class", Text),
];

static STEPS_IOS: [Column; 7] = [
    USER_ID,
    required("start_time", Timestamp),
    required("end_time", Timestamp),
    optional("step_count", Int),
    optional("est_distance", Float),
    optional("floors_ascended", Float),
    optional("floors_descended", Float),
];

static STEPS: [Column; 6] = [
    required("start_time", Timestamp),
    required("end_time", Timestamp),
    USER_ID,
    optional("steps", Int),
    optional("steps_since_boot", Int),
    optional("time_since_boot", Int),
];

static DEVICE_INFO: [Column; 9] = [
    USER_ID,
    required("device_id", Text),
    optional("os", Text),
    optional("name", Text),
    optional("bundle", Text),
    optional("version", Text),
    optional("producttype", Text),
    optional("operatingsystemversion", Text),
    optional("start_time", Timestamp),
];

static CALL_LOG: [Column; 5] = [
    TIMESTAMP,
    USER_ID,
    optional("callid", Text),
    optional("calltype", Text),
    optional("duration", Float),
];

static ACTIVITY: [Column; 4] = [
    TIMESTAMP,
    USER_ID,
    optional("activity", Text),
    optional("confidence", Text),
];

static BRIGHTNESS: [Column; 3] = [TIMESTAMP, USER_ID, optional("brightness", Float)];

static SCREEN: [Column; 3] = [TIMESTAMP, USER_ID, optional("lockstate", Bool)];

static BATTERY_STATE: [Column; 3] = [TIMESTAMP, USER_ID, optional("battery_state", Text)];

static BATTERY_LEVEL: [Column; 3] = [TIMESTAMP, USER_ID, optional("battery_left", Float)];

static SMS: [Column; 8] = [
    TIMESTAMP,
    USER_ID,
    optional("address", Text),
    optional("type", Int),
    optional("read", Int),
    optional("body", Int),
    optional("status", Int),
    optional("thread_id", Int),
];

static HEART_BEAT: [Column; 3] = [TIMESTAMP, USER_ID, optional("heart_beat", Float)];

static APP_USAGE: [Column; 5] = [
    TIMESTAMP,
    USER_ID,
    optional("package_name", Text),
    optional("package_category", Text),
    optional("time_in_foreground", Int),
];

static NOTIFICATIONS: [Column; 3] = [TIMESTAMP, USER_ID, optional("payload", Json)];

/// Column set declared for a stream
pub fn columns(stream: Stream) -> &'static [Column] {
    match stream {
        Stream::Location => &LOCATION,
        Stream::LocationMore => &LOCATION_MORE,
        Stream::LocationPing => &LOCATION_PING,
        Stream::WifiConnected => &WIFI_CONNECTED,
        Stream::WifiState => &WIFI_STATE,
        Stream::WifiScanned => &WIFI_SCANNED,
        Stream::Bluetooth => &BLUETOOTH,
        Stream::StepsIos => &STEPS_IOS,
        Stream::Steps => &STEPS,
        Stream::DeviceInfo => &DEVICE_INFO,
        Stream::CallLog => &CALL_LOG,
        Stream::Activity => &ACTIVITY,
        Stream::Brightness => &BRIGHTNESS,
        Stream::Screen => &SCREEN,
        Stream::BatteryState => &BATTERY_STATE,
        Stream::BatteryLevel => &BATTERY_LEVEL,
        Stream::Sms => &SMS,
        Stream::HeartBeat => &HEART_BEAT,
        Stream::AppUsage => &APP_USAGE,
        Stream::Notifications => &NOTIFICATIONS,
    }
}

/// A record that does not match its stream's declared shape
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaViolation {
    #[error("{stream} expects {expected} columns, record has {actual}")]
    ColumnCount {
        stream: Stream,
        expected: usize,
        actual: usize,
    },

    #[error("{stream}.{column} is not nullable")]
    NullInRequiredColumn { stream: Stream, column: &'static str },

    #[error("{stream}.{column} expects {expected:?}, got {actual:?}")]
    TypeMismatch {
        stream: Stream,
        column: &'static str,
        expected: ColumnType,
        actual: ColumnType,
    },
}

impl SchemaViolation {
    /// Column the violation is about, if any
    pub fn column(&self) -> Option<&'static str> {
        match self {
            SchemaViolation::ColumnCount { .. } => None,
            SchemaViolation::NullInRequiredColumn { column, .. }
            | SchemaViolation::TypeMismatch { column, .. } => Some(column),
        }
    }
}

/// Check a record against its stream's column set
pub fn validate(record: &NormalizedRecord) -> Result<(), SchemaViolation> {
    let stream = record.stream();
    let declared = columns(stream);
    let values = record.values();

    if declared.len() != values.len() {
        return Err(SchemaViolation::ColumnCount {
            stream,
            expected: declared.len(),
            actual: values.len(),
        });
    }

    for (column, value) in declared.iter().zip(values) {
        match value.column_type() {
            None if !column.nullable => {
                return Err(SchemaViolation::NullInRequiredColumn {
                    stream,
                    column: column.name,
                });
            }
            Some(actual) if actual != column.ty => {
                return Err(SchemaViolation::TypeMismatch {
                    stream,
                    column: column.name,
                    expected: column.ty,
                    actual,
                });
            }
            _ => {}
        }
    }

    Ok(())
}

/// True when the value can be stored in the column
pub fn accepts(column: &Column, value: &FieldValue) -> bool {
    match value.column_type() {
        None => column.nullable,
        Some(ty) => ty == column.ty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Europe::Zurich;
    use std::collections::HashSet;

    #[test]
    fn test_stream_names_round_trip_through_from_str() {
        for stream in Stream::ALL {
            assert_eq!(stream.as_str().parse::<Stream>(), Ok(stream));
        }
        assert_eq!("wifi_scanned".parse::<Stream>(), Ok(Stream::WifiScanned));
        assert!("NOT_A_TABLE".parse::<Stream>().is_err());
    }

    #[test]
    fn test_serde_name_matches_table_name() {
        for stream in Stream::ALL {
            let json = serde_json::to_string(&stream).unwrap();
            assert_eq!(json, format!("\"{}\"", stream.as_str()));
        }
    }

    #[test]
    fn test_column_names_unique_per_stream() {
        for stream in Stream::ALL {
            let names: HashSet<_> = stream.columns().iter().map(|c| c.name).collect();
            assert_eq!(names.len(), stream.columns().len(), "{stream}");
        }
    }

    #[test]
    fn test_every_stream_carries_user_and_time() {
        for stream in Stream::ALL {
            let cols = stream.columns();
            let user = cols.iter().find(|c| c.name == "user_id").unwrap();
            assert!(!user.nullable, "{stream}");

            let has_time = cols
                .iter()
                .any(|c| c.ty == ColumnType::Timestamp && !c.nullable);
            assert!(has_time || stream == Stream::DeviceInfo, "{stream}");
        }
    }

    #[test]
    fn test_validate_accepts_conforming_record() {
        let ts = Zurich.with_ymd_and_hms(2024, 3, 3, 10, 0, 0).unwrap();
        let record = NormalizedRecord::new(
            Stream::BatteryLevel,
            vec![
                FieldValue::Timestamp(ts),
                FieldValue::Text("user-1".to_string()),
                FieldValue::Float(87.0),
            ],
        );
        assert_eq!(validate(&record), Ok(()));
    }

    #[test]
    fn test_validate_rejects_shape_violations() {
        let ts = Zurich.with_ymd_and_hms(2024, 3, 3, 10, 0, 0).unwrap();

        let short = NormalizedRecord::new(Stream::BatteryLevel, vec![FieldValue::Timestamp(ts)]);
        assert!(matches!(
            validate(&short),
            Err(SchemaViolation::ColumnCount { expected: 3, actual: 1, .. })
        ));

        let null_user = NormalizedRecord::new(
            Stream::BatteryLevel,
            vec![FieldValue::Timestamp(ts), FieldValue::Null, FieldValue::Null],
        );
        assert_eq!(
            validate(&null_user).unwrap_err().column(),
            Some("user_id")
        );

        let wrong_type = NormalizedRecord::new(
            Stream::BatteryLevel,
            vec![
                FieldValue::Timestamp(ts),
                FieldValue::Text("user-1".to_string()),
                FieldValue::Text("87".to_string()),
            ],
        );
        assert!(matches!(
            validate(&wrong_type),
            Err(SchemaViolation::TypeMismatch {
                column: "battery_left",
                expected: ColumnType::Float,
                actual: ColumnType::Text,
                ..
            })
        ));
    }
}
