//! Timestamp and field normalization
//!
//! This module turns decoded JSON values into typed cells:
//! - Epoch numbers in a rule-stated unit become instants in the canonical zone
//! - Numeric, integer and boolean coercions with field-level failures
//! - Enum code remapping through fixed vocabularies
//! - Locale-formatted dates with vendor day-period markers

use crate::error::DecodeFailure;
use crate::types::FieldValue;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value;

/// Unit of a numeric epoch timestamp, always stated by the rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
}

/// What to do with a code that has no entry in an enum map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unmapped {
    Fail,
    Null,
}

/// Fixed code → label table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumMap {
    pub name: &'static str,
    pub entries: &'static [(i64, &'static str)],
    pub on_unmapped: Unmapped,
}

impl EnumMap {
    pub fn lookup(&self, code: i64) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, label)| *label)
    }
}

/// Harmonized battery-state vocabulary shared by both platforms
pub const BATTERY_STATES: [&str; 4] = ["unknown", "unplugged", "charging", "full"];

/// iOS `UIDevice.BatteryState` codes
pub const IOS_BATTERY_STATE: EnumMap = EnumMap {
    name: "ios_battery_state",
    entries: &[(0, "unknown"), (1, "unplugged"), (2, "charging"), (3, "full")],
    on_unmapped: Unmapped::Fail,
};

/// Android `BatteryManager` status codes; discharging and not-charging both
/// read as unplugged so the two platforms agree.
pub const ANDROID_BATTERY_STATE: EnumMap = EnumMap {
    name: "android_battery_state",
    entries: &[
        (1, "unknown"),
        (2, "charging"),
        (3, "unplugged"),
        (4, "unplugged"),
        (5, "full"),
    ],
    on_unmapped: Unmapped::Fail,
};

/// Android `CallLog.Calls` types
pub const ANDROID_CALL_TYPE: EnumMap = EnumMap {
    name: "android_call_type",
    entries: &[
        (1, "incoming"),
        (2, "outgoing"),
        (3, "missed"),
        (4, "voicemail"),
        (5, "rejected"),
        (6, "blocked"),
        (7, "answered_externally"),
    ],
    on_unmapped: Unmapped::Null,
};

/// Locale-specific text substitutions applied before date parsing, and the
/// formats tried afterwards (RFC 3339 is always tried first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocaleMarkers {
    pub name: &'static str,
    pub replacements: &'static [(&'static str, &'static str)],
    pub formats: &'static [&'static str],
}

/// Conversion from a decoded value to a typed cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Text,
    Float,
    Int,
    Bool,
    Instant(TimeUnit),
    LocaleInstant(&'static LocaleMarkers),
    Enum(&'static EnumMap),
    /// Integer followed by a fixed-width unit suffix (`"15 count"`)
    IntDropUnitSuffix(usize),
    Json,
}

/// Converts decoded values into typed cells in one canonical zone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalizer {
    tz: Tz,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            tz: chrono_tz::Europe::Zurich,
        }
    }
}

impl Normalizer {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Epoch number → instant in the canonical zone
    pub fn instant(&self, value: f64, unit: TimeUnit) -> Option<DateTime<Tz>> {
        epoch_to_instant(value, unit).map(|utc| utc.with_timezone(&self.tz))
    }

    /// Convert one raw value for `column`.
    ///
    /// Missing and null inputs always give `FieldValue::Null`; the caller
    /// decides whether that is acceptable for the column.
    pub fn convert(
        &self,
        column: &'static str,
        conversion: Conversion,
        raw: Option<&Value>,
    ) -> Result<FieldValue, DecodeFailure> {
        let value = match raw {
            None | Some(Value::Null) => return Ok(FieldValue::Null),
            Some(Value::String(s)) if s.trim().is_empty() && conversion != Conversion::Text => {
                return Ok(FieldValue::Null)
            }
            Some(value) => value,
        };

        match conversion {
            Conversion::Text => to_text(value)
                .map(FieldValue::Text)
                .ok_or_else(|| mismatch(column, "text", value)),
            Conversion::Float => to_f64(value)
                .map(FieldValue::Float)
                .ok_or_else(|| mismatch(column, "a number", value)),
            Conversion::Int => to_i64(value)
                .map(FieldValue::Int)
                .ok_or_else(|| mismatch(column, "an integer", value)),
            Conversion::Bool => to_bool(value)
                .map(FieldValue::Bool)
                .ok_or_else(|| mismatch(column, "a boolean or 0/1 code", value)),
            Conversion::Instant(unit) => {
                let epoch = to_f64(value).ok_or_else(|| mismatch(column, "an epoch", value))?;
                self.instant(epoch, unit)
                    .map(FieldValue::Timestamp)
                    .ok_or_else(|| {
                        DecodeFailure::coercion(column, format!("epoch {epoch} is out of range"))
                    })
            }
            Conversion::LocaleInstant(markers) => {
                let text = value
                    .as_str()
                    .ok_or_else(|| mismatch(column, "a date string", value))?;
                parse_locale_instant(text, markers)
                    .map(|dt| FieldValue::Timestamp(dt.with_timezone(&self.tz)))
                    .ok_or_else(|| {
                        DecodeFailure::coercion(
                            column,
                            format!("unrecognized {} date `{text}`", markers.name),
                        )
                    })
            }
            Conversion::Enum(map) => {
                let code = to_i64(value).ok_or_else(|| mismatch(column, "an integer code", value))?;
                match (map.lookup(code), map.on_unmapped) {
                    (Some(label), _) => Ok(FieldValue::Text(label.to_string())),
                    (None, Unmapped::Null) => Ok(FieldValue::Null),
                    (None, Unmapped::Fail) => Err(DecodeFailure::ValueMappingFailure {
                        column,
                        table: map.name,
                        code: code.to_string(),
                    }),
                }
            }
            Conversion::IntDropUnitSuffix(width) => {
                let text = value
                    .as_str()
                    .ok_or_else(|| mismatch(column, "a quantity string", value))?;
                let cut = text.char_indices().rev().nth(width.saturating_sub(1));
                let number = match cut {
                    Some((idx, _)) if width > 0 => &text[..idx],
                    _ if width == 0 => text,
                    _ => "",
                };
                to_i64(&Value::String(number.trim().to_string())).map(FieldValue::Int).ok_or_else(
                    || DecodeFailure::coercion(column, format!("no integer quantity in `{text}`")),
                )
            }
            Conversion::Json => Ok(FieldValue::Json(value.clone())),
        }
    }
}

/// Epoch number → UTC instant.
///
/// Integral values convert exactly; fractional values round to the nearest
/// microsecond, so `t` milliseconds and `t / 1000` seconds agree.
pub fn epoch_to_instant(value: f64, unit: TimeUnit) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    let integral = value.fract() == 0.0 && value.abs() < i64::MAX as f64;
    match (unit, integral) {
        (TimeUnit::Seconds, true) => Utc.timestamp_opt(value as i64, 0).single(),
        (TimeUnit::Milliseconds, true) => DateTime::from_timestamp_millis(value as i64),
        (TimeUnit::Seconds, false) => micros(value * 1_000_000.0),
        (TimeUnit::Milliseconds, false) => micros(value * 1_000.0),
    }
}

fn micros(value: f64) -> Option<DateTime<Utc>> {
    let rounded = value.round();
    if !rounded.is_finite() || rounded.abs() >= i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_micros(rounded as i64)
}

/// Parse a locale-formatted date after applying the marker substitutions
pub fn parse_locale_instant(text: &str, markers: &LocaleMarkers) -> Option<DateTime<Utc>> {
    let mut normalized = text.trim().to_string();
    for (from, to) in markers.replacements {
        normalized = normalized.replace(from, to);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.with_timezone(&Utc));
    }
    markers
        .formats
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(&normalized, fmt).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn mismatch(column: &'static str, expected: &str, value: &Value) -> DecodeFailure {
    DecodeFailure::coercion(column, format!("expected {expected}, got {value}"))
}

fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral_f64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral_f64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn integral_f64(v: f64) -> Option<i64> {
    (v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64).then_some(v as i64)
}

fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            other => other.parse::<f64>().ok().map(|v| v != 0.0),
        },
        other => to_f64(other).map(|v| v != 0.0),
    }
}
