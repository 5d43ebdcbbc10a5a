//! Payload repair and decode primitives
//!
//! Every raw payload is opaque until its rule names a decode mode. The modes
//! here are pure functions from payload bytes to zero or more decoded rows;
//! failures come back as `DecodeFailure::MalformedPayload` values.

use crate::error::DecodeFailure;
use crate::schema::Payload;
use serde_json::{Map, Value};
use std::borrow::Cow;
use tracing::debug;

/// How a payload is turned into rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// A single JSON object, repaired if truncated
    Object,
    /// `{"<key>": [ {...}, {...} ]}`: one row per list element
    ObjectListUnderKey,
    /// Text split on a fixed delimiter, fields addressed by position
    DelimitedScalars { delimiter: char },
    /// A JSON scalar, or a one-element list holding one
    Scalar,
    /// A Python-literal list of dicts: one row per element
    LiteralList,
    /// Recognized event that carries no data; yields no rows
    Acknowledged,
}

/// One decoded row, before projection
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Object(Map<String, Value>),
    Fields(Vec<Value>),
    Scalar(Value),
}

impl Decoded {
    /// Lower-case every key of an object row
    pub fn fold_keys(self) -> Decoded {
        match self {
            Decoded::Object(map) => Decoded::Object(
                map.into_iter()
                    .map(|(k, v)| (k.to_lowercase(), v))
                    .collect(),
            ),
            other => other,
        }
    }

    /// Named field of an object row
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Decoded::Object(map) => map.get(name),
            _ => None,
        }
    }

    /// Positional field of a delimited row
    pub fn position(&self, idx: usize) -> Option<&Value> {
        match self {
            Decoded::Fields(fields) => fields.get(idx),
            _ => None,
        }
    }

    pub fn scalar(&self) -> Option<&Value> {
        match self {
            Decoded::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// The whole row as one JSON value
    pub fn to_value(&self) -> Value {
        match self {
            Decoded::Object(map) => Value::Object(map.clone()),
            Decoded::Fields(fields) => Value::Array(fields.clone()),
            Decoded::Scalar(value) => value.clone(),
        }
    }
}

/// Decode a payload according to a rule's mode
pub fn decode(payload: &Payload, mode: DecodeMode) -> Result<Vec<Decoded>, DecodeFailure> {
    if mode == DecodeMode::Acknowledged {
        return Ok(Vec::new());
    }

    let text = payload_text(payload)?;
    match mode {
        DecodeMode::Object => Ok(vec![Decoded::Object(decode_object(text)?)]),
        DecodeMode::ObjectListUnderKey => Ok(decode_object_list(text)?
            .into_iter()
            .map(Decoded::Object)
            .collect()),
        DecodeMode::DelimitedScalars { delimiter } => {
            Ok(vec![Decoded::Fields(decode_delimited(text, delimiter)?)])
        }
        DecodeMode::Scalar => Ok(vec![Decoded::Scalar(decode_scalar(text)?)]),
        DecodeMode::LiteralList => Ok(decode_literal_list(text)?
            .into_iter()
            .map(Decoded::Object)
            .collect()),
        DecodeMode::Acknowledged => Ok(Vec::new()),
    }
}

/// Payload bytes as UTF-8 text
pub fn payload_text(payload: &Payload) -> Result<&str, DecodeFailure> {
    let text = std::str::from_utf8(payload.as_bytes())
        .map_err(|e| DecodeFailure::malformed(format!("payload is not UTF-8: {e}")))?;
    if text.trim().is_empty() {
        return Err(DecodeFailure::malformed("empty payload"));
    }
    Ok(text)
}

/// Best-effort repair of a truncated JSON object.
///
/// Only two truncation patterns are handled: a cut inside a string literal
/// (closed with `"}`) and a missing final brace (closed with `}`). Text that
/// already ends in a closing brace outside any string is returned unchanged.
pub fn repair(text: &str) -> Cow<'_, str> {
    let trimmed = text.trim_end();
    if has_open_string(trimmed) {
        Cow::Owned(format!("{trimmed}\"}}"))
    } else if !trimmed.ends_with('}') {
        Cow::Owned(format!("{trimmed}}}"))
    } else {
        Cow::Borrowed(text)
    }
}

fn has_open_string(text: &str) -> bool {
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            escaped = false;
        } else if in_string && c == '\\' {
            escaped = true;
        } else if c == '"' {
            in_string = !in_string;
        }
    }
    in_string
}

/// Parse a single JSON object, falling back to `repair` once
pub fn decode_object(text: &str) -> Result<Map<String, Value>, DecodeFailure> {
    let first = match serde_json::from_str::<Value>(text) {
        Ok(value) => return expect_object(value),
        Err(e) => e,
    };

    let repaired = repair(text);
    if let Cow::Borrowed(_) = repaired {
        return Err(DecodeFailure::malformed(first.to_string()));
    }

    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => {
            debug!(original_error = %first, "repaired truncated payload");
            expect_object(value)
        }
        Err(e) => Err(DecodeFailure::malformed(format!(
            "{first} (repair attempt failed: {e})"
        ))),
    }
}

fn expect_object(value: Value) -> Result<Map<String, Value>, DecodeFailure> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(DecodeFailure::malformed(format!(
            "expected a JSON object, found {}",
            json_kind(&other)
        ))),
    }
}

/// Explode `{"<key>": [obj, ...]}` into its element objects.
///
/// An empty object, an empty list or a null list is zero rows.
pub fn decode_object_list(text: &str) -> Result<Vec<Map<String, Value>>, DecodeFailure> {
    let map = match serde_json::from_str::<Value>(text) {
        Ok(value) => expect_object(value)?,
        Err(e) => return Err(DecodeFailure::malformed(e.to_string())),
    };

    if map.len() > 1 {
        return Err(DecodeFailure::malformed(format!(
            "expected a single list key, found {} keys",
            map.len()
        )));
    }

    match map.into_iter().next() {
        None | Some((_, Value::Null)) => Ok(Vec::new()),
        Some((_, Value::Array(items))) => objects_of(items),
        Some((key, other)) => Err(DecodeFailure::malformed(format!(
            "value under `{key}` is {}, expected a list",
            json_kind(&other)
        ))),
    }
}

fn objects_of(items: Vec<Value>) -> Result<Vec<Map<String, Value>>, DecodeFailure> {
    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
            Value::Object(map) => Ok(map),
            other => Err(DecodeFailure::malformed(format!(
                "list element {idx} is {}, expected an object",
                json_kind(&other)
            ))),
        })
        .collect()
}

/// Split delimited text into positional string fields
pub fn decode_delimited(text: &str, delimiter: char) -> Result<Vec<Value>, DecodeFailure> {
    let text = text.trim();
    if text.is_empty() {
        return Err(DecodeFailure::malformed("empty delimited payload"));
    }
    Ok(text
        .split(delimiter)
        .map(|field| Value::String(field.trim().to_string()))
        .collect())
}

/// A bare JSON scalar, or a single-element list around one
pub fn decode_scalar(text: &str) -> Result<Value, DecodeFailure> {
    let value = serde_json::from_str::<Value>(text.trim())
        .map_err(|e| DecodeFailure::malformed(e.to_string()))?;
    match value {
        Value::Array(mut items) if items.len() == 1 => match items.remove(0) {
            scalar @ (Value::Number(_) | Value::Bool(_) | Value::String(_)) => Ok(scalar),
            other => Err(DecodeFailure::malformed(format!(
                "expected a scalar, found a list holding {}",
                json_kind(&other)
            ))),
        },
        scalar @ (Value::Number(_) | Value::Bool(_) | Value::String(_)) => Ok(scalar),
        other => Err(DecodeFailure::malformed(format!(
            "expected a scalar, found {}",
            json_kind(&other)
        ))),
    }
}

/// Parse a list of dicts written as a Python literal (`[{'a': 1, 'b': None}]`)
pub fn decode_literal_list(text: &str) -> Result<Vec<Map<String, Value>>, DecodeFailure> {
    let text = text.trim();
    let value = match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(_) => serde_json::from_str::<Value>(&python_literal_to_json(text))
            .map_err(|e| DecodeFailure::malformed(format!("not a literal list: {e}")))?,
    };

    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => objects_of(items),
        other => Err(DecodeFailure::malformed(format!(
            "expected a list, found {}",
            json_kind(&other)
        ))),
    }
}

/// Rewrite Python literal syntax into JSON: single-quoted strings become
/// double-quoted, and `True`/`False`/`None` become `true`/`false`/`null`.
fn python_literal_to_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                let quote = c;
                out.push('"');
                while let Some(inner) = chars.next() {
                    match inner {
                        '\\' => match chars.next() {
                            Some('\'') => out.push('\''),
                            Some(escaped) => {
                                out.push('\\');
                                out.push(escaped);
                            }
                            None => out.push_str("\\\\"),
                        },
                        '"' if quote == '\'' => out.push_str("\\\""),
                        q if q == quote => break,
                        other => out.push(other),
                    }
                }
                out.push('"');
            }
            c if c.is_ascii_alphabetic() => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    _ => word.as_str(),
                });
            }
            other => out.push(other),
        }
    }
    out
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
