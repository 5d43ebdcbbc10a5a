//! Error types for Sensing Flux

use crate::types::EventTypeId;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Per-record decode failures.
///
/// These are values: the dispatcher records them in the batch audit and keeps
/// going. None of them aborts a batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeFailure {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unsupported event type: {0}")]
    UnsupportedEventType(EventTypeId),

    #[error("Cannot coerce field `{column}`: {reason}")]
    FieldCoercionFailure {
        column: &'static str,
        reason: String,
    },

    #[error("No `{table}` mapping for code {code} in field `{column}`")]
    ValueMappingFailure {
        column: &'static str,
        table: &'static str,
        code: String,
    },
}

impl DecodeFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            DecodeFailure::MalformedPayload(_) => FailureKind::MalformedPayload,
            DecodeFailure::UnsupportedEventType(_) => FailureKind::UnsupportedEventType,
            DecodeFailure::FieldCoercionFailure { .. } => FailureKind::FieldCoercionFailure,
            DecodeFailure::ValueMappingFailure { .. } => FailureKind::ValueMappingFailure,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        DecodeFailure::MalformedPayload(reason.into())
    }

    pub(crate) fn coercion(column: &'static str, reason: impl Into<String>) -> Self {
        DecodeFailure::FieldCoercionFailure {
            column,
            reason: reason.into(),
        }
    }
}

/// Failure taxonomy as reported in batch audits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MalformedPayload,
    UnsupportedEventType,
    FieldCoercionFailure,
    ValueMappingFailure,
}

/// Fatal errors: the input is not a valid raw event sequence at all.
///
/// This signals a contract violation by the ingestion adapter rather than a
/// data-quality problem inside a payload.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Failed to parse record at line {line}: {message}")]
    InvalidRecord { line: usize, message: String },

    #[error("Record at {at} is missing mandatory column `{column}`")]
    MissingColumn { at: RecordPos, column: &'static str },

    #[error("Record at {at} has a non-finite timestamp")]
    InvalidTimestamp { at: RecordPos },

    #[error("Record at {at} carries both `payload` and `payload_bytes`")]
    ConflictingPayload { at: RecordPos },
}

/// Where a rejected raw record sits in its input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordPos {
    /// 1-based NDJSON line, blank lines included
    Line(usize),
    /// 0-based position in a JSON array or in-memory batch
    Index(usize),
}

impl fmt::Display for RecordPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordPos::Line(line) => write!(f, "line {line}"),
            RecordPos::Index(index) => write!(f, "index {index}"),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Unknown output stream: {0}")]
    UnknownStream(String),

    #[error("Invalid log level: {0} (expected trace, debug, info, warn or error)")]
    InvalidLogLevel(String),
}

/// Errors raised by output sinks
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Top-level error of the processing pipeline
#[derive(Debug, Error)]
pub enum FluxError {
    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}
