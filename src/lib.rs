//! Sensing Flux - event decoding and normalization engine for mobile sensing logs
//!
//! Flux turns raw iOS and Android sensing event logs into typed, time-normalized
//! relational streams through a deterministic pipeline: raw batch → rule
//! dispatch → payload decode → field normalization → stream accumulation →
//! sink handoff.
//!
//! ## Modules
//!
//! - **Decode**: Payload repair and the decode modes used by rule tables
//! - **Rules**: Declarative per-platform tables mapping event types to streams
//! - **Dispatcher**: Applies a rule table to a batch and audits every failure
//! - **Schema**: Raw record contract and the output relation registry

pub mod config;
pub mod decode;
pub mod device_info;
pub mod dispatcher;
pub mod encoder;
pub mod error;
pub mod normalizer;
pub mod pipeline;
pub mod rules;
pub mod schema;
pub mod types;

pub use config::EngineConfig;
pub use dispatcher::{BatchAudit, BatchOutput, Dispatcher};
pub use encoder::{handoff, NdjsonDirSink, NdjsonWriterSink, ReportEncoder, StreamSink};
pub use error::{BatchError, DecodeFailure, FluxError};
pub use pipeline::{android_to_streams, ios_to_streams, SensingProcessor};

// Schema exports
pub use schema::{RawBatch, RawEventRecord, Stream};
pub use types::{EventTypeId, FieldValue, NormalizedRecord, Platform};

/// Flux version embedded in all batch reports
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for batch reports
pub const PRODUCER_NAME: &str = "sensing-flux";
