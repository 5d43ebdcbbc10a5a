//! Pipeline orchestration
//!
//! This module provides the public API for Sensing Flux.
//! It orchestrates the full path from raw event logs to normalized streams,
//! sink handoff and batch reports.

use crate::config::EngineConfig;
use crate::dispatcher::{BatchOutput, Dispatcher};
use crate::encoder::{handoff, BatchReport, HandoffReport, ReportEncoder, StreamSink};
use crate::error::FluxError;
use crate::schema::{android_user_id_from_file_name, RawBatch};
use crate::types::Platform;

/// Decode an iOS event log given as NDJSON into normalized streams.
///
/// iOS records carry their own `user_id` and `device_id` columns.
///
/// # Example
/// ```ignore
/// let output = ios_to_streams(ndjson)?;
/// for row in output.stream(Stream::Location) { ... }
/// ```
pub fn ios_to_streams(ndjson: &str) -> Result<BatchOutput, FluxError> {
    let processor = SensingProcessor::default();
    processor.process_ndjson(Platform::Ios, ndjson, None)
}

/// Decode an Android event log given as NDJSON into normalized streams.
///
/// Android records carry no user column; the user is taken from the source
/// file name (`<prefix>_<user>.dbr`), which is also kept as the batch source.
pub fn android_to_streams(ndjson: &str, file_name: &str) -> Result<BatchOutput, FluxError> {
    let processor = SensingProcessor::default();
    let user = android_user_id_from_file_name(file_name);
    let batch = RawBatch::parse_ndjson(Platform::Android, ndjson, user.as_deref())?
        .with_source(file_name);
    processor.process(&batch)
}

/// Reusable processor holding the dispatcher and report encoder.
///
/// Batches are independent: nothing is carried from one `process` call to the
/// next, so one processor can serve any number of batches.
#[derive(Default)]
pub struct SensingProcessor {
    dispatcher: Dispatcher,
    encoder: ReportEncoder,
}

impl SensingProcessor {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(config),
            encoder: ReportEncoder::new(),
        }
    }

    /// Load configuration from the environment
    pub fn from_env() -> Result<Self, FluxError> {
        Ok(Self::new(EngineConfig::from_env()?))
    }

    pub fn config(&self) -> &EngineConfig {
        self.dispatcher.config()
    }

    pub fn process(&self, batch: &RawBatch) -> Result<BatchOutput, FluxError> {
        Ok(self.dispatcher.dispatch(batch)?)
    }

    pub fn process_ndjson(
        &self,
        platform: Platform,
        ndjson: &str,
        default_user_id: Option<&str>,
    ) -> Result<BatchOutput, FluxError> {
        let batch = RawBatch::parse_ndjson(platform, ndjson, default_user_id)?;
        self.process(&batch)
    }

    /// Dispatch a batch, hand every stream to `sink` and build the report
    pub fn process_and_handoff<S: StreamSink + ?Sized>(
        &self,
        batch: &RawBatch,
        sink: &mut S,
    ) -> Result<(BatchOutput, HandoffReport, BatchReport), FluxError> {
        let output = self.process(batch)?;
        let handoff_report = handoff(&output, sink)?;
        let report = self.encoder.encode(&output, Some(&handoff_report));
        Ok((output, handoff_report, report))
    }

    pub fn report(&self, output: &BatchOutput) -> BatchReport {
        self.encoder.encode(output, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::NdjsonWriterSink;
    use crate::error::BatchError;
    use crate::schema::Stream;
    use crate::types::FieldValue;
    use pretty_assertions::assert_eq;

    fn sample_ios_ndjson() -> &'static str {
        r#"{"timestamp": 1709500823, "event_id": 151, "data": "{\"latitude\": 47.3769, \"longitude\": 8.5417, \"altitude\": 408.0", "user_id": "u1", "device_id": "dev-1"}
{"timestamp": 1709500823, "event_id": 11, "data": "{\"timestamp\": 1709500823, \"battery_left\": 0.81}", "user_id": "u1", "device_id": "dev-1"}
{"timestamp": 1709500824, "event_id": 987, "data": "72", "user_id": "u1", "device_id": "dev-1"}
{"timestamp": 1709500825, "event_id": 5000, "data": "{}", "user_id": "u1", "device_id": "dev-1"}"#
    }

    fn sample_android_ndjson() -> &'static str {
        r#"{"timestamp": 1709500823, "event_id": 171, "data": "{\"level\": 87, \"state\": 2}"}
{"timestamp": 1709500830, "event_id": 136, "data": "{\"screen_state\": 1}"}
{"timestamp": 1709500840, "event_id": 11, "data": ""}"#
    }

    #[test]
    fn test_ios_to_streams() {
        let output = ios_to_streams(sample_ios_ndjson()).unwrap();

        assert_eq!(output.platform, Platform::Ios);
        assert_eq!(output.audit.records_in, 4);
        assert_eq!(output.stream(Stream::Location).len(), 1);
        assert_eq!(output.stream(Stream::BatteryLevel).len(), 1);
        assert_eq!(
            output.stream(Stream::HeartBeat)[0].get("heart_beat"),
            Some(&FieldValue::Float(72.0))
        );
        assert_eq!(output.stream(Stream::DeviceInfo).len(), 1);
        assert_eq!(output.audit.skipped_event_types.len(), 1);
        assert!(output.audit.failures.is_empty());
    }

    #[test]
    fn test_android_user_comes_from_file_name() {
        let output =
            android_to_streams(sample_android_ndjson(), "/data/raw/sensing_u42.dbr").unwrap();

        assert_eq!(output.source.as_deref(), Some("/data/raw/sensing_u42.dbr"));
        let state = &output.stream(Stream::BatteryState)[0];
        assert_eq!(state.get("user_id").and_then(FieldValue::as_str), Some("u42"));
        assert_eq!(output.stream(Stream::Screen).len(), 1);
        assert!(output.audit.skipped_event_types.is_empty());
    }

    #[test]
    fn test_android_without_user_is_fatal() {
        let result = android_to_streams(sample_android_ndjson(), "noprefix.dbr");
        assert!(matches!(
            result,
            Err(FluxError::Batch(BatchError::MissingColumn { column: "user_id", .. }))
        ));
    }

    #[test]
    fn test_invalid_line_is_fatal() {
        let result = ios_to_streams("{\"timestamp\": 1}\nnot json");
        assert!(matches!(result, Err(FluxError::Batch(_))));
    }

    #[test]
    fn test_expanded_and_text_list_payloads_decode_alike() {
        let json = r#"[
            {"timestamp": 1709500823, "event_id": 902, "data": [1]},
            {"timestamp": 1709500824, "event_id": 902, "data": "[1]"}
        ]"#;
        let batch = RawBatch::parse_array(Platform::Android, json, Some("u2")).unwrap();
        let output = SensingProcessor::default().process(&batch).unwrap();

        assert!(output.audit.failures.is_empty(), "{:?}", output.audit.failures);
        let pings: Vec<_> = output
            .stream(Stream::LocationPing)
            .iter()
            .map(|r| r.get("ping").cloned())
            .collect();
        assert_eq!(
            pings,
            vec![Some(FieldValue::Bool(true)), Some(FieldValue::Bool(true))]
        );
    }

    #[test]
    fn test_process_and_handoff() {
        let processor = SensingProcessor::new(
            EngineConfig::default().with_streams([Stream::Location, Stream::HeartBeat]),
        );
        let batch = RawBatch::parse_ndjson(Platform::Ios, sample_ios_ndjson(), None).unwrap();
        let mut sink = NdjsonWriterSink::new(Vec::new());

        let (output, handoff_report, report) =
            processor.process_and_handoff(&batch, &mut sink).unwrap();

        assert_eq!(output.row_count(), 2);
        assert_eq!(handoff_report.appended(), 2);
        assert_eq!(handoff_report.rejected(), 0);
        assert_eq!(report.sink.as_ref().map(HandoffReport::appended), Some(2));
        assert!(report.audit.suppressed_streams.contains(&Stream::BatteryLevel));

        let written = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(written.lines().count(), 2);
    }

    #[test]
    fn test_batches_are_independent() {
        let processor = SensingProcessor::default();
        let first = processor
            .process_ndjson(Platform::Ios, sample_ios_ndjson(), None)
            .unwrap();
        let second = processor
            .process_ndjson(Platform::Ios, sample_ios_ndjson(), None)
            .unwrap();

        assert_ne!(first.batch_id, second.batch_id);
        assert_eq!(first.streams, second.streams);
    }
}
