//! Event dispatcher
//!
//! Drives one raw batch through its platform's rule table in two phases:
//! 1. Decode: group records by event type, decode each payload, normalize the
//!    projected fields and append rows to their streams.
//! 2. Post-process: named cross-rule steps over the accumulated streams
//!    (device identity stamping, DeviceInfo deduplication, stream selection).
//!
//! Failures are values scoped to one raw record; the batch always completes.

use crate::config::EngineConfig;
use crate::decode::{decode, Decoded};
use crate::device_info::{self, parse_descriptor, DeviceInfo, DEVICE_ID_NOT_PROVIDED};
use crate::error::{BatchError, DecodeFailure, FailureKind};
use crate::normalizer::Normalizer;
use crate::rules::{DecodeRule, FieldSpec, KeyCase, OnError, Projection, RuleTable, Source};
use crate::schema::{registry, RawBatch, RawEventRecord, Stream};
use crate::types::{EventTypeId, FieldValue, NormalizedRecord, Platform};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cross-rule steps run after every rule has been applied, in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStep {
    /// Fill missing device ids on DeviceInfo sightings from the batch identity
    StampDeviceIdentity,
    /// Collapse DeviceInfo sightings on their full metadata tuple
    DeduplicateDeviceInfo,
    /// Drop streams the configuration does not enable
    SuppressDisabledStreams,
}

pub const POST_STEPS: [PostStep; 3] = [
    PostStep::StampDeviceIdentity,
    PostStep::DeduplicateDeviceInfo,
    PostStep::SuppressDisabledStreams,
];

/// What happened to the data a failure was about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// The row was excluded from its stream
    RecordExcluded,
    /// The row was kept with the failing column set to null
    FieldNulled,
}

/// One per-record failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
    pub stream: Option<Stream>,
    pub event_type: EventTypeId,
    /// Position of the raw record in the batch
    pub record_index: usize,
    pub kind: FailureKind,
    pub message: String,
    pub disposition: Disposition,
}

/// Batch audit: everything that did not become a row
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchAudit {
    pub records_in: usize,
    pub rows_out: usize,
    pub skipped_event_types: BTreeSet<EventTypeId>,
    pub failures: Vec<RecordFailure>,
    pub suppressed_streams: BTreeSet<Stream>,
}

impl BatchAudit {
    /// Failures that cost a row
    pub fn excluded(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| f.disposition == Disposition::RecordExcluded)
            .count()
    }

    pub fn failures_of(&self, kind: FailureKind) -> impl Iterator<Item = &RecordFailure> {
        self.failures.iter().filter(move |f| f.kind == kind)
    }
}

/// Result of dispatching one batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutput {
    pub batch_id: Uuid,
    pub platform: Platform,
    pub source: Option<String>,
    pub streams: BTreeMap<Stream, Vec<NormalizedRecord>>,
    pub audit: BatchAudit,
}

impl BatchOutput {
    /// Rows of one stream (empty if the batch produced none)
    pub fn stream(&self, stream: Stream) -> &[NormalizedRecord] {
        self.streams.get(&stream).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn row_count(&self) -> usize {
        self.streams.values().map(Vec::len).sum()
    }
}

/// Per-batch accumulation state, owned by one `dispatch` call
struct Accumulator {
    batch_id: Uuid,
    source: Option<String>,
    streams: BTreeMap<Stream, Vec<NormalizedRecord>>,
    audit: BatchAudit,
    sightings: Vec<DeviceInfo>,
}

impl Accumulator {
    fn fail(
        &mut self,
        stream: Option<Stream>,
        record: &RawEventRecord,
        record_index: usize,
        failure: DecodeFailure,
        disposition: Disposition,
    ) {
        let location = self.source.as_deref().unwrap_or("-");
        match disposition {
            Disposition::RecordExcluded => warn!(
                batch_id = %self.batch_id,
                source = location,
                record_index,
                event_type = %record.event_type,
                stream = stream.map(|s| s.as_str()).unwrap_or("-"),
                error = %failure,
                "record excluded"
            ),
            Disposition::FieldNulled => debug!(
                batch_id = %self.batch_id,
                source = location,
                record_index,
                event_type = %record.event_type,
                error = %failure,
                "field nulled"
            ),
        }
        self.audit.failures.push(RecordFailure {
            stream,
            event_type: record.event_type.clone(),
            record_index,
            kind: failure.kind(),
            message: failure.to_string(),
            disposition,
        });
    }

    fn push(&mut self, record: NormalizedRecord) {
        self.streams.entry(record.stream()).or_default().push(record);
    }
}

/// Applies platform rule tables to raw batches
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    config: EngineConfig,
    normalizer: Normalizer,
}

impl Dispatcher {
    pub fn new(config: EngineConfig) -> Self {
        let normalizer = Normalizer::new(config.timezone);
        Self { config, normalizer }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Dispatch a batch with its platform's built-in rule table
    pub fn dispatch(&self, batch: &RawBatch) -> Result<BatchOutput, BatchError> {
        self.dispatch_with_table(RuleTable::for_platform(batch.platform), batch)
    }

    /// Dispatch a batch with an explicit rule table.
    ///
    /// Errors only when the batch itself violates the raw record contract.
    pub fn dispatch_with_table(
        &self,
        table: &RuleTable,
        batch: &RawBatch,
    ) -> Result<BatchOutput, BatchError> {
        batch.validate()?;

        let mut acc = Accumulator {
            batch_id: Uuid::new_v4(),
            source: batch.source.clone(),
            streams: BTreeMap::new(),
            audit: BatchAudit {
                records_in: batch.len(),
                ..BatchAudit::default()
            },
            sightings: Vec::new(),
        };

        // Phase 1: decode
        let mut seen_devices = HashSet::new();
        let mut by_type: BTreeMap<&EventTypeId, Vec<usize>> = BTreeMap::new();
        for (idx, record) in batch.records.iter().enumerate() {
            by_type.entry(&record.event_type).or_default().push(idx);
            if seen_devices.insert((&record.user_id, &record.device_id)) {
                acc.sightings.push(DeviceInfo::base(
                    &record.user_id,
                    record.device_id.as_deref(),
                    batch.platform,
                ));
            }
        }

        for (event_type, indices) in by_type {
            let rule = match table.rule(event_type) {
                Some(rule) => rule,
                None => {
                    debug!(
                        batch_id = %acc.batch_id,
                        platform = %batch.platform,
                        event_type = %event_type,
                        records = indices.len(),
                        "no rule for event type, skipping"
                    );
                    acc.audit.skipped_event_types.insert(event_type.clone());
                    continue;
                }
            };

            let mut distinct: HashMap<Stream, HashSet<String>> = HashMap::new();
            for idx in indices {
                self.apply_rule(rule, batch, idx, &mut acc, &mut distinct);
            }
        }

        // Phase 2: post-process
        for step in POST_STEPS {
            self.run_post_step(step, batch, &mut acc);
        }

        acc.audit.rows_out = acc.streams.values().map(Vec::len).sum();
        info!(
            batch_id = %acc.batch_id,
            platform = %batch.platform,
            source = acc.source.as_deref().unwrap_or("-"),
            records_in = acc.audit.records_in,
            rows_out = acc.audit.rows_out,
            failures = acc.audit.failures.len(),
            skipped_event_types = acc.audit.skipped_event_types.len(),
            "batch dispatched"
        );

        Ok(BatchOutput {
            batch_id: acc.batch_id,
            platform: batch.platform,
            source: acc.source,
            streams: acc.streams,
            audit: acc.audit,
        })
    }

    fn apply_rule(
        &self,
        rule: &DecodeRule,
        batch: &RawBatch,
        idx: usize,
        acc: &mut Accumulator,
        distinct: &mut HashMap<Stream, HashSet<String>>,
    ) {
        let record = &batch.records[idx];
        let rows = match decode(&record.payload, rule.mode) {
            Ok(rows) => rows,
            Err(failure) => {
                acc.fail(
                    rule.primary_stream(),
                    record,
                    idx,
                    failure,
                    Disposition::RecordExcluded,
                );
                return;
            }
        };

        for row in rows {
            let row = match rule.key_case {
                KeyCase::AsIs => row,
                KeyCase::Lower => row.fold_keys(),
            };

            if let Some(filter) = rule.filter {
                if !field_equals(&row, filter.field, filter.equals) {
                    continue;
                }
            }

            let nulled: &[&str] = match rule.null_when {
                Some(when) if field_equals(&row, when.field, when.equals) => when.columns,
                _ => &[],
            };

            for projection in rule.projections {
                match self.project(projection, &row, record, nulled) {
                    Ok((out, soft_failures)) => {
                        for failure in soft_failures {
                            acc.fail(
                                Some(projection.stream),
                                record,
                                idx,
                                failure,
                                Disposition::FieldNulled,
                            );
                        }
                        if projection.distinct {
                            let key = format!("{:?}", out.values());
                            if !distinct.entry(projection.stream).or_default().insert(key) {
                                continue;
                            }
                        }
                        acc.push(out);
                    }
                    Err(failure) => acc.fail(
                        Some(projection.stream),
                        record,
                        idx,
                        failure,
                        Disposition::RecordExcluded,
                    ),
                }
            }

            if let Some(spec) = rule.device_descriptor {
                let descriptor = row
                    .field(spec.field)
                    .and_then(Value::as_str)
                    .and_then(parse_descriptor);
                if let Some(descriptor) = descriptor {
                    let observed_at = self
                        .value_of(&spec.observed_at, &row, record)
                        .ok()
                        .and_then(|v| v.as_timestamp().copied());
                    // Records without a device id get the batch identity in phase 2.
                    let sighting = DeviceInfo::base(
                        &record.user_id,
                        record.device_id.as_deref(),
                        batch.platform,
                    );
                    acc.sightings.push(sighting.with_descriptor(descriptor, observed_at));
                }
            }
        }
    }

    /// Build one output row; hard failures exclude it, soft failures null a column
    fn project(
        &self,
        projection: &Projection,
        row: &Decoded,
        record: &RawEventRecord,
        nulled: &[&str],
    ) -> Result<(NormalizedRecord, Vec<DecodeFailure>), DecodeFailure> {
        let mut out = NormalizedRecord::empty(projection.stream);
        out.set("user_id", FieldValue::from(record.user_id.as_str()));
        if let Some(device_id) = &record.device_id {
            out.set("device_id", FieldValue::from(device_id.as_str()));
        }

        let mut soft = Vec::new();
        for spec in projection.fields {
            if nulled.contains(&spec.column) {
                continue;
            }
            match self.value_of(spec, row, record) {
                Ok(value) => {
                    out.set(spec.column, value);
                }
                Err(failure) => match spec.on_error {
                    OnError::DropRecord => return Err(failure),
                    OnError::NullField => soft.push(failure),
                },
            }
        }

        registry::validate(&out).map_err(|violation| {
            DecodeFailure::coercion(
                violation.column().unwrap_or(projection.stream.as_str()),
                violation.to_string(),
            )
        })?;

        Ok((out, soft))
    }

    fn value_of(
        &self,
        spec: &FieldSpec,
        row: &Decoded,
        record: &RawEventRecord,
    ) -> Result<FieldValue, DecodeFailure> {
        let n = &self.normalizer;
        match spec.source {
            Source::Field(key) => n.convert(spec.column, spec.conversion, row.field(key)),
            Source::Position(idx) => n.convert(spec.column, spec.conversion, row.position(idx)),
            Source::Scalar => n.convert(spec.column, spec.conversion, row.scalar()),
            Source::RecordTimestamp => {
                n.convert(spec.column, spec.conversion, Some(&Value::from(record.timestamp)))
            }
            Source::Constant(text) => {
                n.convert(spec.column, spec.conversion, Some(&Value::from(text)))
            }
            Source::WholeObject => n.convert(spec.column, spec.conversion, Some(&row.to_value())),
        }
    }

    fn run_post_step(&self, step: PostStep, batch: &RawBatch, acc: &mut Accumulator) {
        match step {
            PostStep::StampDeviceIdentity => {
                let identity = batch
                    .records
                    .iter()
                    .find_map(|r| r.device_id.clone())
                    .unwrap_or_else(|| DEVICE_ID_NOT_PROVIDED.to_string());
                for sighting in acc.sightings.iter_mut() {
                    if sighting.device_id.is_none() {
                        sighting.device_id = Some(identity.clone());
                    }
                }
            }
            PostStep::DeduplicateDeviceInfo => {
                let sightings = std::mem::take(&mut acc.sightings);
                let before = sightings.len();
                let rows = device_info::deduplicate(sightings);
                debug!(
                    batch_id = %acc.batch_id,
                    sightings = before,
                    rows = rows.len(),
                    "device info deduplicated"
                );
                for info in rows {
                    acc.push(info.to_record());
                }
            }
            PostStep::SuppressDisabledStreams => {
                if self.config.enabled_streams.is_none() {
                    return;
                }
                let disabled: Vec<Stream> = acc
                    .streams
                    .keys()
                    .copied()
                    .filter(|s| !self.config.is_enabled(*s))
                    .collect();
                for stream in disabled {
                    acc.streams.remove(&stream);
                    acc.audit.suppressed_streams.insert(stream);
                }
            }
        }
    }
}

/// Text comparison of a decoded field against a rule literal
fn field_equals(row: &Decoded, field: &str, expected: &str) -> bool {
    match row.field(field) {
        Some(Value::String(s)) => s == expected,
        Some(Value::Number(n)) => n.to_string() == expected,
        Some(Value::Bool(b)) => b.to_string() == expected,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodeMode;
    use crate::normalizer::{Conversion, TimeUnit};
    use crate::rules::{RuleKey, BASE};
    use pretty_assertions::assert_eq;

    const T0: f64 = 1_709_500_823.0;

    fn ios(records: Vec<RawEventRecord>) -> RawBatch {
        RawBatch::new(Platform::Ios, records).with_source("/data/ios/u1.db")
    }

    fn android(records: Vec<RawEventRecord>) -> RawBatch {
        RawBatch::new(Platform::Android, records).with_source("/data/android/sensing_u2.dbr")
    }

    fn ios_rec(event: i64, payload: &str) -> RawEventRecord {
        RawEventRecord::new(T0, event, payload, "u1").with_device_id("dev-1")
    }

    fn android_rec(event: i64, payload: &str) -> RawEventRecord {
        RawEventRecord::new(T0, event, payload, "u2")
    }

    fn run(batch: &RawBatch) -> BatchOutput {
        Dispatcher::default().dispatch(batch).unwrap()
    }

    fn text<'a>(record: &'a NormalizedRecord, column: &str) -> Option<&'a str> {
        record.get(column).and_then(FieldValue::as_str)
    }

    #[test]
    fn test_android_battery_feeds_level_and_state() {
        let out = run(&android(vec![android_rec(171, r#"{"level": 87, "state": 2}"#)]));

        let level = out.stream(Stream::BatteryLevel);
        assert_eq!(level.len(), 1);
        assert_eq!(level[0].get("battery_left"), Some(&FieldValue::Float(87.0)));

        let state = out.stream(Stream::BatteryState);
        assert_eq!(state.len(), 1);
        assert_eq!(text(&state[0], "battery_state"), Some("charging"));
        assert_eq!(text(&state[0], "user_id"), Some("u2"));
        assert!(out.audit.failures.is_empty());
    }

    #[test]
    fn test_unmapped_battery_code_only_costs_the_state_row() {
        let out = run(&android(vec![android_rec(171, r#"{"level": 50, "state": 9}"#)]));

        assert_eq!(out.stream(Stream::BatteryLevel).len(), 1);
        assert!(out.stream(Stream::BatteryState).is_empty());
        assert_eq!(out.audit.failures.len(), 1);
        let failure = &out.audit.failures[0];
        assert_eq!(failure.kind, FailureKind::ValueMappingFailure);
        assert_eq!(failure.stream, Some(Stream::BatteryState));
        assert_eq!(failure.disposition, Disposition::RecordExcluded);
    }

    #[test]
    fn test_unknown_event_types_are_skipped_silently() {
        let out = run(&ios(vec![ios_rec(4242, "{}"), ios_rec(11, r#"{"timestamp": 1709500823, "battery_left": 0.8}"#)]));

        assert_eq!(
            out.audit.skipped_event_types,
            BTreeSet::from([EventTypeId::Code(4242)])
        );
        assert!(out.audit.failures.is_empty());
        assert_eq!(out.stream(Stream::BatteryLevel).len(), 1);
    }

    #[test]
    fn test_one_malformed_record_is_excluded() {
        let good = r#"{"timestamp": 1709500823, "brightness": 0.5}"#;
        let out = run(&ios(vec![
            ios_rec(13, good),
            ios_rec(13, "not json at all"),
            ios_rec(13, good),
            ios_rec(13, good),
        ]));

        assert_eq!(out.stream(Stream::Brightness).len(), 3);
        assert_eq!(out.audit.failures.len(), 1);
        let failure = &out.audit.failures[0];
        assert_eq!(failure.kind, FailureKind::MalformedPayload);
        assert_eq!(failure.record_index, 1);
        assert_eq!(failure.stream, Some(Stream::Brightness));
    }

    #[test]
    fn test_truncated_location_is_repaired() {
        let out = run(&ios(vec![ios_rec(151, r#"{"latitude": 47.37, "longitude": 8.54"#)]));

        let rows = out.stream(Stream::Location);
        assert_eq!(rows.len(), 1);
        let lat = rows[0].get("latitude").and_then(FieldValue::as_f64).unwrap();
        let lon = rows[0].get("longitude").and_then(FieldValue::as_f64).unwrap();
        assert!((lat - 47.37).abs() < 1e-9);
        assert!((lon - 8.54).abs() < 1e-9);
        assert_eq!(rows[0].get("altitude"), Some(&FieldValue::Null));
        assert_eq!(text(&rows[0], "source"), Some("all"));
    }

    #[test]
    fn test_location_rules_accumulate_into_one_stream() {
        let fix = r#"{"latitude": 47.37, "longitude": 8.54}"#;
        let out = run(&ios(vec![ios_rec(151, fix), ios_rec(152, fix), ios_rec(151, fix)]));

        let sources: Vec<_> = out
            .stream(Stream::Location)
            .iter()
            .map(|r| text(r, "source").unwrap())
            .collect();
        assert_eq!(sources, vec!["all", "all", "app"]);
    }

    #[test]
    fn test_wifi_scan_explodes_into_rows() {
        let scan = r#"{"scan": [
            {"BSSID": "aa:01", "SSID": "eduroam", "FREQUENCY": 2412, "CAPABILITY": "[WPA2]", "LEVEL": -61},
            {"BSSID": "aa:02", "SSID": "guest", "FREQUENCY": 5180, "CAPABILITY": "[ESS]", "LEVEL": -70},
            {"BSSID": "aa:03", "SSID": "", "FREQUENCY": 5200, "CAPABILITY": "", "LEVEL": -88}
        ]}"#;
        let out = run(&android(vec![android_rec(9, scan)]));

        let rows = out.stream(Stream::WifiScanned);
        assert_eq!(rows.len(), 3);
        let expected_ts = Normalizer::default().instant(T0, TimeUnit::Seconds).unwrap();
        for row in rows {
            assert_eq!(row.get("timestamp"), Some(&FieldValue::Timestamp(expected_ts)));
            assert_eq!(text(row, "user_id"), Some("u2"));
        }
        assert_eq!(text(&rows[1], "ssid"), Some("guest"));
        assert_eq!(rows[0].get("level"), Some(&FieldValue::Float(-61.0)));
    }

    #[test]
    fn test_empty_scan_yields_no_rows_and_no_failure() {
        let out = run(&android(vec![android_rec(10, r#"{"devices": []}"#)]));
        assert!(out.stream(Stream::Bluetooth).is_empty());
        assert!(out.audit.failures.is_empty());
        assert!(out.audit.skipped_event_types.is_empty());
    }

    #[test]
    fn test_disconnected_wifi_nulls_identifiers() {
        let out = run(&android(vec![
            android_rec(91, r#"{"state": "connected", "bssid": "aa:01", "SSID": "eduroam"}"#),
            android_rec(91, r#"{"state": "disconnected", "bssid": "aa:01", "SSID": "eduroam"}"#),
        ]));

        let rows = out.stream(Stream::WifiConnected);
        assert_eq!(rows.len(), 2);
        assert_eq!(text(&rows[0], "ssid"), Some("eduroam"));
        assert_eq!(rows[1].get("ssid"), Some(&FieldValue::Null));
        assert_eq!(rows[1].get("bssid"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_upper_case_location_keys() {
        let fix = r#"{"LATITUDE": 47.37, "LONGITUDE": 8.54, "ACCURACY": 12.0, "ALTITUDE": 408,
                      "PROVIDER": "fused", "STAELLITES": 7, "SPEED": 1.2, "HASSPEED": 1,
                      "TRAVELSTATE": "walking"}"#;
        let out = run(&android(vec![android_rec(2, fix)]));

        let location = out.stream(Stream::Location);
        assert_eq!(text(&location[0], "source"), Some("fused"));
        assert_eq!(location[0].get("altitude"), Some(&FieldValue::Float(408.0)));

        let more = out.stream(Stream::LocationMore);
        assert_eq!(more[0].get("satellites"), Some(&FieldValue::Int(7)));
        assert_eq!(more[0].get("hasspeed"), Some(&FieldValue::Bool(true)));
        assert_eq!(more[0].get("bearing"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_soft_failure_nulls_field_and_keeps_row() {
        let fix = r#"{"LATITUDE": 47.37, "LONGITUDE": 8.54, "SPEED": "fast"}"#;
        let out = run(&android(vec![android_rec(2, fix)]));

        let more = out.stream(Stream::LocationMore);
        assert_eq!(more.len(), 1);
        assert_eq!(more[0].get("speed"), Some(&FieldValue::Null));
        assert_eq!(out.audit.failures.len(), 1);
        assert_eq!(out.audit.failures[0].disposition, Disposition::FieldNulled);
        assert_eq!(out.audit.excluded(), 0);
    }

    #[test]
    fn test_call_log_literal_list_uses_call_date() {
        let calls = "[{'number': '83653d9d', 'type': 2, 'date': 1701967333263, 'duration': 73}, \
                     {'number': 'a41b5e08', 'type': 42, 'date': 1701967400000, 'duration': 0}]";
        let out = run(&android(vec![android_rec(210, calls)]));

        let rows = out.stream(Stream::CallLog);
        assert_eq!(rows.len(), 2);
        assert_eq!(text(&rows[0], "calltype"), Some("outgoing"));
        assert_eq!(rows[1].get("calltype"), Some(&FieldValue::Null));
        assert_eq!(rows[0].get("duration"), Some(&FieldValue::Float(73.0)));
        let expected = Normalizer::default()
            .instant(1_701_967_333_263.0, TimeUnit::Milliseconds)
            .unwrap();
        assert_eq!(rows[0].get("timestamp"), Some(&FieldValue::Timestamp(expected)));
    }

    #[test]
    fn test_wifi_state_rows_are_distinct() {
        let state = r#"{"timestamp": 1709500823, "wifi_connected": 1, "wifi_enabled": 1}"#;
        let other = r#"{"timestamp": 1709500900, "wifi_connected": 0, "wifi_enabled": 1}"#;
        let out = run(&ios(vec![ios_rec(181, state), ios_rec(181, state), ios_rec(181, other)]));
        assert_eq!(out.stream(Stream::WifiState).len(), 2);
    }

    #[test]
    fn test_pedometer_fields_are_positional() {
        let out = run(&ios(vec![ios_rec(21, "1709500883,15,9.089999999850988,0,1")]));

        let rows = out.stream(Stream::StepsIos);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("step_count"), Some(&FieldValue::Int(15)));
        assert_eq!(rows[0].get("floors_descended"), Some(&FieldValue::Float(1.0)));
        let start = rows[0].get("start_time").and_then(FieldValue::as_timestamp).unwrap();
        let end = rows[0].get("end_time").and_then(FieldValue::as_timestamp).unwrap();
        assert_eq!((*end - *start).num_seconds(), 60);
    }

    #[test]
    fn test_missing_payload_timestamp_excludes_row() {
        let out = run(&ios(vec![ios_rec(11, r#"{"battery_left": 0.8}"#)]));
        assert!(out.stream(Stream::BatteryLevel).is_empty());
        assert_eq!(out.audit.failures[0].kind, FailureKind::FieldCoercionFailure);
    }

    const STEP_SAMPLE: &str = r#"{"sample_type": "HKQuantityTypeIdentifierStepCount",
        "sample_quantity": "152 count",
        "start_date": "2024-03-03 02:15:00 am Namittag +0100",
        "end_date": "2024-03-03 02:25:00 am Namittag +0100",
        "source": "<<HKSourceRevision: 0x2830>, name:Phone, bundle:com.apple.health.81A1, version:17.3, productType:iPhone14,5, operatingSystemVersion:17.3.1>"}"#;

    #[test]
    fn test_healthkit_steps_and_device_metadata() {
        let other_sample = r#"{"sample_type": "HKQuantityTypeIdentifierHeartRate",
            "sample_quantity": "61 count/min", "start_date": "2024-03-03 02:15:00 am Namittag +0100",
            "end_date": "2024-03-03 02:15:00 am Namittag +0100", "source": "watch"}"#;
        let out = run(&ios(vec![
            ios_rec(22, STEP_SAMPLE),
            ios_rec(22, STEP_SAMPLE),
            ios_rec(22, other_sample),
        ]));

        let steps = out.stream(Stream::Steps);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].get("steps"), Some(&FieldValue::Int(152)));
        let start = steps[0].get("start_time").and_then(FieldValue::as_timestamp).unwrap();
        assert_eq!(start.to_rfc3339(), "2024-03-03T14:15:00+01:00");

        let devices = out.stream(Stream::DeviceInfo);
        assert_eq!(devices.len(), 1);
        let device = &devices[0];
        assert_eq!(text(device, "device_id"), Some("dev-1"));
        assert_eq!(text(device, "os"), Some("ios"));
        assert_eq!(text(device, "name"), Some("Phone"));
        assert_eq!(text(device, "producttype"), Some("iPhone14,5"));
        assert_eq!(text(device, "operatingsystemversion"), Some("17.3.1"));
        assert!(device.get("start_time").unwrap().as_timestamp().is_some());
        assert!(out.audit.failures.is_empty());
    }

    #[test]
    fn test_device_metadata_stays_with_its_device() {
        let battery = r#"{"timestamp": 1709500823, "battery_left": 0.8}"#;
        let out = run(&ios(vec![
            RawEventRecord::new(T0, 11_i64, battery, "u1").with_device_id("phone"),
            RawEventRecord::new(T0, 22_i64, STEP_SAMPLE, "u1").with_device_id("watch"),
        ]));

        let devices = out.stream(Stream::DeviceInfo);
        assert_eq!(devices.len(), 2);
        let phone = devices
            .iter()
            .find(|d| text(d, "device_id") == Some("phone"))
            .unwrap();
        let watch = devices
            .iter()
            .find(|d| text(d, "device_id") == Some("watch"))
            .unwrap();
        assert_eq!(phone.get("name"), Some(&FieldValue::Null));
        assert_eq!(text(watch, "name"), Some("Phone"));
        assert_eq!(text(watch, "producttype"), Some("iPhone14,5"));
    }

    #[test]
    fn test_descriptor_without_device_id_takes_batch_identity() {
        let out = run(&ios(vec![
            RawEventRecord::new(T0, 13_i64, r#"{"timestamp": 1709500823, "brightness": 0.5}"#, "u1")
                .with_device_id("dev-1"),
            RawEventRecord::new(T0, 22_i64, STEP_SAMPLE, "u1"),
        ]));

        let devices = out.stream(Stream::DeviceInfo);
        let described: Vec<_> = devices
            .iter()
            .filter(|d| text(d, "name").is_some())
            .collect();
        assert_eq!(described.len(), 1);
        assert_eq!(text(described[0], "device_id"), Some("dev-1"));
    }

    #[test]
    fn test_android_device_info_is_not_provided() {
        let out = run(&android(vec![
            android_rec(136, r#"{"screen_state": 1}"#),
            android_rec(136, r#"{"screen_state": 0}"#),
        ]));

        let devices = out.stream(Stream::DeviceInfo);
        assert_eq!(devices.len(), 1);
        assert_eq!(text(&devices[0], "device_id"), Some(DEVICE_ID_NOT_PROVIDED));
        assert_eq!(text(&devices[0], "os"), Some("android"));
        assert_eq!(out.stream(Stream::Screen).len(), 2);
    }

    #[test]
    fn test_acknowledged_markers_are_neither_rows_nor_skips() {
        let out = run(&android(vec![android_rec(11, ""), android_rec(199, "anything")]));
        assert!(out.audit.skipped_event_types.is_empty());
        assert!(out.audit.failures.is_empty());
        assert_eq!(out.row_count(), out.stream(Stream::DeviceInfo).len());
    }

    #[test]
    fn test_disabled_streams_are_suppressed() {
        let config = EngineConfig::default().with_streams([Stream::BatteryLevel]);
        let batch = android(vec![android_rec(171, r#"{"level": 87, "state": 2}"#)]);
        let out = Dispatcher::new(config).dispatch(&batch).unwrap();

        assert_eq!(out.streams.keys().copied().collect::<Vec<_>>(), vec![Stream::BatteryLevel]);
        assert!(out.audit.suppressed_streams.contains(&Stream::BatteryState));
        assert!(out.audit.suppressed_streams.contains(&Stream::DeviceInfo));
        assert_eq!(out.audit.rows_out, 1);
    }

    #[test]
    fn test_every_row_conforms_to_registry() {
        let out = run(&android(vec![
            android_rec(171, r#"{"level": 87, "state": 5}"#),
            android_rec(902, "[1]"),
            android_rec(202, r#"{"start_time": 1709500000000, "end_time": 1709500060000, "steps": 40, "steps_since_boot": 9000, "time_since_boot": 86400}"#),
            android_rec(211, "[{'address': 'a41b', 'type': 1, 'date': 1699082630522, 'read': 1, 'body': 18, 'status': -1, 'thread_id': 6}]"),
            android_rec(22, r#"{"apps": [{"package_name": "ch.sbb", "package_category": "travel", "time_in_foreground": 120000, "last_time_used": 1709500000000}]}"#),
            android_rec(301, r#"{"package": "ch.sbb", "posted": true}"#),
        ]));

        assert!(out.audit.failures.is_empty(), "{:?}", out.audit.failures);
        assert_eq!(out.row_count(), 8);
        for rows in out.streams.values() {
            for row in rows {
                assert_eq!(registry::validate(row), Ok(()));
            }
        }
        let notification = &out.stream(Stream::Notifications)[0];
        assert!(matches!(notification.get("payload"), Some(FieldValue::Json(_))));
    }

    #[test]
    fn test_invalid_batch_is_fatal() {
        let batch = android(vec![RawEventRecord::new(T0, 171_i64, "{}", "")]);
        assert!(matches!(
            Dispatcher::default().dispatch(&batch),
            Err(BatchError::MissingColumn { column: "user_id", .. })
        ));
    }

    static CUSTOM_TABLE: RuleTable = RuleTable {
        platform: Platform::Android,
        version: "test",
        rules: &[DecodeRule {
            event_type: RuleKey::Tag("hr"),
            name: "tagged_heart_beat",
            mode: DecodeMode::Scalar,
            projections: &[Projection::new(
                Stream::HeartBeat,
                &[
                    FieldSpec::record_time("timestamp"),
                    FieldSpec::new("heart_beat", Source::Scalar, Conversion::Float),
                ],
            )],
            ..BASE
        }],
    };

    #[test]
    fn test_new_event_type_is_one_table_entry() {
        let batch = android(vec![RawEventRecord::new(T0, "hr", "72", "u2")]);
        let out = Dispatcher::default()
            .dispatch_with_table(&CUSTOM_TABLE, &batch)
            .unwrap();
        assert_eq!(out.stream(Stream::HeartBeat)[0].get("heart_beat"), Some(&FieldValue::Float(72.0)));
    }
}
