//! Output encoding and sink handoff
//!
//! This module hands normalized streams to a sink and encodes batch reports.
//! `StreamSink` is the seam to the external bulk loader: it receives one
//! stream's rows at a time and reports how many it accepted and rejected.

use crate::dispatcher::{BatchAudit, BatchOutput};
use crate::error::SinkError;
use crate::schema::{registry, Stream};
use crate::types::{NormalizedRecord, Platform};
use crate::{FLUX_VERSION, PRODUCER_NAME};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Current batch report version
pub const REPORT_VERSION: &str = "1.0.0";

/// Row counts a sink reports for one stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkOutcome {
    pub appended: usize,
    pub rejected: usize,
}

/// Destination of normalized streams
pub trait StreamSink {
    /// Append the rows of one stream; row-level rejections are counted,
    /// only transport failures are errors.
    fn append(&mut self, stream: Stream, rows: &[NormalizedRecord])
        -> Result<SinkOutcome, SinkError>;
}

/// Per-stream sink outcomes of one handoff
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HandoffReport {
    pub streams: BTreeMap<Stream, SinkOutcome>,
}

impl HandoffReport {
    pub fn appended(&self) -> usize {
        self.streams.values().map(|o| o.appended).sum()
    }

    pub fn rejected(&self) -> usize {
        self.streams.values().map(|o| o.rejected).sum()
    }
}

/// Feed every stream of a batch to a sink
pub fn handoff<S: StreamSink + ?Sized>(
    output: &BatchOutput,
    sink: &mut S,
) -> Result<HandoffReport, SinkError> {
    let mut report = HandoffReport::default();
    for (stream, rows) in &output.streams {
        let outcome = sink.append(*stream, rows)?;
        if outcome.rejected > 0 {
            warn!(
                batch_id = %output.batch_id,
                stream = stream.as_str(),
                rejected = outcome.rejected,
                "sink rejected rows"
            );
        }
        report.streams.insert(*stream, outcome);
    }
    info!(
        batch_id = %output.batch_id,
        appended = report.appended(),
        rejected = report.rejected(),
        "batch handed off"
    );
    Ok(report)
}

/// Rows that do not belong to the stream or break its shape are rejected
fn accepts(stream: Stream, row: &NormalizedRecord) -> bool {
    row.stream() == stream && registry::validate(row).is_ok()
}

#[derive(Serialize)]
struct TaggedRow<'a> {
    stream: Stream,
    row: &'a NormalizedRecord,
}

/// NDJSON sink writing every stream to one writer, each line tagged with
/// its stream (`{"stream": "LOCATION", "row": {...}}`)
pub struct NdjsonWriterSink<W: Write> {
    writer: W,
}

impl<W: Write> NdjsonWriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> StreamSink for NdjsonWriterSink<W> {
    fn append(
        &mut self,
        stream: Stream,
        rows: &[NormalizedRecord],
    ) -> Result<SinkOutcome, SinkError> {
        let mut outcome = SinkOutcome::default();
        for row in rows {
            if !accepts(stream, row) {
                outcome.rejected += 1;
                continue;
            }
            serde_json::to_writer(&mut self.writer, &TaggedRow { stream, row })?;
            self.writer.write_all(b"\n")?;
            outcome.appended += 1;
        }
        self.writer.flush()?;
        Ok(outcome)
    }
}

/// NDJSON sink writing one `<STREAM>.ndjson` file per stream into a directory.
/// Files are appended to, so several batches can share a directory.
#[derive(Debug, Clone)]
pub struct NdjsonDirSink {
    dir: PathBuf,
}

impl NdjsonDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, stream: Stream) -> PathBuf {
        self.dir.join(format!("{}.ndjson", stream.as_str()))
    }
}

impl StreamSink for NdjsonDirSink {
    fn append(
        &mut self,
        stream: Stream,
        rows: &[NormalizedRecord],
    ) -> Result<SinkOutcome, SinkError> {
        let mut outcome = SinkOutcome::default();
        let mut buf = Vec::new();
        for row in rows {
            if !accepts(stream, row) {
                outcome.rejected += 1;
                continue;
            }
            serde_json::to_writer(&mut buf, row)?;
            buf.push(b'\n');
            outcome.appended += 1;
        }

        if outcome.appended > 0 {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path_for(stream))?;
            file.write_all(&buf)?;
        }
        Ok(outcome)
    }
}

/// Producer metadata embedded in reports
#[derive(Debug, Clone, Serialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Serializable summary of one dispatched batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub report_version: String,
    pub producer: ReportProducer,
    pub batch_id: Uuid,
    pub platform: Platform,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub computed_at_utc: String,
    pub stream_counts: BTreeMap<Stream, usize>,
    pub audit: BatchAudit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sink: Option<HandoffReport>,
}

/// Batch report encoder
pub struct ReportEncoder {
    instance_id: String,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn encode(&self, output: &BatchOutput, sink: Option<&HandoffReport>) -> BatchReport {
        BatchReport {
            report_version: REPORT_VERSION.to_string(),
            producer: ReportProducer {
                name: PRODUCER_NAME.to_string(),
                version: FLUX_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            batch_id: output.batch_id,
            platform: output.platform,
            source: output.source.clone(),
            computed_at_utc: Utc::now().to_rfc3339(),
            stream_counts: output
                .streams
                .iter()
                .map(|(stream, rows)| (*stream, rows.len()))
                .collect(),
            audit: output.audit.clone(),
            sink: sink.cloned(),
        }
    }

    pub fn encode_to_json(
        &self,
        output: &BatchOutput,
        sink: Option<&HandoffReport>,
    ) -> Result<String, SinkError> {
        Ok(serde_json::to_string_pretty(&self.encode(output, sink))?)
    }
}
