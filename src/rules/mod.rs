//! Event-type rule tables
//!
//! Per-event-type behaviour is data, not code: each platform has one static,
//! versioned table of `DecodeRule`s keyed by event type. A rule names the
//! decode mode, the projection of decoded fields onto one or more output
//! streams, and the few data clauses some event types need (row filters,
//! conditional nulling, key case folding). Adding an event type is one entry.

mod android;
mod ios;

pub use android::ANDROID_RULES;
pub use ios::{HEALTHKIT_DAY_PERIODS, IOS_RULES};

use crate::decode::DecodeMode;
use crate::error::DecodeFailure;
use crate::normalizer::{Conversion, TimeUnit};
use crate::schema::Stream;
use crate::types::{EventTypeId, Platform};
use serde::Serialize;
use std::fmt;

/// Event-type key of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKey {
    Code(i64),
    Tag(&'static str),
}

impl RuleKey {
    pub fn matches(&self, id: &EventTypeId) -> bool {
        match (self, id) {
            (RuleKey::Code(a), EventTypeId::Code(b)) => a == b,
            (RuleKey::Tag(a), EventTypeId::Tag(b)) => *a == b.as_str(),
            _ => false,
        }
    }

    pub fn to_id(&self) -> EventTypeId {
        match self {
            RuleKey::Code(code) => EventTypeId::Code(*code),
            RuleKey::Tag(tag) => EventTypeId::Tag((*tag).to_string()),
        }
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKey::Code(code) => write!(f, "{code}"),
            RuleKey::Tag(tag) => f.write_str(tag),
        }
    }
}

/// Where a column's raw value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Named key of an object row
    Field(&'static str),
    /// Index of a delimited row
    Position(usize),
    /// The decoded scalar itself
    Scalar,
    /// The raw record's own timestamp
    RecordTimestamp,
    /// A fixed text value
    Constant(&'static str),
    /// The whole decoded row, kept as JSON
    WholeObject,
}

/// Error policy of a single column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    /// A conversion failure excludes the row from its stream
    DropRecord,
    /// A conversion failure nulls the column; the row is kept
    NullField,
}

/// One column of a projection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub column: &'static str,
    pub source: Source,
    pub conversion: Conversion,
    pub on_error: OnError,
}

impl FieldSpec {
    pub const fn new(column: &'static str, source: Source, conversion: Conversion) -> Self {
        Self {
            column,
            source,
            conversion,
            on_error: OnError::DropRecord,
        }
    }

    /// Column read from the object key of the same name
    pub const fn same(column: &'static str, conversion: Conversion) -> Self {
        Self::new(column, Source::Field(column), conversion)
    }

    /// Column read from a differently named object key
    pub const fn renamed(column: &'static str, key: &'static str, conversion: Conversion) -> Self {
        Self::new(column, Source::Field(key), conversion)
    }

    pub const fn at(column: &'static str, idx: usize, conversion: Conversion) -> Self {
        Self::new(column, Source::Position(idx), conversion)
    }

    /// The record's own timestamp, in seconds
    pub const fn record_time(column: &'static str) -> Self {
        Self::new(
            column,
            Source::RecordTimestamp,
            Conversion::Instant(TimeUnit::Seconds),
        )
    }

    pub const fn constant(column: &'static str, value: &'static str) -> Self {
        Self::new(column, Source::Constant(value), Conversion::Text)
    }

    pub const fn or_null(self) -> Self {
        Self {
            on_error: OnError::NullField,
            ..self
        }
    }
}

/// Keep only rows whose field equals a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filter {
    pub field: &'static str,
    pub equals: &'static str,
}

/// Null a set of columns when a field equals a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NullWhen {
    pub field: &'static str,
    pub equals: &'static str,
    pub columns: &'static [&'static str],
}

/// Decoded rows → one output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection {
    pub stream: Stream,
    pub fields: &'static [FieldSpec],
    /// Drop rows identical to one already produced by this rule in the batch
    pub distinct: bool,
}

impl Projection {
    pub const fn new(stream: Stream, fields: &'static [FieldSpec]) -> Self {
        Self {
            stream,
            fields,
            distinct: false,
        }
    }

    pub const fn distinct(self) -> Self {
        Self {
            distinct: true,
            ..self
        }
    }
}

/// Case folding of object keys before projection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCase {
    AsIs,
    Lower,
}

/// A payload field holding a device descriptor, and the column that dates it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorSpec {
    pub field: &'static str,
    pub observed_at: FieldSpec,
}

/// How one event type is decoded and projected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeRule {
    pub event_type: RuleKey,
    pub name: &'static str,
    pub mode: DecodeMode,
    pub key_case: KeyCase,
    pub filter: Option<Filter>,
    pub null_when: Option<NullWhen>,
    pub projections: &'static [Projection],
    pub device_descriptor: Option<DescriptorSpec>,
}

impl DecodeRule {
    /// Stream failures of a whole record are reported under
    pub fn primary_stream(&self) -> Option<Stream> {
        self.projections.first().map(|p| p.stream)
    }

    pub fn streams(&self) -> impl Iterator<Item = Stream> + '_ {
        self.projections.iter().map(|p| p.stream)
    }
}

/// Defaults for table entries; entries override what they need
pub(crate) const BASE: DecodeRule = DecodeRule {
    event_type: RuleKey::Code(0),
    name: "",
    mode: DecodeMode::Object,
    key_case: KeyCase::AsIs,
    filter: None,
    null_when: None,
    projections: &[],
    device_descriptor: None,
};

/// The versioned rule set of one platform
#[derive(Debug)]
pub struct RuleTable {
    pub platform: Platform,
    pub version: &'static str,
    pub rules: &'static [DecodeRule],
}

impl RuleTable {
    pub fn for_platform(platform: Platform) -> &'static RuleTable {
        match platform {
            Platform::Ios => &IOS_RULES,
            Platform::Android => &ANDROID_RULES,
        }
    }

    pub fn rule(&self, event_type: &EventTypeId) -> Option<&'static DecodeRule> {
        self.rules.iter().find(|r| r.event_type.matches(event_type))
    }

    pub fn require(&self, event_type: &EventTypeId) -> Result<&'static DecodeRule, DecodeFailure> {
        self.rule(event_type)
            .ok_or_else(|| DecodeFailure::UnsupportedEventType(event_type.clone()))
    }

    /// Summary rows for listings
    pub fn summaries(&self) -> Vec<RuleSummary> {
        self.rules
            .iter()
            .map(|rule| RuleSummary {
                event_type: rule.event_type.to_id(),
                name: rule.name,
                mode: mode_name(rule.mode),
                streams: rule.streams().collect(),
            })
            .collect()
    }
}

/// Serializable view of one rule
#[derive(Debug, Clone, Serialize)]
pub struct RuleSummary {
    pub event_type: EventTypeId,
    pub name: &'static str,
    pub mode: &'static str,
    pub streams: Vec<Stream>,
}

fn mode_name(mode: DecodeMode) -> &'static str {
    match mode {
        DecodeMode::Object => "object",
        DecodeMode::ObjectListUnderKey => "object_list",
        DecodeMode::DelimitedScalars { .. } => "delimited",
        DecodeMode::Scalar => "scalar",
        DecodeMode::LiteralList => "literal_list",
        DecodeMode::Acknowledged => "acknowledged",
    }
}
