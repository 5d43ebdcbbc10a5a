//! Device metadata records
//!
//! Every batch yields at least one DeviceInfo sighting per (user, device). On
//! iOS, HealthKit step samples additionally carry a source descriptor
//! (`name:…, bundle:…, version:…, productType:…, operatingSystemVersion:…>`)
//! from which the app and device metadata are extracted.

use crate::schema::Stream;
use crate::types::{FieldValue, NormalizedRecord, Platform};
use chrono::DateTime;
use chrono_tz::Tz;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Device id stamped when the platform does not record one
pub const DEVICE_ID_NOT_PROVIDED: &str = "not_provided";

fn descriptor_re() -> &'static Regex {
    static DESCRIPTOR_RE: OnceLock<Regex> = OnceLock::new();
    DESCRIPTOR_RE.get_or_init(|| {
        Regex::new(
            r"name:(.*?), bundle:(.*?), version:(.*?), productType:(.*?), operatingSystemVersion:(.*?)>",
        )
        .expect("valid device descriptor regex")
    })
}

/// Sub-fields of a HealthKit source descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub name: String,
    pub bundle: String,
    pub version: String,
    pub product_type: String,
    pub os_version: String,
}

/// Extract descriptor sub-fields; `None` if the text has no descriptor
pub fn parse_descriptor(text: &str) -> Option<Descriptor> {
    let caps = descriptor_re().captures(text)?;
    let field = |idx: usize| caps.get(idx).map(|m| m.as_str().trim().to_string());
    Some(Descriptor {
        name: field(1)?,
        bundle: field(2)?,
        version: field(3)?,
        product_type: field(4)?,
        os_version: field(5)?,
    })
}

/// One DeviceInfo sighting
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub user_id: String,
    /// Filled by the identity stamping step when absent
    pub device_id: Option<String>,
    pub platform: Platform,
    pub descriptor: Option<Descriptor>,
    /// First observation time of this metadata
    pub start_time: Option<DateTime<Tz>>,
}

/// Deduplication key: the full metadata tuple, excluding `start_time`
type DeviceKey = (String, Option<String>, Platform, Option<Descriptor>);

impl DeviceInfo {
    /// Identity-only sighting from a raw record
    pub fn base(user_id: &str, device_id: Option<&str>, platform: Platform) -> Self {
        Self {
            user_id: user_id.to_string(),
            device_id: device_id.map(str::to_string),
            platform,
            descriptor: None,
            start_time: None,
        }
    }

    pub fn with_descriptor(mut self, descriptor: Descriptor, observed_at: Option<DateTime<Tz>>) -> Self {
        self.descriptor = Some(descriptor);
        self.start_time = observed_at;
        self
    }

    pub fn has_metadata(&self) -> bool {
        self.descriptor.is_some()
    }

    fn key(&self) -> DeviceKey {
        (
            self.user_id.clone(),
            self.device_id.clone(),
            self.platform,
            self.descriptor.clone(),
        )
    }

    /// DEVICE_INFO row for this sighting
    pub fn to_record(&self) -> NormalizedRecord {
        let text = |v: Option<&String>| FieldValue::from(v.cloned());
        let d = self.descriptor.as_ref();
        NormalizedRecord::new(
            Stream::DeviceInfo,
            vec![
                FieldValue::from(self.user_id.as_str()),
                FieldValue::from(self.device_id.as_deref().unwrap_or(DEVICE_ID_NOT_PROVIDED)),
                FieldValue::from(self.platform.as_str()),
                text(d.map(|d| &d.name)),
                text(d.map(|d| &d.bundle)),
                text(d.map(|d| &d.version)),
                text(d.map(|d| &d.product_type)),
                text(d.map(|d| &d.os_version)),
                self.start_time
                    .map(FieldValue::Timestamp)
                    .unwrap_or(FieldValue::Null),
            ],
        )
    }
}

/// Batch-scoped set of DeviceInfo rows, first sighting wins
#[derive(Debug, Default)]
pub struct DeviceDedupSet {
    seen: HashSet<DeviceKey>,
    rows: Vec<DeviceInfo>,
}

impl DeviceDedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sighting; returns false if an identical one is already present
    pub fn insert(&mut self, info: DeviceInfo) -> bool {
        if self.seen.insert(info.key()) {
            self.rows.push(info);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<DeviceInfo> {
        self.rows
    }
}

/// Collapse sightings into one row per distinct metadata tuple.
///
/// Identity-only sightings are dropped for any (user, device) that also has
/// a metadata sighting, since the metadata row carries the same identity.
pub fn deduplicate(sightings: Vec<DeviceInfo>) -> Vec<DeviceInfo> {
    let described: HashSet<(String, Option<String>)> = sightings
        .iter()
        .filter(|s| s.has_metadata())
        .map(|s| (s.user_id.clone(), s.device_id.clone()))
        .collect();

    let mut set = DeviceDedupSet::new();
    for sighting in sightings {
        let subsumed = !sighting.has_metadata()
            && described.contains(&(sighting.user_id.clone(), sighting.device_id.clone()));
        if !subsumed {
            set.insert(sighting);
        }
    }
    set.into_rows()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::registry;
    use chrono::TimeZone;
    use chrono_tz::Europe::Zurich;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = "<<HKSourceRevision: 0x28305c3c0>, name:Anna's iPhone, \
        bundle:com.apple.health.81A1, version:17.3, productType:iPhone14,5, \
        operatingSystemVersion:17.3.1>";

    #[test]
    fn test_parse_descriptor() {
        let d = parse_descriptor(SOURCE).unwrap();
        assert_eq!(d.name, "Anna's iPhone");
        assert_eq!(d.bundle, "com.apple.health.81A1");
        assert_eq!(d.version, "17.3");
        assert_eq!(d.product_type, "iPhone14,5");
        assert_eq!(d.os_version, "17.3.1");

        assert_eq!(parse_descriptor("Health app"), None);
    }

    #[test]
    fn test_dedup_keeps_first_sighting_time() {
        let d = parse_descriptor(SOURCE).unwrap();
        let first = Zurich.with_ymd_and_hms(2024, 3, 3, 8, 0, 0).unwrap();
        let later = Zurich.with_ymd_and_hms(2024, 3, 3, 9, 0, 0).unwrap();

        let rows = deduplicate(vec![
            DeviceInfo::base("u1", Some("dev-1"), Platform::Ios),
            DeviceInfo::base("u1", Some("dev-1"), Platform::Ios),
            DeviceInfo::base("u1", Some("dev-1"), Platform::Ios).with_descriptor(d.clone(), Some(first)),
            DeviceInfo::base("u1", Some("dev-1"), Platform::Ios).with_descriptor(d, Some(later)),
        ]);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].start_time, Some(first));
    }

    #[test]
    fn test_identity_only_rows_survive_without_metadata() {
        let rows = deduplicate(vec![
            DeviceInfo::base("u1", None, Platform::Android),
            DeviceInfo::base("u1", None, Platform::Android),
            DeviceInfo::base("u2", None, Platform::Android),
        ]);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_to_record_conforms_to_registry() {
        let info = DeviceInfo::base("u1", None, Platform::Android);
        let record = info.to_record();
        assert_eq!(registry::validate(&record), Ok(()));
        assert_eq!(
            record.get("device_id").and_then(FieldValue::as_str),
            Some(DEVICE_ID_NOT_PROVIDED)
        );
        assert_eq!(record.get("os").and_then(FieldValue::as_str), Some("android"));
        assert_eq!(record.get("name"), Some(&FieldValue::Null));
    }
}
