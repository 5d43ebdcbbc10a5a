//! iOS event log rules
//!
//! Record timestamps are epoch seconds. Several payloads carry their own
//! `timestamp` (also seconds) which takes precedence over the record's.

use super::{
    DecodeRule, DescriptorSpec, FieldSpec, Filter, Projection, RuleKey, RuleTable, Source, BASE,
};
use crate::decode::DecodeMode;
use crate::normalizer::{Conversion, LocaleMarkers, TimeUnit, IOS_BATTERY_STATE};
use crate::schema::Stream;
use crate::types::Platform;

/// HealthKit sample dates rendered with a German locale: day periods come
/// through as words. The misspelled marker is what the devices emit.
pub const HEALTHKIT_DAY_PERIODS: LocaleMarkers = LocaleMarkers {
    name: "healthkit",
    replacements: &[
        ("am Namittag", "PM"),
        ("am Nachmittag", "PM"),
        ("am Vormittag", "AM"),
    ],
    formats: &[
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %I:%M:%S %p %z",
        "%Y-%m-%d %H:%M:%S%.f %z",
        "%d.%m.%Y, %H:%M:%S %z",
        "%d.%m.%Y, %I:%M:%S %p %z",
    ],
};

const PAYLOAD_TIME: FieldSpec = FieldSpec::new(
    "timestamp",
    Source::Field("timestamp"),
    Conversion::Instant(TimeUnit::Seconds),
);

const SAMPLE_START: FieldSpec = FieldSpec::renamed(
    "start_time",
    "start_date",
    Conversion::LocaleInstant(&HEALTHKIT_DAY_PERIODS),
);

const COMMA: DecodeMode = DecodeMode::DelimitedScalars { delimiter: ',' };

pub static IOS_RULES: RuleTable = RuleTable {
    platform: Platform::Ios,
    version: "ios.v1",
    rules: &[
        DecodeRule {
            event_type: RuleKey::Code(151),
            name: "location_all",
            projections: &[Projection::new(
                Stream::Location,
                &[
                    FieldSpec::record_time("timestamp"),
                    FieldSpec::same("latitude", Conversion::Float),
                    FieldSpec::same("longitude", Conversion::Float),
                    FieldSpec::same("accuracy", Conversion::Float),
                    FieldSpec::same("altitude", Conversion::Float),
                    FieldSpec::constant("source", "all"),
                ],
            )],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(152),
            name: "location_app",
            projections: &[Projection::new(
                Stream::Location,
                &[
                    FieldSpec::record_time("timestamp"),
                    FieldSpec::same("latitude", Conversion::Float),
                    FieldSpec::same("longitude", Conversion::Float),
                    FieldSpec::same("accuracy", Conversion::Float),
                    FieldSpec::same("altitude", Conversion::Float),
                    FieldSpec::constant("source", "app"),
                ],
            )],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(18),
            name: "wifi_connected",
            projections: &[Projection::new(
                Stream::WifiConnected,
                &[
                    PAYLOAD_TIME,
                    FieldSpec::same("bssid", Conversion::Text),
                    FieldSpec::same("ssid", Conversion::Text),
                ],
            )],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(181),
            name: "wifi_state",
            projections: &[Projection::new(
                Stream::WifiState,
                &[
                    PAYLOAD_TIME,
                    FieldSpec::same("wifi_connected", Conversion::Bool),
                    FieldSpec::same("wifi_enabled", Conversion::Bool),
                ],
            )
            .distinct()],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(19),
            name: "bluetooth",
            projections: &[Projection::new(
                Stream::Bluetooth,
                &[
                    PAYLOAD_TIME,
                    FieldSpec::same("bt_address", Conversion::Text),
                    FieldSpec::same("bt_rssi", Conversion::Int),
                    FieldSpec::same("bt_name", Conversion::Text),
                ],
            )],
            ..BASE
        },
        // "1709500823,15,9.089999999850988,0,0": end, steps, distance, floors up/down
        DecodeRule {
            event_type: RuleKey::Code(21),
            name: "pedometer",
            mode: COMMA,
            projections: &[Projection::new(
                Stream::StepsIos,
                &[
                    FieldSpec::record_time("start_time"),
                    FieldSpec::at("end_time", 0, Conversion::Instant(TimeUnit::Seconds)),
                    FieldSpec::at("step_count", 1, Conversion::Int),
                    FieldSpec::at("est_distance", 2, Conversion::Float),
                    FieldSpec::at("floors_ascended", 3, Conversion::Float),
                    FieldSpec::at("floors_descended", 4, Conversion::Float),
                ],
            )],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(22),
            name: "healthkit_steps",
            filter: Some(Filter {
                field: "sample_type",
                equals: "HKQuantityTypeIdentifierStepCount",
            }),
            projections: &[Projection::new(
                Stream::Steps,
                &[
                    SAMPLE_START,
                    FieldSpec::renamed(
                        "end_time",
                        "end_date",
                        Conversion::LocaleInstant(&HEALTHKIT_DAY_PERIODS),
                    ),
                    // " count"
                    FieldSpec::renamed("steps", "sample_quantity", Conversion::IntDropUnitSuffix(6)),
                ],
            )],
            device_descriptor: Some(DescriptorSpec {
                field: "source",
                observed_at: SAMPLE_START,
            }),
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(23),
            name: "call_log",
            projections: &[Projection::new(
                Stream::CallLog,
                &[
                    PAYLOAD_TIME,
                    FieldSpec::renamed("callid", "callId", Conversion::Text),
                    FieldSpec::renamed("calltype", "callType", Conversion::Text),
                    FieldSpec::same("duration", Conversion::Float),
                ],
            )],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(987),
            name: "heart_beat",
            mode: DecodeMode::Scalar,
            projections: &[Projection::new(
                Stream::HeartBeat,
                &[
                    FieldSpec::record_time("timestamp"),
                    FieldSpec::new("heart_beat", Source::Scalar, Conversion::Float),
                ],
            )],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(16),
            name: "activity",
            mode: COMMA,
            projections: &[Projection::new(
                Stream::Activity,
                &[
                    FieldSpec::record_time("timestamp"),
                    FieldSpec::at("activity", 0, Conversion::Text),
                    FieldSpec::at("confidence", 1, Conversion::Text),
                ],
            )],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(13),
            name: "brightness",
            projections: &[Projection::new(
                Stream::Brightness,
                &[PAYLOAD_TIME, FieldSpec::same("brightness", Conversion::Float)],
            )],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(14),
            name: "screen",
            projections: &[Projection::new(
                Stream::Screen,
                &[
                    FieldSpec::record_time("timestamp"),
                    FieldSpec::renamed("lockstate", "LockState", Conversion::Bool),
                ],
            )],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(111),
            name: "battery_state",
            projections: &[Projection::new(
                Stream::BatteryState,
                &[
                    PAYLOAD_TIME,
                    FieldSpec::same("battery_state", Conversion::Enum(&IOS_BATTERY_STATE)),
                ],
            )],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(11),
            name: "battery_level",
            projections: &[Projection::new(
                Stream::BatteryLevel,
                &[PAYLOAD_TIME, FieldSpec::same("battery_left", Conversion::Float)],
            )],
            ..BASE
        },
    ],
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventTypeId;

    #[test]
    fn test_covers_ios_event_types() {
        for code in [151, 152, 18, 181, 19, 21, 22, 23, 987, 16, 13, 14, 111, 11] {
            assert!(
                IOS_RULES.rule(&EventTypeId::Code(code)).is_some(),
                "missing rule for {code}"
            );
        }
        assert_eq!(IOS_RULES.rules.len(), 14);
    }

    #[test]
    fn test_only_step_samples_feed_steps() {
        let rule = IOS_RULES.rule(&EventTypeId::Code(22)).unwrap();
        assert_eq!(
            rule.filter.map(|f| f.equals),
            Some("HKQuantityTypeIdentifierStepCount")
        );
        assert!(rule.device_descriptor.is_some());
    }
}
