//! Android event log rules
//!
//! Record timestamps are epoch seconds; timestamps inside call, SMS, step and
//! app-usage payloads are epoch milliseconds. Records carry no device id.

use super::{
    DecodeRule, FieldSpec, KeyCase, NullWhen, Projection, RuleKey, RuleTable, Source, BASE,
};
use crate::decode::DecodeMode;
use crate::normalizer::{Conversion, TimeUnit, ANDROID_BATTERY_STATE, ANDROID_CALL_TYPE};
use crate::schema::Stream;
use crate::types::Platform;

const MILLIS: Conversion = Conversion::Instant(TimeUnit::Milliseconds);

pub static ANDROID_RULES: RuleTable = RuleTable {
    platform: Platform::Android,
    version: "android.v1",
    rules: &[
        DecodeRule {
            event_type: RuleKey::Code(171),
            name: "battery",
            projections: &[
                Projection::new(
                    Stream::BatteryLevel,
                    &[
                        FieldSpec::record_time("timestamp"),
                        FieldSpec::renamed("battery_left", "level", Conversion::Float),
                    ],
                ),
                Projection::new(
                    Stream::BatteryState,
                    &[
                        FieldSpec::record_time("timestamp"),
                        FieldSpec::renamed(
                            "battery_state",
                            "state",
                            Conversion::Enum(&ANDROID_BATTERY_STATE),
                        ),
                    ],
                ),
            ],
            ..BASE
        },
        // Keys arrive upper-case; "staellites" and "newwork" are the vendor's spelling.
        DecodeRule {
            event_type: RuleKey::Code(2),
            name: "location",
            key_case: KeyCase::Lower,
            projections: &[
                Projection::new(
                    Stream::Location,
                    &[
                        FieldSpec::record_time("timestamp"),
                        FieldSpec::same("latitude", Conversion::Float),
                        FieldSpec::same("longitude", Conversion::Float),
                        FieldSpec::same("accuracy", Conversion::Float),
                        FieldSpec::same("altitude", Conversion::Float),
                        FieldSpec::renamed("source", "provider", Conversion::Text),
                    ],
                ),
                Projection::new(
                    Stream::LocationMore,
                    &[
                        FieldSpec::record_time("timestamp"),
                        FieldSpec::renamed("satellites", "staellites", Conversion::Int).or_null(),
                        FieldSpec::same("speed", Conversion::Float).or_null(),
                        FieldSpec::same("newworklocationsource", Conversion::Text).or_null(),
                        FieldSpec::same("bearing", Conversion::Float).or_null(),
                        FieldSpec::same("hasbearing", Conversion::Bool).or_null(),
                        FieldSpec::same("newworklocationtype", Conversion::Text).or_null(),
                        FieldSpec::same("hasspeed", Conversion::Bool).or_null(),
                        FieldSpec::same("travelstate", Conversion::Text).or_null(),
                    ],
                ),
            ],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(902),
            name: "location_ping",
            mode: DecodeMode::Scalar,
            projections: &[Projection::new(
                Stream::LocationPing,
                &[
                    FieldSpec::record_time("timestamp"),
                    FieldSpec::new("ping", Source::Scalar, Conversion::Bool),
                ],
            )],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(91),
            name: "wifi_connected",
            null_when: Some(NullWhen {
                field: "state",
                equals: "disconnected",
                columns: &["bssid", "ssid"],
            }),
            projections: &[Projection::new(
                Stream::WifiConnected,
                &[
                    FieldSpec::record_time("timestamp"),
                    FieldSpec::same("bssid", Conversion::Text),
                    FieldSpec::renamed("ssid", "SSID", Conversion::Text),
                ],
            )],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(9),
            name: "wifi_scan",
            mode: DecodeMode::ObjectListUnderKey,
            key_case: KeyCase::Lower,
            projections: &[Projection::new(
                Stream::WifiScanned,
                &[
                    FieldSpec::record_time("timestamp"),
                    FieldSpec::same("bssid", Conversion::Text),
                    FieldSpec::same("ssid", Conversion::Text),
                    FieldSpec::same("frequency", Conversion::Float),
                    FieldSpec::same("capability", Conversion::Text),
                    FieldSpec::same("level", Conversion::Float),
                ],
            )],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(10),
            name: "bluetooth_scan",
            mode: DecodeMode::ObjectListUnderKey,
            projections: &[Projection::new(
                Stream::Bluetooth,
                &[
                    FieldSpec::record_time("timestamp"),
                    FieldSpec::renamed("bt_address", "DEVICE", Conversion::Text),
                    FieldSpec::renamed("bt_rssi", "RSSI", Conversion::Int),
                    FieldSpec::renamed("bt_class", "CLASS", Conversion::Text),
                ],
            )],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(202),
            name: "steps",
            projections: &[Projection::new(
                Stream::Steps,
                &[
                    FieldSpec::same("start_time", MILLIS),
                    FieldSpec::same("end_time", MILLIS),
                    FieldSpec::same("steps", Conversion::Int),
                    FieldSpec::same("steps_since_boot", Conversion::Int),
                    FieldSpec::same("time_since_boot", Conversion::Int),
                ],
            )],
            ..BASE
        },
        // "[{'number': '8365…', 'type': 2, 'date': 1701967333263, 'duration': 73}]"
        DecodeRule {
            event_type: RuleKey::Code(210),
            name: "call_log",
            mode: DecodeMode::LiteralList,
            projections: &[Projection::new(
                Stream::CallLog,
                &[
                    FieldSpec::renamed("timestamp", "date", MILLIS),
                    FieldSpec::renamed("callid", "number", Conversion::Text),
                    FieldSpec::renamed("calltype", "type", Conversion::Enum(&ANDROID_CALL_TYPE)),
                    FieldSpec::same("duration", Conversion::Float),
                ],
            )],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(136),
            name: "screen",
            projections: &[Projection::new(
                Stream::Screen,
                &[
                    FieldSpec::record_time("timestamp"),
                    FieldSpec::renamed("lockstate", "screen_state", Conversion::Bool),
                ],
            )],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(211),
            name: "sms",
            mode: DecodeMode::LiteralList,
            projections: &[Projection::new(
                Stream::Sms,
                &[
                    FieldSpec::renamed("timestamp", "date", MILLIS),
                    FieldSpec::same("address", Conversion::Text),
                    FieldSpec::same("type", Conversion::Int),
                    FieldSpec::same("read", Conversion::Int),
                    FieldSpec::same("body", Conversion::Int),
                    FieldSpec::same("status", Conversion::Int),
                    FieldSpec::same("thread_id", Conversion::Int),
                ],
            )],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(22),
            name: "app_usage",
            mode: DecodeMode::ObjectListUnderKey,
            projections: &[Projection::new(
                Stream::AppUsage,
                &[
                    FieldSpec::renamed("timestamp", "last_time_used", MILLIS),
                    FieldSpec::same("package_name", Conversion::Text),
                    FieldSpec::same("package_category", Conversion::Text),
                    FieldSpec::same("time_in_foreground", Conversion::Int),
                ],
            )],
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(11),
            name: "services_started",
            mode: DecodeMode::Acknowledged,
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(199),
            name: "services_running",
            mode: DecodeMode::Acknowledged,
            ..BASE
        },
        DecodeRule {
            event_type: RuleKey::Code(301),
            name: "notifications",
            projections: &[Projection::new(
                Stream::Notifications,
                &[
                    FieldSpec::record_time("timestamp"),
                    FieldSpec::new("payload", Source::WholeObject, Conversion::Json),
                ],
            )],
            ..BASE
        },
    ],
};
