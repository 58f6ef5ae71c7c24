// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeZone;

fn ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

#[test]
fn raw_od_reading_wire_format() {
    let reading = RawODReading {
        timestamp: ts(),
        angle: Angle::Deg90,
        od: 1.2,
        channel: PdChannel::Ch2,
        ir_led_intensity: 90.0,
    };
    let json = serde_json::to_value(&reading).unwrap();
    assert_eq!(json["angle"], "90");
    assert_eq!(json["channel"], "2");
    assert_eq!(json["od"], 1.2);

    let decoded: RawODReading = serde_json::from_value(json).unwrap();
    assert_eq!(decoded, reading);
}

#[test]
fn od_readings_key_channels_by_string() {
    let reading = RawODReading {
        timestamp: ts(),
        angle: Angle::Deg45,
        od: 0.4,
        channel: PdChannel::Ch1,
        ir_led_intensity: 70.0,
    };
    let mut ods = BTreeMap::new();
    ods.insert(PdChannel::Ch1, reading);
    let payload = ODReadings { timestamp: ts(), ods };
    let json = serde_json::to_value(&payload).unwrap();
    assert!(json["ods"]["1"].is_object());
}

#[test]
fn dosing_event_kind_is_snake_case() {
    let event = DosingEvent {
        volume_change_ml: 1.0,
        event: DosingEventKind::AddMedia,
        source_of_event: "turbidostat".to_string(),
        timestamp: ts(),
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["event"], "add_media");
}

#[yare::parameterized(
    lower  = { "warning", Some(LogLevel::Warning) },
    upper  = { "ERROR", Some(LogLevel::Error) },
    notice = { "NOTICE", Some(LogLevel::Notice) },
    junk   = { "loud", None },
)]
fn log_level_parsing(s: &str, expected: Option<LogLevel>) {
    assert_eq!(LogLevel::parse(s), expected);
}

#[test]
fn log_levels_order_by_severity() {
    assert!(LogLevel::Debug < LogLevel::Info);
    assert!(LogLevel::Notice < LogLevel::Warning);
    assert!(LogLevel::Warning < LogLevel::Error);
}

#[yare::parameterized(
    deg45  = { "45", Some(Angle::Deg45) },
    deg180 = { "180", Some(Angle::Deg180) },
    reference = { "REF", Some(Angle::Ref) },
    bogus  = { "30", None },
)]
fn angle_parsing(s: &str, expected: Option<Angle>) {
    assert_eq!(Angle::parse(s), expected);
}
