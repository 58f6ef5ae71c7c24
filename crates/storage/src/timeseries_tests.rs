// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::{TimeZone, Utc};
use pio_core::telemetry::{Angle, DosingEventKind, LogLevel, PdChannel};

fn open_temp() -> (tempfile::TempDir, TimeseriesDb) {
    let dir = tempfile::tempdir().unwrap();
    let db = TimeseriesDb::open(&dir.path().join("timeseries.sqlite")).unwrap();
    (dir, db)
}

#[test]
fn od_readings_round_trip_oldest_first() {
    let (_dir, db) = open_temp();
    for (i, od) in [0.4, 0.45, 0.55].iter().enumerate() {
        let reading = RawODReading {
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, i as u32, 0).unwrap(),
            angle: Angle::Deg90,
            od: *od,
            channel: PdChannel::Ch1,
            ir_led_intensity: 80.0,
        };
        db.insert_od_reading("exp1", "unit1", &reading).unwrap();
    }

    let rows = db.od_readings("exp1", 10).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].value, 0.4);
    assert_eq!(rows[2].value, 0.55);
    assert!(rows[0].timestamp < rows[2].timestamp);

    assert!(db.od_readings("other_exp", 10).unwrap().is_empty());
}

#[test]
fn limit_keeps_the_most_recent() {
    let (_dir, db) = open_temp();
    for i in 0..5 {
        db.insert_growth_rate("exp1", "unit1", &format!("2026-03-01T12:0{i}:00Z"), i as f64)
            .unwrap();
    }
    let rows = db.growth_rates("exp1", 2).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].value, 3.0);
    assert_eq!(rows[1].value, 4.0);
}

#[test]
fn dosing_events_and_logs_insert() {
    let (_dir, db) = open_temp();
    db.insert_dosing_event(
        "exp1",
        "unit1",
        &DosingEvent {
            volume_change_ml: 1.0,
            event: DosingEventKind::AddMedia,
            source_of_event: "turbidostat".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        },
    )
    .unwrap();

    db.insert_log(
        "exp1",
        "unit1",
        &LogMessage {
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 1).unwrap(),
            message: "dosed 1.0 mL".to_string(),
            task: "dosing_automation".to_string(),
            source: "app".to_string(),
            level: LogLevel::Info,
        },
    )
    .unwrap();

    db.insert_temperature("exp1", "unit1", "2026-03-01T12:00:02Z", 32.1).unwrap();
    let temps = db.temperature_readings("exp1", 5).unwrap();
    assert_eq!(temps.len(), 1);
    assert_eq!(temps[0].value, 32.1);
}
