// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn open_temp() -> (tempfile::TempDir, ScopedKv) {
    let dir = tempfile::tempdir().unwrap();
    let kv = ScopedKv::open(&dir.path().join("storage/kv.sqlite")).unwrap();
    (dir, kv)
}

#[test]
fn put_get_delete_round_trip() {
    let (_dir, kv) = open_temp();
    kv.put_str("active_calibrations", "media_pump", "fast_cal").unwrap();
    assert_eq!(
        kv.get_str("active_calibrations", "media_pump").unwrap().as_deref(),
        Some("fast_cal")
    );
    assert!(kv.delete("active_calibrations", "media_pump").unwrap());
    assert!(kv.get("active_calibrations", "media_pump").unwrap().is_none());
    assert!(!kv.delete("active_calibrations", "media_pump").unwrap());
}

#[test]
fn scopes_are_isolated() {
    let (_dir, kv) = open_temp();
    kv.put_str("active_calibrations", "stirring", "cal_a").unwrap();
    kv.put_str("pump_throughput", "stirring", "42").unwrap();
    assert_eq!(
        kv.get_str("active_calibrations", "stirring").unwrap().as_deref(),
        Some("cal_a")
    );
    assert_eq!(
        kv.get_str("pump_throughput", "stirring").unwrap().as_deref(),
        Some("42")
    );
}

#[test]
fn iteration_is_ordered_by_key() {
    let (_dir, kv) = open_temp();
    for key in ["charlie", "alpha", "bravo"] {
        kv.put_str("sessions", key, "x").unwrap();
    }
    let keys: Vec<String> = kv
        .iter("sessions")
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec!["alpha", "bravo", "charlie"]);
}

#[test]
fn values_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kv.sqlite");
    {
        let kv = ScopedKv::open(&path).unwrap();
        kv.put_json("od_calibrations", "cal1", &vec![1.0, 2.0, 3.0]).unwrap();
    }
    let kv = ScopedKv::open(&path).unwrap();
    let values: Vec<f64> = kv.get_json("od_calibrations", "cal1").unwrap().unwrap();
    assert_eq!(values, vec![1.0, 2.0, 3.0]);
}

#[test]
fn corrupt_json_reports_codec_error() {
    let (_dir, kv) = open_temp();
    kv.put("sessions", "bad", b"{not json").unwrap();
    let result: Result<Option<Vec<f64>>, _> = kv.get_json("sessions", "bad");
    assert!(matches!(result, Err(StorageError::Codec { .. })));
}

#[test]
fn overwrite_replaces_value() {
    let (_dir, kv) = open_temp();
    kv.put_str("s", "k", "one").unwrap();
    kv.put_str("s", "k", "two").unwrap();
    assert_eq!(kv.get_str("s", "k").unwrap().as_deref(), Some("two"));
}
