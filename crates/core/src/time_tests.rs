// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn hours_and_seconds_are_inverses() {
    assert_eq!(hours_to_seconds(1.0), 3600.0);
    assert_eq!(hours_to_seconds(0.5), 1800.0);
    assert_eq!(seconds_to_hours(3600.0), 1.0);
    assert_eq!(seconds_to_hours(0.0), 0.0);
}

#[yare::parameterized(
    seconds      = { "90s", 90.0 },
    minutes      = { "2m", 120.0 },
    hours        = { "1.5h", 5400.0 },
    days         = { "1d", 86400.0 },
    zero         = { "0s", 0.0 },
)]
fn literals(literal: &str, expected: f64) {
    let value = TimeValue::Literal(literal.to_string());
    assert_eq!(time_to_seconds(&value).unwrap(), expected);
}

#[test]
fn bare_numbers_are_hours() {
    assert_eq!(time_to_seconds(&TimeValue::Hours(2.0)).unwrap(), 7200.0);
    assert_eq!(time_to_seconds(&TimeValue::Hours(0.0)).unwrap(), 0.0);
}

#[yare::parameterized(
    whitespace   = { "1 h" },
    unknown_unit = { "5w" },
    bare_unit    = { "h" },
    empty        = { "" },
    negative     = { "-2h" },
    trailing     = { "2hh" },
)]
fn bad_literals_are_rejected(literal: &str) {
    let value = TimeValue::Literal(literal.to_string());
    assert!(time_to_seconds(&value).is_err());
}

#[test]
fn literal_seconds_are_monotone_in_magnitude() {
    let parsed: Vec<f64> = ["1m", "2m", "10m", "90m"]
        .iter()
        .map(|s| time_to_seconds(&TimeValue::Literal(s.to_string())).unwrap())
        .collect();
    assert!(parsed.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn time_value_deserializes_from_yaml_forms() {
    let hours: TimeValue = serde_json::from_str("0.5").unwrap();
    assert_eq!(hours, TimeValue::Hours(0.5));
    let literal: TimeValue = serde_json::from_str("\"45s\"").unwrap();
    assert_eq!(literal, TimeValue::Literal("45s".to_string()));
}

#[yare::parameterized(
    seconds          = { 59, "59s" },
    minutes          = { 120, "2m" },
    hour_and_minutes = { 3660, "1h1m" },
    exact_hours      = { 7200, "2h" },
    days             = { 172800, "2d" },
)]
fn elapsed_formatting(secs: u64, expected: &str) {
    assert_eq!(format_elapsed(secs), expected);
}
