// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn tokens(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

#[test]
fn key_value_pairs_parse() {
    let (options, args) =
        parse_trailing(&tokens(&["--target-rpm", "500", "--calibration", "off"])).unwrap();
    assert_eq!(options["target_rpm"], json!(500.0));
    assert_eq!(options["calibration"], json!("off"));
    assert!(args.is_empty());
}

#[test]
fn bare_flags_are_booleans() {
    let (options, _) = parse_trailing(&tokens(&["--dry-run", "--volume", "1.5"])).unwrap();
    assert_eq!(options["dry_run"], json!(true));
    assert_eq!(options["volume"], json!(1.5));
}

#[test]
fn positional_args_pass_through() {
    let (options, args) = parse_trailing(&tokens(&["extra", "--a", "1", "more"])).unwrap();
    assert_eq!(options.len(), 1);
    assert_eq!(args, vec!["extra", "more"]);
}

#[test]
fn booleans_and_strings_coerce() {
    let (options, _) =
        parse_trailing(&tokens(&["--on", "true", "--off", "false", "--name", "cal-1"])).unwrap();
    assert_eq!(options["on"], json!(true));
    assert_eq!(options["off"], json!(false));
    assert_eq!(options["name"], json!("cal-1"));
}

#[test]
fn stray_double_dash_is_usage_error() {
    let err = parse_trailing(&tokens(&["--"])).unwrap_err();
    assert_eq!(err.code, 2);
}
