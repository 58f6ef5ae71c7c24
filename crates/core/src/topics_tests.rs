// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn builders_produce_the_documented_tree() {
    assert_eq!(
        state("unit1", "exp1", "stirring"),
        "pioreactor/unit1/exp1/stirring/$state"
    );
    assert_eq!(
        setting_set("unit1", "exp1", "stirring", "target_rpm"),
        "pioreactor/unit1/exp1/stirring/target_rpm/set"
    );
    assert_eq!(logs("unit1", "exp1", "error"), "pioreactor/unit1/exp1/logs/error");
    assert_eq!(od_readings("u", "e"), "pioreactor/u/e/od_reading/ods");
    assert_eq!(od_channel("u", "e", "1"), "pioreactor/u/e/od_reading/od1");
    assert_eq!(dosing_events("u", "e"), "pioreactor/u/e/dosing_events");
}

#[test]
fn broadcast_and_universal_placeholders_compose() {
    assert_eq!(
        state("$broadcast", "$experiment", "monitor"),
        "pioreactor/$broadcast/$experiment/monitor/$state"
    );
}

#[test]
fn split_extracts_scope() {
    let (unit, experiment, rest) = split("pioreactor/u1/exp/od_reading/ods").unwrap();
    assert_eq!(unit, "u1");
    assert_eq!(experiment, "exp");
    assert_eq!(rest, "od_reading/ods");

    assert!(split("pioreactor/latest_experiment").is_none());
    assert!(split("homie/u1/exp/a").is_none());
}

#[yare::parameterized(
    exact          = { "a/b/c", "a/b/c", true },
    plus_one       = { "a/+/c", "a/b/c", true },
    plus_miss      = { "a/+/c", "a/b/d", false },
    hash_tail      = { "a/#", "a/b/c/d", true },
    hash_root      = { "#", "anything/at/all", true },
    shorter_topic  = { "a/b/c", "a/b", false },
    longer_topic   = { "a/b", "a/b/c", false },
)]
fn filters(filter: &str, topic: &str, expected: bool) {
    assert_eq!(matches_filter(filter, topic), expected);
}
