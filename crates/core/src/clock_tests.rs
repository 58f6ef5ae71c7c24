// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn fake_clock_advances() {
    let clock = FakeClock::at_epoch_ms(1_000_000);
    let before = clock.now_utc();
    clock.advance_ms(5_000);
    let after = clock.now_utc();
    assert_eq!((after - before).num_seconds(), 5);
}

#[test]
fn iso_now_has_millis_and_zulu() {
    let clock = FakeClock::default();
    let iso = clock.iso_now();
    assert!(iso.ends_with('Z'), "expected Z suffix: {iso}");
    assert!(iso.contains('.'), "expected millisecond precision: {iso}");
}

#[test]
fn system_clock_is_monotonic() {
    let clock = SystemClock;
    let a = clock.now();
    let b = clock.now();
    assert!(b >= a);
}
