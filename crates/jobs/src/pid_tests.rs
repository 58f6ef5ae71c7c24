// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn pushes_toward_the_setpoint() {
    let mut pid = Pid::new(1.0, 0.0, 0.0, 30.0, 0.0, 100.0);
    assert!(pid.update(20.0, 1.0) > 0.0);
    assert_eq!(pid.update(30.0, 1.0), 0.0);
    assert_eq!(pid.update(40.0, 1.0), 0.0); // clamped at output_min
}

#[test]
fn output_is_clamped() {
    let mut pid = Pid::new(100.0, 0.0, 0.0, 50.0, 0.0, 40.0);
    assert_eq!(pid.update(0.0, 1.0), 40.0);
    let mut pid = Pid::new(100.0, 0.0, 0.0, 0.0, -10.0, 10.0);
    assert_eq!(pid.update(50.0, 1.0), -10.0);
}

#[test]
fn integral_accumulates_persistent_error() {
    let mut pid = Pid::new(0.0, 1.0, 0.0, 10.0, -100.0, 100.0);
    let first = pid.update(9.0, 1.0);
    let second = pid.update(9.0, 1.0);
    assert!(second > first, "integral term should grow: {first} vs {second}");
}

#[test]
fn anti_windup_freezes_integral_when_saturated() {
    let mut pid = Pid::new(0.0, 10.0, 0.0, 10.0, 0.0, 1.0);
    for _ in 0..100 {
        assert_eq!(pid.update(0.0, 1.0), 1.0);
    }
    // After the error flips, a wound-up integral would pin the output high
    // for many steps; with anti-windup it recovers immediately.
    let recovered = pid.update(20.0, 1.0);
    assert!(recovered < 1.0, "output stuck at {recovered}");
}

#[test]
fn reset_clears_history() {
    let mut pid = Pid::new(0.0, 1.0, 1.0, 10.0, -100.0, 100.0);
    pid.update(0.0, 1.0);
    pid.reset();
    let after_reset = pid.update(9.0, 1.0);
    // only one step of integral, no derivative kick from stale last_error
    assert!((after_reset - 1.0).abs() < 1e-9);
}

#[test]
fn setpoint_updates_take_effect() {
    let mut pid = Pid::new(1.0, 0.0, 0.0, 10.0, -100.0, 100.0);
    assert_eq!(pid.update(10.0, 1.0), 0.0);
    pid.set_setpoint(20.0);
    assert_eq!(pid.setpoint(), 20.0);
    assert_eq!(pid.update(10.0, 1.0), 10.0);
}
