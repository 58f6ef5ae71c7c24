// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn pwm_channels_are_exclusive() {
    let registry = PwmRegistry::new();
    let guard = registry.acquire(5, "stirring").unwrap();
    let err = registry.acquire(5, "stirring_calibration").unwrap_err();
    assert!(matches!(err, HardwareError::PwmBusy { channel: 5, .. }));
    assert_eq!(registry.owner_of(5).as_deref(), Some("stirring"));

    drop(guard);
    assert!(registry.owner_of(5).is_none());
    let _again = registry.acquire(5, "stirring_calibration").unwrap();
}

#[test]
fn different_channels_coexist() {
    let registry = PwmRegistry::new();
    let _a = registry.acquire(2, "media_pump").unwrap();
    let _b = registry.acquire(4, "waste_pump").unwrap();
    assert_eq!(registry.owner_of(2).as_deref(), Some("media_pump"));
    assert_eq!(registry.owner_of(4).as_deref(), Some("waste_pump"));
}

#[yare::parameterized(
    media     = { "media_pump", Some(2) },
    alt_media = { "alt_media_pump", Some(3) },
    waste     = { "waste_pump", Some(4) },
    stirring  = { "stirring", Some(5) },
    heater    = { "heater", Some(6) },
    unknown   = { "lava_pump", None },
)]
fn pwm_channel_defaults(device: &str, expected: Option<u8>) {
    assert_eq!(default_pwm_channel(device), expected);
}

#[test]
fn mock_adc_replays_then_repeats() {
    let hardware = MockHardware::new();
    hardware.script_adc(0, &[1.0, 2.0, 3.0]);
    assert_eq!(hardware.read_adc(0).unwrap(), 1.0);
    assert_eq!(hardware.read_adc(0).unwrap(), 2.0);
    assert_eq!(hardware.read_adc(0).unwrap(), 3.0);
    assert_eq!(hardware.read_adc(0).unwrap(), 3.0);
}

#[test]
fn mock_missing_channel_is_hardware_missing() {
    let hardware = MockHardware::new();
    assert!(matches!(
        hardware.read_adc(7),
        Err(HardwareError::Missing(_))
    ));
    assert!(matches!(hardware.read_temp(), Err(HardwareError::Missing(_))));
}

#[test]
fn gain_table_is_ordered_by_range() {
    let ranges: Vec<f64> = ADS1X15_GAIN_THRESHOLDS.iter().map(|(r, _)| *r).collect();
    assert!(ranges.windows(2).all(|w| w[0] < w[1]));
}
