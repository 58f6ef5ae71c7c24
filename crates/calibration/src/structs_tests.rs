// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_fixtures::{sample_od_calibration, sample_pump_calibration};

#[test]
fn yaml_round_trip_preserves_the_device_tag() {
    let calibration = sample_od_calibration("cal-a");
    let yaml = serde_yaml::to_string(&calibration).unwrap();
    assert!(yaml.contains("device: od90"), "yaml was:\n{yaml}");
    assert!(yaml.contains("type: poly"));
    let decoded: Calibration = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(decoded, calibration);
}

#[test]
fn device_names_match_directories() {
    assert_eq!(sample_od_calibration("c").device(), "od90");
    assert_eq!(sample_pump_calibration("c", 0.1).device(), "media_pump");
    assert!(DEVICES.contains(&"od_fused"));
}

#[test]
fn x_to_y_then_y_to_x_round_trips_in_domain() {
    let calibration = sample_od_calibration("c");
    for x in [0.1, 0.5, 1.2, 1.9] {
        let y = calibration.x_to_y(x);
        let recovered = calibration.y_to_x(y, true).unwrap();
        assert!((recovered - x).abs() < 1e-6);
    }
}

#[test]
fn pump_duration_inversion() {
    let Calibration::MediaPump(pump) = sample_pump_calibration("c", 0.05) else {
        unreachable!()
    };
    // 1 mL at 0.05 mL/s is 20 s
    assert!((pump.duration_for_ml(1.0).unwrap() - 20.0).abs() < 1e-9);
    assert!((pump.ml_for_duration(20.0) - 1.0).abs() < 1e-9);
}

#[test]
fn spline_curve_evaluates_through_enum() {
    let (knots, coefficients) =
        crate::curves::natural_cubic_spline(&[0.0, 1.0, 2.0], &[0.0, 1.0, 0.0]).unwrap();
    let curve = CurveData::Spline { knots, coefficients };
    assert!((curve.evaluate(1.0) - 1.0).abs() < 1e-9);
}

#[test]
fn x_bounds_span_the_recorded_domain() {
    let data = RecordedData {
        x: vec![2.0, 0.5, 1.5],
        y: vec![0.0; 3],
    };
    assert_eq!(data.x_bounds(), Some((0.5, 2.0)));
    assert_eq!(RecordedData::default().x_bounds(), None);
}
