// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::session::{ScriptedExecutor, SessionEngine, SessionMode, SessionStatus};
use crate::structs::Calibration;
use pio_core::clock::FakeClock;
use serde_json::json;

fn inputs(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn fusion_standards_fits_a_spline_per_angle() {
    let protocol = FusionStandardsProtocol;
    let clock = FakeClock::default();
    // voltages scale differently per angle but increase with OD
    let executor = ScriptedExecutor::default()
        .respond("od_batch_read", json!({"ods": {"45": 0.1, "90": 0.05, "135": 0.2}}))
        .respond("od_batch_read", json!({"ods": {"45": 0.6, "90": 0.55, "135": 0.8}}))
        .respond("od_batch_read", json!({"ods": {"45": 1.1, "90": 1.05, "135": 1.4}}))
        .respond("od_batch_read", json!({"ods": {"45": 2.1, "90": 2.05, "135": 2.6}}));

    let mut session = protocol.start_session("od_fused", &clock).unwrap();
    let mut engine = SessionEngine::new(
        protocol.registry(),
        &mut session,
        SessionMode::Cli,
        &executor,
        &clock,
    );

    engine.advance(inputs(&[])).unwrap();
    for od in [0.0, 0.5, 1.0, 2.0] {
        engine.advance(inputs(&[("standard_od", json!(od))])).unwrap();
        engine.advance(inputs(&[])).unwrap(); // batch measure
        engine.advance(inputs(&[("another", json!(true))])).unwrap();
    }
    engine.advance(inputs(&[("another", json!(false))])).unwrap();
    engine.advance(inputs(&[])).unwrap(); // fit

    assert_eq!(engine.session().status, SessionStatus::Complete);
    let Some(Calibration::OdFused(fused)) = engine.collected.first().cloned() else {
        panic!("expected an od_fused calibration");
    };
    assert_eq!(fused.curves_by_angle.len(), 3);
    // spline for 90° interpolates its knots: voltage 1.05 → OD 1.0
    let curve = &fused.curves_by_angle["90"];
    assert!((curve.evaluate(1.05) - 1.0).abs() < 1e-6);
}

#[test]
fn fusion_offset_shifts_every_angle() {
    // Build a base calibration through the standards protocol machinery.
    let base = {
        let (knots, coefficients) =
            crate::curves::natural_cubic_spline(&[0.0, 1.0, 2.0], &[0.0, 1.0, 2.0]).unwrap();
        Calibration::OdFused(crate::structs::FusionCalibration {
            base: crate::structs::CalibrationBase {
                calibration_name: "fused-base".to_string(),
                created_at: chrono::Utc::now(),
                calibrated_on_pioreactor_unit: "unit1".to_string(),
                recorded_data: crate::structs::RecordedData {
                    x: vec![0.0, 1.0, 2.0],
                    y: vec![0.0, 1.0, 2.0],
                },
                curve_data_: crate::structs::CurveData::Spline {
                    knots: knots.clone(),
                    coefficients: coefficients.clone(),
                },
            },
            ir_led_intensity: 70.0,
            curves_by_angle: [
                ("90".to_string(), crate::structs::CurveData::Spline { knots, coefficients }),
            ]
            .into_iter()
            .collect(),
        })
    };

    let protocol = FusionOffsetProtocol;
    let clock = FakeClock::default();
    // The optics drifted: a 1.0-OD standard now reads as the old 0.8.
    let executor = ScriptedExecutor::default()
        .respond("load_calibration", json!({"calibration": base}))
        .respond("od_batch_read", json!({"ods": {"90": 0.8}}));

    let mut session = protocol.start_session("od_fused", &clock).unwrap();
    let mut engine = SessionEngine::new(
        protocol.registry(),
        &mut session,
        SessionMode::Cli,
        &executor,
        &clock,
    );

    engine.advance(inputs(&[])).unwrap();
    engine
        .advance(inputs(&[
            ("base_calibration", json!("fused-base")),
            ("standard_od", json!(1.0)),
        ]))
        .unwrap();
    engine.advance(inputs(&[])).unwrap();

    assert_eq!(engine.session().status, SessionStatus::Complete);
    let Some(Calibration::OdFused(shifted)) = engine.collected.first().cloned() else {
        panic!("expected an od_fused calibration");
    };
    assert!(shifted.base.calibration_name.starts_with("fused-base-offset-"));
    // base curve read 0.8 at that voltage; shifted curve must read 1.0
    let curve = &shifted.curves_by_angle["90"];
    assert!((curve.evaluate(0.8) - 1.0).abs() < 1e-9);
}
