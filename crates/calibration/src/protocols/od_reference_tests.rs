// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::session::{ScriptedExecutor, SessionEngine, SessionMode, SessionStatus, StepType};
use crate::structs::{Calibration, CurveData};
use pio_core::clock::FakeClock;
use serde_json::json;

fn inputs(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn two_point_linear_fit() {
    let protocol = OdReferenceStandardProtocol;
    let clock = FakeClock::default();
    let executor = ScriptedExecutor::default()
        .respond("od_reference_standard_read", json!({"voltage": 0.05}))
        .respond("od_reference_standard_read", json!({"voltage": 1.05}));

    let mut session = protocol.start_session("od90", &clock).unwrap();
    let mut engine = SessionEngine::new(
        protocol.registry(),
        &mut session,
        SessionMode::Cli,
        &executor,
        &clock,
    );

    engine.advance(inputs(&[])).unwrap();
    engine
        .advance(inputs(&[("calibration_name", json!("ref-cal"))]))
        .unwrap();
    // blank face
    let step = engine.advance(inputs(&[])).unwrap();
    assert_eq!(step.step_id, "standard_input");
    engine.advance(inputs(&[("standard_od", json!(1.0))])).unwrap();
    let step = engine.advance(inputs(&[])).unwrap();

    assert_eq!(step.step_type, StepType::Result);
    assert_eq!(engine.session().status, SessionStatus::Complete);

    let Some(Calibration::Od90(od_cal)) = engine.collected.first().cloned() else {
        panic!("expected an od90 calibration");
    };
    let CurveData::Poly { coefficients } = &od_cal.base.curve_data_ else {
        panic!("expected a poly curve");
    };
    assert!((coefficients[0] - 1.0).abs() < 1e-9, "slope {}", coefficients[0]);
    assert!((coefficients[1] - 0.05).abs() < 1e-9, "bias {}", coefficients[1]);
}
