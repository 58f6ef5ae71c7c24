// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::runtime::JobError;
use crate::test_harness::Harness;
use pio_bus::{Bus, QosLevel};
use pio_calibration::structs::{CalibrationBase, CurveData, PumpCalibration, RecordedData};
use pio_core::telemetry::DosingEventKind;

fn pump_calibration(slope: f64) -> PumpCalibration {
    PumpCalibration {
        base: CalibrationBase {
            calibration_name: "pump-cal".to_string(),
            created_at: chrono::Utc::now(),
            calibrated_on_pioreactor_unit: "unit1".to_string(),
            recorded_data: RecordedData {
                x: vec![1.0, 2.0, 3.0],
                y: vec![slope, 2.0 * slope, 3.0 * slope],
            },
            curve_data_: CurveData::Poly {
                coefficients: vec![slope, 0.0],
            },
        },
        hz: 250.0,
        dc: 100.0,
        voltage: 12.0,
    }
}

#[tokio::test]
async fn volume_is_converted_through_the_calibration() {
    let harness = Harness::new();
    let ctx = harness.context();
    let calibration = pump_calibration(0.5);

    let mut events = harness
        .bus
        .subscribe(
            &["pioreactor/unit1/exp1/dosing_events".to_string()],
            QosLevel::AtLeastOnce,
        )
        .await
        .unwrap();

    let event = run_pump(
        &ctx,
        "media_pump",
        PumpAmount::VolumeMl(1.0),
        250.0,
        100.0,
        Some(&calibration),
        "manual",
    )
    .await
    .unwrap();

    assert_eq!(event.volume_change_ml, 1.0);
    assert_eq!(event.event, DosingEventKind::AddMedia);
    assert_eq!(event.source_of_event, "manual");

    // the bus saw the same event
    let message = events.recv().await.unwrap();
    let seen: pio_core::telemetry::DosingEvent = serde_json::from_slice(&message.payload).unwrap();
    assert_eq!(seen.volume_change_ml, 1.0);

    // PWM ran and stopped
    let history = harness.hardware.pwm_history.lock().clone();
    assert_eq!(history, vec![(2, 100.0), (2, 0.0)]);
    // channel released afterwards
    assert!(harness.pwm.owner_of(2).is_none());
}

#[tokio::test]
async fn volume_without_calibration_is_refused() {
    let harness = Harness::new();
    let ctx = harness.context();
    let err = run_pump(
        &ctx,
        "media_pump",
        PumpAmount::VolumeMl(1.0),
        250.0,
        100.0,
        None,
        "manual",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, JobError::CalibrationMissing(_)));
    // nothing moved
    assert!(harness.hardware.pwm_history.lock().is_empty());
}

#[tokio::test]
async fn duration_runs_without_a_calibration() {
    let harness = Harness::new();
    let ctx = harness.context();
    let event = run_pump(
        &ctx,
        "waste_pump",
        PumpAmount::DurationS(2.0),
        250.0,
        90.0,
        None,
        "manual",
    )
    .await
    .unwrap();
    assert_eq!(event.event, DosingEventKind::RemoveWaste);
    // volume is unknown without a calibration
    assert_eq!(event.volume_change_ml, 0.0);
    assert_eq!(harness.hardware.last_pwm(4), Some(0.0));
}

#[tokio::test]
async fn busy_channel_fails_immediately() {
    let harness = Harness::new();
    let ctx = harness.context();
    let _guard = harness.pwm.acquire(2, "someone_else").unwrap();
    let err = run_pump(
        &ctx,
        "media_pump",
        PumpAmount::DurationS(1.0),
        250.0,
        100.0,
        None,
        "manual",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, JobError::Hardware(_)));
}

#[tokio::test]
async fn temperature_emergency_refuses_to_pump() {
    let harness = Harness::new();
    let ctx = harness.context();
    harness
        .bus
        .publish(
            &emergency_stop_topic("unit1", "exp1"),
            b"1".to_vec(),
            QosLevel::ExactlyOnce,
            true,
        )
        .await
        .unwrap();

    let err = run_pump(
        &ctx,
        "media_pump",
        PumpAmount::DurationS(1.0),
        250.0,
        100.0,
        None,
        "manual",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, JobError::Fatal(_)));
    assert!(harness.hardware.pwm_history.lock().is_empty());
}
