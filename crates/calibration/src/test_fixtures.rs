// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared builders for this crate's tests.

use crate::structs::{
    Calibration, CalibrationBase, CurveData, OdCalibration, PumpCalibration, RecordedData,
};
use chrono::{TimeZone, Utc};
use pio_core::telemetry::{Angle, PdChannel};

pub(crate) fn sample_od_calibration(name: &str) -> Calibration {
    Calibration::Od90(OdCalibration {
        base: CalibrationBase {
            calibration_name: name.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap(),
            calibrated_on_pioreactor_unit: "unit1".to_string(),
            recorded_data: RecordedData {
                x: vec![0.0, 0.5, 1.0, 2.0],
                y: vec![0.05, 0.55, 1.05, 2.05],
            },
            curve_data_: CurveData::Poly {
                coefficients: vec![1.0, 0.05],
            },
        },
        angle: Angle::Deg90,
        pd_channel: PdChannel::Ch2,
        ir_led_intensity: 70.0,
    })
}

pub(crate) fn sample_pump_calibration(name: &str, slope: f64) -> Calibration {
    Calibration::MediaPump(PumpCalibration {
        base: CalibrationBase {
            calibration_name: name.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap(),
            calibrated_on_pioreactor_unit: "unit1".to_string(),
            recorded_data: RecordedData {
                x: vec![0.5, 1.0, 1.5],
                y: vec![0.5 * slope, slope, 1.5 * slope],
            },
            curve_data_: CurveData::Poly {
                coefficients: vec![slope, 0.0],
            },
        },
        hz: 250.0,
        dc: 100.0,
        voltage: 12.1,
    })
}
