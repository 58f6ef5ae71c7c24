// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Calibration data model.
//!
//! One tagged record per device class, stored on disk as
//! `<root>/<device>/<name>.yaml`. Calibrations are immutable after save.

use crate::curves::{self, CurveError};
use chrono::{DateTime, Utc};
use pio_core::telemetry::{Angle, PdChannel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The raw observations a calibration was fitted from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecordedData {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl RecordedData {
    /// Domain of the recorded independent variable.
    pub fn x_bounds(&self) -> Option<(f64, f64)> {
        let mut iter = self.x.iter().copied();
        let first = iter.next()?;
        let (mut lo, mut hi) = (first, first);
        for value in iter {
            lo = lo.min(value);
            hi = hi.max(value);
        }
        Some((lo, hi))
    }
}

/// Fitted curve, tagged by representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CurveData {
    /// Polynomial, coefficients highest order first.
    Poly { coefficients: Vec<f64> },
    /// Natural cubic spline: per-interval `[a, b, c, d]` coefficients.
    Spline {
        knots: Vec<f64>,
        coefficients: Vec<Vec<f64>>,
    },
    /// Akima spline, same layout as `Spline`.
    Akima {
        knots: Vec<f64>,
        coefficients: Vec<Vec<f64>>,
    },
}

impl CurveData {
    pub fn evaluate(&self, x: f64) -> f64 {
        match self {
            CurveData::Poly { coefficients } => curves::poly_eval(coefficients, x),
            CurveData::Spline { knots, coefficients } | CurveData::Akima { knots, coefficients } => {
                curves::spline_eval(knots, coefficients, x)
            }
        }
    }
}

/// Fields shared by every device class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBase {
    pub calibration_name: String,
    pub created_at: DateTime<Utc>,
    pub calibrated_on_pioreactor_unit: String,
    pub recorded_data: RecordedData,
    pub curve_data_: CurveData,
}

/// Voltage → OD calibration for one angle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdCalibration {
    #[serde(flatten)]
    pub base: CalibrationBase,
    pub angle: Angle,
    pub pd_channel: PdChannel,
    pub ir_led_intensity: f64,
}

/// Duration → volume calibration for a peristaltic pump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpCalibration {
    #[serde(flatten)]
    pub base: CalibrationBase,
    pub hz: f64,
    pub dc: f64,
    pub voltage: f64,
}

impl PumpCalibration {
    /// Seconds of pumping needed for `ml`, inverting `volume = s·slope + bias`.
    pub fn duration_for_ml(&self, ml: f64) -> Result<f64, CurveError> {
        match &self.base.curve_data_ {
            CurveData::Poly { coefficients } if coefficients.len() == 2 => {
                let (slope, bias) = (coefficients[0], coefficients[1]);
                if slope <= 0.0 {
                    return Err(CurveError::NoSolutions);
                }
                Ok((ml - bias) / slope)
            }
            _ => Err(CurveError::NoSolutions),
        }
    }

    /// Millilitres moved by `seconds` of pumping.
    pub fn ml_for_duration(&self, seconds: f64) -> f64 {
        self.base.curve_data_.evaluate(seconds)
    }
}

/// Duty-cycle → RPM calibration for the stirrer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StirringCalibration {
    #[serde(flatten)]
    pub base: CalibrationBase,
    pub pwm_hz: f64,
    pub voltage: f64,
}

/// Multi-angle fusion estimator: one spline per angle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionCalibration {
    #[serde(flatten)]
    pub base: CalibrationBase,
    pub ir_led_intensity: f64,
    /// Keyed by angle string (`"45"`, `"90"`, `"135"`).
    pub curves_by_angle: BTreeMap<String, CurveData>,
}

/// A calibration, tagged by the device it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "device", rename_all = "snake_case")]
pub enum Calibration {
    Od45(OdCalibration),
    Od90(OdCalibration),
    Od135(OdCalibration),
    MediaPump(PumpCalibration),
    AltMediaPump(PumpCalibration),
    WastePump(PumpCalibration),
    Stirring(StirringCalibration),
    OdFused(FusionCalibration),
}

/// Every device directory that may hold calibrations.
pub const DEVICES: &[&str] = &[
    "od45",
    "od90",
    "od135",
    "media_pump",
    "alt_media_pump",
    "waste_pump",
    "stirring",
    "od_fused",
];

impl Calibration {
    pub fn device(&self) -> &'static str {
        match self {
            Calibration::Od45(_) => "od45",
            Calibration::Od90(_) => "od90",
            Calibration::Od135(_) => "od135",
            Calibration::MediaPump(_) => "media_pump",
            Calibration::AltMediaPump(_) => "alt_media_pump",
            Calibration::WastePump(_) => "waste_pump",
            Calibration::Stirring(_) => "stirring",
            Calibration::OdFused(_) => "od_fused",
        }
    }

    pub fn base(&self) -> &CalibrationBase {
        match self {
            Calibration::Od45(c) | Calibration::Od90(c) | Calibration::Od135(c) => &c.base,
            Calibration::MediaPump(c) | Calibration::AltMediaPump(c) | Calibration::WastePump(c) => {
                &c.base
            }
            Calibration::Stirring(c) => &c.base,
            Calibration::OdFused(c) => &c.base,
        }
    }

    pub fn name(&self) -> &str {
        &self.base().calibration_name
    }

    /// Evaluate the curve: x → y.
    pub fn x_to_y(&self, x: f64) -> f64 {
        self.base().curve_data_.evaluate(x)
    }

    /// Invert the curve: solve `curve(x) = y` inside the recorded x-domain.
    ///
    /// With `enforce_bounds`, a solution outside the domain is reported as
    /// [`CurveError::BelowDomain`]/[`CurveError::AboveDomain`] rather than
    /// silently extrapolated.
    pub fn y_to_x(&self, y: f64, enforce_bounds: bool) -> Result<f64, CurveError> {
        let base = self.base();
        let (lo, hi) = base
            .recorded_data
            .x_bounds()
            .ok_or(CurveError::NoSolutions)?;
        curves::y_to_x(&base.curve_data_, y, lo, hi, enforce_bounds)
    }

    pub fn as_pump(&self) -> Option<&PumpCalibration> {
        match self {
            Calibration::MediaPump(c) | Calibration::AltMediaPump(c) | Calibration::WastePump(c) => {
                Some(c)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "structs_tests.rs"]
mod tests;
