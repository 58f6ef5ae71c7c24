// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fusion calibrations: one estimator spanning several angles.
//!
//! `fusion_standards` fits a spline per angle from a series of standards
//! read on every photodiode at once (`od_batch_read`). `fusion_offset`
//! rescues an existing fusion calibration after an optics change by reading
//! a single standard and shifting each angle's curve by the observed error.

use super::{default_calibration_name, CalibrationProtocol};
use crate::curves::natural_cubic_spline;
use crate::session::{
    SessionContext, SessionError, StepField, StepHandler, StepRegistry, StepView,
};
use crate::structs::{Calibration, CalibrationBase, CurveData, FusionCalibration, RecordedData};
use pio_core::clock::{Clock, SystemClock};
use serde_json::{json, Value};
use std::collections::BTreeMap;

const FUSION_ANGLES: &[&str] = &["45", "90", "135"];

pub struct FusionStandardsProtocol;

impl CalibrationProtocol for FusionStandardsProtocol {
    fn protocol_name(&self) -> &'static str {
        "fusion_standards"
    }

    fn title(&self) -> &'static str {
        "OD fusion calibration using standards"
    }

    fn description(&self) -> &'static str {
        "Fits a per-angle spline from standards read on every photodiode."
    }

    fn supported_devices(&self) -> &'static [&'static str] {
        &["od_fused"]
    }

    fn registry(&self) -> StepRegistry {
        let mut registry: StepRegistry = StepRegistry::new();
        registry.insert("intro", Box::new(Intro));
        registry.insert("place_standard", Box::new(PlaceStandard));
        registry.insert("measure_standard", Box::new(MeasureStandard));
        registry.insert("another_standard", Box::new(AnotherStandard));
        registry.insert("fit", Box::new(Fit));
        registry
    }
}

fn batch_read(ctx: &SessionContext<'_>) -> Result<BTreeMap<String, f64>, SessionError> {
    let payload = ctx.execute("od_batch_read", Value::Null)?;
    let ods = payload
        .get("ods")
        .and_then(Value::as_object)
        .ok_or_else(|| SessionError::Executor {
            action: "od_batch_read".to_string(),
            message: "invalid batch payload".to_string(),
        })?;
    Ok(ods
        .iter()
        .filter_map(|(angle, v)| v.as_f64().map(|f| (angle.clone(), f)))
        .collect())
}

struct Intro;

impl StepHandler for Intro {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::info(
            "OD fusion calibration",
            "Standards are read on all angles simultaneously. You will need at \
             least three standards plus a blank.",
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        if ctx.inputs.has_inputs() {
            Ok(Some("place_standard".to_string()))
        } else {
            Ok(None)
        }
    }
}

struct PlaceStandard;

impl StepHandler for PlaceStandard {
    fn render(&self, ctx: &SessionContext<'_>) -> StepView {
        let n = ctx.data_vec_f64("standard_ods").len();
        StepView::form(
            &format!("Insert standard #{}", n + 1),
            "Enter the known OD600 (use 0 for the blank).",
            vec![StepField::float("standard_od", "OD600").with_min(0.0)],
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        let od = ctx.inputs.float("standard_od", Some(0.0), None, None)?;
        ctx.data_set("pending_od", json!(od));
        Ok(Some("measure_standard".to_string()))
    }
}

struct MeasureStandard;

impl StepHandler for MeasureStandard {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::action("Measure", "Continuing reads every photodiode at once.")
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        let od = ctx
            .data_f64("pending_od")
            .ok_or_else(|| SessionError::Input("No standard pending.".to_string()))?;
        let readings = batch_read(ctx)?;
        ctx.data_push("standard_ods", json!(od));
        for angle in FUSION_ANGLES {
            if let Some(voltage) = readings.get(*angle) {
                ctx.data_push(&format!("voltages_{angle}"), json!(voltage));
            }
        }
        Ok(Some("another_standard".to_string()))
    }
}

struct AnotherStandard;

impl StepHandler for AnotherStandard {
    fn render(&self, ctx: &SessionContext<'_>) -> StepView {
        let n = ctx.data_vec_f64("standard_ods").len();
        StepView::form(
            &format!("{n} standard(s) recorded"),
            "Measure another standard?",
            vec![StepField::bool("another", "Another standard?").with_default(json!(true))],
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        if ctx.inputs.bool("another", true)? {
            Ok(Some("place_standard".to_string()))
        } else {
            ctx.ensure(
                ctx.data_vec_f64("standard_ods").len() >= 3,
                "At least three standards are required.",
            )?;
            Ok(Some("fit".to_string()))
        }
    }
}

struct Fit;

impl StepHandler for Fit {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::action("Fit", "Continuing fits one spline per angle and saves the estimator.")
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        let ods = ctx.data_vec_f64("standard_ods");
        let mut curves_by_angle = BTreeMap::new();
        for angle in FUSION_ANGLES {
            let voltages = ctx.data_vec_f64(&format!("voltages_{angle}"));
            if voltages.len() != ods.len() {
                continue;
            }
            // x = voltage, y = OD: the estimator maps live voltage to OD.
            let mut pairs: Vec<(f64, f64)> =
                voltages.iter().copied().zip(ods.iter().copied()).collect();
            pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            let x: Vec<f64> = pairs.iter().map(|p| p.0).collect();
            let y: Vec<f64> = pairs.iter().map(|p| p.1).collect();
            let (knots, coefficients) = natural_cubic_spline(&x, &y)
                .map_err(|e| SessionError::Input(format!("Spline fit failed for {angle}°: {e}")))?;
            curves_by_angle.insert(angle.to_string(), CurveData::Spline { knots, coefficients });
        }
        ctx.ensure(!curves_by_angle.is_empty(), "No angle produced a usable fit.")?;

        let primary = curves_by_angle
            .get("90")
            .or_else(|| curves_by_angle.values().next())
            .cloned()
            .ok_or_else(|| SessionError::Input("No angle produced a usable fit.".to_string()))?;
        let voltages_90 = ctx.data_vec_f64("voltages_90");
        let calibration = Calibration::OdFused(FusionCalibration {
            base: CalibrationBase {
                calibration_name: default_calibration_name("od_fused", &SystemClock),
                created_at: chrono::Utc::now(),
                calibrated_on_pioreactor_unit: ctx.data_str("unit").unwrap_or("unknown").to_string(),
                recorded_data: RecordedData {
                    x: voltages_90,
                    y: ods,
                },
                curve_data_: primary,
            },
            ir_led_intensity: ctx.data_f64("ir_led_intensity").unwrap_or(70.0),
            curves_by_angle,
        });
        let link = ctx.store_calibration(calibration)?;
        ctx.complete(json!({ "calibrations": [link] }));
        Ok(None)
    }
}

pub struct FusionOffsetProtocol;

impl CalibrationProtocol for FusionOffsetProtocol {
    fn protocol_name(&self) -> &'static str {
        "fusion_offset"
    }

    fn title(&self) -> &'static str {
        "OD fusion offset from a single standard"
    }

    fn description(&self) -> &'static str {
        "Shifts an existing fusion estimator to match one measured standard."
    }

    fn supported_devices(&self) -> &'static [&'static str] {
        &["od_fused"]
    }

    fn registry(&self) -> StepRegistry {
        let mut registry: StepRegistry = StepRegistry::new();
        registry.insert("intro", Box::new(OffsetIntro));
        registry.insert("standard_input", Box::new(OffsetStandardInput));
        registry.insert("measure_and_shift", Box::new(MeasureAndShift));
        registry
    }
}

struct OffsetIntro;

impl StepHandler for OffsetIntro {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::info(
            "Fusion offset",
            "After an optics change, a single known standard is enough to \
             re-anchor an existing fusion calibration.",
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        if ctx.inputs.has_inputs() {
            Ok(Some("standard_input".to_string()))
        } else {
            Ok(None)
        }
    }
}

struct OffsetStandardInput;

impl StepHandler for OffsetStandardInput {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::form(
            "Base calibration and standard",
            "Name the saved od_fused calibration to shift, and the OD600 of \
             the standard in the vial.",
            vec![
                StepField::str("base_calibration", "Base calibration name"),
                StepField::float("standard_od", "OD600 of the standard").with_min(0.0001),
            ],
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        let base = ctx.inputs.str("base_calibration", None)?;
        let od = ctx.inputs.float("standard_od", Some(0.0001), None, None)?;
        ctx.data_set("base_calibration", Value::String(base));
        ctx.data_set("standard_od", json!(od));
        Ok(Some("measure_and_shift".to_string()))
    }
}

struct MeasureAndShift;

impl StepHandler for MeasureAndShift {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::action(
            "Measure and shift",
            "Continuing reads every photodiode and saves the shifted estimator.",
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        let base_name = ctx
            .data_str("base_calibration")
            .ok_or_else(|| SessionError::Input("Base calibration missing.".to_string()))?
            .to_string();
        let standard_od = ctx
            .data_f64("standard_od")
            .ok_or_else(|| SessionError::Input("Standard OD missing.".to_string()))?;

        // The owning unit loads the base calibration; the engine never
        // touches the filesystem directly.
        let payload = ctx.execute(
            "load_calibration",
            json!({ "device": "od_fused", "name": base_name }),
        )?;
        let calibration_value = payload.get("calibration").cloned().unwrap_or(Value::Null);
        let base = match serde_json::from_value::<Calibration>(calibration_value) {
            Ok(Calibration::OdFused(f)) => f,
            _ => {
                return Err(SessionError::Input(format!(
                    "{base_name:?} is not an od_fused calibration."
                )))
            }
        };

        let readings = batch_read(ctx)?;
        let mut shifted = BTreeMap::new();
        for (angle, curve) in &base.curves_by_angle {
            let Some(&voltage) = readings.get(angle) else {
                continue;
            };
            let predicted = curve.evaluate(voltage);
            let offset = standard_od - predicted;
            shifted.insert(angle.clone(), shift_curve(curve, offset));
        }
        ctx.ensure(!shifted.is_empty(), "No angle could be shifted.")?;

        let primary = shifted
            .get("90")
            .or_else(|| shifted.values().next())
            .cloned()
            .ok_or_else(|| SessionError::Input("No angle could be shifted.".to_string()))?;
        let calibration = Calibration::OdFused(FusionCalibration {
            base: CalibrationBase {
                calibration_name: format!(
                    "{base_name}-offset-{}",
                    SystemClock.now_utc().format("%Y-%m-%d_%H-%M")
                ),
                created_at: chrono::Utc::now(),
                calibrated_on_pioreactor_unit: base.base.calibrated_on_pioreactor_unit.clone(),
                recorded_data: base.base.recorded_data.clone(),
                curve_data_: primary,
            },
            ir_led_intensity: base.ir_led_intensity,
            curves_by_angle: shifted,
        });
        let link = ctx.store_calibration(calibration)?;
        ctx.complete(json!({ "calibrations": [link] }));
        Ok(None)
    }
}

/// Shift a curve vertically by `offset` OD units.
fn shift_curve(curve: &CurveData, offset: f64) -> CurveData {
    match curve {
        CurveData::Poly { coefficients } => {
            let mut coefficients = coefficients.clone();
            if let Some(last) = coefficients.last_mut() {
                *last += offset;
            }
            CurveData::Poly { coefficients }
        }
        CurveData::Spline { knots, coefficients } => CurveData::Spline {
            knots: knots.clone(),
            coefficients: shift_pieces(coefficients, offset),
        },
        CurveData::Akima { knots, coefficients } => CurveData::Akima {
            knots: knots.clone(),
            coefficients: shift_pieces(coefficients, offset),
        },
    }
}

fn shift_pieces(coefficients: &[Vec<f64>], offset: f64) -> Vec<Vec<f64>> {
    coefficients
        .iter()
        .map(|piece| {
            let mut piece = piece.clone();
            if let Some(a) = piece.first_mut() {
                *a += offset;
            }
            piece
        })
        .collect()
}

#[cfg(test)]
#[path = "od_fusion_tests.rs"]
mod tests;
