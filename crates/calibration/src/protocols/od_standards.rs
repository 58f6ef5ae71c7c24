// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OD calibration from prepared standards.
//!
//! The operator inserts vials of known OD600, the unit records the sensor
//! voltage for each, then a blank anchors the low end. The fit is a cubic
//! polynomial (spline for many standards) weighted toward the blank, since
//! the blank is the one point every experiment starts near.

use super::{default_calibration_name, CalibrationProtocol};
use crate::curves::{natural_cubic_spline, poly_fit};
use crate::session::{
    SessionContext, SessionError, StepField, StepHandler, StepRegistry, StepView,
};
use crate::structs::{Calibration, CalibrationBase, CurveData, OdCalibration, RecordedData};
use pio_core::clock::SystemClock;
use pio_core::telemetry::{Angle, PdChannel};
use serde_json::{json, Value};

/// Standards beyond which a spline fits better than a cubic.
const SPLINE_THRESHOLD: usize = 6;
/// Weight multiplier on the blank observation.
const BLANK_WEIGHT: f64 = 10.0;

pub struct StandardsOdProtocol;

impl CalibrationProtocol for StandardsOdProtocol {
    fn protocol_name(&self) -> &'static str {
        "standards"
    }

    fn title(&self) -> &'static str {
        "OD calibration using standards"
    }

    fn description(&self) -> &'static str {
        "Fits sensor voltage to OD600 from a series of prepared standards."
    }

    fn supported_devices(&self) -> &'static [&'static str] {
        &["od45", "od90", "od135"]
    }

    fn registry(&self) -> StepRegistry {
        let mut registry: StepRegistry = StepRegistry::new();
        registry.insert("intro", Box::new(Intro));
        registry.insert("name_input", Box::new(NameInput));
        registry.insert("optics", Box::new(Optics));
        registry.insert("place_standard", Box::new(PlaceStandard));
        registry.insert("measure_standard", Box::new(MeasureStandard));
        registry.insert("another_standard", Box::new(AnotherStandard));
        registry.insert("place_blank", Box::new(PlaceBlank));
        registry.insert("measure_blank", Box::new(MeasureBlank));
        registry
    }
}

/// Angle implied by the device directory (`od90` → 90°).
fn angle_for_device(device: &str) -> Angle {
    match device {
        "od45" => Angle::Deg45,
        "od135" => Angle::Deg135,
        _ => Angle::Deg90,
    }
}

struct Intro;

impl StepHandler for Intro {
    fn render(&self, ctx: &SessionContext<'_>) -> StepView {
        StepView::info(
            "OD calibration using standards",
            &format!(
                "You will need several vials of known OD600 and one blank of \
                 plain media. Standards are measured on the {} photodiode. \
                 Stirring should be on and stable before each measurement.",
                ctx.session.target_device
            ),
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        if ctx.inputs.has_inputs() {
            Ok(Some("name_input".to_string()))
        } else {
            Ok(None)
        }
    }
}

struct NameInput;

impl StepHandler for NameInput {
    fn render(&self, ctx: &SessionContext<'_>) -> StepView {
        let default = default_calibration_name(&ctx.session.target_device, &SystemClock);
        StepView::form(
            "Name this calibration",
            "",
            vec![StepField::str("calibration_name", "Calibration name")
                .with_default(Value::String(default))],
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        let default = default_calibration_name(&ctx.session.target_device, &SystemClock);
        let name = ctx.inputs.str("calibration_name", Some(&default))?;
        ctx.data_set("calibration_name", Value::String(name));
        Ok(Some("optics".to_string()))
    }
}

struct Optics;

impl StepHandler for Optics {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::form(
            "Optics configuration",
            "Which photodiode channel is wired to this angle, and at what IR \
             LED intensity will experiments run?",
            vec![
                StepField::choice("pd_channel", "Photodiode channel", &["1", "2"]),
                StepField::float("ir_led_intensity", "IR LED intensity (%)")
                    .with_min(0.0)
                    .with_max(100.0)
                    .with_default(json!(70.0)),
            ],
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        let channel = ctx.inputs.choice(
            "pd_channel",
            &["1".to_string(), "2".to_string()],
            None,
        )?;
        let intensity = ctx
            .inputs
            .float("ir_led_intensity", Some(0.0), Some(100.0), Some(70.0))?;
        ctx.data_set("pd_channel", Value::String(channel));
        ctx.data_set("ir_led_intensity", json!(intensity));
        Ok(Some("place_standard".to_string()))
    }
}

struct PlaceStandard;

impl StepHandler for PlaceStandard {
    fn render(&self, ctx: &SessionContext<'_>) -> StepView {
        let n = ctx.data_vec_f64("standard_ods").len();
        StepView::form(
            &format!("Insert standard #{}", n + 1),
            "Insert the vial and wait for stirring to settle, then enter its \
             known OD600.",
            vec![StepField::float("standard_od", "OD600 of this standard").with_min(0.0)],
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
        StepView::action(
            "Measure",
            "Continuing records the sensor voltage for this standard.",
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        let od = ctx
            .data_f64("pending_od")
            .ok_or_else(|| SessionError::Input("No standard pending.".to_string()))?;
        let payload = ctx.execute(
            "od_snapshot",
            json!({ "channel": ctx.data_str("pd_channel").unwrap_or("1") }),
        )?;
        let voltage = payload
            .get("voltage")
            .and_then(Value::as_f64)
            .ok_or_else(|| SessionError::Executor {
                action: "od_snapshot".to_string(),
                message: "invalid voltage payload".to_string(),
            })?;
        ctx.data_push("standard_ods", json!(od));
        ctx.data_push("standard_voltages", json!(voltage));
        Ok(Some("another_standard".to_string()))
    }
}

struct AnotherStandard;

impl StepHandler for AnotherStandard {
    fn render(&self, ctx: &SessionContext<'_>) -> StepView {
        let n = ctx.data_vec_f64("standard_ods").len();
        StepView::form(
            &format!("{n} standard(s) recorded"),
            "Measure another standard? At least three are needed for a good fit.",
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
            Ok(Some("place_blank".to_string()))
        }
    }
}

struct PlaceBlank;

impl StepHandler for PlaceBlank {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::info(
            "Insert the blank",
            "Insert a vial of plain media (OD600 = 0). This anchors the low \
             end of the curve.",
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        if ctx.inputs.has_inputs() {
            Ok(Some("measure_blank".to_string()))
        } else {
            Ok(None)
        }
    }
}

struct MeasureBlank;

impl StepHandler for MeasureBlank {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::action("Measure blank", "Continuing records the blank voltage and fits the curve.")
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        let payload = ctx.execute(
            "od_snapshot",
            json!({ "channel": ctx.data_str("pd_channel").unwrap_or("1") }),
        )?;
        let blank_voltage = payload
            .get("voltage")
            .and_then(Value::as_f64)
            .ok_or_else(|| SessionError::Executor {
                action: "od_snapshot".to_string(),
                message: "invalid voltage payload".to_string(),
            })?;

        let mut ods = ctx.data_vec_f64("standard_ods");
        let mut voltages = ctx.data_vec_f64("standard_voltages");
        ods.push(0.0);
        voltages.push(blank_voltage);

        let calibration = fit_od_calibration(ctx, &ods, &voltages)?;
        let link = ctx.store_calibration(calibration)?;
        ctx.complete(json!({ "calibrations": [link] }));
        Ok(None)
    }
}

/// Fit OD → voltage (x = OD, y = voltage), weighted toward the blank.
fn fit_od_calibration(
    ctx: &SessionContext<'_>,
    ods: &[f64],
    voltages: &[f64],
) -> Result<Calibration, SessionError> {
    // Sort by OD so spline knots are increasing; blank lands first.
    let mut pairs: Vec<(f64, f64)> = ods.iter().copied().zip(voltages.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    let x: Vec<f64> = pairs.iter().map(|p| p.0).collect();
    let y: Vec<f64> = pairs.iter().map(|p| p.1).collect();

    let curve = if x.len() >= SPLINE_THRESHOLD {
        let (knots, coefficients) = natural_cubic_spline(&x, &y)
            .map_err(|e| SessionError::Input(format!("Spline fit failed: {e}")))?;
        CurveData::Spline { knots, coefficients }
    } else {
        let degree = 3.min(x.len() - 1);
        let weights: Vec<f64> = x
            .iter()
            .map(|&od| if od == 0.0 { BLANK_WEIGHT } else { 1.0 })
            .collect();
        let coefficients = poly_fit(&x, &y, degree, &weights)
            .map_err(|e| SessionError::Input(format!("Polynomial fit failed: {e}")))?;
        CurveData::Poly { coefficients }
    };

    let name = ctx
        .data_str("calibration_name")
        .unwrap_or("od-calibration")
        .to_string();
    let channel = match ctx.data_str("pd_channel") {
        Some("2") => PdChannel::Ch2,
        _ => PdChannel::Ch1,
    };
    let od = OdCalibration {
        base: CalibrationBase {
            calibration_name: name,
            created_at: chrono::Utc::now(),
            calibrated_on_pioreactor_unit: ctx.data_str("unit").unwrap_or("unknown").to_string(),
            recorded_data: RecordedData { x, y },
            curve_data_: curve,
        },
        angle: angle_for_device(&ctx.session.target_device),
        pd_channel: channel,
        ir_led_intensity: ctx.data_f64("ir_led_intensity").unwrap_or(70.0),
    };
    Ok(match ctx.session.target_device.as_str() {
        "od45" => Calibration::Od45(od),
        "od135" => Calibration::Od135(od),
        _ => Calibration::Od90(od),
    })
}

#[cfg(test)]
#[path = "od_standards_tests.rs"]
mod tests;
