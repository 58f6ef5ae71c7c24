// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OD calibration against the optics reference jig.
//!
//! Two points: the blank jig face and one standard of known OD, read through
//! the dedicated `od_reference_standard_read` action. A straight line
//! through both is the whole calibration.

use super::{default_calibration_name, CalibrationProtocol};
use crate::curves::linear_fit;
use crate::session::{
    SessionContext, SessionError, StepField, StepHandler, StepRegistry, StepView,
};
use crate::structs::{Calibration, CalibrationBase, CurveData, OdCalibration, RecordedData};
use pio_core::clock::SystemClock;
use pio_core::telemetry::{Angle, PdChannel};
use serde_json::{json, Value};

pub struct OdReferenceStandardProtocol;

impl CalibrationProtocol for OdReferenceStandardProtocol {
    fn protocol_name(&self) -> &'static str {
        "od_reference_standard"
    }

    fn title(&self) -> &'static str {
        "OD calibration using the reference standard"
    }

    fn description(&self) -> &'static str {
        "Two-point linear calibration from the optics reference jig."
    }

    fn supported_devices(&self) -> &'static [&'static str] {
        &["od45", "od90", "od135"]
    }

    fn registry(&self) -> StepRegistry {
        let mut registry: StepRegistry = StepRegistry::new();
        registry.insert("intro", Box::new(Intro));
        registry.insert("name_input", Box::new(NameInput));
        registry.insert("blank_read", Box::new(BlankRead));
        registry.insert("standard_input", Box::new(StandardInput));
        registry.insert("standard_read", Box::new(StandardRead));
        registry
    }
}

fn read_reference(ctx: &SessionContext<'_>) -> Result<f64, SessionError> {
    let payload = ctx.execute("od_reference_standard_read", Value::Null)?;
    payload
        .get("voltage")
        .and_then(Value::as_f64)
        .ok_or_else(|| SessionError::Executor {
            action: "od_reference_standard_read".to_string(),
            message: "invalid voltage payload".to_string(),
        })
}

struct Intro;

impl StepHandler for Intro {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::info(
            "Reference standard calibration",
            "Seat the optics reference jig. You will take one reading of the \
             blank face and one of the standard.",
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
        Ok(Some("blank_read".to_string()))
    }
}

struct BlankRead;

impl StepHandler for BlankRead {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::action(
            "Read the blank face",
            "Rotate the jig to the blank face, then continue to record it.",
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        let voltage = read_reference(ctx)?;
        ctx.data_set("blank_voltage", json!(voltage));
        Ok(Some("standard_input".to_string()))
    }
}

struct StandardInput;

impl StepHandler for StandardInput {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::form(
            "Standard OD",
            "Rotate the jig to the standard face and enter its known OD600.",
            vec![StepField::float("standard_od", "OD600 of the standard").with_min(0.0001)],
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        let od = ctx.inputs.float("standard_od", Some(0.0001), None, None)?;
        ctx.data_set("standard_od", json!(od));
        Ok(Some("standard_read".to_string()))
    }
}

struct StandardRead;

impl StepHandler for StandardRead {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::action("Read the standard face", "Continuing records the standard and fits the line.")
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        let standard_voltage = read_reference(ctx)?;
        let blank_voltage = ctx
            .data_f64("blank_voltage")
            .ok_or_else(|| SessionError::Input("Blank reading missing.".to_string()))?;
        let standard_od = ctx
            .data_f64("standard_od")
            .ok_or_else(|| SessionError::Input("Standard OD missing.".to_string()))?;

        let x = vec![0.0, standard_od];
        let y = vec![blank_voltage, standard_voltage];
        let (slope, bias) = linear_fit(&x, &y, false)
            .map_err(|e| SessionError::Input(format!("Fit failed: {e}")))?;

        let name = ctx
            .data_str("calibration_name")
            .unwrap_or("od-reference")
            .to_string();
        let od = OdCalibration {
            base: CalibrationBase {
                calibration_name: name,
                created_at: chrono::Utc::now(),
                calibrated_on_pioreactor_unit: ctx.data_str("unit").unwrap_or("unknown").to_string(),
                recorded_data: RecordedData { x, y },
                curve_data_: CurveData::Poly {
                    coefficients: vec![slope, bias],
                },
            },
            angle: match ctx.session.target_device.as_str() {
                "od45" => Angle::Deg45,
                "od135" => Angle::Deg135,
                _ => Angle::Deg90,
            },
            pd_channel: PdChannel::Ch1,
            ir_led_intensity: ctx.data_f64("ir_led_intensity").unwrap_or(70.0),
        };
        let calibration = match ctx.session.target_device.as_str() {
            "od45" => Calibration::Od45(od),
            "od135" => Calibration::Od135(od),
            _ => Calibration::Od90(od),
        };
        let link = ctx.store_calibration(calibration)?;
        ctx.complete(json!({ "calibrations": [link] }));
        Ok(None)
    }
}

#[cfg(test)]
#[path = "od_reference_tests.rs"]
mod tests;
