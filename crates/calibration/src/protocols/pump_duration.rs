// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Duration-based pump calibration.
//!
//! Prime the tubing, run a tracer dispense to estimate the flow rate, then
//! dispense at three durations with repeated trials and fit
//! `volume = duration · slope` with the intercept forced to zero.

use super::{default_calibration_name, CalibrationProtocol};
use crate::curves::linear_fit;
use crate::session::{
    SessionContext, SessionError, StepField, StepHandler, StepRegistry, StepView,
};
use crate::structs::{Calibration, CalibrationBase, CurveData, PumpCalibration, RecordedData};
use pio_core::clock::SystemClock;
use serde_json::{json, Value};

/// Trials per test duration.
const TRIALS_PER_DURATION: usize = 3;
/// Duration multipliers around the tracer estimate.
const DURATION_SCALES: [f64; 3] = [0.75, 1.0, 1.25];
const TRACER_DURATION_S: f64 = 10.0;

pub struct DurationBasedPumpProtocol;

impl CalibrationProtocol for DurationBasedPumpProtocol {
    fn protocol_name(&self) -> &'static str {
        "duration_based"
    }

    fn title(&self) -> &'static str {
        "Pump duration-based calibration"
    }

    fn description(&self) -> &'static str {
        "Maps seconds of pumping to millilitres moved, per pump."
    }

    fn supported_devices(&self) -> &'static [&'static str] {
        &["media_pump", "alt_media_pump", "waste_pump"]
    }

    fn registry(&self) -> StepRegistry {
        let mut registry: StepRegistry = StepRegistry::new();
        registry.insert("intro", Box::new(Intro));
        registry.insert("name_input", Box::new(NameInput));
        registry.insert("pwm_settings", Box::new(PwmSettings));
        registry.insert("prime", Box::new(Prime));
        registry.insert("tracer_run", Box::new(TracerRun));
        registry.insert("tracer_volume", Box::new(TracerVolume));
        registry.insert("test_run", Box::new(TestRun));
        registry.insert("test_volume", Box::new(TestVolume));
        registry
    }
}

fn run_pump(ctx: &SessionContext<'_>, duration_s: f64) -> Result<(), SessionError> {
    let hz = ctx.data_f64("hz").unwrap_or(250.0);
    let dc = ctx.data_f64("dc").unwrap_or(100.0);
    ctx.execute(
        "pump",
        json!({
            "device": ctx.session.target_device,
            "duration_s": duration_s,
            "hz": hz,
            "dc": dc,
        }),
    )?;
    Ok(())
}

struct Intro;

impl StepHandler for Intro {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::info(
            "Pump duration-based calibration",
            "You will need: the pump connected to its usual PWM channel, tubing, \
             a small graduated cylinder, and a beaker of water. \
             The tubing must stay at the same heights as during normal operation.",
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
        Ok(Some("pwm_settings".to_string()))
    }
}

struct PwmSettings;

impl StepHandler for PwmSettings {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::form(
            "PWM settings",
            "Use the same frequency and duty cycle the pump runs with in production.",
            vec![
                StepField::float("hz", "PWM frequency (Hz)")
                    .with_min(0.1)
                    .with_max(10_000.0)
                    .with_default(json!(250.0)),
                StepField::float("dc", "Duty cycle percent")
                    .with_min(0.0)
                    .with_max(100.0)
                    .with_default(json!(100.0)),
            ],
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        let hz = ctx.inputs.float("hz", Some(0.1), Some(10_000.0), Some(250.0))?;
        let dc = ctx.inputs.float("dc", Some(0.0), Some(100.0), Some(100.0))?;
        ctx.data_set("hz", json!(hz));
        ctx.data_set("dc", json!(dc));
        Ok(Some("prime".to_string()))
    }
}

struct Prime;

impl StepHandler for Prime {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::form(
            "Prime the tubing",
            "Place both tubing ends in water. Priming fills the tubing so the \
             tracer run measures liquid, not air.",
            vec![StepField::float("prime_duration_s", "Prime duration (seconds)")
                .with_min(5.0)
                .with_default(json!(15.0))],
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        let duration = ctx.inputs.float("prime_duration_s", Some(5.0), None, Some(15.0))?;
        run_pump(ctx, duration)?;
        Ok(Some("tracer_run".to_string()))
    }
}

struct TracerRun;

impl StepHandler for TracerRun {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::action(
            "Tracer run",
            "Move the outflow into the graduated cylinder. Continuing runs the \
             pump for 10 seconds.",
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        run_pump(ctx, TRACER_DURATION_S)?;
        Ok(Some("tracer_volume".to_string()))
    }
}

struct TracerVolume;

impl StepHandler for TracerVolume {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::form(
            "Tracer volume",
            "How much water was expelled during the tracer run?",
            vec![StepField::float("volume_ml", "Volume expelled (mL)").with_min(0.0001)],
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        let volume = ctx.inputs.float("volume_ml", Some(0.0001), None, None)?;
        let rate = volume / TRACER_DURATION_S;
        ctx.ensure(rate > 0.0, "Tracer run measured no flow.")?;
        // Target roughly 1 mL per dispense; three durations around that.
        let base_duration = 1.0 / rate;
        let durations: Vec<f64> = DURATION_SCALES
            .iter()
            .flat_map(|scale| std::iter::repeat(scale * base_duration).take(TRIALS_PER_DURATION))
            .collect();
        ctx.data_set("durations", json!(durations));
        ctx.data_set("test_index", json!(0));
        Ok(Some("test_run".to_string()))
    }
}

struct TestRun;

impl StepHandler for TestRun {
    fn render(&self, ctx: &SessionContext<'_>) -> StepView {
        let durations = ctx.data_vec_f64("durations");
        let index = ctx.data_f64("test_index").unwrap_or(0.0) as usize;
        let total = durations.len();
        let duration = durations.get(index).copied().unwrap_or(0.0);
        StepView::action(
            &format!("Dispense {} of {total}", index + 1),
            &format!(
                "Empty the cylinder. Continuing runs the pump for {duration:.1} seconds."
            ),
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        let durations = ctx.data_vec_f64("durations");
        let index = ctx.data_f64("test_index").unwrap_or(0.0) as usize;
        let duration = durations
            .get(index)
            .copied()
            .ok_or_else(|| SessionError::Input("No dispense pending.".to_string()))?;
        run_pump(ctx, duration)?;
        Ok(Some("test_volume".to_string()))
    }
}

struct TestVolume;

impl StepHandler for TestVolume {
    fn render(&self, ctx: &SessionContext<'_>) -> StepView {
        let measured_x = ctx.data_vec_f64("measured_durations");
        let measured_y = ctx.data_vec_f64("measured_volumes");
        let mut step = StepView::form(
            "Measured volume",
            "How much water was expelled?",
            vec![StepField::float("volume_ml", "Volume expelled (mL)").with_min(0.0001)],
        );
        if !measured_x.is_empty() {
            step = step.with_metadata(json!({
                "chart": {
                    "title": "Calibration progress",
                    "x_label": "duration (s)",
                    "y_label": "volume (mL)",
                    "series": [{"points": measured_x
                        .iter()
                        .zip(&measured_y)
                        .map(|(x, y)| json!({"x": x, "y": y}))
                        .collect::<Vec<_>>()}],
                }
            }));
        }
        step
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        let volume = ctx.inputs.float("volume_ml", Some(0.0001), None, None)?;
        let durations = ctx.data_vec_f64("durations");
        let index = ctx.data_f64("test_index").unwrap_or(0.0) as usize;
        let duration = durations
            .get(index)
            .copied()
            .ok_or_else(|| SessionError::Input("No dispense pending.".to_string()))?;

        ctx.data_push("measured_durations", json!(duration));
        ctx.data_push("measured_volumes", json!(volume));
        ctx.data_set("test_index", json!(index + 1));

        if index + 1 < durations.len() {
            return Ok(Some("test_run".to_string()));
        }

        let x = ctx.data_vec_f64("measured_durations");
        let y = ctx.data_vec_f64("measured_volumes");
        let (slope, bias) = linear_fit(&x, &y, true)
            .map_err(|e| SessionError::Input(format!("Fit failed: {e}")))?;
        ctx.ensure(slope > 0.0, "Fitted flow rate is not positive.")?;

        let name = ctx
            .data_str("calibration_name")
            .unwrap_or("pump-calibration")
            .to_string();
        let voltage = ctx.read_voltage().unwrap_or(0.0);
        let base = CalibrationBase {
            calibration_name: name,
            created_at: chrono::Utc::now(),
            calibrated_on_pioreactor_unit: ctx
                .data_str("unit")
                .unwrap_or("unknown")
                .to_string(),
            recorded_data: RecordedData { x, y },
            curve_data_: CurveData::Poly {
                coefficients: vec![slope, bias],
            },
        };
        let pump = PumpCalibration {
            base,
            hz: ctx.data_f64("hz").unwrap_or(250.0),
            dc: ctx.data_f64("dc").unwrap_or(100.0),
            voltage,
        };
        let calibration = match ctx.session.target_device.as_str() {
            "media_pump" => Calibration::MediaPump(pump),
            "alt_media_pump" => Calibration::AltMediaPump(pump),
            _ => Calibration::WastePump(pump),
        };
        let link = ctx.store_calibration(calibration)?;
        ctx.complete(json!({ "calibrations": [link] }));
        Ok(None)
    }
}

#[cfg(test)]
#[path = "pump_duration_tests.rs"]
mod tests;
