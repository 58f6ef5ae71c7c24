// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DC-based stirring calibration.
//!
//! Sweeps the duty cycle down-up-down to expose hysteresis, drops samples
//! where the stir bar stalled (0 RPM), and fits a line DC% → RPM. A
//! non-positive slope means the tachometer or wiring is wrong, and the
//! session fails rather than saving a nonsense curve.

use super::{default_calibration_name, CalibrationProtocol};
use crate::curves::linear_fit;
use crate::session::{SessionContext, SessionError, StepHandler, StepRegistry, StepView};
use crate::structs::{Calibration, CalibrationBase, CurveData, RecordedData, StirringCalibration};
use pio_core::clock::SystemClock;
use serde_json::{json, Value};

/// Minimum fraction of sweep samples that must spin.
const MIN_SPINNING_FRACTION: f64 = 0.75;

pub struct DcBasedStirringProtocol;

impl CalibrationProtocol for DcBasedStirringProtocol {
    fn protocol_name(&self) -> &'static str {
        "dc_based"
    }

    fn title(&self) -> &'static str {
        "Stirring DC-based calibration"
    }

    fn description(&self) -> &'static str {
        "Maps duty cycle to RPM for the current stirrer configuration."
    }

    fn supported_devices(&self) -> &'static [&'static str] {
        &["stirring"]
    }

    fn registry(&self) -> StepRegistry {
        let mut registry: StepRegistry = StepRegistry::new();
        registry.insert("intro", Box::new(Intro));
        registry.insert("run_calibration", Box::new(RunCalibration));
        registry
    }
}

struct Intro;

impl StepHandler for Intro {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::info(
            "Stirring DC-based calibration",
            "Insert a vial with a stir bar and the liquid volume you plan to \
             use (water is fine). Stirring must be off before starting.",
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        if ctx.inputs.has_inputs() {
            Ok(Some("run_calibration".to_string()))
        } else {
            Ok(None)
        }
    }
}

struct RunCalibration;

impl StepHandler for RunCalibration {
    fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
        StepView::action(
            "Record calibration",
            "Continue to run the stirring calibration. This takes a few minutes.",
        )
    }

    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        let payload = ctx.execute(
            "stirring_calibration",
            json!({
                "min_dc": ctx.data_f64("min_dc"),
                "max_dc": ctx.data_f64("max_dc"),
            }),
        )?;
        let dcs = values_f64(payload.get("dcs"));
        let rpms = values_f64(payload.get("rpms"));
        if dcs.is_empty() || dcs.len() != rpms.len() {
            return Err(SessionError::Executor {
                action: "stirring_calibration".to_string(),
                message: "invalid sweep payload".to_string(),
            });
        }

        let total = dcs.len();
        let (filtered_dcs, filtered_rpms): (Vec<f64>, Vec<f64>) = dcs
            .into_iter()
            .zip(rpms)
            .filter(|(_, rpm)| *rpm > 0.0)
            .unzip();
        if filtered_dcs.is_empty() {
            ctx.fail("No RPMs were measured. Is the stir bar spinning?");
            return Ok(None);
        }
        if (filtered_dcs.len() as f64) < total as f64 * MIN_SPINNING_FRACTION {
            ctx.fail(
                "Not enough RPMs were measured. Is the stir bar caught? Try a \
                 higher initial duty cycle.",
            );
            return Ok(None);
        }

        let (slope, bias) = linear_fit(&filtered_dcs, &filtered_rpms, false)
            .map_err(|e| SessionError::Input(format!("Fit failed: {e}")))?;
        if slope <= 0.0 {
            ctx.fail("Detected a negative correlation between DC and RPM.");
            return Ok(None);
        }

        let voltage = ctx.read_voltage().unwrap_or(0.0);
        let calibration = Calibration::Stirring(StirringCalibration {
            base: CalibrationBase {
                calibration_name: default_calibration_name("stirring", &SystemClock),
                created_at: chrono::Utc::now(),
                calibrated_on_pioreactor_unit: ctx.data_str("unit").unwrap_or("unknown").to_string(),
                recorded_data: RecordedData {
                    x: filtered_dcs,
                    y: filtered_rpms,
                },
                curve_data_: CurveData::Poly {
                    coefficients: vec![slope, bias],
                },
            },
            pwm_hz: ctx.data_f64("pwm_hz").unwrap_or(200.0),
            voltage,
        });
        let link = ctx.store_calibration(calibration)?;
        ctx.complete(json!({ "calibrations": [link] }));
        Ok(None)
    }
}

fn values_f64(value: Option<&Value>) -> Vec<f64> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "stirring_dc_tests.rs"]
mod tests;
