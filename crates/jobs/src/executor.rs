// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Privileged hardware actions for calibration sessions.
//!
//! The session engine is hardware-free; whenever a step needs the real
//! world — run a pump, read a photodiode, sweep the stirrer — it asks its
//! executor. [`LocalExecutor`] is that executor on the owning unit, used
//! directly by the CLI and behind the unit API for UI sessions. Actions are
//! synchronous: calibration flows are interactive and exclusive by nature.

use crate::hardware::{default_pwm_channel, Hardware, PwmRegistry};
use crate::stirring::RpmSource;
use pio_calibration::session::{Executor, SessionError};
use pio_calibration::structs::Calibration;
use pio_calibration::CalibrationStore;
use pio_core::config::AppContext;
use pio_core::telemetry::Angle;
use pio_storage::ScopedKv;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub struct LocalExecutor {
    app: AppContext,
    hardware: Arc<dyn Hardware>,
    pwm: Arc<PwmRegistry>,
    kv: Arc<ScopedKv>,
    rpm_source: Option<Arc<dyn RpmSource>>,
}

impl LocalExecutor {
    pub fn new(
        app: AppContext,
        hardware: Arc<dyn Hardware>,
        pwm: Arc<PwmRegistry>,
        kv: Arc<ScopedKv>,
        rpm_source: Option<Arc<dyn RpmSource>>,
    ) -> Self {
        Self {
            app,
            hardware,
            pwm,
            kv,
            rpm_source,
        }
    }

    fn store(&self) -> CalibrationStore {
        CalibrationStore::new(&self.app.calibrations_dir(), Arc::clone(&self.kv))
    }

    fn executor_error(action: &str, message: impl std::fmt::Display) -> SessionError {
        SessionError::Executor {
            action: action.to_string(),
            message: message.to_string(),
        }
    }

    fn pump(&self, payload: &Value) -> Result<Value, SessionError> {
        let device = payload
            .get("device")
            .and_then(Value::as_str)
            .ok_or_else(|| Self::executor_error("pump", "missing device"))?;
        let duration_s = payload
            .get("duration_s")
            .and_then(Value::as_f64)
            .ok_or_else(|| Self::executor_error("pump", "missing duration_s"))?;
        let hz = payload.get("hz").and_then(Value::as_f64).unwrap_or(250.0);
        let dc = payload.get("dc").and_then(Value::as_f64).unwrap_or(100.0);

        let channel = default_pwm_channel(device)
            .ok_or_else(|| Self::executor_error("pump", format!("unknown device {device:?}")))?;
        let _guard = self
            .pwm
            .acquire(channel, device)
            .map_err(|e| Self::executor_error("pump", e))?;
        self.hardware
            .set_pwm_frequency(channel, hz)
            .map_err(|e| Self::executor_error("pump", e))?;
        self.hardware
            .set_pwm(channel, dc)
            .map_err(|e| Self::executor_error("pump", e))?;
        let sleep = if self.app.testing {
            Duration::from_millis(1)
        } else {
            Duration::from_secs_f64(duration_s.max(0.0))
        };
        std::thread::sleep(sleep);
        self.hardware
            .set_pwm(channel, 0.0)
            .map_err(|e| Self::executor_error("pump", e))?;
        Ok(json!({}))
    }

    fn read_aux_voltage(&self) -> Result<Value, SessionError> {
        let voltage = self
            .hardware
            .read_aux_voltage()
            .map_err(|e| Self::executor_error("read_aux_voltage", e))?;
        Ok(json!({ "voltage": voltage }))
    }

    fn od_snapshot(&self, payload: &Value) -> Result<Value, SessionError> {
        let channel = match payload.get("channel").and_then(Value::as_str) {
            Some("2") => 1,
            _ => 0,
        };
        let voltage = self
            .hardware
            .read_adc(channel)
            .map_err(|e| Self::executor_error("od_snapshot", e))?;
        Ok(json!({ "voltage": voltage }))
    }

    fn od_batch_read(&self) -> Result<Value, SessionError> {
        // Read every configured channel, keyed by its angle.
        let mut ods = serde_json::Map::new();
        for (adc, key) in [(0u8, "channel_1"), (1u8, "channel_2")] {
            let Some(angle) = self
                .app
                .config
                .get_str("od_reading", key)
                .and_then(Angle::parse)
            else {
                continue;
            };
            let voltage = self
                .hardware
                .read_adc(adc)
                .map_err(|e| Self::executor_error("od_batch_read", e))?;
            ods.insert(angle.as_str().to_string(), json!(voltage));
        }
        if ods.is_empty() {
            // Sensible default wiring: channel 0 is the 90° photodiode.
            let voltage = self
                .hardware
                .read_adc(0)
                .map_err(|e| Self::executor_error("od_batch_read", e))?;
            ods.insert("90".to_string(), json!(voltage));
        }
        Ok(json!({ "ods": ods }))
    }

    fn stirring_calibration(&self, payload: &Value) -> Result<Value, SessionError> {
        let source = self
            .rpm_source
            .as_ref()
            .ok_or_else(|| Self::executor_error("stirring_calibration", "no RPM source wired"))?;
        let initial = self
            .app
            .config
            .get_f64("stirring", "initial_duty_cycle")
            .unwrap_or(30.0);
        let min_dc = payload
            .get("min_dc")
            .and_then(Value::as_f64)
            .unwrap_or(initial * 0.66);
        let max_dc = payload
            .get("max_dc")
            .and_then(Value::as_f64)
            .unwrap_or((initial * 1.33).min(100.0));
        if min_dc >= max_dc {
            return Err(Self::executor_error("stirring_calibration", "min_dc >= max_dc"));
        }

        let channel = default_pwm_channel("stirring").unwrap_or(5);
        let _guard = self
            .pwm
            .acquire(channel, "stirring_calibration")
            .map_err(|e| Self::executor_error("stirring_calibration", e))?;

        // Down-up-down sweep to expose hysteresis.
        let mut dcs = linspace(max_dc, min_dc, 5);
        dcs.extend(linspace(min_dc, max_dc, 5));
        dcs.extend(linspace(max_dc, min_dc, 5));

        let settle = if self.app.testing {
            Duration::from_millis(1)
        } else {
            Duration::from_secs(2)
        };
        let mut rpms = Vec::with_capacity(dcs.len());
        for dc in &dcs {
            self.hardware
                .set_pwm(channel, *dc)
                .map_err(|e| Self::executor_error("stirring_calibration", e))?;
            std::thread::sleep(settle);
            rpms.push(source.estimate(2.0).unwrap_or(0.0));
        }
        self.hardware
            .set_pwm(channel, 0.0)
            .map_err(|e| Self::executor_error("stirring_calibration", e))?;
        Ok(json!({ "dcs": dcs, "rpms": rpms }))
    }

    fn od_reference_standard_read(&self) -> Result<Value, SessionError> {
        // The reference jig sits on the REF photodiode (second ADC input).
        let voltage = self
            .hardware
            .read_adc(1)
            .map_err(|e| Self::executor_error("od_reference_standard_read", e))?;
        Ok(json!({ "voltage": voltage }))
    }

    fn save_calibration(&self, payload: &Value) -> Result<Value, SessionError> {
        let calibration: Calibration =
            serde_json::from_value(payload.get("calibration").cloned().unwrap_or(Value::Null))
                .map_err(|e| Self::executor_error("save_calibration", e))?;
        let path = self
            .store()
            .save(&calibration, true)
            .map_err(|e| Self::executor_error("save_calibration", e))?;
        Ok(json!({ "path": path.display().to_string() }))
    }

    fn load_calibration(&self, payload: &Value) -> Result<Value, SessionError> {
        let device = payload
            .get("device")
            .and_then(Value::as_str)
            .ok_or_else(|| Self::executor_error("load_calibration", "missing device"))?;
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Self::executor_error("load_calibration", "missing name"))?;
        let calibration = self
            .store()
            .load(device, name)
            .map_err(|e| Self::executor_error("load_calibration", e))?;
        Ok(json!({ "calibration": calibration }))
    }
}

impl Executor for LocalExecutor {
    fn execute(&self, action: &str, payload: Value) -> Result<Value, SessionError> {
        match action {
            "pump" => self.pump(&payload),
            "read_aux_voltage" => self.read_aux_voltage(),
            "od_snapshot" => self.od_snapshot(&payload),
            "od_batch_read" => self.od_batch_read(),
            "stirring_calibration" => self.stirring_calibration(&payload),
            "od_reference_standard_read" => self.od_reference_standard_read(),
            "save_calibration" => self.save_calibration(&payload),
            "load_calibration" => self.load_calibration(&payload),
            other => Err(Self::executor_error(other, "unknown action")),
        }
    }
}

fn linspace(from: f64, to: f64, n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![from];
    }
    let step = (to - from) / (n - 1) as f64;
    (0..n).map(|i| from + step * i as f64).collect()
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
