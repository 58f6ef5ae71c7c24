// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stirring job.
//!
//! Starts the fan at a bootstrap duty cycle (from the active calibration
//! when one exists), then closes the loop on measured RPM from the
//! hall-effect sensor. Sleeping parks the duty cycle at zero and ready
//! restores it, so a paused experiment does not shear its culture.

use crate::hardware::{default_pwm_channel, PwmGuard};
use crate::pid::Pid;
use crate::runtime::{JobError, JobRunner, JobSpec};
use async_trait::async_trait;
use pio_bus::Bus as _;
use pio_calibration::structs::Calibration;
use pio_calibration::CalibrationStore;
use pio_core::settings::PublishedSetting;
use pio_core::topics;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Closed-loop correction cadence.
const LOOP_INTERVAL: Duration = Duration::from_secs(4);
/// Seconds of hall-effect edges integrated per estimate.
const ESTIMATE_WINDOW_S: f64 = 2.0;

/// Source of measured RPM (hall-effect edge counting lives off-crate).
pub trait RpmSource: Send + Sync {
    /// Average RPM over the last `seconds`, or `None` when no signal.
    fn estimate(&self, seconds: f64) -> Option<f64>;
}

/// Scripted RPM source for tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct ScriptedRpm {
    readings: parking_lot::Mutex<Vec<f64>>,
}

#[cfg(any(test, feature = "test-support"))]
impl ScriptedRpm {
    pub fn new(readings: &[f64]) -> Arc<Self> {
        Arc::new(Self {
            readings: parking_lot::Mutex::new(readings.to_vec()),
        })
    }
}

#[cfg(any(test, feature = "test-support"))]
impl RpmSource for ScriptedRpm {
    fn estimate(&self, _seconds: f64) -> Option<f64> {
        let mut readings = self.readings.lock();
        if readings.len() > 1 {
            Some(readings.remove(0))
        } else {
            readings.first().copied()
        }
    }
}

pub struct Stirrer {
    target_rpm: f64,
    rpm_source: Option<Arc<dyn RpmSource>>,
    calibration: Option<Calibration>,
    pid: Pid,
    guard: Option<PwmGuard>,
    pwm_channel: u8,
}

impl Stirrer {
    pub fn new(target_rpm: f64, rpm_source: Option<Arc<dyn RpmSource>>) -> Self {
        Self {
            target_rpm,
            rpm_source,
            calibration: None,
            // Gains tuned for the 12 V fan; output is a DC delta.
            pid: Pid::new(0.01, 0.002, 0.0, target_rpm, -10.0, 10.0),
            guard: None,
            pwm_channel: default_pwm_channel("stirring").unwrap_or(5),
        }
    }

    fn bootstrap_dc(&self, runner: &JobRunner) -> f64 {
        if let Some(calibration) = &self.calibration {
            // The calibration maps DC → RPM; invert it for the target.
            if let Ok(dc) = calibration.y_to_x(self.target_rpm, false) {
                return dc.clamp(0.0, 100.0);
            }
        }
        runner
            .app()
            .config
            .get_f64("stirring", "initial_duty_cycle")
            .unwrap_or(30.0)
    }

    async fn apply_dc(&mut self, runner: &mut JobRunner, dc: f64) -> Result<(), JobError> {
        let dc = dc.clamp(0.0, 100.0);
        runner.hardware().set_pwm(self.pwm_channel, dc)?;
        runner.publish_setting("duty_cycle", json!(dc)).await
    }
}

#[async_trait]
impl JobSpec for Stirrer {
    fn name(&self) -> &'static str {
        "stirring"
    }

    fn published_settings(&self) -> Vec<PublishedSetting> {
        vec![
            PublishedSetting::numeric("target_rpm", true)
                .with_unit("rpm")
                .with_value(json!(self.target_rpm)),
            PublishedSetting::numeric("duty_cycle", true).with_unit("%"),
            PublishedSetting::numeric("measured_rpm", false).with_unit("rpm"),
        ]
    }

    fn tick_interval(&self, _runner: &JobRunner) -> Option<Duration> {
        self.rpm_source.as_ref().map(|_| LOOP_INTERVAL)
    }

    async fn on_init(&mut self, runner: &mut JobRunner) -> Result<(), JobError> {
        let store = CalibrationStore::new(
            &runner.app().calibrations_dir(),
            Arc::clone(runner.kv()),
        );
        self.calibration = store
            .load_active("stirring")
            .map_err(|e| JobError::Fatal(e.to_string()))?;
        self.guard = Some(runner.pwm().acquire(self.pwm_channel, "stirring")?);
        let dc = self.bootstrap_dc(runner);
        self.apply_dc(runner, dc).await
    }

    async fn on_ready(&mut self, runner: &mut JobRunner) -> Result<(), JobError> {
        let dc = runner.setting_f64("duty_cycle").unwrap_or(0.0);
        if dc == 0.0 {
            let dc = self.bootstrap_dc(runner);
            self.apply_dc(runner, dc).await?;
        } else {
            runner.hardware().set_pwm(self.pwm_channel, dc)?;
        }
        Ok(())
    }

    async fn on_sleeping(&mut self, runner: &mut JobRunner) -> Result<(), JobError> {
        // Keep the stored duty_cycle so ready can restore it.
        runner.hardware().set_pwm(self.pwm_channel, 0.0)?;
        Ok(())
    }

    async fn on_disconnected(&mut self, runner: &mut JobRunner) -> Result<(), JobError> {
        if self.guard.is_some() {
            runner.hardware().set_pwm(self.pwm_channel, 0.0)?;
        }
        self.guard = None;
        Ok(())
    }

    async fn set_setting(
        &mut self,
        runner: &mut JobRunner,
        key: &str,
        value: Value,
    ) -> Result<(), JobError> {
        match key {
            "target_rpm" => {
                if let Some(target) = value.as_f64() {
                    self.target_rpm = target;
                    self.pid.set_setpoint(target);
                }
                runner.publish_setting(key, value).await
            }
            "duty_cycle" => {
                let dc = value.as_f64().unwrap_or(0.0);
                self.apply_dc(runner, dc).await
            }
            _ => runner.publish_setting(key, value).await,
        }
    }

    async fn tick(&mut self, runner: &mut JobRunner) -> Result<(), JobError> {
        let Some(source) = &self.rpm_source else {
            return Ok(());
        };
        let Some(measured) = source.estimate(ESTIMATE_WINDOW_S) else {
            runner.logger().warning("no RPM signal detected").await;
            return Ok(());
        };
        runner
            .publish_setting("measured_rpm", json!(measured))
            .await?;
        let correction = self.pid.update(measured, LOOP_INTERVAL.as_secs_f64());
        let dc = runner.setting_f64("duty_cycle").unwrap_or(0.0) + correction;
        self.apply_dc(runner, dc).await
    }
}

/// Poll the retained stirring topics until `measured_rpm` is within
/// `tolerance` of `target_rpm`, or `timeout` elapses. Returns whether the
/// target was reached.
pub async fn block_until_rpm_is_close_to_target(
    bus: &Arc<dyn pio_bus::Bus>,
    unit: &str,
    experiment: &str,
    tolerance: f64,
    timeout: Duration,
) -> bool {
    let target_topic = topics::setting(unit, experiment, "stirring", "target_rpm");
    let measured_topic = topics::setting(unit, experiment, "stirring", "measured_rpm");
    let deadline = tokio::time::Instant::now() + timeout;
    let poll = Duration::from_millis(250).min(timeout);

    loop {
        let target = fetch_f64(bus, &target_topic).await;
        let measured = fetch_f64(bus, &measured_topic).await;
        if let (Some(target), Some(measured)) = (target, measured) {
            if (target - measured).abs() <= tolerance {
                return true;
            }
        }
        if tokio::time::Instant::now() + poll > deadline {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

async fn fetch_f64(bus: &Arc<dyn pio_bus::Bus>, topic: &str) -> Option<f64> {
    let raw = bus
        .fetch_retained(topic, Duration::from_millis(500))
        .await
        .ok()??;
    String::from_utf8_lossy(&raw).trim().parse().ok()
}

#[cfg(test)]
#[path = "stirring_tests.rs"]
mod tests;
