// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Temperature automation.
//!
//! The thermostat variant PIDs the heater duty cycle against the onboard
//! thermometer. Crossing [`EMERGENCY_TEMP_C`] latches a retained emergency
//! flag that every pump checks before moving liquid, kills the heater, and
//! keeps it off until the job is restarted.

use crate::hardware::{default_pwm_channel, PwmGuard};
use crate::pid::Pid;
use crate::runtime::{JobError, JobRunner, JobSpec};
use async_trait::async_trait;
use pio_bus::{Bus as _, QosLevel};
use pio_core::settings::PublishedSetting;
use pio_core::topics;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Hard ceiling; beyond this the culture (and the enclosure) are at risk.
pub const EMERGENCY_TEMP_C: f64 = 57.0;
const LOOP_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
struct TemperatureReading {
    timestamp: chrono::DateTime<chrono::Utc>,
    temperature: f64,
}

pub struct TemperatureAutomation {
    automation_name: String,
    pid: Pid,
    guard: Option<PwmGuard>,
    heater_channel: u8,
    emergency_latched: bool,
}

impl TemperatureAutomation {
    pub fn thermostat(target_celsius: f64) -> Self {
        Self {
            automation_name: "thermostat".to_string(),
            pid: Pid::new(3.0, 0.05, 0.0, target_celsius, 0.0, 40.0),
            guard: None,
            heater_channel: default_pwm_channel("heater").unwrap_or(6),
            emergency_latched: false,
        }
    }

    async fn latch_emergency(&mut self, runner: &mut JobRunner, temp: f64) -> Result<(), JobError> {
        self.emergency_latched = true;
        runner.hardware().set_pwm(self.heater_channel, 0.0)?;
        let topic = crate::pump::emergency_stop_topic(runner.unit(), runner.experiment());
        runner
            .bus()
            .publish(&topic, b"1".to_vec(), QosLevel::ExactlyOnce, true)
            .await
            .map_err(JobError::Bus)?;
        runner
            .logger()
            .error(&format!(
                "temperature {temp:.1}C exceeds {EMERGENCY_TEMP_C}C, heater latched off"
            ))
            .await;
        Ok(())
    }
}

#[async_trait]
impl JobSpec for TemperatureAutomation {
    fn name(&self) -> &'static str {
        "temperature_automation"
    }

    fn published_settings(&self) -> Vec<PublishedSetting> {
        vec![
            PublishedSetting::string("automation_name", false)
                .with_value(Value::String(self.automation_name.clone())),
            PublishedSetting::numeric("target_temperature", true)
                .with_unit("C")
                .with_value(json!(self.pid.setpoint())),
            PublishedSetting::numeric("heater_duty_cycle", false).with_unit("%"),
        ]
    }

    fn tick_interval(&self, _runner: &JobRunner) -> Option<Duration> {
        Some(LOOP_INTERVAL)
    }

    async fn on_init(&mut self, runner: &mut JobRunner) -> Result<(), JobError> {
        self.guard = Some(runner.pwm().acquire(self.heater_channel, "temperature_automation")?);
        Ok(())
    }

    async fn on_sleeping(&mut self, runner: &mut JobRunner) -> Result<(), JobError> {
        runner.hardware().set_pwm(self.heater_channel, 0.0)?;
        self.pid.reset();
        Ok(())
    }

    async fn on_disconnected(&mut self, runner: &mut JobRunner) -> Result<(), JobError> {
        if self.guard.is_some() {
            runner.hardware().set_pwm(self.heater_channel, 0.0)?;
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
        if key == "target_temperature" {
            if let Some(target) = value.as_f64() {
                self.pid.set_setpoint(target);
            }
        }
        runner.publish_setting(key, value).await
    }

    async fn tick(&mut self, runner: &mut JobRunner) -> Result<(), JobError> {
        let temp = runner.hardware().read_temp()?;
        let reading = TemperatureReading {
            timestamp: chrono::Utc::now(),
            temperature: temp,
        };
        let topic = topics::setting(
            runner.unit(),
            runner.experiment(),
            "temperature_automation",
            "temperature_reading",
        );
        runner
            .publish_json(&topic, &reading, QosLevel::AtLeastOnce, true)
            .await?;

        if temp >= EMERGENCY_TEMP_C && !self.emergency_latched {
            return self.latch_emergency(runner, temp).await;
        }
        if self.emergency_latched {
            // Heater stays off; only a restart clears the latch.
            return Ok(());
        }

        let dc = self.pid.update(temp, LOOP_INTERVAL.as_secs_f64());
        runner.hardware().set_pwm(self.heater_channel, dc)?;
        runner
            .publish_setting("heater_duty_cycle", json!(dc))
            .await
    }
}

#[cfg(test)]
#[path = "temperature_tests.rs"]
mod tests;
