// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Growth-rate calculator job.
//!
//! Consumes `od_reading/ods`, runs the [`GrowthEkf`](crate::ekf::GrowthEkf)
//! over the per-angle observations, and publishes the filtered OD and the
//! per-hour growth rate. Dosing events inflate the filter's OD process
//! variance for a few steps so dilution reads as dilution, not death.

use crate::ekf::GrowthEkf;
use crate::runtime::{JobError, JobRunner, JobSpec};
use async_trait::async_trait;
use pio_bus::{BusMessage, QosLevel};
use pio_core::settings::PublishedSetting;
use pio_core::telemetry::{DosingEvent, GrowthRate, ODFiltered, ODReadings};
use pio_core::topics;
use serde_json::json;

/// Steps of inflated OD variance after a dosing event.
const DOSING_INFLATION_STEPS: u32 = 12;

pub struct GrowthRateCalculator {
    ekf: Option<GrowthEkf>,
    samples_per_second: f64,
    od_process_variance: f64,
    rate_process_variance: f64,
    observation_variance: f64,
}

impl GrowthRateCalculator {
    pub fn new(samples_per_second: f64) -> Self {
        Self {
            ekf: None,
            samples_per_second,
            od_process_variance: 1e-6,
            rate_process_variance: 1e-8,
            observation_variance: 1e-4,
        }
    }

    pub fn from_config(config: &pio_core::Config) -> Self {
        let mut calc = Self::new(
            config
                .get_f64("od_reading", "samples_per_second")
                .unwrap_or(0.2),
        );
        if let Some(v) = config.get_f64("growth_rate", "od_process_variance") {
            calc.od_process_variance = v;
        }
        if let Some(v) = config.get_f64("growth_rate", "rate_process_variance") {
            calc.rate_process_variance = v;
        }
        if let Some(v) = config.get_f64("growth_rate", "observation_variance") {
            calc.observation_variance = v;
        }
        calc
    }

    fn observations(readings: &ODReadings) -> Vec<f64> {
        readings.ods.values().map(|r| r.od).collect()
    }
}

#[async_trait]
impl JobSpec for GrowthRateCalculator {
    fn name(&self) -> &'static str {
        "growth_rate_calculating"
    }

    fn published_settings(&self) -> Vec<PublishedSetting> {
        vec![PublishedSetting::numeric("growth_rate", false).with_unit("1/h")]
    }

    fn subscriptions(&self, runner: &JobRunner) -> Vec<String> {
        vec![
            topics::od_readings(runner.unit(), runner.experiment()),
            topics::dosing_events(runner.unit(), runner.experiment()),
        ]
    }

    async fn on_message(
        &mut self,
        runner: &mut JobRunner,
        message: BusMessage,
    ) -> Result<(), JobError> {
        if message.topic.ends_with("/dosing_events") {
            if serde_json::from_slice::<DosingEvent>(&message.payload).is_ok() {
                if let Some(ekf) = &mut self.ekf {
                    ekf.scale_od_variance_for_steps(DOSING_INFLATION_STEPS);
                }
            }
            return Ok(());
        }

        let readings: ODReadings = match serde_json::from_slice(&message.payload) {
            Ok(readings) => readings,
            Err(e) => {
                runner
                    .logger()
                    .warning(&format!("undecodable od payload dropped: {e}"))
                    .await;
                return Ok(());
            }
        };
        let observations = Self::observations(&readings);
        if observations.is_empty() {
            return Ok(());
        }

        let ekf = match &mut self.ekf {
            Some(ekf) => ekf,
            None => self.ekf.insert(GrowthEkf::new(
                &observations,
                self.od_process_variance,
                self.rate_process_variance,
                self.observation_variance,
            )),
        };
        ekf.update(&observations);

        let rate = ekf.growth_rate_per_hour(self.samples_per_second);
        let filtered = ekf.ods().iter().sum::<f64>() / ekf.ods().len() as f64;

        let unit = runner.unit().to_string();
        let experiment = runner.experiment().to_string();
        runner
            .publish_json(
                &format!("pioreactor/{unit}/{experiment}/growth_rate/growth_rate"),
                &GrowthRate {
                    timestamp: readings.timestamp,
                    growth_rate: rate,
                },
                QosLevel::AtLeastOnce,
                true,
            )
            .await?;
        runner
            .publish_json(
                &format!("pioreactor/{unit}/{experiment}/od_filtered/od_filtered"),
                &ODFiltered {
                    timestamp: readings.timestamp,
                    od_filtered: filtered,
                },
                QosLevel::AtLeastOnce,
                true,
            )
            .await?;
        runner.publish_setting("growth_rate", json!(rate)).await
    }
}

#[cfg(test)]
#[path = "growth_rate_tests.rs"]
mod tests;
