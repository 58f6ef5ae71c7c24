// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dosing automations.
//!
//! One job, four strategies. Every strategy sees the latest filtered OD and
//! growth rate from the bus and decides when to exchange media; the actual
//! liquid handling always goes through [`crate::pump::run_pump`], so
//! calibration, exclusivity, and dosing events are uniform.

use crate::pump::{run_pump, PumpAmount};
use crate::runtime::{JobError, JobRunner, JobSpec};
use async_trait::async_trait;
use pio_bus::BusMessage;
use pio_calibration::structs::{Calibration, PumpCalibration};
use pio_calibration::CalibrationStore;
use pio_core::settings::PublishedSetting;
use pio_core::telemetry::{GrowthRate, ODFiltered};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// KV scope accumulating millilitres moved per media kind.
pub const THROUGHPUT_SCOPE: &str = "pump_throughput";

/// Strategy run by the dosing-automation job.
#[derive(Debug, Clone, PartialEq)]
pub enum DosingAutomation {
    /// Observe only.
    Silent,
    /// Fixed-rate media exchange.
    Chemostat {
        exchange_volume_ml: f64,
        duration_minutes: f64,
    },
    /// Dilute whenever filtered OD exceeds the target.
    Turbidostat {
        target_od: f64,
        volume_ml: f64,
        duration_minutes: f64,
    },
    /// Hold OD with alternative media, splitting doses by a growth-rate PID.
    PidMorbidostat {
        target_od: f64,
        target_growth_rate: f64,
        volume_ml: f64,
        duration_minutes: f64,
    },
}

impl DosingAutomation {
    pub fn name(&self) -> &'static str {
        match self {
            DosingAutomation::Silent => "silent",
            DosingAutomation::Chemostat { .. } => "chemostat",
            DosingAutomation::Turbidostat { .. } => "turbidostat",
            DosingAutomation::PidMorbidostat { .. } => "pid_morbidostat",
        }
    }

    /// Build from an options map (`{"automation_name": …, "volume": …}`).
    pub fn from_options(options: &Value) -> Result<Self, String> {
        let name = options
            .get("automation_name")
            .and_then(Value::as_str)
            .ok_or("missing automation_name")?;
        let f = |key: &str| options.get(key).and_then(Value::as_f64);
        match name {
            "silent" => Ok(DosingAutomation::Silent),
            "chemostat" => Ok(DosingAutomation::Chemostat {
                exchange_volume_ml: f("volume").unwrap_or(0.5),
                duration_minutes: f("duration").unwrap_or(20.0),
            }),
            "turbidostat" => Ok(DosingAutomation::Turbidostat {
                target_od: f("target_normalized_od")
                    .or_else(|| f("target_od"))
                    .ok_or("turbidostat requires target_od")?,
                volume_ml: f("volume").unwrap_or(1.0),
                duration_minutes: f("duration").unwrap_or(1.0),
            }),
            "pid_morbidostat" => Ok(DosingAutomation::PidMorbidostat {
                target_od: f("target_od").ok_or("pid_morbidostat requires target_od")?,
                target_growth_rate: f("target_growth_rate").unwrap_or(0.1),
                volume_ml: f("volume").unwrap_or(0.5),
                duration_minutes: f("duration").unwrap_or(5.0),
            }),
            other => Err(format!("unknown dosing automation {other:?}")),
        }
    }

    fn duration_minutes(&self) -> Option<f64> {
        match self {
            DosingAutomation::Silent => None,
            DosingAutomation::Chemostat { duration_minutes, .. }
            | DosingAutomation::Turbidostat { duration_minutes, .. }
            | DosingAutomation::PidMorbidostat { duration_minutes, .. } => Some(*duration_minutes),
        }
    }
}

/// The `dosing_automation` sub-job hosting a strategy.
pub struct DosingAutomationJob {
    automation: DosingAutomation,
    latest_od: Option<f64>,
    latest_growth_rate: Option<f64>,
    last_dose_at: Option<Instant>,
    media_calibration: Option<PumpCalibration>,
    alt_media_calibration: Option<PumpCalibration>,
    waste_calibration: Option<PumpCalibration>,
}

impl DosingAutomationJob {
    pub fn new(automation: DosingAutomation) -> Self {
        Self {
            automation,
            latest_od: None,
            latest_growth_rate: None,
            last_dose_at: None,
            media_calibration: None,
            alt_media_calibration: None,
            waste_calibration: None,
        }
    }

    fn cooldown(&self) -> Duration {
        self.automation
            .duration_minutes()
            .map(|m| Duration::from_secs_f64(m * 60.0))
            .unwrap_or(Duration::from_secs(60))
    }

    fn in_cooldown(&self) -> bool {
        self.last_dose_at
            .map(|at| at.elapsed() < self.cooldown())
            .unwrap_or(false)
    }

    fn load_pump_calibration(store: &CalibrationStore, device: &str) -> Option<PumpCalibration> {
        match store.load_active(device) {
            Ok(Some(calibration)) => match calibration {
                Calibration::MediaPump(c)
                | Calibration::AltMediaPump(c)
                | Calibration::WastePump(c) => Some(c),
                _ => None,
            },
            _ => None,
        }
    }

    async fn record_throughput(&self, runner: &JobRunner, key: &str, ml: f64) {
        let kv = runner.kv();
        let current: f64 = kv
            .get_str(THROUGHPUT_SCOPE, key)
            .ok()
            .flatten()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0.0);
        let _ = kv.put_str(THROUGHPUT_SCOPE, key, &format!("{}", current + ml));
    }

    /// Add `media_ml` (+ optionally alt media) then remove the same total as
    /// waste, keeping vial volume constant.
    async fn exchange(
        &mut self,
        runner: &mut JobRunner,
        media_ml: f64,
        alt_media_ml: f64,
    ) -> Result<(), JobError> {
        let source = self.automation.name();
        let ctx = runner.context().clone();
        let mut total = 0.0;
        if media_ml > 0.0 {
            run_pump(
                &ctx,
                "media_pump",
                PumpAmount::VolumeMl(media_ml),
                250.0,
                100.0,
                self.media_calibration.as_ref(),
                source,
            )
            .await?;
            self.record_throughput(runner, "media_ml", media_ml).await;
            total += media_ml;
        }
        if alt_media_ml > 0.0 {
            run_pump(
                &ctx,
                "alt_media_pump",
                PumpAmount::VolumeMl(alt_media_ml),
                250.0,
                100.0,
                self.alt_media_calibration.as_ref(),
                source,
            )
            .await?;
            self.record_throughput(runner, "alt_media_ml", alt_media_ml).await;
            total += alt_media_ml;
        }
        if total > 0.0 {
            run_pump(
                &ctx,
                "waste_pump",
                PumpAmount::VolumeMl(total),
                250.0,
                100.0,
                self.waste_calibration.as_ref(),
                source,
            )
            .await?;
            self.record_throughput(runner, "waste_ml", total).await;
            self.last_dose_at = Some(Instant::now());
        }
        Ok(())
    }

    async fn act(&mut self, runner: &mut JobRunner) -> Result<(), JobError> {
        if self.in_cooldown() {
            return Ok(());
        }
        match self.automation.clone() {
            DosingAutomation::Silent => Ok(()),
            DosingAutomation::Chemostat {
                exchange_volume_ml, ..
            } => self.exchange(runner, exchange_volume_ml, 0.0).await,
            DosingAutomation::Turbidostat {
                target_od,
                volume_ml,
                ..
            } => {
                let Some(od) = self.latest_od else {
                    return Ok(());
                };
                if od > target_od {
                    runner
                        .logger()
                        .info(&format!("od {od:.3} above target {target_od:.3}, diluting"))
                        .await;
                    self.exchange(runner, volume_ml, 0.0).await
                } else {
                    Ok(())
                }
            }
            DosingAutomation::PidMorbidostat {
                target_od,
                target_growth_rate,
                volume_ml,
                ..
            } => {
                let (Some(od), Some(rate)) = (self.latest_od, self.latest_growth_rate) else {
                    return Ok(());
                };
                if od < target_od {
                    return Ok(());
                }
                // Growing faster than intended: push the inhibitory alt
                // media proportionally harder.
                let excess = ((rate - target_growth_rate) / target_growth_rate.max(1e-6))
                    .clamp(0.0, 1.0);
                let alt = volume_ml * excess;
                let media = volume_ml - alt;
                self.exchange(runner, media, alt).await
            }
        }
    }
}

#[async_trait]
impl JobSpec for DosingAutomationJob {
    fn name(&self) -> &'static str {
        "dosing_automation"
    }

    fn published_settings(&self) -> Vec<PublishedSetting> {
        let mut settings = vec![PublishedSetting::string("automation_name", false)
            .with_value(Value::String(self.automation.name().to_string()))];
        match &self.automation {
            DosingAutomation::Turbidostat {
                target_od,
                volume_ml,
                ..
            } => {
                settings.push(
                    PublishedSetting::numeric("target_od", true).with_value(json!(target_od)),
                );
                settings
                    .push(PublishedSetting::numeric("volume", true).with_value(json!(volume_ml)));
            }
            DosingAutomation::Chemostat {
                exchange_volume_ml, ..
            } => {
                settings.push(
                    PublishedSetting::numeric("volume", true).with_value(json!(exchange_volume_ml)),
                );
            }
            DosingAutomation::PidMorbidostat {
                target_od,
                target_growth_rate,
                ..
            } => {
                settings.push(
                    PublishedSetting::numeric("target_od", true).with_value(json!(target_od)),
                );
                settings.push(
                    PublishedSetting::numeric("target_growth_rate", true)
                        .with_value(json!(target_growth_rate)),
                );
            }
            DosingAutomation::Silent => {}
        }
        settings
    }

    fn tick_interval(&self, _runner: &JobRunner) -> Option<Duration> {
        // Chemostat doses on its clock; the others react to samples.
        match self.automation {
            DosingAutomation::Chemostat {
                duration_minutes, ..
            } => Some(Duration::from_secs_f64(duration_minutes * 60.0)),
            _ => None,
        }
    }

    fn subscriptions(&self, runner: &JobRunner) -> Vec<String> {
        let unit = runner.unit();
        let experiment = runner.experiment();
        vec![
            format!("pioreactor/{unit}/{experiment}/od_filtered/od_filtered"),
            format!("pioreactor/{unit}/{experiment}/growth_rate/growth_rate"),
        ]
    }

    async fn on_init(&mut self, runner: &mut JobRunner) -> Result<(), JobError> {
        let store = CalibrationStore::new(
            &runner.app().calibrations_dir(),
            Arc::clone(runner.kv()),
        );
        self.media_calibration = Self::load_pump_calibration(&store, "media_pump");
        self.alt_media_calibration = Self::load_pump_calibration(&store, "alt_media_pump");
        self.waste_calibration = Self::load_pump_calibration(&store, "waste_pump");
        Ok(())
    }

    async fn set_setting(
        &mut self,
        runner: &mut JobRunner,
        key: &str,
        value: Value,
    ) -> Result<(), JobError> {
        if let Some(new_value) = value.as_f64() {
            match (&mut self.automation, key) {
                (DosingAutomation::Turbidostat { target_od, .. }, "target_od")
                | (DosingAutomation::PidMorbidostat { target_od, .. }, "target_od") => {
                    *target_od = new_value;
                }
                (DosingAutomation::Turbidostat { volume_ml, .. }, "volume")
                | (DosingAutomation::Chemostat { exchange_volume_ml: volume_ml, .. }, "volume") => {
                    *volume_ml = new_value;
                }
                (
                    DosingAutomation::PidMorbidostat {
                        target_growth_rate, ..
                    },
                    "target_growth_rate",
                ) => {
                    *target_growth_rate = new_value;
                }
                _ => {}
            }
        }
        runner.publish_setting(key, value).await
    }

    async fn tick(&mut self, runner: &mut JobRunner) -> Result<(), JobError> {
        self.act(runner).await
    }

    async fn on_message(
        &mut self,
        runner: &mut JobRunner,
        message: BusMessage,
    ) -> Result<(), JobError> {
        if message.topic.ends_with("/od_filtered/od_filtered") {
            if let Ok(payload) = serde_json::from_slice::<ODFiltered>(&message.payload) {
                self.latest_od = Some(payload.od_filtered);
                // Sample-driven automations decide as data arrives.
                if !matches!(self.automation, DosingAutomation::Chemostat { .. }) {
                    self.act(runner).await?;
                }
            }
        } else if message.topic.ends_with("/growth_rate/growth_rate") {
            if let Ok(payload) = serde_json::from_slice::<GrowthRate>(&message.payload) {
                self.latest_growth_rate = Some(payload.growth_rate);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "automation_tests.rs"]
mod tests;
