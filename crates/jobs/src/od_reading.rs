// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OD reading job.
//!
//! Each tick: light the IR LED, wait for the photodiodes to settle, read
//! every configured `(channel, angle)` pair, subtract the dark reference
//! captured during warmup, map voltage to OD through the active calibration
//! when one exists, and publish per-channel readings plus the aggregate.
//!
//! `interval = None` makes the job one-shot; calibration sessions use that
//! to take a single sample without owning the sensor for long.

use crate::hardware::ADS1X15_GAIN_THRESHOLDS;
use crate::runtime::{JobError, JobRunner, JobSpec};
use async_trait::async_trait;
use pio_bus::QosLevel;
use pio_calibration::structs::Calibration;
use pio_calibration::CalibrationStore;
use pio_core::settings::PublishedSetting;
use pio_core::telemetry::{Angle, ODReadings, PdChannel, RawODReading};
use pio_core::topics;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Delay between lighting the LED and sampling, letting the signal settle.
const POST_DELAY: Duration = Duration::from_millis(200);

pub struct OdReader {
    /// Configured `(photodiode channel, angle)` pairs.
    channels: Vec<(PdChannel, Angle)>,
    ir_led_intensity: IrIntensity,
    /// Sampling interval in seconds; `None` = one-shot.
    interval_s: Option<f64>,
    dark_offsets: BTreeMap<PdChannel, f64>,
    calibrations: BTreeMap<PdChannel, Calibration>,
    /// Active `od_fused` estimator, evaluated over the per-angle voltages.
    fusion: Option<pio_calibration::structs::FusionCalibration>,
    /// ADC gain chosen by auto-gain from the last tick's maximum voltage.
    gain: f64,
    first_obs_published: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrIntensity {
    Percent(f64),
    Auto,
}

impl IrIntensity {
    fn as_value(&self) -> Value {
        match self {
            IrIntensity::Percent(p) => json!(p),
            IrIntensity::Auto => json!("auto"),
        }
    }

    fn percent(&self) -> f64 {
        match self {
            IrIntensity::Percent(p) => *p,
            // Auto mode drives the LED at a fixed level and adapts the ADC
            // gain instead.
            IrIntensity::Auto => 70.0,
        }
    }

    fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if s.trim().eq_ignore_ascii_case("auto") => Some(IrIntensity::Auto),
            Value::String(s) => s.trim().parse().ok().map(IrIntensity::Percent),
            Value::Number(n) => n.as_f64().map(IrIntensity::Percent),
            _ => None,
        }
    }
}

impl OdReader {
    pub fn new(
        channels: Vec<(PdChannel, Angle)>,
        ir_led_intensity: IrIntensity,
        interval_s: Option<f64>,
    ) -> Self {
        Self {
            channels,
            ir_led_intensity,
            interval_s,
            dark_offsets: BTreeMap::new(),
            calibrations: BTreeMap::new(),
            fusion: None,
            gain: 1.0,
            first_obs_published: false,
        }
    }

    /// Channel/angle assignment from `[od_reading]` config
    /// (`channel_1 = "90"`, `channel_2 = "REF"`).
    pub fn channels_from_config(config: &pio_core::Config) -> Vec<(PdChannel, Angle)> {
        let mut channels = Vec::new();
        for (pd, key) in [(PdChannel::Ch1, "channel_1"), (PdChannel::Ch2, "channel_2")] {
            // Angles appear as strings ("REF") or bare numbers (90) in config.
            let raw = config
                .get_str("od_reading", key)
                .map(str::to_string)
                .or_else(|| {
                    config
                        .get_f64("od_reading", key)
                        .map(|v| format!("{}", v as i64))
                });
            if let Some(angle) = raw.as_deref().and_then(Angle::parse) {
                channels.push((pd, angle));
            }
        }
        if channels.is_empty() {
            channels.push((PdChannel::Ch1, Angle::Deg90));
        }
        channels
    }

    fn adc_channel(pd: PdChannel) -> u8 {
        match pd {
            PdChannel::Ch1 => 0,
            PdChannel::Ch2 => 1,
        }
    }

    fn device_for(angle: Angle) -> Option<&'static str> {
        match angle {
            Angle::Deg45 => Some("od45"),
            Angle::Deg90 => Some("od90"),
            Angle::Deg135 => Some("od135"),
            _ => None,
        }
    }

    /// Fused OD: each angle's estimator curve at its measured voltage,
    /// averaged over the angles the estimator covers.
    fn fused_od(&self, voltages_by_angle: &BTreeMap<Angle, f64>) -> Option<f64> {
        let fusion = self.fusion.as_ref()?;
        let mut estimates = Vec::new();
        for (angle, voltage) in voltages_by_angle {
            if let Some(curve) = fusion.curves_by_angle.get(angle.as_str()) {
                estimates.push(curve.evaluate(*voltage));
            }
        }
        if estimates.is_empty() {
            None
        } else {
            Some(estimates.iter().sum::<f64>() / estimates.len() as f64)
        }
    }

    /// Pick the smallest ADS1X15 gain whose range covers `max_voltage`.
    fn auto_gain(max_voltage: f64) -> f64 {
        let headroom = max_voltage * 1.15;
        for (range, gain) in ADS1X15_GAIN_THRESHOLDS {
            if headroom <= *range {
                return *gain;
            }
        }
        1.0
    }
}

#[async_trait]
impl JobSpec for OdReader {
    fn name(&self) -> &'static str {
        "od_reading"
    }

    fn published_settings(&self) -> Vec<PublishedSetting> {
        vec![
            PublishedSetting::string("ir_led_intensity", true)
                .with_value(self.ir_led_intensity.as_value()),
            PublishedSetting::numeric("interval", true)
                .with_unit("s")
                .with_value(self.interval_s.map(|s| json!(s)).unwrap_or(Value::Null)),
            PublishedSetting::numeric("first_od_obs_time", false),
        ]
    }

    fn tick_interval(&self, _runner: &JobRunner) -> Option<Duration> {
        // One-shot jobs tick immediately once; the runtime's first deadline
        // fires at startup and the tick disconnects afterwards.
        Some(
            self.interval_s
                .map(Duration::from_secs_f64)
                .unwrap_or(Duration::from_millis(1)),
        )
    }

    async fn on_init(&mut self, runner: &mut JobRunner) -> Result<(), JobError> {
        let store = CalibrationStore::new(
            &runner.app().calibrations_dir(),
            Arc::clone(runner.kv()),
        );
        for (pd, angle) in self.channels.clone() {
            if let Some(device) = Self::device_for(angle) {
                if let Some(calibration) = store
                    .load_active(device)
                    .map_err(|e| JobError::Fatal(e.to_string()))?
                {
                    self.calibrations.insert(pd, calibration);
                }
            }
        }

        if let Some(Calibration::OdFused(fusion)) = store
            .load_active("od_fused")
            .map_err(|e| JobError::Fatal(e.to_string()))?
        {
            self.fusion = Some(fusion);
        }

        // Dark reference with the LED off.
        runner.hardware().set_led('A', 0.0)?;
        for (pd, _) in &self.channels {
            let dark = runner.hardware().read_adc(Self::adc_channel(*pd))?;
            self.dark_offsets.insert(*pd, dark);
        }
        Ok(())
    }

    async fn set_setting(
        &mut self,
        runner: &mut JobRunner,
        key: &str,
        value: Value,
    ) -> Result<(), JobError> {
        match key {
            "ir_led_intensity" => {
                if let Some(parsed) = IrIntensity::parse(&value) {
                    self.ir_led_intensity = parsed;
                    runner.publish_setting(key, value).await
                } else {
                    runner
                        .logger()
                        .warning("ir_led_intensity must be a percent or \"auto\"")
                        .await;
                    Ok(())
                }
            }
            "interval" => {
                self.interval_s = value.as_f64().filter(|s| *s > 0.0);
                runner.publish_setting(key, value).await
            }
            _ => runner.publish_setting(key, value).await,
        }
    }

    async fn tick(&mut self, runner: &mut JobRunner) -> Result<(), JobError> {
        let unit = runner.unit().to_string();
        let experiment = runner.experiment().to_string();
        let intensity = self.ir_led_intensity.percent();

        runner.hardware().set_led('A', intensity)?;
        tokio::time::sleep(POST_DELAY.min(Duration::from_millis(
            if runner.app().testing { 1 } else { 200 },
        )))
        .await;

        let timestamp = chrono::Utc::now();
        let mut ods = BTreeMap::new();
        let mut voltages_by_angle: BTreeMap<Angle, f64> = BTreeMap::new();
        let mut max_voltage: f64 = 0.0;
        for (pd, angle) in &self.channels {
            let raw = runner.hardware().read_adc(Self::adc_channel(*pd))?;
            let voltage = (raw - self.dark_offsets.get(pd).copied().unwrap_or(0.0)).max(0.0);
            voltages_by_angle.insert(*angle, voltage);
            max_voltage = max_voltage.max(voltage);
            let od = match self.calibrations.get(pd) {
                Some(calibration) => calibration
                    .y_to_x(voltage, true)
                    .unwrap_or(voltage),
                None => voltage,
            };
            let reading = RawODReading {
                timestamp,
                angle: *angle,
                od,
                channel: *pd,
                ir_led_intensity: intensity,
            };
            runner
                .publish_json(
                    &topics::od_channel(&unit, &experiment, pd.as_str()),
                    &reading,
                    QosLevel::AtLeastOnce,
                    true,
                )
                .await?;
            ods.insert(*pd, reading);
        }
        runner.hardware().set_led('A', 0.0)?;

        if matches!(self.ir_led_intensity, IrIntensity::Auto) {
            self.gain = Self::auto_gain(max_voltage);
        }

        let payload = ODReadings { timestamp, ods };
        runner
            .publish_json(
                &topics::od_readings(&unit, &experiment),
                &payload,
                QosLevel::AtLeastOnce,
                false,
            )
            .await?;

        if let Some(fused) = self.fused_od(&voltages_by_angle) {
            runner
                .publish_json(
                    &topics::od_fused(&unit, &experiment),
                    &pio_core::telemetry::ODFused {
                        timestamp,
                        od_fused: fused,
                    },
                    QosLevel::AtLeastOnce,
                    false,
                )
                .await?;
        }

        if !self.first_obs_published {
            self.first_obs_published = true;
            runner
                .publish_setting("first_od_obs_time", json!(timestamp.timestamp() as f64))
                .await?;
        }

        if self.interval_s.is_none() {
            runner.request_disconnect();
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "od_reading_tests.rs"]
mod tests;
