// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! LED intensity job.
//!
//! Fire-and-forget: set channels A–D, persist the levels, publish the
//! settings retained, and exit. There is no long-running state machine —
//! which is why the profile engine rewrites stop/pause/update on
//! `led_intensity` into fresh starts.

use crate::runtime::{JobError, JobRunner, JobSpec};
use async_trait::async_trait;
use pio_core::settings::PublishedSetting;
use serde_json::json;
use std::collections::BTreeMap;

/// KV scope remembering the last-set LED intensities.
pub const LED_SCOPE: &str = "leds";

pub struct LedIntensity {
    /// Channel → percent; only named channels are touched.
    intensities: BTreeMap<char, f64>,
    source_of_event: String,
}

impl LedIntensity {
    pub fn new(intensities: BTreeMap<char, f64>, source_of_event: &str) -> Self {
        Self {
            intensities,
            source_of_event: source_of_event.to_string(),
        }
    }

    /// Parse `--A 20 --B 0`-style options into channel intensities.
    pub fn from_options(options: &serde_json::Value) -> Result<Self, String> {
        let mut intensities = BTreeMap::new();
        for channel in ['A', 'B', 'C', 'D'] {
            if let Some(value) = options.get(channel.to_string()).and_then(|v| v.as_f64()) {
                if !(0.0..=100.0).contains(&value) {
                    return Err(format!("intensity for {channel} must be 0–100, got {value}"));
                }
                intensities.insert(channel, value);
            }
        }
        if intensities.is_empty() {
            return Err("no LED channels given".to_string());
        }
        Ok(Self::new(intensities, "user"))
    }
}

#[async_trait]
impl JobSpec for LedIntensity {
    fn name(&self) -> &'static str {
        "led_intensity"
    }

    fn is_long_running(&self) -> bool {
        false
    }

    fn published_settings(&self) -> Vec<PublishedSetting> {
        ['A', 'B', 'C', 'D']
            .into_iter()
            .map(|c| {
                let mut setting = PublishedSetting::numeric(&c.to_string(), true).with_unit("%");
                if let Some(value) = self.intensities.get(&c) {
                    setting = setting.with_value(json!(value));
                }
                setting
            })
            .collect()
    }

    async fn on_ready(&mut self, runner: &mut JobRunner) -> Result<(), JobError> {
        for (channel, intensity) in self.intensities.clone() {
            runner.hardware().set_led(channel, intensity)?;
            runner
                .kv()
                .put_str(LED_SCOPE, &channel.to_string(), &intensity.to_string())?;
            runner
                .publish_setting(&channel.to_string(), json!(intensity))
                .await?;
        }
        runner
            .logger()
            .info(&format!(
                "LEDs updated by {}: {:?}",
                self.source_of_event, self.intensities
            ))
            .await;
        // One-shot: done as soon as the channels are set.
        runner.request_disconnect();
        Ok(())
    }
}

#[cfg(test)]
#[path = "led_tests.rs"]
mod tests;
