// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The hardware seam.
//!
//! Physical drivers (ADC, PWM, I²C thermometer, LED DAC) live outside this
//! workspace; jobs reach them through [`Hardware`]. Under `TESTING=1` the
//! [`MockHardware`] stands in. PWM channels are exclusive resources — a
//! second job asking for a busy channel fails immediately instead of
//! fighting over the pin.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// ADS1115 full-scale voltage per gain setting, used by auto-gain.
/// `(max_expected_voltage, gain)` rows, scanned top down.
pub const ADS1X15_GAIN_THRESHOLDS: &[(f64, f64)] = &[
    (0.256, 16.0),
    (0.512, 8.0),
    (1.024, 4.0),
    (2.048, 2.0),
    (4.096, 1.0),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HardwareError {
    #[error("expected hardware is not present: {0}")]
    Missing(String),
    #[error("PWM channel {channel} is owned by {owner}")]
    PwmBusy { channel: u8, owner: String },
    #[error("hardware io failed: {0}")]
    Io(String),
}

/// Contract over the physical drivers.
pub trait Hardware: Send + Sync {
    /// Voltage on an ADC channel.
    fn read_adc(&self, channel: u8) -> Result<f64, HardwareError>;

    /// Drive a PWM channel at `duty` percent. The caller must hold the
    /// channel's [`PwmGuard`].
    fn set_pwm(&self, channel: u8, duty: f64) -> Result<(), HardwareError>;

    /// Set a PWM channel's carrier frequency.
    fn set_pwm_frequency(&self, channel: u8, hz: f64) -> Result<(), HardwareError>;

    /// Onboard temperature in °C.
    fn read_temp(&self) -> Result<f64, HardwareError>;

    /// Auxiliary rail voltage.
    fn read_aux_voltage(&self) -> Result<f64, HardwareError>;

    /// LED intensity in percent on channels `A`–`D`.
    fn set_led(&self, channel: char, intensity: f64) -> Result<(), HardwareError>;
}

/// Default PWM channel assignment per device, overridable in `[PWM]` config.
pub fn default_pwm_channel(device: &str) -> Option<u8> {
    match device {
        "media_pump" => Some(2),
        "alt_media_pump" => Some(3),
        "waste_pump" => Some(4),
        "stirring" => Some(5),
        "heater" => Some(6),
        _ => None,
    }
}

/// Tracks exclusive ownership of PWM channels within a process.
#[derive(Default, Debug)]
pub struct PwmRegistry {
    owners: Mutex<BTreeMap<u8, String>>,
}

impl PwmRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquire a channel. Fails immediately when another owner holds it.
    pub fn acquire(self: &Arc<Self>, channel: u8, owner: &str) -> Result<PwmGuard, HardwareError> {
        let mut owners = self.owners.lock();
        if let Some(existing) = owners.get(&channel) {
            return Err(HardwareError::PwmBusy {
                channel,
                owner: existing.clone(),
            });
        }
        owners.insert(channel, owner.to_string());
        Ok(PwmGuard {
            registry: Arc::clone(self),
            channel,
        })
    }

    pub fn owner_of(&self, channel: u8) -> Option<String> {
        self.owners.lock().get(&channel).cloned()
    }

    fn release(&self, channel: u8) {
        self.owners.lock().remove(&channel);
    }
}

/// Held while a job owns a PWM channel; released on every exit path by drop.
#[derive(Debug)]
pub struct PwmGuard {
    registry: Arc<PwmRegistry>,
    channel: u8,
}

impl PwmGuard {
    pub fn channel(&self) -> u8 {
        self.channel
    }
}

impl Drop for PwmGuard {
    fn drop(&mut self) {
        self.registry.release(self.channel);
    }
}

/// Deterministic simulated hardware for development machines and test
/// rigs without a HAT: a slow exponential OD drift, a stable thermometer,
/// and PWM/LED writes that go nowhere.
pub struct SimHardware {
    started: std::time::Instant,
}

impl SimHardware {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: std::time::Instant::now(),
        })
    }
}

impl Hardware for SimHardware {
    fn read_adc(&self, channel: u8) -> Result<f64, HardwareError> {
        // ~0.1%/min exponential rise from a 0.5 V baseline, channel-offset
        let hours = self.started.elapsed().as_secs_f64() / 3600.0;
        let base = 0.5 + 0.05 * channel as f64;
        Ok(base * (0.06 * hours).exp())
    }

    fn set_pwm(&self, _channel: u8, _duty: f64) -> Result<(), HardwareError> {
        Ok(())
    }

    fn set_pwm_frequency(&self, _channel: u8, _hz: f64) -> Result<(), HardwareError> {
        Ok(())
    }

    fn read_temp(&self) -> Result<f64, HardwareError> {
        Ok(30.2)
    }

    fn read_aux_voltage(&self) -> Result<f64, HardwareError> {
        Ok(12.2)
    }

    fn set_led(&self, _channel: char, _intensity: f64) -> Result<(), HardwareError> {
        Ok(())
    }
}

/// Pick the hardware backend for this process. Physical drivers live in a
/// HAT support crate; without one (or under `TESTING=1`) the simulator
/// stands in.
pub fn detect(testing: bool) -> Arc<dyn Hardware> {
    let hat_present = std::env::var("HAT_PRESENT").map(|v| v == "1").unwrap_or(false);
    if hat_present && !testing {
        tracing::warn!("HAT drivers load from the hat support crate; falling back to the simulator");
    }
    SimHardware::new()
}

/// Test double with scriptable readings and a recorded PWM/LED history.
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct MockHardware {
    adc: Mutex<BTreeMap<u8, Vec<f64>>>,
    temp: Mutex<Vec<f64>>,
    aux_voltage: Mutex<f64>,
    pub pwm_history: Mutex<Vec<(u8, f64)>>,
    pub led_history: Mutex<Vec<(char, f64)>>,
}

#[cfg(any(test, feature = "test-support"))]
impl MockHardware {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            aux_voltage: Mutex::new(12.2),
            ..Self::default()
        })
    }

    /// Queue ADC readings for a channel; the last value repeats forever.
    pub fn script_adc(&self, channel: u8, readings: &[f64]) {
        self.adc.lock().insert(channel, readings.to_vec());
    }

    pub fn script_temp(&self, readings: &[f64]) {
        *self.temp.lock() = readings.to_vec();
    }

    pub fn last_pwm(&self, channel: u8) -> Option<f64> {
        self.pwm_history
            .lock()
            .iter()
            .rev()
            .find(|(c, _)| *c == channel)
            .map(|(_, duty)| *duty)
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Hardware for MockHardware {
    fn read_adc(&self, channel: u8) -> Result<f64, HardwareError> {
        let mut adc = self.adc.lock();
        let queue = adc
            .get_mut(&channel)
            .ok_or_else(|| HardwareError::Missing(format!("adc channel {channel}")))?;
        if queue.len() > 1 {
            Ok(queue.remove(0))
        } else {
            queue
                .first()
                .copied()
                .ok_or_else(|| HardwareError::Missing(format!("adc channel {channel}")))
        }
    }

    fn set_pwm(&self, channel: u8, duty: f64) -> Result<(), HardwareError> {
        self.pwm_history.lock().push((channel, duty));
        Ok(())
    }

    fn set_pwm_frequency(&self, _channel: u8, _hz: f64) -> Result<(), HardwareError> {
        Ok(())
    }

    fn read_temp(&self) -> Result<f64, HardwareError> {
        let mut temps = self.temp.lock();
        if temps.len() > 1 {
            Ok(temps.remove(0))
        } else {
            temps
                .first()
                .copied()
                .ok_or_else(|| HardwareError::Missing("temperature sensor".to_string()))
        }
    }

    fn read_aux_voltage(&self) -> Result<f64, HardwareError> {
        Ok(*self.aux_voltage.lock())
    }

    fn set_led(&self, channel: char, intensity: f64) -> Result<(), HardwareError> {
        self.led_history.lock().push((channel, intensity));
        Ok(())
    }
}

#[cfg(test)]
#[path = "hardware_tests.rs"]
mod tests;
