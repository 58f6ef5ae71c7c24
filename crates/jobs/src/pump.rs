// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pump actions.
//!
//! `run_pump` is the one way liquid moves: it converts volume to duration
//! through the pump's calibration, holds the PWM channel exclusively for the
//! whole run, refuses to pump while a temperature emergency is active, and
//! emits the `DosingEvent` that the growth-rate filter and the leader's
//! records depend on.

use crate::hardware::default_pwm_channel;
use crate::runtime::{JobContext, JobError};
use pio_bus::{Bus as _, BusLogger, QosLevel};
use pio_calibration::structs::PumpCalibration;
use pio_core::telemetry::{DosingEvent, DosingEventKind};
use pio_core::topics;
use std::time::Duration;

/// How much to pump: straight seconds, or millilitres via the calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PumpAmount {
    DurationS(f64),
    VolumeMl(f64),
}

/// Retained topic flagging a temperature emergency; pumps refuse while set.
pub fn emergency_stop_topic(unit: &str, experiment: &str) -> String {
    topics::setting(unit, experiment, "temperature_automation", "emergency_stop")
}

pub fn event_kind_for_device(device: &str) -> DosingEventKind {
    match device {
        "alt_media_pump" => DosingEventKind::AddAltMedia,
        "waste_pump" => DosingEventKind::RemoveWaste,
        _ => DosingEventKind::AddMedia,
    }
}

/// Run one pump once. Returns the emitted dosing event.
pub async fn run_pump(
    ctx: &JobContext,
    device: &str,
    amount: PumpAmount,
    hz: f64,
    dc: f64,
    calibration: Option<&PumpCalibration>,
    source_of_event: &str,
) -> Result<DosingEvent, JobError> {
    let unit = ctx.app.unit.clone();
    let experiment = ctx.app.experiment.clone();
    let logger = BusLogger::new(std::sync::Arc::clone(&ctx.bus), &unit, &experiment, "pump");

    // A temperature emergency means the culture is cooking; adding media
    // will not fix that and removing waste can empty the vial.
    let emergency = ctx
        .bus
        .fetch_retained(
            &emergency_stop_topic(&unit, &experiment),
            Duration::from_millis(200),
        )
        .await
        .ok()
        .flatten();
    if emergency.as_deref() == Some(b"1".as_ref()) {
        logger
            .error("refusing to pump while a temperature emergency is active")
            .await;
        return Err(JobError::Fatal(
            "temperature emergency active, pump refused".to_string(),
        ));
    }

    let (duration_s, volume_ml) = match amount {
        PumpAmount::DurationS(seconds) => {
            let volume = calibration
                .map(|c| c.ml_for_duration(seconds))
                .unwrap_or(f64::NAN);
            (seconds, volume)
        }
        PumpAmount::VolumeMl(ml) => {
            let Some(calibration) = calibration else {
                return Err(JobError::CalibrationMissing(format!(
                    "cannot dispense {ml} mL: no calibration is active for {device}"
                )));
            };
            let seconds = calibration
                .duration_for_ml(ml)
                .map_err(|e| JobError::CalibrationMissing(e.to_string()))?;
            (seconds, ml)
        }
    };
    if !(duration_s.is_finite() && duration_s >= 0.0) {
        return Err(JobError::Fatal(format!(
            "computed an invalid pump duration: {duration_s}"
        )));
    }

    let channel = default_pwm_channel(device)
        .ok_or_else(|| JobError::Fatal(format!("unknown pump device {device:?}")))?;
    // Guard released on every exit path, including the sleep being dropped.
    let _guard = ctx.pwm.acquire(channel, device)?;

    ctx.hardware.set_pwm_frequency(channel, hz)?;
    ctx.hardware.set_pwm(channel, dc)?;
    let pump_sleep = if ctx.app.testing {
        Duration::from_millis(1)
    } else {
        Duration::from_secs_f64(duration_s)
    };
    tokio::time::sleep(pump_sleep).await;
    ctx.hardware.set_pwm(channel, 0.0)?;

    let event = DosingEvent {
        volume_change_ml: if volume_ml.is_finite() { volume_ml } else { 0.0 },
        event: event_kind_for_device(device),
        source_of_event: source_of_event.to_string(),
        timestamp: chrono::Utc::now(),
    };
    let payload = serde_json::to_vec(&event).unwrap_or_default();
    ctx.bus
        .publish(
            &topics::dosing_events(&unit, &experiment),
            payload,
            QosLevel::AtLeastOnce,
            false,
        )
        .await
        .map_err(JobError::Bus)?;
    Ok(event)
}

#[cfg(test)]
#[path = "pump_tests.rs"]
mod tests;
