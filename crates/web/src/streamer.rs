// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bus→DB streamer, run on the leader.
//!
//! Subscribes to the curated topic list, decodes each payload, and writes
//! rows through a single writer. Undecodable payloads are logged and
//! dropped — one garbled sample must never stall the stream.

use pio_bus::{Bus, BusMessage, QosLevel};
use pio_core::telemetry::{DosingEvent, GrowthRate, LogMessage, ODReadings};
use pio_core::topics;
use pio_storage::TimeseriesDb;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Topic filters the streamer persists.
pub fn curated_filters() -> Vec<String> {
    vec![
        "pioreactor/+/+/od_reading/ods".to_string(),
        "pioreactor/+/+/growth_rate/growth_rate".to_string(),
        "pioreactor/+/+/dosing_events".to_string(),
        "pioreactor/+/+/logs/+".to_string(),
        "pioreactor/+/+/temperature_automation/temperature_reading".to_string(),
    ]
}

/// Run until the bus closes. Spawn on the leader next to the HTTP server.
pub async fn run_streamer(bus: Arc<dyn Bus>, db: Arc<TimeseriesDb>) {
    let mut rx = match bus.subscribe(&curated_filters(), QosLevel::AtLeastOnce).await {
        Ok(rx) => rx,
        Err(e) => {
            warn!(error = %e, "streamer could not subscribe");
            return;
        }
    };
    debug!("streamer started");
    while let Some(message) = rx.recv().await {
        if message.retained {
            continue;
        }
        if let Err(e) = persist(&db, &message) {
            warn!(topic = %message.topic, error = %e, "dropping unpersistable message");
        }
    }
    debug!("streamer stopped");
}

fn persist(db: &TimeseriesDb, message: &BusMessage) -> Result<(), String> {
    let Some((unit, experiment, rest)) = topics::split(&message.topic) else {
        return Ok(()); // outside the tree, not ours
    };

    match rest {
        "od_reading/ods" => {
            let readings: ODReadings =
                serde_json::from_slice(&message.payload).map_err(|e| e.to_string())?;
            for reading in readings.ods.values() {
                db.insert_od_reading(experiment, unit, reading)
                    .map_err(|e| e.to_string())?;
            }
        }
        "growth_rate/growth_rate" => {
            let rate: GrowthRate =
                serde_json::from_slice(&message.payload).map_err(|e| e.to_string())?;
            db.insert_growth_rate(experiment, unit, &rate.timestamp.to_rfc3339(), rate.growth_rate)
                .map_err(|e| e.to_string())?;
        }
        "dosing_events" => {
            let event: DosingEvent =
                serde_json::from_slice(&message.payload).map_err(|e| e.to_string())?;
            db.insert_dosing_event(experiment, unit, &event)
                .map_err(|e| e.to_string())?;
        }
        "temperature_automation/temperature_reading" => {
            let value: Value =
                serde_json::from_slice(&message.payload).map_err(|e| e.to_string())?;
            let celsius = value
                .get("temperature")
                .and_then(Value::as_f64)
                .ok_or("missing temperature")?;
            let timestamp = value
                .get("timestamp")
                .and_then(Value::as_str)
                .unwrap_or_default();
            db.insert_temperature(experiment, unit, timestamp, celsius)
                .map_err(|e| e.to_string())?;
        }
        rest if rest.starts_with("logs/") => {
            let line: LogMessage =
                serde_json::from_slice(&message.payload).map_err(|e| e.to_string())?;
            db.insert_log(experiment, unit, &line).map_err(|e| e.to_string())?;
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
#[path = "streamer_tests.rs"]
mod tests;
