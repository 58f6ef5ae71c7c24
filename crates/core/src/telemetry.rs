// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Telemetry wire structs published to the bus.
//!
//! These mirror the JSON payloads on the topic tree exactly; any change here
//! is a wire-format change for every consumer (UI, streamer, automations).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Photodiode channel on the sensor board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PdChannel {
    #[serde(rename = "1")]
    Ch1,
    #[serde(rename = "2")]
    Ch2,
}

impl PdChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            PdChannel::Ch1 => "1",
            PdChannel::Ch2 => "2",
        }
    }
}

impl fmt::Display for PdChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scattering angle of a photodiode, in degrees from the IR beam.
///
/// `Ref` is the reference photodiode watching the LED directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Angle {
    #[serde(rename = "45")]
    Deg45,
    #[serde(rename = "90")]
    Deg90,
    #[serde(rename = "135")]
    Deg135,
    #[serde(rename = "180")]
    Deg180,
    #[serde(rename = "REF")]
    Ref,
}

impl Angle {
    pub fn as_str(self) -> &'static str {
        match self {
            Angle::Deg45 => "45",
            Angle::Deg90 => "90",
            Angle::Deg135 => "135",
            Angle::Deg180 => "180",
            Angle::Ref => "REF",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "45" => Some(Angle::Deg45),
            "90" => Some(Angle::Deg90),
            "135" => Some(Angle::Deg135),
            "180" => Some(Angle::Deg180),
            "REF" => Some(Angle::Ref),
            _ => None,
        }
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single raw optical-density observation from one photodiode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawODReading {
    pub timestamp: DateTime<Utc>,
    pub angle: Angle,
    pub od: f64,
    pub channel: PdChannel,
    pub ir_led_intensity: f64,
}

/// One sampling tick's readings across all configured channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ODReadings {
    pub timestamp: DateTime<Utc>,
    pub ods: BTreeMap<PdChannel, RawODReading>,
}

/// A fused OD estimate combining multiple angles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ODFused {
    pub timestamp: DateTime<Utc>,
    pub od_fused: f64,
}

/// Filtered OD from the growth-rate estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ODFiltered {
    pub timestamp: DateTime<Utc>,
    pub od_filtered: f64,
}

/// Per-hour growth rate from the growth-rate estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthRate {
    pub timestamp: DateTime<Utc>,
    pub growth_rate: f64,
}

/// Kind of liquid-volume change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DosingEventKind {
    AddMedia,
    AddAltMedia,
    RemoveWaste,
}

impl fmt::Display for DosingEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DosingEventKind::AddMedia => "add_media",
            DosingEventKind::AddAltMedia => "add_alt_media",
            DosingEventKind::RemoveWaste => "remove_waste",
        };
        f.write_str(s)
    }
}

/// Published whenever a pump moves liquid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DosingEvent {
    pub volume_change_ml: f64,
    pub event: DosingEventKind,
    /// What caused the dose (`manual`, an automation name, …).
    pub source_of_event: String,
    pub timestamp: DateTime<Utc>,
}

/// Log severity on the bus. Accepts either case on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[serde(alias = "NOTICE")]
    Notice,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Notice => "notice",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }

    /// Parse either case (`"WARNING"` or `"warning"`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "notice" => Some(LogLevel::Notice),
            "warning" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured log line published to `…/logs/<level>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// Job or action that produced the line.
    pub task: String,
    /// Originating package (`app` or a plugin name).
    pub source: String,
    pub level: LogLevel,
}

#[cfg(test)]
#[path = "telemetry_tests.rs"]
mod tests;
