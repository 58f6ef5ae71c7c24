// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared error taxonomy.
//!
//! Crate-local error enums convert into [`PioError`] at the job and HTTP
//! boundaries so callers can branch on kind without knowing which crate the
//! failure came from. Bus-transient and session-input errors recover in
//! place; everything else ends the owning job with a `disconnected`
//! transition and an error log on the bus.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Abstract failure kind, one per class of recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// An expected I²C/ADC device is not present.
    HardwareMissing,
    /// A volume-based pump action with no calibration in effect.
    CalibrationMissing,
    /// Broker unavailable after retries.
    BusTransient,
    /// Expression syntax, missing bus value, or arithmetic failure.
    Expression,
    /// Calibration-session input failed validation.
    SessionInput,
    /// A live job with the same `(unit, experiment, job_name)` exists.
    DuplicateJob,
    /// Update/stop targeting a job that is not running.
    JobAbsent,
    /// Profile requires a plugin version not installed.
    PluginVersionMismatch,
    /// Filesystem or subprocess failure.
    Os,
}

impl ErrorKind {
    /// HTTP status for the `{error, description}` envelope.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::SessionInput | ErrorKind::Expression => 400,
            ErrorKind::JobAbsent => 404,
            ErrorKind::DuplicateJob => 409,
            ErrorKind::CalibrationMissing | ErrorKind::PluginVersionMismatch => 422,
            ErrorKind::HardwareMissing | ErrorKind::BusTransient | ErrorKind::Os => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::HardwareMissing => "hardware_missing",
            ErrorKind::CalibrationMissing => "calibration_missing",
            ErrorKind::BusTransient => "bus_transient",
            ErrorKind::Expression => "expression",
            ErrorKind::SessionInput => "session_input",
            ErrorKind::DuplicateJob => "duplicate_job",
            ErrorKind::JobAbsent => "job_absent",
            ErrorKind::PluginVersionMismatch => "plugin_version_mismatch",
            ErrorKind::Os => "os",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kinded error crossing a crate boundary.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {description}")]
pub struct PioError {
    pub kind: ErrorKind,
    pub description: String,
}

impl PioError {
    pub fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    pub fn hardware_missing(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::HardwareMissing, description)
    }

    pub fn calibration_missing(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::CalibrationMissing, description)
    }

    pub fn bus_transient(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::BusTransient, description)
    }

    pub fn duplicate_job(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateJob, description)
    }

    pub fn job_absent(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::JobAbsent, description)
    }

    pub fn os(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Os, description)
    }
}

impl From<std::io::Error> for PioError {
    fn from(e: std::io::Error) -> Self {
        Self::os(e.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
