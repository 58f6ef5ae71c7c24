// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pio-calibration: calibration curves, storage, and interactive sessions.
//!
//! A calibration maps a measured quantity to a physical one (voltage → OD,
//! pump seconds → mL, duty cycle → RPM). This crate owns:
//!
//! - the tagged calibration structs and their YAML files on disk;
//! - the pure curve math (evaluation, root-finding, least-squares fits);
//! - the resumable step-machine that walks a person through a calibration,
//!   from either the CLI or the UI, with hardware actions delegated through
//!   an [`Executor`] seam.

pub mod chart;
pub mod curves;
#[cfg(test)]
pub(crate) mod test_fixtures;
pub mod protocols;
pub mod session;
pub mod store;
pub mod structs;

pub use curves::{CurveError, FitError};
pub use session::{
    CalibrationSession, Executor, SessionContext, SessionEngine, SessionError, SessionInputs,
    SessionMode, SessionStatus, StepField, StepHandler, StepRegistry, StepType, StepView,
};
pub use store::{CalibrationStore, StoreError};
pub use structs::{Calibration, CurveData, OdCalibration, PumpCalibration, RecordedData};

#[cfg(any(test, feature = "test-support"))]
pub use session::ScriptedExecutor;
