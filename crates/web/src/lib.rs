// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pio-web: the HTTP surface and the bus→DB streamer.
//!
//! Two routers: the leader API (`/api/…`) serving the UI and coordinating
//! workers, and the unit API (`/unit_api/…`) every unit runs for job
//! control, system tasks, and calibration sessions. Everything returns
//! JSON; failures use `{error, description}` with the matching status, and
//! backgrounded mutations answer 202 with a task id.

pub mod client;
pub mod error;
pub mod leader;
pub mod streamer;
pub mod tasks;
pub mod unit;

pub use client::{HttpDispatcher, UnitClient};
pub use error::ApiError;
pub use leader::{leader_router, LeaderState};
pub use streamer::run_streamer;
pub use tasks::{TaskRegistry, TaskStatus};
pub use unit::{unit_router, CliLauncher, JobLauncher, ShellSystem, SystemCommands, UnitState};

#[cfg(any(test, feature = "test-support"))]
pub use unit::{RecordingLauncher, RecordingSystem};
