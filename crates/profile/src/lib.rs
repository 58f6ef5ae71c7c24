// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pio-profile: the experiment-profile engine.
//!
//! A profile is a declarative YAML document scheduling actions (start, stop,
//! pause, resume, update, log, repeat, when) against jobs across the
//! cluster. This crate owns the document model, the expression language that
//! lets conditions read live bus values, load-time verification, and the
//! single-threaded priority scheduler that fires the actions.

pub mod document;
pub mod execute;
pub mod lang;
pub mod schedule;
pub mod verify;

pub use document::{Action, BoolOrExpr, JobBlock, Profile};
pub use execute::{
    execute_profile, ActionDispatcher, DispatchError, DryRunDispatcher, ExecuteOptions,
    ProfileRun, UnitRoster,
};
pub use lang::{evaluate, evaluate_bool, parse_expression, EvalContext, EvalError, EvalValue};
pub use verify::{verify_profile, InstalledPlugins, VerifyError};

#[cfg(any(test, feature = "test-support"))]
pub use execute::RecordingDispatcher;
