// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unit and experiment identity.
//!
//! Every topic, log line, and persisted row in the cluster is scoped by a
//! `(unit_name, experiment_name)` pair. Two placeholder values exist for
//! routing: [`BROADCAST_UNIT`] addresses every unit at once, and
//! [`UNIVERSAL_EXPERIMENT`] scopes state that outlives any single experiment
//! (the watchdog, monitor, and similar always-on jobs).

use std::env;

/// Wildcard unit used in topics that address the whole cluster.
pub const BROADCAST_UNIT: &str = "$broadcast";

/// Placeholder experiment for state that is persisted without an experiment.
pub const UNIVERSAL_EXPERIMENT: &str = "$experiment";

/// Experiment assigned to units not participating in any experiment.
pub const NO_EXPERIMENT: &str = "$no_experiment";

/// Resolve this unit's name.
///
/// `TESTING=1` pins the name to `testing_unit` so test artifacts never mix
/// with real state; otherwise the OS hostname is used.
pub fn get_unit_name() -> String {
    if is_testing_env() {
        return "testing_unit".to_string();
    }
    hostname()
}

/// Whether we are running under the test harness (`TESTING=1`).
///
/// Test mode swaps hardware for mocks and the MQTT broker for the in-memory
/// bus; it also redirects all storage under `DOT_PIOREACTOR`.
pub fn is_testing_env() -> bool {
    env::var("TESTING").map(|v| v == "1").unwrap_or(false)
}

/// The experiment assigned to this process, from the `EXPERIMENT` env var.
pub fn assigned_experiment() -> Option<String> {
    env::var("EXPERIMENT").ok().filter(|e| !e.is_empty())
}

/// What started this process, from the `JOB_SOURCE` env var (e.g. `user`,
/// `experiment_profile/4`).
pub fn job_source_from_env() -> Option<String> {
    env::var("JOB_SOURCE").ok().filter(|s| !s.is_empty())
}

fn hostname() -> String {
    // /etc/hostname is present on every target platform; fall back to a
    // stable placeholder rather than failing identity resolution.
    std::fs::read_to_string("/etc/hostname")
        .map(|h| h.trim().to_string())
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
#[path = "unit_tests.rs"]
mod tests;
