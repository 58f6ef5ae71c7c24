// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background job state machine.
//!
//! Every long-running job publishes a retained `$state` topic that walks the
//! DAG `init → ready ↔ sleeping → disconnected`. `lost` is never set by the
//! job itself: the broker publishes it through the job's last will when the
//! owning process dies without disconnecting cleanly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job source recorded for jobs started directly by a person.
pub const JOB_SOURCE_USER: &str = "user";

/// Prefix for jobs started by the experiment-profile engine; the full source
/// is `experiment_profile/<run_id>`.
pub const JOB_SOURCE_PROFILE_PREFIX: &str = "experiment_profile";

/// Lifecycle state of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Constructing: hardware acquired, bus connected, settings published.
    Init,
    /// Main loop running.
    Ready,
    /// Paused: actuators idled, loop suspended, settings still live.
    Sleeping,
    /// Terminal: clean shutdown, children joined, bus disconnected.
    Disconnected,
    /// Terminal: set by the broker's last will when the process died.
    Lost,
}

impl JobState {
    /// Whether a job may move from `self` to `next` on its own.
    ///
    /// `Lost` is excluded on purpose — only the broker publishes it.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Init, Ready)
                | (Ready, Sleeping)
                | (Sleeping, Ready)
                | (Init, Disconnected)
                | (Ready, Disconnected)
                | (Sleeping, Disconnected)
        )
    }

    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Disconnected | JobState::Lost)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Init => "init",
            JobState::Ready => "ready",
            JobState::Sleeping => "sleeping",
            JobState::Disconnected => "disconnected",
            JobState::Lost => "lost",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = UnknownJobState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(JobState::Init),
            "ready" => Ok(JobState::Ready),
            "sleeping" => Ok(JobState::Sleeping),
            "disconnected" => Ok(JobState::Disconnected),
            "lost" => Ok(JobState::Lost),
            other => Err(UnknownJobState(other.to_string())),
        }
    }
}

/// Error for unrecognized `$state` payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job state: {0:?}")]
pub struct UnknownJobState(pub String);

/// Metadata row describing one job run, as recorded by the Job Manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: i64,
    pub unit: String,
    pub experiment: String,
    pub job_name: String,
    pub job_source: String,
    pub pid: u32,
    pub leader: String,
    pub is_long_running: bool,
    pub is_running: bool,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
