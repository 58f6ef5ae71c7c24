// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    init_to_ready           = { JobState::Init, JobState::Ready, true },
    ready_to_sleeping       = { JobState::Ready, JobState::Sleeping, true },
    sleeping_to_ready       = { JobState::Sleeping, JobState::Ready, true },
    ready_to_disconnected   = { JobState::Ready, JobState::Disconnected, true },
    init_to_disconnected    = { JobState::Init, JobState::Disconnected, true },
    init_to_sleeping        = { JobState::Init, JobState::Sleeping, false },
    disconnected_to_ready   = { JobState::Disconnected, JobState::Ready, false },
    ready_to_lost           = { JobState::Ready, JobState::Lost, false },
    lost_to_ready           = { JobState::Lost, JobState::Ready, false },
    ready_to_init           = { JobState::Ready, JobState::Init, false },
)]
fn transitions(from: JobState, to: JobState, allowed: bool) {
    assert_eq!(from.can_transition_to(to), allowed);
}

#[test]
fn terminal_states() {
    assert!(JobState::Disconnected.is_terminal());
    assert!(JobState::Lost.is_terminal());
    assert!(!JobState::Ready.is_terminal());
    assert!(!JobState::Sleeping.is_terminal());
}

#[yare::parameterized(
    init         = { JobState::Init, "init" },
    ready        = { JobState::Ready, "ready" },
    sleeping     = { JobState::Sleeping, "sleeping" },
    disconnected = { JobState::Disconnected, "disconnected" },
    lost         = { JobState::Lost, "lost" },
)]
fn round_trips_through_str(state: JobState, s: &str) {
    assert_eq!(state.to_string(), s);
    assert_eq!(s.parse::<JobState>().unwrap(), state);
}

#[test]
fn unknown_state_is_an_error() {
    let err = "reddy".parse::<JobState>().unwrap_err();
    assert!(err.to_string().contains("reddy"));
}

#[test]
fn state_serializes_lowercase() {
    assert_eq!(
        serde_json::to_string(&JobState::Sleeping).unwrap(),
        "\"sleeping\""
    );
}
