// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topic-tree conventions.
//!
//! Every topic is `pioreactor/<unit>/<experiment>/<scope>/<…>` where the
//! scope is a job name or a system namespace (`logs`, `dosing_events`,
//! `od_reading/ods`, …). These builders are the single source of truth for
//! the layout; nothing else in the workspace formats topics by hand.

pub const TOPIC_PREFIX: &str = "pioreactor";

/// Retained topic on the leader naming the most recently created experiment.
pub const LATEST_EXPERIMENT_TOPIC: &str = "pioreactor/latest_experiment";

/// `pioreactor/<unit>/<experiment>/<job>`
pub fn job_root(unit: &str, experiment: &str, job: &str) -> String {
    format!("{TOPIC_PREFIX}/{unit}/{experiment}/{job}")
}

/// `…/<job>/$state` — retained lifecycle state.
pub fn state(unit: &str, experiment: &str, job: &str) -> String {
    format!("{TOPIC_PREFIX}/{unit}/{experiment}/{job}/$state")
}

/// `…/<job>/$state/set` — remote lifecycle control.
pub fn state_set(unit: &str, experiment: &str, job: &str) -> String {
    format!("{TOPIC_PREFIX}/{unit}/{experiment}/{job}/$state/set")
}

/// `…/<job>/$properties` — retained comma list of published settings.
pub fn properties(unit: &str, experiment: &str, job: &str) -> String {
    format!("{TOPIC_PREFIX}/{unit}/{experiment}/{job}/$properties")
}

/// `…/<job>/<setting>` — retained current value.
pub fn setting(unit: &str, experiment: &str, job: &str, setting: &str) -> String {
    format!("{TOPIC_PREFIX}/{unit}/{experiment}/{job}/{setting}")
}

/// `…/<job>/<setting>/$settable` — retained editability flag.
pub fn settable(unit: &str, experiment: &str, job: &str, setting: &str) -> String {
    format!("{TOPIC_PREFIX}/{unit}/{experiment}/{job}/{setting}/$settable")
}

/// `…/<job>/<setting>/set` — incoming writes.
pub fn setting_set(unit: &str, experiment: &str, job: &str, setting: &str) -> String {
    format!("{TOPIC_PREFIX}/{unit}/{experiment}/{job}/{setting}/set")
}

/// `…/logs/<level>` — structured log lines.
pub fn logs(unit: &str, experiment: &str, level: &str) -> String {
    format!("{TOPIC_PREFIX}/{unit}/{experiment}/logs/{level}")
}

/// `…/dosing_events`
pub fn dosing_events(unit: &str, experiment: &str) -> String {
    format!("{TOPIC_PREFIX}/{unit}/{experiment}/dosing_events")
}

/// `…/od_reading/ods` — aggregated readings for one tick.
pub fn od_readings(unit: &str, experiment: &str) -> String {
    format!("{TOPIC_PREFIX}/{unit}/{experiment}/od_reading/ods")
}

/// `…/od_reading/od<channel>` — per-channel raw reading.
pub fn od_channel(unit: &str, experiment: &str, channel: &str) -> String {
    format!("{TOPIC_PREFIX}/{unit}/{experiment}/od_reading/od{channel}")
}

/// `…/od_reading/od_fused`
pub fn od_fused(unit: &str, experiment: &str) -> String {
    format!("{TOPIC_PREFIX}/{unit}/{experiment}/od_reading/od_fused")
}

/// Split a topic into `(unit, experiment, rest)`.
///
/// Returns `None` for topics outside the `pioreactor/` tree or with too few
/// segments (e.g. `latest_experiment`).
pub fn split(topic: &str) -> Option<(&str, &str, &str)> {
    let rest = topic.strip_prefix("pioreactor/")?;
    let (unit, rest) = rest.split_once('/')?;
    let (experiment, rest) = rest.split_once('/')?;
    Some((unit, experiment, rest))
}

/// Whether a concrete topic matches an MQTT-style filter (`+`, `#`).
pub fn matches_filter(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');
    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
#[path = "topics_tests.rs"]
mod tests;
