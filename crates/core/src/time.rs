// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Time-literal parsing and duration formatting.
//!
//! Profiles express elapsed time either as a bare number of hours or as a
//! literal `"<n><unit>"` with unit `s`, `m`, `h`, or `d`.

use serde::{Deserialize, Serialize};

pub fn hours_to_seconds(hours: f64) -> f64 {
    hours * 3600.0
}

pub fn seconds_to_hours(seconds: f64) -> f64 {
    seconds / 3600.0
}

/// A profile time value: either hours as a number, or a string literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
    Hours(f64),
    Literal(String),
}

/// Convert a [`TimeValue`] to seconds.
///
/// Numbers are interpreted as hours. Literals must be `<n><unit>` with no
/// whitespace and a non-negative magnitude; anything else is rejected so a
/// malformed profile fails at load, not mid-experiment.
pub fn time_to_seconds(value: &TimeValue) -> Result<f64, TimeParseError> {
    match value {
        TimeValue::Hours(h) => {
            if *h < 0.0 {
                return Err(TimeParseError::Negative(h.to_string()));
            }
            Ok(hours_to_seconds(*h))
        }
        TimeValue::Literal(s) => parse_literal(s),
    }
}

fn parse_literal(s: &str) -> Result<f64, TimeParseError> {
    if s.is_empty() || s.chars().any(char::is_whitespace) {
        return Err(TimeParseError::Malformed(s.to_string()));
    }
    let unit = s
        .chars()
        .last()
        .ok_or_else(|| TimeParseError::Malformed(s.to_string()))?;
    let magnitude: f64 = s[..s.len() - 1]
        .parse()
        .map_err(|_| TimeParseError::Malformed(s.to_string()))?;
    if magnitude < 0.0 {
        return Err(TimeParseError::Negative(s.to_string()));
    }
    let scale = match unit {
        's' => 1.0,
        'm' => 60.0,
        'h' => 3600.0,
        'd' => 86400.0,
        _ => return Err(TimeParseError::UnknownUnit(s.to_string())),
    };
    Ok(magnitude * scale)
}

/// Error parsing a profile time literal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeParseError {
    #[error("malformed time literal {0:?}, expected e.g. \"90s\", \"1.5h\"")]
    Malformed(String),
    #[error("time literal {0:?} has an unknown unit, expected one of s, m, h, d")]
    UnknownUnit(String),
    #[error("time value {0:?} must be non-negative")]
    Negative(String),
}

/// Format seconds as a short human-readable duration: `"5s"`, `"2m"`, `"1h30m"`, `"3d"`.
pub fn format_elapsed(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        let h = secs / 3600;
        let m = (secs % 3600) / 60;
        if m > 0 {
            format!("{}h{}m", h, m)
        } else {
            format!("{}h", h)
        }
    } else {
        format!("{}d", secs / 86400)
    }
}

#[cfg(test)]
#[path = "time_tests.rs"]
mod tests;
