// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parsing of trailing `--key value` job options.
//!
//! `pio run stirring --target-rpm 500 --calibration off` — keys are kebab
//! or snake case on the command line and snake case in options maps.

use crate::exit_error::ExitError;
use serde_json::{Map, Value};

/// Parse trailing tokens into an options map. Bare tokens (no `--`) are
/// positional args returned separately.
pub fn parse_trailing(tokens: &[String]) -> Result<(Map<String, Value>, Vec<String>), ExitError> {
    let mut options = Map::new();
    let mut args = Vec::new();
    let mut iter = tokens.iter().peekable();

    while let Some(token) = iter.next() {
        if let Some(key) = token.strip_prefix("--") {
            if key.is_empty() {
                return Err(ExitError::usage("stray `--` in options"));
            }
            let key = key.replace('-', "_");
            // a following non-flag token is the value; otherwise boolean true
            let takes_value = matches!(iter.peek(), Some(next) if !next.starts_with("--"));
            let value = if takes_value {
                coerce_value(iter.next().map(String::as_str).unwrap_or_default())
            } else {
                Value::Bool(true)
            };
            options.insert(key, value);
        } else {
            args.push(token.clone());
        }
    }
    Ok((options, args))
}

/// Numbers stay numbers; everything else is a string.
fn coerce_value(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(n) {
            return Value::Number(number);
        }
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        other => Value::String(other.to_string()),
    }
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;
