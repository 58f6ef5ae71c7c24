// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Published-setting descriptors.
//!
//! A job declares its settings up front; the runtime publishes each one
//! retained, republishes on change, and accepts writes on the `…/set`
//! companion topic for settings marked settable. Incoming writes are either
//! routed to a job-defined setter hook or coerced to the declared type here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared type of a published setting, used for coercion of `…/set` writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    Numeric,
    Boolean,
    String,
    Json,
}

/// One entry of a job's settings table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedSetting {
    pub key: String,
    #[serde(rename = "type")]
    pub setting_type: SettingType,
    /// Whether writes to `…/<key>/set` are accepted.
    pub settable: bool,
    /// Physical unit for display (e.g. `"rpm"`, `"mL"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Current value; `Null` until the job first publishes.
    #[serde(default)]
    pub value: Value,
}

impl PublishedSetting {
    pub fn numeric(key: &str, settable: bool) -> Self {
        Self::new(key, SettingType::Numeric, settable)
    }

    pub fn string(key: &str, settable: bool) -> Self {
        Self::new(key, SettingType::String, settable)
    }

    pub fn boolean(key: &str, settable: bool) -> Self {
        Self::new(key, SettingType::Boolean, settable)
    }

    pub fn json(key: &str, settable: bool) -> Self {
        Self::new(key, SettingType::Json, settable)
    }

    fn new(key: &str, setting_type: SettingType, settable: bool) -> Self {
        Self {
            key: key.to_string(),
            setting_type,
            settable,
            unit: None,
            value: Value::Null,
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }
}

/// Coerce a raw `…/set` payload to the declared setting type.
///
/// Payloads arrive as UTF-8 text. `"None"`/`"null"` clears the setting.
/// Numeric and boolean coercion failures are reported rather than silently
/// stored as strings, so a typo'd write never corrupts a control loop input.
pub fn coerce(setting_type: SettingType, raw: &str) -> Result<Value, CoercionError> {
    let trimmed = raw.trim();
    if trimmed == "None" || trimmed == "null" {
        return Ok(Value::Null);
    }
    match setting_type {
        SettingType::Numeric => trimmed
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| CoercionError::NotNumeric(trimmed.to_string())),
        SettingType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(CoercionError::NotBoolean(trimmed.to_string())),
        },
        SettingType::String => Ok(Value::String(trimmed.to_string())),
        SettingType::Json => serde_json::from_str(trimmed)
            .map_err(|e| CoercionError::NotJson(trimmed.to_string(), e.to_string())),
    }
}

/// Error coercing a `…/set` payload to the declared type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoercionError {
    #[error("expected a number, got {0:?}")]
    NotNumeric(String),
    #[error("expected a boolean, got {0:?}")]
    NotBoolean(String),
    #[error("invalid JSON {0:?}: {1}")]
    NotJson(String, String),
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
