// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Profile document model.
//!
//! Mirrors the YAML format exactly: unknown fields are rejected at every
//! level so a typo'd key fails at load instead of silently never firing.
//! Two vintages of Repeat field names exist in the wild
//! (`hours_elapsed`/`repeat_every_hours`/`max_hours` and
//! `t`/`every`/`max_time`); both are accepted, nothing else is.

use pio_core::time::TimeValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileLoadError {
    #[error("cannot read profile: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid profile document: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// An `if`/`while` guard: a literal bool or an expression string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoolOrExpr {
    Literal(bool),
    Expression(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Plugin requirement: name plus a version or version bound
/// (`"1.0.2"`, `">=1.0.2"`, `"<=2.0"`, `"==1.0.2"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginRef {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartAction {
    #[serde(alias = "t")]
    pub hours_elapsed: TimeValue,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_: Option<BoolOrExpr>,
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub config_overrides: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PauseAction {
    #[serde(alias = "t")]
    pub hours_elapsed: TimeValue,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_: Option<BoolOrExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResumeAction {
    #[serde(alias = "t")]
    pub hours_elapsed: TimeValue,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_: Option<BoolOrExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StopAction {
    #[serde(alias = "t")]
    pub hours_elapsed: TimeValue,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_: Option<BoolOrExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateAction {
    #[serde(alias = "t")]
    pub hours_elapsed: TimeValue,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_: Option<BoolOrExpr>,
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogOptions {
    pub message: String,
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "notice".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogAction {
    #[serde(alias = "t")]
    pub hours_elapsed: TimeValue,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_: Option<BoolOrExpr>,
    pub options: LogOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepeatAction {
    #[serde(alias = "t")]
    pub hours_elapsed: TimeValue,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_: Option<BoolOrExpr>,
    #[serde(alias = "every")]
    pub repeat_every_hours: TimeValue,
    #[serde(default, rename = "while", skip_serializing_if = "Option::is_none")]
    pub while_: Option<BoolOrExpr>,
    #[serde(default, alias = "max_time", skip_serializing_if = "Option::is_none")]
    pub max_hours: Option<TimeValue>,
    #[serde(default)]
    pub actions: Vec<BasicAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WhenAction {
    #[serde(alias = "t")]
    pub hours_elapsed: TimeValue,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_: Option<BoolOrExpr>,
    pub condition: String,
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Actions allowed inside a Repeat block (no nesting of containers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BasicAction {
    Start(StartAction),
    Pause(PauseAction),
    Resume(ResumeAction),
    Stop(StopAction),
    Update(UpdateAction),
    Log(LogAction),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    Start(StartAction),
    Pause(PauseAction),
    Resume(ResumeAction),
    Stop(StopAction),
    Update(UpdateAction),
    Log(LogAction),
    Repeat(RepeatAction),
    When(WhenAction),
}

impl Action {
    pub fn hours_elapsed(&self) -> &TimeValue {
        match self {
            Action::Start(a) => &a.hours_elapsed,
            Action::Pause(a) => &a.hours_elapsed,
            Action::Resume(a) => &a.hours_elapsed,
            Action::Stop(a) => &a.hours_elapsed,
            Action::Update(a) => &a.hours_elapsed,
            Action::Log(a) => &a.hours_elapsed,
            Action::Repeat(a) => &a.hours_elapsed,
            Action::When(a) => &a.hours_elapsed,
        }
    }

    pub fn if_(&self) -> Option<&BoolOrExpr> {
        match self {
            Action::Start(a) => a.if_.as_ref(),
            Action::Pause(a) => a.if_.as_ref(),
            Action::Resume(a) => a.if_.as_ref(),
            Action::Stop(a) => a.if_.as_ref(),
            Action::Update(a) => a.if_.as_ref(),
            Action::Log(a) => a.if_.as_ref(),
            Action::Repeat(a) => a.if_.as_ref(),
            Action::When(a) => a.if_.as_ref(),
        }
    }

    /// Scheduling priority at an equal fire time (lower fires first).
    pub fn priority(&self) -> u8 {
        match self {
            Action::Start(_) => 0,
            Action::Stop(_) => 1,
            Action::Pause(_) => 2,
            Action::Resume(_) => 3,
            Action::Update(_) => 4,
            Action::Repeat(_) | Action::When(_) => 6,
            Action::Log(_) => 10,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::Start(_) => "start",
            Action::Pause(_) => "pause",
            Action::Resume(_) => "resume",
            Action::Stop(_) => "stop",
            Action::Update(_) => "update",
            Action::Log(_) => "log",
            Action::Repeat(_) => "repeat",
            Action::When(_) => "when",
        }
    }
}

impl From<BasicAction> for Action {
    fn from(action: BasicAction) -> Self {
        match action {
            BasicAction::Start(a) => Action::Start(a),
            BasicAction::Pause(a) => Action::Pause(a),
            BasicAction::Resume(a) => Action::Resume(a),
            BasicAction::Stop(a) => Action::Stop(a),
            BasicAction::Update(a) => Action::Update(a),
            BasicAction::Log(a) => Action::Log(a),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobBlock {
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommonBlock {
    #[serde(default)]
    pub jobs: BTreeMap<String, JobBlock>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PioreactorBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub jobs: BTreeMap<String, JobBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub experiment_profile_name: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub plugins: Vec<PluginRef>,
    #[serde(default)]
    pub common: CommonBlock,
    #[serde(default)]
    pub pioreactors: BTreeMap<String, PioreactorBlock>,
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,
}

impl Profile {
    pub fn from_yaml(raw: &str) -> Result<Self, ProfileLoadError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ProfileLoadError> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// Every `(unit_scope, job_name, action)` in document order, with
    /// `None` as the unit scope for the common block.
    pub fn all_actions(&self) -> Vec<(Option<&str>, &str, &Action)> {
        let mut actions = Vec::new();
        for (job_name, block) in &self.common.jobs {
            for action in &block.actions {
                actions.push((None, job_name.as_str(), action));
            }
        }
        for (unit, unit_block) in &self.pioreactors {
            for (job_name, block) in &unit_block.jobs {
                for action in &block.actions {
                    actions.push((Some(unit.as_str()), job_name.as_str(), action));
                }
            }
        }
        actions
    }
}

#[cfg(test)]
#[path = "document_tests.rs"]
mod tests;
