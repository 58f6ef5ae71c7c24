// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Load-time profile verification.
//!
//! Catches the mistakes that would otherwise surface hours into an
//! experiment: controlling automations directly, updates with no automation
//! named, expression typos, and missing plugins.

use crate::document::{Action, BoolOrExpr, Profile};
use crate::lang::{check_syntax, ParseError};
use thiserror::Error;

/// Jobs that host automations; started/stopped as a whole.
const CONTROLLER_JOBS: &[&str] = &["temperature_control", "dosing_control", "led_control"];

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(
        "{job:?} is an automation; start/stop its controller instead and mutate it via update"
    )]
    AutomationStartStop { job: String },
    #[error("update on controller {job:?} must include options.automation_name")]
    UpdateWithoutAutomationName { job: String },
    #[error("invalid expression {expression:?} in {location}: {source}")]
    Expression {
        location: String,
        expression: String,
        source: ParseError,
    },
    #[error("profile requires plugin {name} {constraint}, installed: {installed}")]
    PluginVersion {
        name: String,
        constraint: String,
        installed: String,
    },
    #[error("profile requires plugin {0} which is not installed")]
    PluginMissing(String),
}

/// Source of installed plugin versions; the CLI and leader provide real
/// inventories, tests provide maps.
pub trait InstalledPlugins {
    fn version_of(&self, name: &str) -> Option<String>;
}

impl InstalledPlugins for std::collections::BTreeMap<String, String> {
    fn version_of(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Verify a loaded profile. Returns the first problem found.
pub fn verify_profile(
    profile: &Profile,
    plugins: &dyn InstalledPlugins,
) -> Result<(), VerifyError> {
    for plugin in &profile.plugins {
        check_plugin(&plugin.name, &plugin.version, plugins)?;
    }

    for (scope, job_name, action) in profile.all_actions() {
        let location = match scope {
            Some(unit) => format!("{unit}/{job_name}"),
            None => format!("common/{job_name}"),
        };
        check_action(job_name, action, &location)?;
    }
    Ok(())
}

fn check_action(job_name: &str, action: &Action, location: &str) -> Result<(), VerifyError> {
    // Automations are mutated via update on their controller, never
    // started or stopped bare.
    if job_name.ends_with("_automation") {
        if matches!(action, Action::Start(_) | Action::Stop(_)) {
            return Err(VerifyError::AutomationStartStop {
                job: job_name.to_string(),
            });
        }
    }

    if CONTROLLER_JOBS.contains(&job_name) {
        if let Action::Update(update) = action {
            if !update.options.contains_key("automation_name") {
                return Err(VerifyError::UpdateWithoutAutomationName {
                    job: job_name.to_string(),
                });
            }
        }
    }

    if let Some(BoolOrExpr::Expression(expression)) = action.if_() {
        check_expression(expression, location)?;
    }

    match action {
        Action::Repeat(repeat) => {
            if let Some(BoolOrExpr::Expression(expression)) = &repeat.while_ {
                check_expression(expression, location)?;
            }
            for inner in &repeat.actions {
                let inner: Action = inner.clone().into();
                check_action(job_name, &inner, location)?;
            }
        }
        Action::When(when) => {
            check_expression(&when.condition, location)?;
            for inner in &when.actions {
                check_action(job_name, inner, location)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn check_expression(expression: &str, location: &str) -> Result<(), VerifyError> {
    check_syntax(expression).map_err(|source| VerifyError::Expression {
        location: location.to_string(),
        expression: expression.to_string(),
        source,
    })
}

fn check_plugin(
    name: &str,
    constraint: &str,
    plugins: &dyn InstalledPlugins,
) -> Result<(), VerifyError> {
    let installed = plugins
        .version_of(name)
        .ok_or_else(|| VerifyError::PluginMissing(name.to_string()))?;

    let (op, wanted) = if let Some(rest) = constraint.strip_prefix(">=") {
        (">=", rest)
    } else if let Some(rest) = constraint.strip_prefix("<=") {
        ("<=", rest)
    } else if let Some(rest) = constraint.strip_prefix("==") {
        ("==", rest)
    } else {
        ("==", constraint)
    };
    let wanted = wanted.trim();

    let ordering = compare_versions(&installed, wanted);
    let satisfied = match op {
        ">=" => ordering != std::cmp::Ordering::Less,
        "<=" => ordering != std::cmp::Ordering::Greater,
        _ => ordering == std::cmp::Ordering::Equal,
    };
    if satisfied {
        Ok(())
    } else {
        Err(VerifyError::PluginVersion {
            name: name.to_string(),
            constraint: constraint.to_string(),
            installed,
        })
    }
}

/// Compare dotted numeric versions component-wise; missing parts are zero.
fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        let (x, y) = (a.get(i).copied().unwrap_or(0), b.get(i).copied().unwrap_or(0));
        match x.cmp(&y) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

#[cfg(test)]
#[path = "verify_tests.rs"]
mod tests;
