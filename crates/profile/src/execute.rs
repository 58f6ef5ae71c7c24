// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Profile execution.
//!
//! Single-threaded and cooperative: one scheduler, one loop, the only
//! suspension points are sleeping until the next task or the stop event.
//! Dispatch goes through [`ActionDispatcher`] so the engine neither knows
//! nor cares whether a start is an HTTP call, a dry-run log line, or a test
//! recording.

use crate::document::{Action, BoolOrExpr, LogAction, Profile, StartAction, UpdateAction};
use crate::lang::{evaluate, evaluate_bool, strip_dollar_braces, EvalContext, EvalError, EvalValue};
use crate::schedule::{ScheduledTask, Scheduler, Work};
use async_trait::async_trait;
use pio_bus::Bus;
use pio_core::time::{time_to_seconds, TimeValue};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch failed: {0}")]
    Failed(String),
}

/// How profile actions reach the cluster.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn start(
        &self,
        unit: &str,
        job: &str,
        options: &BTreeMap<String, Value>,
        args: &[String],
        config_overrides: &BTreeMap<String, Value>,
    ) -> Result<(), DispatchError>;

    async fn update(
        &self,
        unit: &str,
        job: &str,
        settings: &BTreeMap<String, Value>,
    ) -> Result<(), DispatchError>;

    async fn stop(&self, unit: &str, job: &str) -> Result<(), DispatchError>;

    async fn pause(&self, unit: &str, job: &str) -> Result<(), DispatchError>;

    async fn resume(&self, unit: &str, job: &str) -> Result<(), DispatchError>;

    async fn log(&self, unit: &str, message: &str, level: &str) -> Result<(), DispatchError>;

    async fn assign_label(&self, unit: &str, label: &str) -> Result<(), DispatchError>;

    /// Kill every job this profile run started, cluster-wide.
    async fn kill_profile_jobs(&self, experiment: &str, job_source: &str)
        -> Result<(), DispatchError>;
}

/// Which units participate in the experiment right now.
pub trait UnitRoster: Send + Sync {
    fn active_units(&self, experiment: &str) -> Vec<String>;

    fn is_assigned(&self, unit: &str, experiment: &str) -> bool {
        self.active_units(experiment).iter().any(|u| u == unit)
    }
}

impl UnitRoster for Vec<String> {
    fn active_units(&self, _experiment: &str) -> Vec<String> {
        self.clone()
    }
}

/// Dry-run dispatcher: logs what would happen, touches nothing.
#[derive(Default)]
pub struct DryRunDispatcher;

#[async_trait]
impl ActionDispatcher for DryRunDispatcher {
    async fn start(
        &self,
        unit: &str,
        job: &str,
        _options: &BTreeMap<String, Value>,
        _args: &[String],
        _config_overrides: &BTreeMap<String, Value>,
    ) -> Result<(), DispatchError> {
        info!("dry-run: would start {job} on {unit}");
        Ok(())
    }

    async fn update(
        &self,
        unit: &str,
        job: &str,
        settings: &BTreeMap<String, Value>,
    ) -> Result<(), DispatchError> {
        info!("dry-run: would update {job} on {unit} with {settings:?}");
        Ok(())
    }

    async fn stop(&self, unit: &str, job: &str) -> Result<(), DispatchError> {
        info!("dry-run: would stop {job} on {unit}");
        Ok(())
    }

    async fn pause(&self, unit: &str, job: &str) -> Result<(), DispatchError> {
        info!("dry-run: would pause {job} on {unit}");
        Ok(())
    }

    async fn resume(&self, unit: &str, job: &str) -> Result<(), DispatchError> {
        info!("dry-run: would resume {job} on {unit}");
        Ok(())
    }

    async fn log(&self, unit: &str, message: &str, level: &str) -> Result<(), DispatchError> {
        info!("dry-run: would log [{level}] {message:?} on {unit}");
        Ok(())
    }

    async fn assign_label(&self, unit: &str, label: &str) -> Result<(), DispatchError> {
        info!("dry-run: would label {unit} as {label:?}");
        Ok(())
    }

    async fn kill_profile_jobs(
        &self,
        experiment: &str,
        job_source: &str,
    ) -> Result<(), DispatchError> {
        info!("dry-run: would kill {job_source} jobs in {experiment}");
        Ok(())
    }
}

/// Test dispatcher that records every call.
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct RecordingDispatcher {
    pub calls: parking_lot::Mutex<Vec<String>>,
}

#[cfg(any(test, feature = "test-support"))]
impl RecordingDispatcher {
    fn record(&self, line: String) {
        self.calls.lock().push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl ActionDispatcher for RecordingDispatcher {
    async fn start(
        &self,
        unit: &str,
        job: &str,
        options: &BTreeMap<String, Value>,
        _args: &[String],
        _config_overrides: &BTreeMap<String, Value>,
    ) -> Result<(), DispatchError> {
        self.record(format!(
            "start {unit}/{job} {}",
            serde_json::to_string(options).unwrap_or_default()
        ));
        Ok(())
    }

    async fn update(
        &self,
        unit: &str,
        job: &str,
        settings: &BTreeMap<String, Value>,
    ) -> Result<(), DispatchError> {
        self.record(format!(
            "update {unit}/{job} {}",
            serde_json::to_string(settings).unwrap_or_default()
        ));
        Ok(())
    }

    async fn stop(&self, unit: &str, job: &str) -> Result<(), DispatchError> {
        self.record(format!("stop {unit}/{job}"));
        Ok(())
    }

    async fn pause(&self, unit: &str, job: &str) -> Result<(), DispatchError> {
        self.record(format!("pause {unit}/{job}"));
        Ok(())
    }

    async fn resume(&self, unit: &str, job: &str) -> Result<(), DispatchError> {
        self.record(format!("resume {unit}/{job}"));
        Ok(())
    }

    async fn log(&self, unit: &str, message: &str, level: &str) -> Result<(), DispatchError> {
        self.record(format!("log {unit} [{level}] {message}"));
        Ok(())
    }

    async fn assign_label(&self, unit: &str, label: &str) -> Result<(), DispatchError> {
        self.record(format!("label {unit} {label}"));
        Ok(())
    }

    async fn kill_profile_jobs(
        &self,
        experiment: &str,
        job_source: &str,
    ) -> Result<(), DispatchError> {
        self.record(format!("kill {experiment} {job_source}"));
        Ok(())
    }
}

#[derive(Clone)]
pub struct ExecuteOptions {
    /// Recorded as the `JOB_SOURCE` of everything this run starts.
    pub job_source: String,
    /// How often a When block re-checks an unmet condition.
    pub when_poll_interval: Duration,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            job_source: "experiment_profile".to_string(),
            when_poll_interval: Duration::from_secs(5),
        }
    }
}

/// Outcome summary of one profile run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRun {
    pub actions_fired: usize,
    pub actions_skipped: usize,
    pub cancelled: bool,
    /// Tasks still queued when the run was cancelled.
    pub never_started: usize,
}

struct Engine<'a> {
    profile: &'a Profile,
    experiment: String,
    bus: Option<&'a dyn Bus>,
    dispatcher: &'a dyn ActionDispatcher,
    roster: &'a dyn UnitRoster,
    options: ExecuteOptions,
    scheduler: Scheduler,
    started_at: Instant,
    fired: usize,
    skipped: usize,
}

/// Execute a verified profile to completion or cancellation.
pub async fn execute_profile(
    profile: &Profile,
    experiment: &str,
    bus: Option<&dyn Bus>,
    dispatcher: &dyn ActionDispatcher,
    roster: &dyn UnitRoster,
    options: ExecuteOptions,
    stop: Arc<Notify>,
) -> Result<ProfileRun, DispatchError> {
    let mut engine = Engine {
        profile,
        experiment: experiment.to_string(),
        bus,
        dispatcher,
        roster,
        options,
        scheduler: Scheduler::new(),
        started_at: Instant::now(),
        fired: 0,
        skipped: 0,
    };

    // Labels first: the UI wants them before any job state appears.
    for (unit, block) in &profile.pioreactors {
        if let Some(label) = &block.label {
            engine.dispatcher.assign_label(unit, label).await?;
        }
    }

    engine.seed()?;
    info!(
        profile = %profile.experiment_profile_name,
        tasks = engine.scheduler.len(),
        "profile execution started"
    );

    let cancelled = engine.drain(stop).await?;
    let never_started = engine.scheduler.len();
    if cancelled {
        engine
            .dispatcher
            .kill_profile_jobs(&engine.experiment, &engine.options.job_source)
            .await?;
    }
    info!(
        profile = %profile.experiment_profile_name,
        fired = engine.fired,
        skipped = engine.skipped,
        never_started,
        "profile execution finished"
    );
    Ok(ProfileRun {
        actions_fired: engine.fired,
        actions_skipped: engine.skipped,
        cancelled,
        never_started,
    })
}

impl<'a> Engine<'a> {
    fn seed(&mut self) -> Result<(), DispatchError> {
        let common_units = self.roster.active_units(&self.experiment);
        for (job_name, block) in &self.profile.common.jobs {
            for action in &block.actions {
                for unit in &common_units {
                    self.push_action(unit, job_name, action.clone(), Duration::ZERO)?;
                }
            }
        }
        for (unit, unit_block) in &self.profile.pioreactors {
            for (job_name, block) in &unit_block.jobs {
                for action in &block.actions {
                    self.push_action(unit, job_name, action.clone(), Duration::ZERO)?;
                }
            }
        }
        Ok(())
    }

    fn push_action(
        &mut self,
        unit: &str,
        job: &str,
        action: Action,
        base: Duration,
    ) -> Result<(), DispatchError> {
        let offset = seconds_of(action.hours_elapsed())?;
        let priority = action.priority();
        let work = match action {
            Action::Repeat(repeat) => Work::RepeatLoop {
                repeat,
                completed_loops: 0,
                warned_overlong: false,
            },
            Action::When(when) => Work::WhenPoll { when },
            other => Work::Plain(other),
        };
        self.scheduler.push(ScheduledTask {
            fire_at: base + Duration::from_secs_f64(offset),
            priority,
            unit: unit.to_string(),
            job: job.to_string(),
            work,
        });
        Ok(())
    }

    /// Drain the queue. Returns whether the run was cancelled.
    async fn drain(&mut self, stop: Arc<Notify>) -> Result<bool, DispatchError> {
        loop {
            let Some(task) = self.scheduler.pop() else {
                return Ok(false);
            };
            let deadline = self.started_at + task.fire_at;

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                _ = stop.notified() => {
                    // put the task back so it counts as never-started
                    self.scheduler.push(task);
                    return Ok(true);
                }
            }
            self.fire(task).await?;
        }
    }

    fn hours_elapsed(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64() / 3600.0
    }

    fn eval_context(&self, unit: &str, job: &str) -> EvalContext<'a> {
        let mut ctx = EvalContext::new(&self.experiment)
            .with_env("unit", EvalValue::Str(unit.to_string()))
            .with_env("experiment", EvalValue::Str(self.experiment.clone()))
            .with_env("job_name", EvalValue::Str(job.to_string()))
            .with_env("hours_elapsed", EvalValue::Number(self.hours_elapsed()));
        for (key, value) in &self.profile.inputs {
            ctx = ctx.with_env(key, json_to_eval(value));
        }
        if let Some(bus) = self.bus {
            ctx.bus = Some(bus);
        }
        ctx
    }

    /// Evaluate an `if`/`while` guard; `None` means "couldn't decide, skip".
    async fn guard_passes(&self, guard: Option<&BoolOrExpr>, unit: &str, job: &str) -> Option<bool> {
        match guard {
            None => Some(true),
            Some(BoolOrExpr::Literal(value)) => Some(*value),
            Some(BoolOrExpr::Expression(expression)) => {
                let ctx = self.eval_context(unit, job);
                match evaluate_bool(expression, &ctx).await {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!(expression, error = %e, "guard failed to evaluate, skipping action");
                        None
                    }
                }
            }
        }
    }

    /// Rewrite `${{ … }}` option values to their evaluated results.
    async fn resolve_options(
        &self,
        options: &BTreeMap<String, Value>,
        unit: &str,
        job: &str,
    ) -> Result<BTreeMap<String, Value>, EvalError> {
        let mut resolved = BTreeMap::new();
        for (key, value) in options {
            let new_value = match value {
                Value::String(raw) => match strip_dollar_braces(raw) {
                    Some(expression) => {
                        let ctx = self.eval_context(unit, job);
                        match evaluate(expression, &ctx).await? {
                            EvalValue::Number(n) => serde_json::json!(n),
                            EvalValue::Bool(b) => serde_json::json!(b),
                            EvalValue::Str(s) => serde_json::json!(s),
                        }
                    }
                    None => value.clone(),
                },
                other => other.clone(),
            };
            resolved.insert(key.clone(), new_value);
        }
        Ok(resolved)
    }

    async fn fire(&mut self, task: ScheduledTask) -> Result<(), DispatchError> {
        let ScheduledTask {
            unit, job, work, fire_at, ..
        } = task;

        // The cluster may have shrunk since scheduling.
        if !self.roster.is_assigned(&unit, &self.experiment) {
            warn!(unit = %unit, "unit no longer assigned to the experiment, skipping");
            self.skipped += 1;
            return Ok(());
        }

        match work {
            Work::Plain(action) => self.fire_plain(&unit, &job, action).await,
            Work::RepeatLoop {
                repeat,
                completed_loops,
                warned_overlong,
            } => {
                self.fire_repeat(&unit, &job, repeat, completed_loops, warned_overlong, fire_at)
                    .await
            }
            Work::WhenPoll { when } => self.fire_when(&unit, &job, when, fire_at).await,
        }
    }

    async fn fire_plain(
        &mut self,
        unit: &str,
        job: &str,
        action: Action,
    ) -> Result<(), DispatchError> {
        match self.guard_passes(action.if_(), unit, job).await {
            Some(true) => {}
            _ => {
                self.skipped += 1;
                return Ok(());
            }
        }

        // led_intensity has no state machine: stop/pause zero the channels,
        // update is a fresh start.
        let action = if job == "led_intensity" {
            rewrite_led_action(action)
        } else {
            action
        };

        match action {
            Action::Start(StartAction {
                options,
                args,
                config_overrides,
                ..
            }) => {
                let options = self
                    .resolve_options(&options, unit, job)
                    .await
                    .map_err(|e| DispatchError::Failed(e.to_string()))?;
                self.dispatcher
                    .start(unit, job, &options, &args, &config_overrides)
                    .await?;
            }
            Action::Update(UpdateAction { options, .. }) => {
                let options = self
                    .resolve_options(&options, unit, job)
                    .await
                    .map_err(|e| DispatchError::Failed(e.to_string()))?;
                self.dispatcher.update(unit, job, &options).await?;
            }
            Action::Stop(_) => self.dispatcher.stop(unit, job).await?,
            Action::Pause(_) => self.dispatcher.pause(unit, job).await?,
            Action::Resume(_) => self.dispatcher.resume(unit, job).await?,
            Action::Log(LogAction { options, .. }) => {
                let message = self
                    .resolve_log_message(&options.message, unit, job)
                    .await;
                self.dispatcher
                    .log(unit, &message, &options.level.to_lowercase())
                    .await?;
            }
            Action::Repeat(_) | Action::When(_) => {
                // containers are represented as their own Work variants
            }
        }
        self.fired += 1;
        Ok(())
    }

    /// Log messages may embed `${{…}}` expressions mid-string.
    async fn resolve_log_message(&self, message: &str, unit: &str, job: &str) -> String {
        let Some(start) = message.find("${{") else {
            return message.to_string();
        };
        let Some(end_rel) = message[start..].find("}}") else {
            return message.to_string();
        };
        let end = start + end_rel + 2;
        let expression = &message[start + 3..end - 2];
        let ctx = self.eval_context(unit, job);
        match evaluate(expression.trim(), &ctx).await {
            Ok(value) => format!("{}{}{}", &message[..start], value, &message[end..]),
            Err(_) => message.to_string(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn fire_repeat(
        &mut self,
        unit: &str,
        job: &str,
        repeat: crate::document::RepeatAction,
        completed_loops: u32,
        mut warned_overlong: bool,
        fire_at: Duration,
    ) -> Result<(), DispatchError> {
        if completed_loops == 0 {
            match self.guard_passes(repeat.if_.as_ref(), unit, job).await {
                Some(true) => {}
                _ => {
                    self.skipped += 1;
                    return Ok(());
                }
            }
        }

        let every_s = seconds_of(&repeat.repeat_every_hours)?;

        // Termination: while-guard false, or the loop budget is spent.
        if let Some(max) = &repeat.max_hours {
            let max_s = seconds_of(max)?;
            if completed_loops as f64 * every_s >= max_s {
                self.fired += 1;
                return Ok(());
            }
        }
        if let Some(guard) = &repeat.while_ {
            match self.guard_passes(Some(guard), unit, job).await {
                Some(true) => {}
                _ => {
                    self.fired += 1;
                    return Ok(());
                }
            }
        }

        // Enqueue this interval's inner actions.
        for inner in &repeat.actions {
            let action: Action = inner.clone().into();
            let offset = seconds_of(action.hours_elapsed())?;
            if offset > every_s {
                if !warned_overlong {
                    warn!(
                        job,
                        "repeat block inner action scheduled beyond the interval, skipping it"
                    );
                    warned_overlong = true;
                }
                continue;
            }
            self.push_action(unit, job, action, fire_at)?;
        }

        // Re-enter after the interval.
        self.scheduler.push(ScheduledTask {
            fire_at: fire_at + Duration::from_secs_f64(every_s),
            priority: 6,
            unit: unit.to_string(),
            job: job.to_string(),
            work: Work::RepeatLoop {
                repeat,
                completed_loops: completed_loops + 1,
                warned_overlong,
            },
        });
        Ok(())
    }

    async fn fire_when(
        &mut self,
        unit: &str,
        job: &str,
        when: crate::document::WhenAction,
        fire_at: Duration,
    ) -> Result<(), DispatchError> {
        match self.guard_passes(when.if_.as_ref(), unit, job).await {
            Some(true) => {}
            _ => {
                self.skipped += 1;
                return Ok(());
            }
        }

        let ctx = self.eval_context(unit, job);
        let met = match evaluate_bool(&when.condition, &ctx).await {
            Ok(value) => value,
            // A missing retained value now may appear later; keep polling.
            Err(_) => false,
        };

        if met {
            for action in &when.actions {
                self.push_action(unit, job, action.clone(), fire_at)?;
            }
            self.fired += 1;
        } else {
            self.scheduler.push(ScheduledTask {
                fire_at: fire_at + self.options.when_poll_interval,
                priority: 6,
                unit: unit.to_string(),
                job: job.to_string(),
                work: Work::WhenPoll { when },
            });
        }
        Ok(())
    }
}

/// Rewrite stop/pause/update on `led_intensity` into starts.
fn rewrite_led_action(action: Action) -> Action {
    match action {
        Action::Stop(stop) => Action::Start(StartAction {
            hours_elapsed: stop.hours_elapsed,
            if_: stop.if_,
            options: zeroed_leds(),
            args: Vec::new(),
            config_overrides: BTreeMap::new(),
        }),
        Action::Pause(pause) => Action::Start(StartAction {
            hours_elapsed: pause.hours_elapsed,
            if_: pause.if_,
            options: zeroed_leds(),
            args: Vec::new(),
            config_overrides: BTreeMap::new(),
        }),
        Action::Update(update) => Action::Start(StartAction {
            hours_elapsed: update.hours_elapsed,
            if_: update.if_,
            options: update.options,
            args: Vec::new(),
            config_overrides: BTreeMap::new(),
        }),
        other => other,
    }
}

fn zeroed_leds() -> BTreeMap<String, Value> {
    ["A", "B", "C", "D"]
        .into_iter()
        .map(|channel| (channel.to_string(), serde_json::json!(0)))
        .collect()
}

fn seconds_of(value: &TimeValue) -> Result<f64, DispatchError> {
    time_to_seconds(value).map_err(|e| DispatchError::Failed(e.to_string()))
}

fn json_to_eval(value: &Value) -> EvalValue {
    match value {
        Value::Number(n) => EvalValue::Number(n.as_f64().unwrap_or(f64::NAN)),
        Value::Bool(b) => EvalValue::Bool(*b),
        Value::String(s) => EvalValue::Str(s.clone()),
        other => EvalValue::Str(other.to_string()),
    }
}

#[cfg(test)]
#[path = "execute_tests.rs"]
mod tests;
