// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The background-job runtime.
//!
//! [`run_job`] hosts a [`JobSpec`] through the lifecycle
//! `init → ready ↔ sleeping → disconnected`:
//!
//! - registers with the Job Manager first — a duplicate name on the same
//!   `(unit, experiment)` aborts before any hardware is touched;
//! - publishes `$state`, `$properties`, and every declared setting retained,
//!   with a last will leaving `lost` on `$state`;
//! - listens on `…/<setting>/set` and `…/$state/set`, routing writes through
//!   the spec's `set_setting` hook with typed coercion;
//! - drives the spec's `tick` at its chosen cadence while `ready`;
//! - on SIGTERM/SIGINT (root jobs only) or a parent's stop signal
//!   (sub-jobs), tears down cleanly and flips the registry row.

use crate::hardware::{Hardware, HardwareError, PwmRegistry};
use async_trait::async_trait;
use pio_bus::{Bus, BusError, BusLogger, BusMessage, QosLevel};
use pio_core::config::AppContext;
use pio_core::job::JobState;
use pio_core::settings::{coerce, PublishedSetting};
use pio_core::topics;
use pio_storage::{JobManager, ScopedKv, StorageError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("a job named {0:?} is already running here")]
    Duplicate(String),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Hardware(#[from] HardwareError),
    #[error("no calibration in effect: {0}")]
    CalibrationMissing(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Fatal(String),
}

/// Everything a job needs from its process, built once at startup.
#[derive(Clone)]
pub struct JobContext {
    pub app: AppContext,
    pub bus: Arc<dyn Bus>,
    pub kv: Arc<ScopedKv>,
    pub job_manager: Arc<JobManager>,
    pub hardware: Arc<dyn Hardware>,
    pub pwm: Arc<PwmRegistry>,
    /// What started this job (`user`, `experiment_profile/N`, …).
    pub job_source: String,
}

/// How the runtime hosts a spec.
#[derive(Clone, Default)]
pub struct JobOptions {
    /// Sub-jobs leave signal handling to their parent.
    pub suppress_signals: bool,
    /// Parent-driven stop for sub-jobs.
    pub stop: Option<Arc<Notify>>,
}

/// A long-running control loop hosted by [`run_job`].
///
/// All methods take the [`JobRunner`] so specs never hold bus or hardware
/// references of their own.
#[async_trait]
pub trait JobSpec: Send + 'static {
    fn name(&self) -> &'static str;

    fn published_settings(&self) -> Vec<PublishedSetting>;

    fn is_long_running(&self) -> bool {
        true
    }

    /// Cadence of `tick` while ready; `None` for event-driven jobs.
    fn tick_interval(&self, _runner: &JobRunner) -> Option<Duration> {
        None
    }

    /// Extra topic filters delivered to `on_message`.
    fn subscriptions(&self, _runner: &JobRunner) -> Vec<String> {
        Vec::new()
    }

    async fn on_init(&mut self, _runner: &mut JobRunner) -> Result<(), JobError> {
        Ok(())
    }

    async fn on_ready(&mut self, _runner: &mut JobRunner) -> Result<(), JobError> {
        Ok(())
    }

    async fn on_sleeping(&mut self, _runner: &mut JobRunner) -> Result<(), JobError> {
        Ok(())
    }

    async fn on_disconnected(&mut self, _runner: &mut JobRunner) -> Result<(), JobError> {
        Ok(())
    }

    /// React to a write on `…/<key>/set`. The default stores and republishes.
    async fn set_setting(
        &mut self,
        runner: &mut JobRunner,
        key: &str,
        value: Value,
    ) -> Result<(), JobError> {
        runner.publish_setting(key, value).await
    }

    async fn tick(&mut self, _runner: &mut JobRunner) -> Result<(), JobError> {
        Ok(())
    }

    async fn on_message(
        &mut self,
        _runner: &mut JobRunner,
        _message: BusMessage,
    ) -> Result<(), JobError> {
        Ok(())
    }
}

/// Live runtime state handed to every spec method.
pub struct JobRunner {
    ctx: JobContext,
    job_name: String,
    job_id: i64,
    state: JobState,
    logger: BusLogger,
    settings: BTreeMap<String, PublishedSetting>,
    disconnect_requested: bool,
}

impl JobRunner {
    pub fn app(&self) -> &AppContext {
        &self.ctx.app
    }

    /// The process context, for actions (pumps) that outlive one method call.
    pub fn context(&self) -> &JobContext {
        &self.ctx
    }

    pub fn unit(&self) -> &str {
        &self.ctx.app.unit
    }

    pub fn experiment(&self) -> &str {
        &self.ctx.app.experiment
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.ctx.bus
    }

    pub fn kv(&self) -> &Arc<ScopedKv> {
        &self.ctx.kv
    }

    pub fn job_manager(&self) -> &Arc<JobManager> {
        &self.ctx.job_manager
    }

    pub fn hardware(&self) -> &Arc<dyn Hardware> {
        &self.ctx.hardware
    }

    pub fn pwm(&self) -> &Arc<PwmRegistry> {
        &self.ctx.pwm
    }

    pub fn logger(&self) -> &BusLogger {
        &self.logger
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key).map(|s| &s.value)
    }

    pub fn setting_f64(&self, key: &str) -> Option<f64> {
        self.setting(key).and_then(Value::as_f64)
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.setting(key).and_then(Value::as_str)
    }

    /// Ask the runtime to end the job after the current spec call returns.
    pub fn request_disconnect(&mut self) {
        self.disconnect_requested = true;
    }

    /// Store, persist, and republish one published setting.
    pub async fn publish_setting(&mut self, key: &str, value: Value) -> Result<(), JobError> {
        let Some(entry) = self.settings.get_mut(key) else {
            warn!(job = %self.job_name, key, "write to undeclared setting ignored");
            return Ok(());
        };
        entry.value = value.clone();
        let payload = match &value {
            Value::Null => Vec::new(),
            Value::String(s) => s.clone().into_bytes(),
            other => serde_json::to_vec(other).unwrap_or_default(),
        };
        self.ctx
            .job_manager
            .upsert_setting(
                self.job_id,
                key,
                if value.is_null() { None } else { Some(&payload) },
            )?;
        let topic = topics::setting(&self.ctx.app.unit, &self.ctx.app.experiment, &self.job_name, key);
        self.ctx
            .bus
            .publish(&topic, payload, QosLevel::ExactlyOnce, true)
            .await?;
        Ok(())
    }

    /// Publish a JSON payload on a telemetry topic.
    pub async fn publish_json<T: serde::Serialize + Sync>(
        &self,
        topic: &str,
        value: &T,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), JobError> {
        let payload = serde_json::to_vec(value).unwrap_or_default();
        self.ctx.bus.publish(topic, payload, qos, retain).await?;
        Ok(())
    }

    async fn publish_state(&mut self, state: JobState) -> Result<(), JobError> {
        self.state = state;
        let topic = topics::state(&self.ctx.app.unit, &self.ctx.app.experiment, &self.job_name);
        self.ctx
            .bus
            .publish(
                &topic,
                state.as_str().as_bytes().to_vec(),
                QosLevel::ExactlyOnce,
                true,
            )
            .await?;
        Ok(())
    }
}

/// Handle to a spawned sub-job sharing the parent's lifecycle.
pub struct SubJobHandle {
    stop: Arc<Notify>,
    join: tokio::task::JoinHandle<Result<(), JobError>>,
}

impl SubJobHandle {
    /// Signal the sub-job to disconnect and wait for it.
    pub async fn stop_and_join(self) {
        self.stop.notify_one();
        let _ = self.join.await;
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Spawn a spec as a sub-job: no signal handlers, stopped by the parent.
pub fn spawn_sub_job<S: JobSpec>(spec: S, ctx: JobContext) -> SubJobHandle {
    let stop = Arc::new(Notify::new());
    let options = JobOptions {
        suppress_signals: true,
        stop: Some(Arc::clone(&stop)),
    };
    let join = tokio::spawn(async move { run_job(spec, ctx, options).await });
    SubJobHandle { stop, join }
}

async fn wait_signal(sig: &mut Option<Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}

async fn wait_stop(stop: &Option<Arc<Notify>>) {
    match stop {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Host a spec for its whole life. Returns after a clean disconnect.
pub async fn run_job<S: JobSpec>(
    mut spec: S,
    ctx: JobContext,
    options: JobOptions,
) -> Result<(), JobError> {
    let job_name = spec.name().to_string();
    let unit = ctx.app.unit.clone();
    let experiment = ctx.app.experiment.clone();
    let logger = BusLogger::new(Arc::clone(&ctx.bus), &unit, &experiment, &job_name);

    // Duplicate prevention happens before any hardware or bus state.
    let job_id = match ctx.job_manager.register(
        &unit,
        &experiment,
        &job_name,
        &ctx.job_source,
        std::process::id(),
        &ctx.app.leader_hostname,
        spec.is_long_running(),
    ) {
        Ok(job_id) => job_id,
        Err(StorageError::DuplicateJob { .. }) => {
            logger
                .warning(&format!("{job_name} is already running, aborting"))
                .await;
            return Err(JobError::Duplicate(job_name));
        }
        Err(e) => return Err(e.into()),
    };

    let mut runner = JobRunner {
        ctx,
        job_name: job_name.clone(),
        job_id,
        state: JobState::Init,
        logger,
        settings: BTreeMap::new(),
        disconnect_requested: false,
    };

    for setting in spec.published_settings() {
        runner.settings.insert(setting.key.clone(), setting);
    }

    let result = host(&mut spec, &mut runner, &options).await;
    if let Err(e) = &result {
        runner.logger.error(&e.to_string()).await;
    }

    // Teardown runs even when startup failed half-way.
    if let Err(e) = spec.on_disconnected(&mut runner).await {
        runner.logger.error(&format!("on_disconnected: {e}")).await;
    }
    let _ = runner.publish_state(JobState::Disconnected).await;
    let _ = runner.ctx.job_manager.set_not_running(job_id);
    if !options.suppress_signals {
        let _ = runner.ctx.bus.disconnect().await;
    }
    debug!(job = %job_name, "disconnected");
    result
}

async fn host<S: JobSpec>(
    spec: &mut S,
    runner: &mut JobRunner,
    options: &JobOptions,
) -> Result<(), JobError> {
    let unit = runner.ctx.app.unit.clone();
    let experiment = runner.ctx.app.experiment.clone();
    let job_name = runner.job_name.clone();

    runner.publish_state(JobState::Init).await?;

    // $properties + per-setting value and editability, all retained.
    let keys: Vec<String> = runner.settings.keys().cloned().collect();
    runner
        .ctx
        .bus
        .publish(
            &topics::properties(&unit, &experiment, &job_name),
            keys.join(",").into_bytes(),
            QosLevel::ExactlyOnce,
            true,
        )
        .await?;
    for key in &keys {
        let (settable, value) = {
            let entry = &runner.settings[key];
            (entry.settable, entry.value.clone())
        };
        runner
            .ctx
            .bus
            .publish(
                &topics::settable(&unit, &experiment, &job_name, key),
                settable.to_string().into_bytes(),
                QosLevel::ExactlyOnce,
                true,
            )
            .await?;
        if !value.is_null() {
            runner.publish_setting(key, value).await?;
        }
    }

    // Remote control: writes for this unit and for the whole cluster.
    let set_filters = vec![
        format!("pioreactor/{unit}/{experiment}/{job_name}/+/set"),
        format!("pioreactor/$broadcast/{experiment}/{job_name}/+/set"),
    ];
    let mut set_rx = runner.ctx.bus.subscribe(&set_filters, QosLevel::ExactlyOnce).await?;

    let extra_filters = spec.subscriptions(runner);
    let mut extra_rx = runner
        .ctx
        .bus
        .subscribe(&extra_filters, QosLevel::AtLeastOnce)
        .await?;

    let mut sigterm = if options.suppress_signals {
        None
    } else {
        Some(signal(SignalKind::terminate()).map_err(|e| JobError::Fatal(e.to_string()))?)
    };
    let mut sigint = if options.suppress_signals {
        None
    } else {
        Some(signal(SignalKind::interrupt()).map_err(|e| JobError::Fatal(e.to_string()))?)
    };

    spec.on_init(runner).await?;
    runner.publish_state(JobState::Ready).await?;
    spec.on_ready(runner).await?;

    let mut next_tick: Option<Instant> = Some(Instant::now());

    while !runner.disconnect_requested {
        let tick_deadline = if runner.state == JobState::Ready {
            match spec.tick_interval(runner) {
                Some(_) => next_tick,
                None => None,
            }
        } else {
            None
        };

        tokio::select! {
            _ = wait_deadline(tick_deadline) => {
                spec.tick(runner).await?;
                let interval = spec
                    .tick_interval(runner)
                    .unwrap_or(Duration::from_secs(1));
                next_tick = Some(Instant::now() + interval);
            }

            message = set_rx.recv() => {
                match message {
                    Some(message) => handle_set(spec, runner, message).await?,
                    None => break, // bus closed
                }
            }

            message = extra_rx.recv() => {
                match message {
                    // Retained replays predate this job; only live traffic
                    // drives control decisions.
                    Some(message) if !message.retained => {
                        spec.on_message(runner, message).await?;
                    }
                    Some(_) => {}
                    None => break,
                }
            }

            _ = wait_signal(&mut sigterm) => {
                runner.logger.debug("received SIGTERM").await;
                break;
            }

            _ = wait_signal(&mut sigint) => {
                runner.logger.debug("received SIGINT").await;
                break;
            }

            _ = wait_stop(&options.stop) => break,
        }
    }
    Ok(())
}

async fn handle_set<S: JobSpec>(
    spec: &mut S,
    runner: &mut JobRunner,
    message: BusMessage,
) -> Result<(), JobError> {
    let Some(key) = setting_key(&message.topic) else {
        return Ok(());
    };
    let payload = message.payload_str().to_string();

    if key == "$state" {
        return handle_state_set(spec, runner, payload.trim()).await;
    }

    let Some(entry) = runner.settings.get(&key) else {
        runner
            .logger
            .warning(&format!("unknown setting {key:?} ignored"))
            .await;
        return Ok(());
    };
    if !entry.settable {
        runner
            .logger
            .warning(&format!("setting {key:?} is not editable"))
            .await;
        return Ok(());
    }
    match coerce(entry.setting_type, &payload) {
        Ok(value) => spec.set_setting(runner, &key, value).await,
        Err(e) => {
            runner
                .logger
                .warning(&format!("rejected write to {key}: {e}"))
                .await;
            Ok(())
        }
    }
}

async fn handle_state_set<S: JobSpec>(
    spec: &mut S,
    runner: &mut JobRunner,
    desired: &str,
) -> Result<(), JobError> {
    let Ok(desired) = desired.parse::<JobState>() else {
        runner
            .logger
            .warning(&format!("unknown state {desired:?} requested"))
            .await;
        return Ok(());
    };
    match desired {
        JobState::Disconnected => runner.request_disconnect(),
        JobState::Sleeping if runner.state.can_transition_to(JobState::Sleeping) => {
            runner.publish_state(JobState::Sleeping).await?;
            spec.on_sleeping(runner).await?;
        }
        JobState::Ready if runner.state.can_transition_to(JobState::Ready) => {
            runner.publish_state(JobState::Ready).await?;
            spec.on_ready(runner).await?;
        }
        _ => {
            runner
                .logger
                .debug(&format!(
                    "ignoring transition {} → {}",
                    runner.state, desired
                ))
                .await;
        }
    }
    Ok(())
}

/// Extract the setting name from a `…/<setting>/set` topic.
fn setting_key(topic: &str) -> Option<String> {
    let without_set = topic.strip_suffix("/set")?;
    let (_, _, rest) = topics::split(without_set)?;
    // rest is "<job>/<setting>"
    rest.split_once('/').map(|(_, key)| key.to_string())
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
