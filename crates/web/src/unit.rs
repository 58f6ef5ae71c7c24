// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-unit HTTP API (`/unit_api/…`).
//!
//! Job launches fork the CLI through [`JobLauncher`] and answer 202 with a
//! task id; system actions (reboot, update, clock) go through
//! [`SystemCommands`]; calibration sessions run the session engine with the
//! unit's hardware executor. Session advances are serialized — one writer
//! per session, refreshes and duplicate tabs just re-render.

use crate::error::ApiError;
use crate::tasks::{TaskRegistry, TaskStatus};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use pio_bus::{Bus, QosLevel};
use pio_calibration::protocols::find_protocol;
use pio_calibration::{
    CalibrationSession, CalibrationStore, Executor, SessionEngine, SessionMode, SessionStatus,
};
use pio_core::clock::Clock;
use pio_core::config::AppContext;
use pio_core::topics;
use pio_storage::{JobManager, JobQuery, ScopedKv, ShellKiller};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// How job subprocesses are spawned; the CLI is the real implementation.
pub trait JobLauncher: Send + Sync {
    fn launch(
        &self,
        job: &str,
        options: &Map<String, Value>,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<u32, String>;
}

/// Spawns `pio run <job> …` detached.
pub struct CliLauncher;

impl JobLauncher for CliLauncher {
    fn launch(
        &self,
        job: &str,
        options: &Map<String, Value>,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<u32, String> {
        let mut command = std::process::Command::new("pio");
        command.arg("run").arg(job);
        for (key, value) in options {
            command.arg(format!("--{key}"));
            match value {
                Value::String(s) => {
                    command.arg(s);
                }
                other => {
                    command.arg(other.to_string());
                }
            }
        }
        command.args(args);
        for (key, value) in env {
            command.env(key, value);
        }
        command
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map(|child| child.id())
            .map_err(|e| e.to_string())
    }
}

/// Test launcher recording what would have been spawned.
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct RecordingLauncher {
    pub launches: parking_lot::Mutex<Vec<(String, Map<String, Value>, BTreeMap<String, String>)>>,
}

#[cfg(any(test, feature = "test-support"))]
impl JobLauncher for RecordingLauncher {
    fn launch(
        &self,
        job: &str,
        options: &Map<String, Value>,
        _args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<u32, String> {
        self.launches
            .lock()
            .push((job.to_string(), options.clone(), env.clone()));
        Ok(4242)
    }
}

/// Privileged host actions behind the system endpoints.
pub trait SystemCommands: Send + Sync {
    fn reboot(&self) -> Result<(), String>;
    fn shutdown(&self) -> Result<(), String>;
    fn update_app(&self) -> Result<String, String>;
    fn update_ui(&self) -> Result<String, String>;
    fn set_clock(&self, iso_timestamp: &str) -> Result<(), String>;
}

/// Production system commands, shelling out to the host.
pub struct ShellSystem;

impl SystemCommands for ShellSystem {
    fn reboot(&self) -> Result<(), String> {
        run_host_command("systemctl", &["reboot"])
    }

    fn shutdown(&self) -> Result<(), String> {
        run_host_command("systemctl", &["poweroff"])
    }

    fn update_app(&self) -> Result<String, String> {
        run_host_command("pio-update", &["app"]).map(|_| env!("CARGO_PKG_VERSION").to_string())
    }

    fn update_ui(&self) -> Result<String, String> {
        run_host_command("pio-update", &["ui"]).map(|_| env!("CARGO_PKG_VERSION").to_string())
    }

    fn set_clock(&self, iso_timestamp: &str) -> Result<(), String> {
        run_host_command("date", &["-s", iso_timestamp])
    }
}

fn run_host_command(program: &str, args: &[&str]) -> Result<(), String> {
    std::process::Command::new(program)
        .args(args)
        .status()
        .map_err(|e| e.to_string())
        .and_then(|status| {
            if status.success() {
                Ok(())
            } else {
                Err(format!("{program} exited with {status}"))
            }
        })
}

/// Test double recording system calls.
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct RecordingSystem {
    pub calls: parking_lot::Mutex<Vec<String>>,
}

#[cfg(any(test, feature = "test-support"))]
impl SystemCommands for RecordingSystem {
    fn reboot(&self) -> Result<(), String> {
        self.calls.lock().push("reboot".to_string());
        Ok(())
    }

    fn shutdown(&self) -> Result<(), String> {
        self.calls.lock().push("shutdown".to_string());
        Ok(())
    }

    fn update_app(&self) -> Result<String, String> {
        self.calls.lock().push("update_app".to_string());
        Ok("updated".to_string())
    }

    fn update_ui(&self) -> Result<String, String> {
        self.calls.lock().push("update_ui".to_string());
        Ok("updated".to_string())
    }

    fn set_clock(&self, iso_timestamp: &str) -> Result<(), String> {
        self.calls.lock().push(format!("set_clock {iso_timestamp}"));
        Ok(())
    }
}

/// Shared state behind the unit router.
#[derive(Clone)]
pub struct UnitState {
    pub app: AppContext,
    pub bus: Arc<dyn Bus>,
    pub kv: Arc<ScopedKv>,
    pub job_manager: Arc<JobManager>,
    pub tasks: TaskRegistry,
    pub launcher: Arc<dyn JobLauncher>,
    pub system: Arc<dyn SystemCommands>,
    pub executor: Arc<dyn Executor>,
    pub clock: Arc<dyn Clock>,
    /// Serializes session advances (single writer per session).
    pub session_write: Arc<tokio::sync::Mutex<()>>,
}

impl UnitState {
    fn store(&self) -> CalibrationStore {
        CalibrationStore::new(&self.app.calibrations_dir(), Arc::clone(&self.kv))
    }
}

pub fn unit_router(state: UnitState) -> Router {
    Router::new()
        .route("/unit_api/jobs/run/job_name/:job", post(run_job))
        .route("/unit_api/jobs/stop", post(stop_jobs_by_query))
        .route("/unit_api/jobs/stop/job_name/:job", post(stop_job))
        .route("/unit_api/jobs/update/job_name/:job", patch(update_job))
        .route("/unit_api/jobs/running", get(running_jobs))
        .route("/unit_api/task_results/:id", get(task_result))
        .route("/unit_api/system/update/app", post(update_app))
        .route("/unit_api/system/update/ui", post(update_ui))
        .route("/unit_api/system/reboot", post(reboot))
        .route("/unit_api/system/shutdown", post(shutdown))
        .route("/unit_api/system/utc_clock", get(get_clock).patch(set_clock))
        .route("/unit_api/versions/app", get(version_app))
        .route("/unit_api/versions/ui", get(version_ui))
        .route("/unit_api/calibrations", get(list_devices))
        .route("/unit_api/calibrations/sessions", post(create_session))
        .route("/unit_api/calibrations/sessions/:id", get(get_session))
        .route("/unit_api/calibrations/sessions/:id/inputs", post(session_inputs))
        .route("/unit_api/calibrations/sessions/:id/abort", post(abort_session))
        .route("/unit_api/calibrations/:device", get(list_calibrations))
        .route(
            "/unit_api/calibrations/:device/:name",
            get(get_calibration).delete(delete_calibration),
        )
        .route(
            "/unit_api/calibrations/:device/:name/active",
            patch(set_active_calibration),
        )
        .route("/unit_api/estimators/:device", get(list_calibrations))
        .route("/unit_api/estimators/:device/:name", get(get_calibration))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct RunBody {
    #[serde(default)]
    options: Map<String, Value>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    config_overrides: Map<String, Value>,
}

async fn run_job(
    State(state): State<UnitState>,
    Path(job): Path<String>,
    body: Option<Json<RunBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.unwrap_or_default();
    // Refuse early when the name is already live; the spawned process would
    // only discover it after forking.
    if state
        .job_manager
        .count_running(&state.app.unit, &state.app.experiment, &job)?
        > 0
    {
        return Err(ApiError::conflict(format!("{job} is already running")));
    }

    let mut env = body.env.clone();
    env.entry("EXPERIMENT".to_string())
        .or_insert_with(|| state.app.experiment.clone());
    for (key, value) in &body.config_overrides {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        env.insert(format!("CONFIG_OVERRIDE_{key}"), rendered);
    }

    let task_id = state.tasks.create();
    match state.launcher.launch(&job, &body.options, &body.args, &env) {
        Ok(pid) => {
            info!(job, pid, "launched job subprocess");
            state.tasks.complete(&task_id, Some(json!({ "pid": pid })));
        }
        Err(e) => state.tasks.fail(&task_id, e),
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "task_id": task_id,
            "result_url_path": TaskRegistry::result_url_path(&task_id),
        })),
    ))
}

#[derive(Debug, Default, Deserialize)]
struct StopQueryBody {
    #[serde(default)]
    experiment: Option<String>,
    #[serde(default)]
    job_name: Option<String>,
    #[serde(default)]
    job_source_prefix: Option<String>,
}

/// Kill-by-query: used by the profile engine's cancellation sweep.
async fn stop_jobs_by_query(
    State(state): State<UnitState>,
    body: Option<Json<StopQueryBody>>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.unwrap_or_default();
    let query = JobQuery {
        unit: Some(state.app.unit.clone()),
        experiment: body.experiment,
        job_name: body.job_name,
        job_source_prefix: body.job_source_prefix,
        ..JobQuery::default()
    };
    let stopped = state.job_manager.kill_jobs(&query, &ShellKiller)?;
    Ok(Json(json!({ "stopped": stopped })))
}

async fn stop_job(
    State(state): State<UnitState>,
    Path(job): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let query = JobQuery {
        unit: Some(state.app.unit.clone()),
        job_name: Some(job.clone()),
        ..JobQuery::default()
    };
    let stopped = state.job_manager.kill_jobs(&query, &ShellKiller)?;
    if stopped == 0 {
        return Err(ApiError::not_found(format!("{job} is not running")));
    }
    Ok(Json(json!({ "stopped": stopped })))
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    settings: Map<String, Value>,
    #[serde(default)]
    experiment: Option<String>,
}

async fn update_job(
    State(state): State<UnitState>,
    Path(job): Path<String>,
    Json(body): Json<UpdateBody>,
) -> Result<Json<Value>, ApiError> {
    let experiment = body
        .experiment
        .unwrap_or_else(|| state.app.experiment.clone());
    if state
        .job_manager
        .count_running(&state.app.unit, &experiment, &job)?
        == 0
    {
        return Err(ApiError::not_found(format!("{job} is not running")));
    }
    for (setting, value) in &body.settings {
        let payload = match value {
            Value::String(s) => s.clone().into_bytes(),
            other => serde_json::to_vec(other).unwrap_or_default(),
        };
        state
            .bus
            .publish(
                &topics::setting_set(&state.app.unit, &experiment, &job, setting),
                payload,
                QosLevel::ExactlyOnce,
                false,
            )
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
    }
    Ok(Json(json!({ "updated": body.settings.len() })))
}

async fn running_jobs(State(state): State<UnitState>) -> Result<Json<Value>, ApiError> {
    let jobs = state.job_manager.list_jobs(&JobQuery::running())?;
    Ok(Json(serde_json::to_value(jobs).unwrap_or_default()))
}

async fn task_result(
    State(state): State<UnitState>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatus>, ApiError> {
    state
        .tasks
        .status(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no task {id}")))
}

async fn background_system_task(
    state: &UnitState,
    action: impl FnOnce() -> Result<Option<Value>, String>,
) -> (StatusCode, Json<Value>) {
    let task_id = state.tasks.create();
    match action() {
        Ok(result) => state.tasks.complete(&task_id, result),
        Err(e) => state.tasks.fail(&task_id, e),
    }
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "task_id": task_id,
            "result_url_path": TaskRegistry::result_url_path(&task_id),
        })),
    )
}

async fn update_app(State(state): State<UnitState>) -> impl IntoResponse {
    let system = Arc::clone(&state.system);
    background_system_task(&state, move || {
        system.update_app().map(|v| Some(json!({ "version": v })))
    })
    .await
}

async fn update_ui(State(state): State<UnitState>) -> impl IntoResponse {
    let system = Arc::clone(&state.system);
    background_system_task(&state, move || {
        system.update_ui().map(|v| Some(json!({ "version": v })))
    })
    .await
}

async fn reboot(State(state): State<UnitState>) -> impl IntoResponse {
    let system = Arc::clone(&state.system);
    background_system_task(&state, move || system.reboot().map(|_| None)).await
}

async fn shutdown(State(state): State<UnitState>) -> impl IntoResponse {
    let system = Arc::clone(&state.system);
    background_system_task(&state, move || system.shutdown().map(|_| None)).await
}

async fn get_clock(State(state): State<UnitState>) -> Json<Value> {
    Json(json!({ "clock_time": state.clock.iso_now() }))
}

#[derive(Debug, Deserialize)]
struct ClockBody {
    clock_time: String,
}

async fn set_clock(
    State(state): State<UnitState>,
    Json(body): Json<ClockBody>,
) -> Result<Json<Value>, ApiError> {
    state
        .system
        .set_clock(&body.clock_time)
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "clock_time": body.clock_time })))
}

async fn version_app() -> Json<Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

async fn version_ui() -> Json<Value> {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

async fn list_devices(State(state): State<UnitState>) -> Result<Json<Value>, ApiError> {
    let devices = state.store().list_devices()?;
    Ok(Json(json!({ "devices": devices })))
}

async fn list_calibrations(
    State(state): State<UnitState>,
    Path(device): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let store = state.store();
    let names = store.list_names(&device)?;
    let active = store.active_name(&device)?;
    Ok(Json(json!({ "device": device, "calibrations": names, "active": active })))
}

async fn get_calibration(
    State(state): State<UnitState>,
    Path((device, name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let calibration = state.store().load(&device, &name)?;
    Ok(Json(serde_json::to_value(calibration).unwrap_or_default()))
}

async fn delete_calibration(
    State(state): State<UnitState>,
    Path((device, name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    state.store().delete(&device, &name)?;
    Ok(Json(json!({ "deleted": name })))
}

async fn set_active_calibration(
    State(state): State<UnitState>,
    Path((device, name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    state.store().set_active(&device, &name)?;
    Ok(Json(json!({ "device": device, "active": name })))
}

#[derive(Debug, Deserialize)]
struct CreateSessionBody {
    protocol_name: String,
    target_device: String,
}

fn session_view(session: &CalibrationSession, step: pio_calibration::StepView) -> Value {
    json!({ "session": session, "step": step })
}

async fn create_session(
    State(state): State<UnitState>,
    Json(body): Json<CreateSessionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let protocol = find_protocol(&body.protocol_name, &body.target_device).ok_or_else(|| {
        ApiError::not_found(format!(
            "no protocol {:?} for device {:?}",
            body.protocol_name, body.target_device
        ))
    })?;
    let mut session = protocol
        .start_session(&body.target_device, state.clock.as_ref())
        .map_err(ApiError::from)?;
    // steps record which unit produced the calibration
    session
        .data
        .insert("unit".to_string(), Value::String(state.app.unit.clone()));
    let step = {
        let mut engine = SessionEngine::new(
            protocol.registry(),
            &mut session,
            SessionMode::Ui,
            state.executor.as_ref(),
            state.clock.as_ref(),
        );
        engine.get_step().map_err(ApiError::from)?
    };
    session
        .save(&state.kv)
        .map_err(ApiError::from)?;
    Ok((StatusCode::CREATED, Json(session_view(&session, step))))
}

fn load_session(state: &UnitState, id: &str) -> Result<CalibrationSession, ApiError> {
    CalibrationSession::load(&state.kv, id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found(format!("no session {id}")))
}

fn protocol_for(session: &CalibrationSession) -> Result<Box<dyn pio_calibration::protocols::CalibrationProtocol>, ApiError> {
    find_protocol(&session.protocol_name, &session.target_device).ok_or_else(|| {
        ApiError::internal(format!(
            "session references unknown protocol {:?}",
            session.protocol_name
        ))
    })
}

async fn get_session(
    State(state): State<UnitState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let mut session = load_session(&state, &id)?;
    let protocol = protocol_for(&session)?;
    let mut engine = SessionEngine::new(
        protocol.registry(),
        &mut session,
        SessionMode::Ui,
        state.executor.as_ref(),
        state.clock.as_ref(),
    );
    let step = engine.get_step().map_err(ApiError::from)?;
    Ok(Json(session_view(&session, step)))
}

#[derive(Debug, Default, Deserialize)]
struct InputsBody {
    #[serde(default)]
    inputs: Map<String, Value>,
}

async fn session_inputs(
    State(state): State<UnitState>,
    Path(id): Path<String>,
    body: Option<Json<InputsBody>>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.unwrap_or_default();
    let _write = state.session_write.lock().await;

    let mut session = load_session(&state, &id)?;
    if session.status != SessionStatus::InProgress {
        let protocol = protocol_for(&session)?;
        let mut engine = SessionEngine::new(
            protocol.registry(),
            &mut session,
            SessionMode::Ui,
            state.executor.as_ref(),
            state.clock.as_ref(),
        );
        let step = engine.get_step().map_err(ApiError::from)?;
        return Ok(Json(session_view(&session, step)));
    }

    let protocol = protocol_for(&session)?;
    let step = {
        let mut engine = SessionEngine::new(
            protocol.registry(),
            &mut session,
            SessionMode::Ui,
            state.executor.as_ref(),
            state.clock.as_ref(),
        );
        engine.advance(body.inputs).map_err(ApiError::from)?
    };
    session.save(&state.kv).map_err(ApiError::from)?;
    Ok(Json(session_view(&session, step)))
}

async fn abort_session(
    State(state): State<UnitState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let _write = state.session_write.lock().await;
    let mut session = load_session(&state, &id)?;
    let protocol = protocol_for(&session)?;
    let step = {
        let mut engine = SessionEngine::new(
            protocol.registry(),
            &mut session,
            SessionMode::Ui,
            state.executor.as_ref(),
            state.clock.as_ref(),
        );
        engine.abort("aborted by operator");
        engine.get_step().map_err(ApiError::from)?
    };
    session.save(&state.kv).map_err(ApiError::from)?;
    Ok(Json(session_view(&session, step)))
}

#[cfg(test)]
#[path = "unit_tests.rs"]
mod tests;
