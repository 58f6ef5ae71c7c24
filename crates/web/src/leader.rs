// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The leader HTTP API (`/api/…`).
//!
//! Serves the UI and coordinates workers: experiment registry, unit labels,
//! job control forwarded to unit APIs, log intake, time-series reads for
//! charts, profile verification, and the cluster inventory.

use crate::client::UnitClient;
use crate::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use pio_bus::{Bus, QosLevel};
use pio_core::config::AppContext;
use pio_core::telemetry::{LogLevel, LogMessage};
use pio_core::topics;
use pio_storage::{ScopedKv, TimeseriesDb};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// KV scope listing cluster workers (`unit → {"is_active": bool}`).
pub const INVENTORY_SCOPE: &str = "cluster_inventory";

#[derive(Clone)]
pub struct LeaderState {
    pub app: AppContext,
    pub bus: Arc<dyn Bus>,
    pub db: Arc<TimeseriesDb>,
    pub kv: Arc<ScopedKv>,
    pub client: UnitClient,
}

impl LeaderState {
    /// Workers currently marked active in the inventory.
    pub fn active_workers(&self) -> Result<Vec<String>, ApiError> {
        let mut workers = Vec::new();
        for (unit, raw) in self.kv.iter(INVENTORY_SCOPE)? {
            let entry: Value = serde_json::from_slice(&raw).unwrap_or(Value::Null);
            if entry.get("is_active").and_then(Value::as_bool).unwrap_or(true) {
                workers.push(unit);
            }
        }
        Ok(workers)
    }
}

pub fn leader_router(state: LeaderState) -> Router {
    Router::new()
        .route("/api/experiments", get(list_experiments).post(create_experiment))
        .route("/api/experiments/active", get(active_experiment))
        .route("/api/experiments/:experiment", get(get_experiment))
        .route("/api/experiments/:experiment/unit_labels", put(put_unit_label))
        .route("/api/experiments/:experiment/logs", post(post_log))
        .route("/api/experiments/:experiment/logs/:level", post(post_log_level))
        .route(
            "/api/experiments/:experiment/time_series/:stream",
            get(time_series),
        )
        .route("/api/workers", get(list_workers).put(put_worker))
        .route(
            "/api/workers/:unit/jobs/run/job_name/:job/experiments/:experiment",
            post(run_worker_job),
        )
        .route(
            "/api/workers/:unit/jobs/stop/job_name/:job/experiments/:experiment",
            post(stop_worker_job),
        )
        .route(
            "/api/workers/:unit/jobs/update/job_name/:job/experiments/:experiment",
            patch(update_worker_job),
        )
        .route("/api/experiment_profiles", get(list_profiles))
        .route("/api/experiment_profiles/verify", post(verify_profile_body))
        .route("/api/plugins/installed", get(installed_plugins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn list_experiments(State(state): State<LeaderState>) -> Result<Json<Value>, ApiError> {
    let experiments: Vec<Value> = state
        .db
        .list_experiments()?
        .into_iter()
        .map(|(experiment, created_at, description)| {
            json!({
                "experiment": experiment,
                "created_at": created_at,
                "description": description,
            })
        })
        .collect();
    Ok(Json(json!(experiments)))
}

#[derive(Debug, Deserialize)]
struct CreateExperimentBody {
    experiment: String,
    #[serde(default)]
    description: Option<String>,
}

async fn create_experiment(
    State(state): State<LeaderState>,
    Json(body): Json<CreateExperimentBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.experiment.trim().is_empty() || body.experiment.starts_with('$') {
        return Err(ApiError::bad_request("invalid experiment name"));
    }
    let created_at = chrono::Utc::now().to_rfc3339();
    state
        .db
        .create_experiment(&body.experiment, &created_at, body.description.as_deref())?;
    // the UI and workers discover the newest experiment from this topic
    state
        .bus
        .publish(
            topics::LATEST_EXPERIMENT_TOPIC,
            body.experiment.clone().into_bytes(),
            QosLevel::ExactlyOnce,
            true,
        )
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "experiment": body.experiment, "created_at": created_at })),
    ))
}

async fn active_experiment(State(state): State<LeaderState>) -> Result<Json<Value>, ApiError> {
    let latest = state
        .db
        .latest_experiment()?
        .ok_or_else(|| ApiError::not_found("no experiments yet"))?;
    Ok(Json(json!({ "experiment": latest })))
}

async fn get_experiment(
    State(state): State<LeaderState>,
    Path(experiment): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let found = state
        .db
        .list_experiments()?
        .into_iter()
        .find(|(name, _, _)| name == &experiment)
        .ok_or_else(|| ApiError::not_found(format!("no experiment {experiment}")))?;
    let labels: BTreeMap<String, String> = state.db.unit_labels(&experiment)?.into_iter().collect();
    Ok(Json(json!({
        "experiment": found.0,
        "created_at": found.1,
        "description": found.2,
        "unit_labels": labels,
    })))
}

#[derive(Debug, Deserialize)]
struct UnitLabelBody {
    unit: String,
    label: String,
}

async fn put_unit_label(
    State(state): State<LeaderState>,
    Path(experiment): Path<String>,
    Json(body): Json<UnitLabelBody>,
) -> Result<Json<Value>, ApiError> {
    state.db.set_unit_label(&experiment, &body.unit, &body.label)?;
    Ok(Json(json!({ "unit": body.unit, "label": body.label })))
}

#[derive(Debug, Deserialize)]
struct LogBody {
    message: String,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    task: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

async fn post_log(
    state: State<LeaderState>,
    path: Path<String>,
    body: Json<LogBody>,
) -> Result<Json<Value>, ApiError> {
    post_log_inner(state, path.0, None, body.0).await
}

async fn post_log_level(
    state: State<LeaderState>,
    Path((experiment, level)): Path<(String, String)>,
    body: Json<LogBody>,
) -> Result<Json<Value>, ApiError> {
    post_log_inner(state, experiment, Some(level), body.0).await
}

async fn post_log_inner(
    State(state): State<LeaderState>,
    experiment: String,
    level_from_path: Option<String>,
    body: LogBody,
) -> Result<Json<Value>, ApiError> {
    let level_raw = level_from_path
        .or(body.level)
        .unwrap_or_else(|| "notice".to_string());
    let level = LogLevel::parse(&level_raw)
        .ok_or_else(|| ApiError::bad_request(format!("unknown log level {level_raw:?}")))?;
    let unit = body.unit.unwrap_or_else(|| state.app.unit.clone());
    let line = LogMessage {
        timestamp: chrono::Utc::now(),
        message: body.message,
        task: body.task.unwrap_or_else(|| "ui".to_string()),
        source: body.source.unwrap_or_else(|| "app".to_string()),
        level,
    };

    // Publish only; the streamer is the single writer into the logs table,
    // so API-submitted lines take the same path as job-emitted ones.
    let payload = serde_json::to_vec(&line).unwrap_or_default();
    state
        .bus
        .publish(
            &topics::logs(&unit, &experiment, level.as_str()),
            payload,
            QosLevel::AtLeastOnce,
            false,
        )
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct SeriesQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    500
}

async fn time_series(
    State(state): State<LeaderState>,
    Path((experiment, stream)): Path<(String, String)>,
    Query(query): Query<SeriesQuery>,
) -> Result<Json<Value>, ApiError> {
    let rows = match stream.as_str() {
        "od_readings" => state.db.od_readings(&experiment, query.limit)?,
        "growth_rates" => state.db.growth_rates(&experiment, query.limit)?,
        "temperature_readings" => state.db.temperature_readings(&experiment, query.limit)?,
        other => return Err(ApiError::not_found(format!("no stream {other}"))),
    };
    Ok(Json(serde_json::to_value(rows).unwrap_or_default()))
}

async fn list_workers(State(state): State<LeaderState>) -> Result<Json<Value>, ApiError> {
    let mut workers = Vec::new();
    for (unit, raw) in state.kv.iter(INVENTORY_SCOPE)? {
        let entry: Value = serde_json::from_slice(&raw).unwrap_or(json!({}));
        workers.push(json!({ "unit": unit, "is_active": entry.get("is_active").and_then(Value::as_bool).unwrap_or(true) }));
    }
    Ok(Json(json!(workers)))
}

#[derive(Debug, Deserialize)]
struct WorkerBody {
    unit: String,
    #[serde(default = "default_true")]
    is_active: bool,
}

fn default_true() -> bool {
    true
}

async fn put_worker(
    State(state): State<LeaderState>,
    Json(body): Json<WorkerBody>,
) -> Result<Json<Value>, ApiError> {
    state.kv.put_json(
        INVENTORY_SCOPE,
        &body.unit,
        &json!({ "is_active": body.is_active }),
    )?;
    Ok(Json(json!({ "unit": body.unit, "is_active": body.is_active })))
}

#[derive(Debug, Default, Deserialize)]
struct ForwardRunBody {
    #[serde(default)]
    options: serde_json::Map<String, Value>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    config_overrides: serde_json::Map<String, Value>,
}

async fn run_worker_job(
    State(state): State<LeaderState>,
    Path((unit, job, experiment)): Path<(String, String, String)>,
    body: Option<Json<ForwardRunBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(mut body) = body.unwrap_or_default();
    body.env
        .entry("EXPERIMENT".to_string())
        .or_insert(experiment);
    let url = state
        .client
        .unit_url(&unit, &format!("/unit_api/jobs/run/job_name/{job}"));
    let forwarded = state
        .client
        .post(
            &url,
            json!({
                "options": body.options,
                "args": body.args,
                "env": body.env,
                "config_overrides": body.config_overrides,
            }),
        )
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok((StatusCode::ACCEPTED, Json(forwarded)))
}

async fn stop_worker_job(
    State(state): State<LeaderState>,
    Path((unit, job, experiment)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    let url = state.client.unit_url(&unit, "/unit_api/jobs/stop");
    let forwarded = state
        .client
        .post(
            &url,
            json!({ "experiment": experiment, "job_name": job }),
        )
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if forwarded.get("stopped").and_then(Value::as_u64) == Some(0) {
        return Err(ApiError::not_found(format!("{job} is not running on {unit}")));
    }
    Ok(Json(forwarded))
}

#[derive(Debug, Deserialize)]
struct ForwardUpdateBody {
    settings: serde_json::Map<String, Value>,
}

async fn update_worker_job(
    State(state): State<LeaderState>,
    Path((unit, job, experiment)): Path<(String, String, String)>,
    Json(body): Json<ForwardUpdateBody>,
) -> Result<Json<Value>, ApiError> {
    let url = state
        .client
        .unit_url(&unit, &format!("/unit_api/jobs/update/job_name/{job}"));
    let forwarded = state
        .client
        .patch(
            &url,
            json!({ "settings": body.settings, "experiment": experiment }),
        )
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(forwarded))
}

/// Profiles live as YAML files under `<root>/experiment_profiles/`.
fn profiles_dir(app: &AppContext) -> std::path::PathBuf {
    app.storage_root.join("experiment_profiles")
}

async fn list_profiles(State(state): State<LeaderState>) -> Result<Json<Value>, ApiError> {
    let dir = profiles_dir(&state.app);
    let mut names = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
    }
    names.sort();
    Ok(Json(json!(names)))
}

#[derive(Debug, Deserialize)]
struct VerifyBody {
    body: String,
}

async fn verify_profile_body(
    State(_state): State<LeaderState>,
    Json(body): Json<VerifyBody>,
) -> Result<Json<Value>, ApiError> {
    let profile = pio_profile::Profile::from_yaml(&body.body)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let no_plugins: BTreeMap<String, String> = BTreeMap::new();
    pio_profile::verify_profile(&profile, &no_plugins)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(json!({
        "valid": true,
        "experiment_profile_name": profile.experiment_profile_name,
    })))
}

async fn installed_plugins() -> Json<Value> {
    // Plugins arrive as separate crates registering over the plugin dir;
    // nothing ships by default.
    Json(json!([]))
}

#[cfg(test)]
#[path = "leader_tests.rs"]
mod tests;
