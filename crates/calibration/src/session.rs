// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The calibration session step-machine.
//!
//! A protocol is a registry of [`StepHandler`]s keyed by step id. The
//! engine renders the current step for display (idempotent), and on each
//! user submission validates the inputs, runs the handler's `advance`, and
//! moves to the returned step. Sessions persist in the
//! `calibration_sessions` KV scope so a UI tab can be refreshed, or a
//! half-finished calibration resumed after a restart.
//!
//! Hardware never appears here: privileged actions (running a pump, reading
//! the aux voltage) go through the [`Executor`] seam, implemented by the
//! owning unit.

use pio_core::clock::Clock;
use pio_core::id::SessionId;
use pio_storage::ScopedKv;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// KV scope holding persisted sessions keyed by session id.
pub const SESSION_SCOPE: &str = "calibration_sessions";

/// Terminal step ids, always present in a registry via
/// [`with_terminal_steps`].
pub const STEP_COMPLETE: &str = "complete";
pub const STEP_ENDED: &str = "ended";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Complete,
    Aborted,
    Failed,
}

/// Persisted session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSession {
    pub session_id: SessionId,
    pub protocol_name: String,
    pub target_device: String,
    pub status: SessionStatus,
    pub step_id: String,
    /// Opaque bag accumulated by steps (names, volumes, measured points).
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl CalibrationSession {
    pub fn start(
        protocol_name: &str,
        target_device: &str,
        initial_step: &str,
        clock: &dyn Clock,
    ) -> Self {
        let now = clock.iso_now();
        Self {
            session_id: SessionId::new(uuid::Uuid::new_v4().to_string()),
            protocol_name: protocol_name.to_string(),
            target_device: target_device.to_string(),
            status: SessionStatus::InProgress,
            step_id: initial_step.to_string(),
            data: Map::new(),
            result: None,
            error: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn save(&self, kv: &ScopedKv) -> Result<(), SessionError> {
        kv.put_json(SESSION_SCOPE, self.session_id.as_str(), self)
            .map_err(|e| SessionError::Store(e.to_string()))
    }

    pub fn load(kv: &ScopedKv, session_id: &str) -> Result<Option<Self>, SessionError> {
        kv.get_json(SESSION_SCOPE, session_id)
            .map_err(|e| SessionError::Store(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Cli,
    Ui,
}

/// How a step is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Info,
    Form,
    Action,
    Result,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Float,
    Int,
    Choice,
    FloatList,
    Bool,
}

/// One input field of a form step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepField {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl StepField {
    pub fn str(name: &str, label: &str) -> Self {
        Self::new(name, label, FieldType::String)
    }

    pub fn float(name: &str, label: &str) -> Self {
        Self::new(name, label, FieldType::Float)
    }

    pub fn int(name: &str, label: &str) -> Self {
        Self::new(name, label, FieldType::Int)
    }

    pub fn float_list(name: &str, label: &str) -> Self {
        Self::new(name, label, FieldType::FloatList)
    }

    pub fn bool(name: &str, label: &str) -> Self {
        Self::new(name, label, FieldType::Bool)
    }

    pub fn choice(name: &str, label: &str, options: &[&str]) -> Self {
        let mut field = Self::new(name, label, FieldType::Choice);
        field.options = Some(options.iter().map(|s| s.to_string()).collect());
        field
    }

    fn new(name: &str, label: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            field_type,
            options: None,
            minimum: None,
            maximum: None,
            default: None,
        }
    }

    pub fn with_min(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn with_max(mut self, maximum: f64) -> Self {
        self.maximum = Some(maximum);
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Renderable description of the current step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepView {
    pub step_id: String,
    pub step_type: StepType,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<StepField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl StepView {
    pub fn info(title: &str, body: &str) -> Self {
        Self::new(StepType::Info, title, body)
    }

    pub fn form(title: &str, body: &str, fields: Vec<StepField>) -> Self {
        let mut step = Self::new(StepType::Form, title, body);
        step.fields = fields;
        step
    }

    pub fn action(title: &str, body: &str) -> Self {
        Self::new(StepType::Action, title, body)
    }

    pub fn result(result: Value) -> Self {
        let mut step = Self::new(StepType::Result, "Calibration complete!", "");
        step.step_id = STEP_COMPLETE.to_string();
        step.metadata = Some(serde_json::json!({ "result": result }));
        step
    }

    fn new(step_type: StepType, title: &str, body: &str) -> Self {
        Self {
            step_id: String::new(),
            step_type,
            title: title.to_string(),
            body: body.to_string(),
            fields: Vec::new(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Errors from the session engine.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Input validation failed; HTTP 400 / CLI reprompt.
    #[error("{0}")]
    Input(String),
    #[error("unknown step: {0}")]
    UnknownStep(String),
    #[error("executor action {action:?} failed: {message}")]
    Executor { action: String, message: String },
    #[error("session storage failed: {0}")]
    Store(String),
}

/// Typed access to one advance's submitted inputs.
#[derive(Debug, Clone, Default)]
pub struct SessionInputs {
    raw: Option<Map<String, Value>>,
}

impl SessionInputs {
    pub fn new(raw: Map<String, Value>) -> Self {
        Self { raw: Some(raw) }
    }

    pub fn empty() -> Self {
        Self { raw: None }
    }

    pub fn has_inputs(&self) -> bool {
        self.raw.is_some()
    }

    fn get_raw(&self, name: &str) -> Option<&Value> {
        self.raw.as_ref()?.get(name).filter(|v| !v.is_null())
    }

    pub fn str(&self, name: &str, default: Option<&str>) -> Result<String, SessionError> {
        match self.get_raw(name) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Some(Value::String(_)) | None => default
                .map(str::to_string)
                .ok_or_else(|| SessionError::Input(format!("Missing '{name}'."))),
            Some(_) => Err(SessionError::Input(format!(
                "Invalid '{name}', expected string."
            ))),
        }
    }

    pub fn float(
        &self,
        name: &str,
        minimum: Option<f64>,
        maximum: Option<f64>,
        default: Option<f64>,
    ) -> Result<f64, SessionError> {
        let numeric = match self.get_raw(name) {
            None => default.ok_or_else(|| SessionError::Input(format!("Missing '{name}'.")))?,
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| SessionError::Input(format!("Invalid '{name}', expected number.")))?,
            Some(Value::String(s)) if s.trim().is_empty() => {
                default.ok_or_else(|| SessionError::Input(format!("Missing '{name}'.")))?
            }
            Some(Value::String(s)) => s.trim().parse().map_err(|_| {
                SessionError::Input(format!("Invalid '{name}', expected number."))
            })?,
            Some(_) => {
                return Err(SessionError::Input(format!(
                    "Invalid '{name}', expected number."
                )))
            }
        };
        if let Some(minimum) = minimum {
            if numeric < minimum {
                return Err(SessionError::Input(format!("'{name}' must be >= {minimum}.")));
            }
        }
        if let Some(maximum) = maximum {
            if numeric > maximum {
                return Err(SessionError::Input(format!("'{name}' must be <= {maximum}.")));
            }
        }
        Ok(numeric)
    }

    pub fn int(
        &self,
        name: &str,
        minimum: Option<i64>,
        maximum: Option<i64>,
        default: Option<i64>,
    ) -> Result<i64, SessionError> {
        let value = self.float(
            name,
            minimum.map(|v| v as f64),
            maximum.map(|v| v as f64),
            default.map(|v| v as f64),
        )?;
        Ok(value as i64)
    }

    pub fn bool(&self, name: &str, default: bool) -> Result<bool, SessionError> {
        match self.get_raw(name) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "" => Ok(default),
                "y" | "yes" | "true" | "1" => Ok(true),
                "n" | "no" | "false" | "0" => Ok(false),
                _ => Err(SessionError::Input(format!(
                    "Invalid '{name}', expected yes/no."
                ))),
            },
            Some(_) => Err(SessionError::Input(format!(
                "Invalid '{name}', expected yes/no."
            ))),
        }
    }

    pub fn choice(&self, name: &str, options: &[String], default: Option<&str>) -> Result<String, SessionError> {
        let value = self.str(name, default)?;
        if options.iter().any(|o| o == &value) {
            Ok(value)
        } else {
            Err(SessionError::Input(format!(
                "Invalid '{name}', expected one of {options:?}."
            )))
        }
    }

    pub fn float_list(&self, name: &str, default: Option<&[f64]>) -> Result<Vec<f64>, SessionError> {
        let parse_all = |parts: Vec<String>| -> Result<Vec<f64>, SessionError> {
            if parts.is_empty() {
                return Err(SessionError::Input(format!("'{name}' cannot be empty.")));
            }
            parts
                .iter()
                .map(|p| {
                    p.parse().map_err(|_| {
                        SessionError::Input(format!("Invalid '{name}', expected numbers."))
                    })
                })
                .collect()
        };
        match self.get_raw(name) {
            None => default
                .map(|d| d.to_vec())
                .ok_or_else(|| SessionError::Input(format!("Missing '{name}'."))),
            Some(Value::Array(items)) => parse_all(
                items
                    .iter()
                    .map(|v| match v {
                        Value::Number(n) => n.to_string(),
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            Some(Value::String(s)) if s.trim().is_empty() => default
                .map(|d| d.to_vec())
                .ok_or_else(|| SessionError::Input(format!("'{name}' cannot be empty."))),
            Some(Value::String(s)) => parse_all(
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            Some(_) => Err(SessionError::Input(format!(
                "Invalid '{name}', expected list of numbers."
            ))),
        }
    }
}

/// Privileged actions executed by the owning unit on the engine's behalf.
///
/// Known actions: `pump`, `read_aux_voltage`, `stirring_calibration`,
/// `od_reference_standard_read`, `od_batch_read`, `save_calibration`.
pub trait Executor: Send + Sync {
    fn execute(&self, action: &str, payload: Value) -> Result<Value, SessionError>;
}

/// Test executor returning scripted responses per action, in order.
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct ScriptedExecutor {
    responses: parking_lot::Mutex<BTreeMap<String, Vec<Value>>>,
    pub calls: parking_lot::Mutex<Vec<(String, Value)>>,
}

#[cfg(any(test, feature = "test-support"))]
impl ScriptedExecutor {
    pub fn respond(self, action: &str, response: Value) -> Self {
        self.responses
            .lock()
            .entry(action.to_string())
            .or_default()
            .push(response);
        self
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Executor for ScriptedExecutor {
    fn execute(&self, action: &str, payload: Value) -> Result<Value, SessionError> {
        self.calls.lock().push((action.to_string(), payload));
        let mut responses = self.responses.lock();
        let queue = responses.get_mut(action).filter(|q| !q.is_empty());
        match queue {
            Some(queue) => Ok(queue.remove(0)),
            None => Err(SessionError::Executor {
                action: action.to_string(),
                message: "no scripted response".to_string(),
            }),
        }
    }
}

/// Mutable context handed to step handlers.
pub struct SessionContext<'a> {
    pub session: &'a mut CalibrationSession,
    pub mode: SessionMode,
    pub inputs: SessionInputs,
    executor: &'a dyn Executor,
    /// Calibrations produced so far; the CLI saves these at the end.
    pub collected: Vec<crate::structs::Calibration>,
}

impl<'a> SessionContext<'a> {
    pub fn data_get(&self, key: &str) -> Option<&Value> {
        self.session.data.get(key)
    }

    pub fn data_f64(&self, key: &str) -> Option<f64> {
        self.session.data.get(key).and_then(Value::as_f64)
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.session.data.get(key).and_then(Value::as_str)
    }

    pub fn data_set(&mut self, key: &str, value: Value) {
        self.session.data.insert(key.to_string(), value);
    }

    /// Append to an array in the data bag, creating it on first use.
    pub fn data_push(&mut self, key: &str, value: Value) {
        match self.session.data.get_mut(key) {
            Some(Value::Array(items)) => items.push(value),
            _ => {
                self.session
                    .data
                    .insert(key.to_string(), Value::Array(vec![value]));
            }
        }
    }

    pub fn data_vec_f64(&self, key: &str) -> Vec<f64> {
        self.session
            .data
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default()
    }

    pub fn ensure(&self, condition: bool, message: &str) -> Result<(), SessionError> {
        if condition {
            Ok(())
        } else {
            Err(SessionError::Input(message.to_string()))
        }
    }

    pub fn abort(&mut self, message: &str) {
        self.session.status = SessionStatus::Aborted;
        self.session.error = Some(message.to_string());
        self.session.step_id = STEP_ENDED.to_string();
    }

    pub fn fail(&mut self, message: &str) {
        self.session.status = SessionStatus::Failed;
        self.session.error = Some(message.to_string());
        self.session.step_id = STEP_ENDED.to_string();
    }

    pub fn complete(&mut self, result: Value) {
        self.session.status = SessionStatus::Complete;
        self.session.result = Some(result);
        self.session.step_id = STEP_COMPLETE.to_string();
    }

    pub fn execute(&self, action: &str, payload: Value) -> Result<Value, SessionError> {
        self.executor.execute(action, payload)
    }

    /// Read the auxiliary voltage on the owning unit.
    pub fn read_voltage(&self) -> Result<f64, SessionError> {
        let payload = self.execute("read_aux_voltage", Value::Null)?;
        payload
            .get("voltage")
            .and_then(Value::as_f64)
            .ok_or_else(|| SessionError::Executor {
                action: "read_aux_voltage".to_string(),
                message: "invalid voltage payload".to_string(),
            })
    }

    /// Record a finished calibration. In UI mode it is saved on the owning
    /// unit through the executor; the CLI driver saves collected ones
    /// itself.
    pub fn store_calibration(
        &mut self,
        calibration: crate::structs::Calibration,
    ) -> Result<Value, SessionError> {
        let device = calibration.device().to_string();
        let name = calibration.name().to_string();
        let mut path = Value::Null;
        if self.mode == SessionMode::Ui {
            let payload = self.execute(
                "save_calibration",
                serde_json::json!({
                    "device": device,
                    "calibration": calibration,
                }),
            )?;
            path = payload.get("path").cloned().unwrap_or(Value::Null);
        }
        self.collected.push(calibration);
        Ok(serde_json::json!({
            "device": device,
            "calibration_name": name,
            "path": path,
        }))
    }
}

/// One step of a protocol.
pub trait StepHandler: Send + Sync {
    /// Describe the step for display. Must be idempotent.
    fn render(&self, ctx: &SessionContext<'_>) -> StepView;

    /// Consume the submitted inputs and return the next step id, or `None`
    /// to stay (e.g. waiting for confirmation).
    fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError>;
}

/// Step registry for one protocol.
pub type StepRegistry = BTreeMap<&'static str, Box<dyn StepHandler>>;

/// Add the `complete`/`ended` terminal steps every protocol shares.
pub fn with_terminal_steps(mut registry: StepRegistry) -> StepRegistry {
    registry
        .entry(STEP_COMPLETE)
        .or_insert_with(|| Box::new(CompleteStep));
    registry
        .entry(STEP_ENDED)
        .or_insert_with(|| Box::new(EndedStep));
    registry
}

struct CompleteStep;

impl StepHandler for CompleteStep {
    fn render(&self, ctx: &SessionContext<'_>) -> StepView {
        StepView::result(ctx.session.result.clone().unwrap_or(Value::Null))
    }

    fn advance(&self, _ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        Ok(None)
    }
}

struct EndedStep;

impl StepHandler for EndedStep {
    fn render(&self, ctx: &SessionContext<'_>) -> StepView {
        let message = match ctx.session.status {
            SessionStatus::Aborted => ctx
                .session
                .error
                .clone()
                .unwrap_or_else(|| "This calibration session was aborted.".to_string()),
            SessionStatus::Failed => ctx
                .session
                .error
                .clone()
                .unwrap_or_else(|| "This calibration session failed.".to_string()),
            _ => "This calibration session has ended.".to_string(),
        };
        StepView::info("Calibration ended", &message)
    }

    fn advance(&self, _ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
        Ok(None)
    }
}

/// Drives one session against one registry.
pub struct SessionEngine<'a> {
    registry: StepRegistry,
    session: &'a mut CalibrationSession,
    mode: SessionMode,
    executor: &'a dyn Executor,
    clock: &'a dyn Clock,
    /// Calibrations produced across advances (CLI saves these at the end).
    pub collected: Vec<crate::structs::Calibration>,
}

impl<'a> SessionEngine<'a> {
    pub fn new(
        registry: StepRegistry,
        session: &'a mut CalibrationSession,
        mode: SessionMode,
        executor: &'a dyn Executor,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            registry: with_terminal_steps(registry),
            session,
            mode,
            executor,
            clock,
            collected: Vec::new(),
        }
    }

    pub fn session(&self) -> &CalibrationSession {
        self.session
    }

    fn render_current(&mut self) -> Result<StepView, SessionError> {
        let step_id = if self.session.status == SessionStatus::InProgress {
            self.session.step_id.clone()
        } else if self.session.status == SessionStatus::Complete {
            STEP_COMPLETE.to_string()
        } else {
            STEP_ENDED.to_string()
        };
        let handler = self
            .registry
            .get(step_id.as_str())
            .ok_or_else(|| SessionError::UnknownStep(step_id.clone()))?;
        let ctx = SessionContext {
            session: &mut *self.session,
            mode: self.mode,
            inputs: SessionInputs::empty(),
            executor: self.executor,
            collected: Vec::new(),
        };
        let mut view = handler.render(&ctx);
        if view.step_id.is_empty() {
            view.step_id = step_id;
        }
        Ok(view)
    }

    /// Render the current step without consuming inputs.
    pub fn get_step(&mut self) -> Result<StepView, SessionError> {
        self.render_current()
    }

    /// Apply one user submission and return the next renderable step.
    ///
    /// Input-validation errors leave the session untouched so the caller
    /// can reprompt (CLI) or return HTTP 400 (UI).
    pub fn advance(&mut self, inputs: Map<String, Value>) -> Result<StepView, SessionError> {
        if self.session.status == SessionStatus::InProgress {
            let step_id = self.session.step_id.clone();
            let handler = self
                .registry
                .get(step_id.as_str())
                .ok_or_else(|| SessionError::UnknownStep(step_id.clone()))?;
            let mut ctx = SessionContext {
                session: &mut *self.session,
                mode: self.mode,
                inputs: SessionInputs::new(inputs),
                executor: self.executor,
                collected: std::mem::take(&mut self.collected),
            };
            let outcome = handler.advance(&mut ctx);
            self.collected = std::mem::take(&mut ctx.collected);
            match outcome {
                Ok(Some(next)) => {
                    if self.session.status == SessionStatus::InProgress {
                        self.session.step_id = next;
                    }
                }
                Ok(None) => {}
                Err(e) => return Err(e),
            }
            self.session.updated_at = self.clock.iso_now();
        }
        self.render_current()
    }

    /// Mark the session aborted (user cancelled from the UI).
    pub fn abort(&mut self, message: &str) {
        self.session.status = SessionStatus::Aborted;
        self.session.error = Some(message.to_string());
        self.session.step_id = STEP_ENDED.to_string();
        self.session.updated_at = self.clock.iso_now();
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
