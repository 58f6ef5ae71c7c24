// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Expression evaluation.
//!
//! Values are numbers, booleans, or strings. Booleans coerce to 1/0 in
//! arithmetic (`True + True == 2.0`). Equality compares across types by
//! stringifying both sides when they differ, matching how retained bus
//! payloads arrive as text. Fetches read the retained topic with a 1 s
//! timeout; a miss is [`EvalError::MqttValue`], which the profile engine
//! treats as "skip this action" but direct evaluation treats as fatal.

use super::parser::{parse_expression, BinOp, Expr, FetchSegment, ParseError};
use pio_bus::Bus;
use rand::Rng;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Retained-fetch wait budget.
const FETCH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("division by zero")]
    ZeroDivision,
    #[error("no retained value for {0}")]
    MqttValue(String),
    #[error("no bus available for MQTT fetches")]
    NoBus,
    #[error("missing env key {0:?}")]
    MissingEnv(String),
    #[error("cannot interpret {0:?} as a boolean")]
    NotBoolean(String),
    #[error("type error: {0}")]
    Type(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Number(f64),
    Bool(bool),
    Str(String),
}

impl EvalValue {
    pub fn as_number(&self) -> Result<f64, EvalError> {
        match self {
            EvalValue::Number(n) => Ok(*n),
            EvalValue::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            EvalValue::Str(s) => s
                .parse()
                .map_err(|_| EvalError::Type(format!("{s:?} is not a number"))),
        }
    }

    pub fn truthy(&self) -> Result<bool, EvalError> {
        match self {
            EvalValue::Bool(b) => Ok(*b),
            EvalValue::Number(n) => Ok(*n != 0.0),
            EvalValue::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                other => Err(EvalError::NotBoolean(other.to_string())),
            },
        }
    }

    fn loose_eq(&self, other: &EvalValue) -> bool {
        match (self, other) {
            (EvalValue::Number(a), EvalValue::Number(b)) => a == b,
            (EvalValue::Bool(a), EvalValue::Bool(b)) => a == b,
            (EvalValue::Str(a), EvalValue::Str(b)) => a == b,
            // cross-type: retained payloads are text, compare as text/number
            (a, b) => match (a.as_number(), b.as_number()) {
                (Ok(x), Ok(y)) => x == y,
                _ => a.to_string() == b.to_string(),
            },
        }
    }
}

impl std::fmt::Display for EvalValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalValue::Number(n) => write!(f, "{n}"),
            EvalValue::Bool(b) => write!(f, "{b}"),
            EvalValue::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Evaluation environment: bus access plus variable bindings.
pub struct EvalContext<'a> {
    pub bus: Option<&'a dyn Bus>,
    /// Experiment used to build fetch topics.
    pub experiment: String,
    pub env: BTreeMap<String, EvalValue>,
}

impl<'a> EvalContext<'a> {
    pub fn new(experiment: &str) -> Self {
        Self {
            bus: None,
            experiment: experiment.to_string(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_bus(mut self, bus: &'a dyn Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_env(mut self, key: &str, value: EvalValue) -> Self {
        self.env.insert(key.to_string(), value);
        self
    }

    fn env_str(&self, key: &str) -> Result<String, EvalError> {
        self.env
            .get(key)
            .map(|v| v.to_string())
            .ok_or_else(|| EvalError::MissingEnv(key.to_string()))
    }
}

/// Parse and evaluate in one go.
pub async fn evaluate(input: &str, ctx: &EvalContext<'_>) -> Result<EvalValue, EvalError> {
    let expr = parse_expression(input)?;
    eval_expr(&expr, ctx).await
}

/// Parse and evaluate, coercing to a boolean.
pub async fn evaluate_bool(input: &str, ctx: &EvalContext<'_>) -> Result<bool, EvalError> {
    evaluate(input, ctx).await?.truthy()
}

fn eval_expr<'e>(
    expr: &'e Expr,
    ctx: &'e EvalContext<'_>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<EvalValue, EvalError>> + Send + 'e>>
{
    Box::pin(async move {
        match expr {
            Expr::Number(value) => Ok(EvalValue::Number(*value)),
            Expr::Bool(value) => Ok(EvalValue::Bool(*value)),
            Expr::Ident(name) => Ok(ctx
                .env
                .get(name)
                .cloned()
                // unknown identifiers are bare string literals
                .unwrap_or_else(|| EvalValue::Str(name.clone()))),
            Expr::Call(name) => eval_call(name, ctx),
            Expr::Fetch {
                unit,
                job,
                setting,
                path,
            } => eval_fetch(unit, job, setting, path, ctx).await,
            Expr::Not(inner) => {
                let value = eval_expr(inner, ctx).await?;
                Ok(EvalValue::Bool(!value.truthy()?))
            }
            Expr::Neg(inner) => {
                let value = eval_expr(inner, ctx).await?.as_number()?;
                Ok(EvalValue::Number(-value))
            }
            Expr::Binary(op, left, right) => eval_binary(*op, left, right, ctx).await,
        }
    })
}

fn eval_call(name: &str, ctx: &EvalContext<'_>) -> Result<EvalValue, EvalError> {
    match name {
        "random" => Ok(EvalValue::Number(rand::rng().random::<f64>())),
        "unit" | "experiment" | "job_name" => ctx.env_str(name).map(EvalValue::Str),
        "hours_elapsed" => ctx
            .env
            .get("hours_elapsed")
            .cloned()
            .ok_or_else(|| EvalError::MissingEnv("hours_elapsed".to_string())),
        other => Err(EvalError::Type(format!("unknown function {other}()"))),
    }
}

async fn eval_binary(
    op: BinOp,
    left: &Expr,
    right: &Expr,
    ctx: &EvalContext<'_>,
) -> Result<EvalValue, EvalError> {
    // Boolean operators short-circuit.
    match op {
        BinOp::And => {
            let lhs = eval_expr(left, ctx).await?.truthy()?;
            if !lhs {
                return Ok(EvalValue::Bool(false));
            }
            return Ok(EvalValue::Bool(eval_expr(right, ctx).await?.truthy()?));
        }
        BinOp::Or => {
            let lhs = eval_expr(left, ctx).await?.truthy()?;
            if lhs {
                return Ok(EvalValue::Bool(true));
            }
            return Ok(EvalValue::Bool(eval_expr(right, ctx).await?.truthy()?));
        }
        _ => {}
    }

    let lhs = eval_expr(left, ctx).await?;
    let rhs = eval_expr(right, ctx).await?;
    match op {
        BinOp::Add => Ok(EvalValue::Number(lhs.as_number()? + rhs.as_number()?)),
        BinOp::Sub => Ok(EvalValue::Number(lhs.as_number()? - rhs.as_number()?)),
        BinOp::Mul => Ok(EvalValue::Number(lhs.as_number()? * rhs.as_number()?)),
        BinOp::Div => {
            let divisor = rhs.as_number()?;
            if divisor == 0.0 {
                return Err(EvalError::ZeroDivision);
            }
            Ok(EvalValue::Number(lhs.as_number()? / divisor))
        }
        BinOp::Pow => Ok(EvalValue::Number(lhs.as_number()?.powf(rhs.as_number()?))),
        BinOp::Eq => Ok(EvalValue::Bool(lhs.loose_eq(&rhs))),
        BinOp::Lt => Ok(EvalValue::Bool(lhs.as_number()? < rhs.as_number()?)),
        BinOp::Gt => Ok(EvalValue::Bool(lhs.as_number()? > rhs.as_number()?)),
        BinOp::Le => Ok(EvalValue::Bool(lhs.as_number()? <= rhs.as_number()?)),
        BinOp::Ge => Ok(EvalValue::Bool(lhs.as_number()? >= rhs.as_number()?)),
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

fn resolve_segment(segment: &FetchSegment, ctx: &EvalContext<'_>) -> Result<String, EvalError> {
    match segment {
        FetchSegment::Literal(name) => Ok(name.clone()),
        FetchSegment::Call(name) => ctx.env_str(name),
        FetchSegment::CurrentUnit => ctx.env_str("unit"),
    }
}

async fn eval_fetch(
    unit: &FetchSegment,
    job: &FetchSegment,
    setting: &str,
    path: &[String],
    ctx: &EvalContext<'_>,
) -> Result<EvalValue, EvalError> {
    let bus = ctx.bus.ok_or(EvalError::NoBus)?;
    let unit = resolve_segment(unit, ctx)?;
    let job = resolve_segment(job, ctx)?;
    let topic = format!("pioreactor/{unit}/{}/{job}/{setting}", ctx.experiment);

    let payload = bus
        .fetch_retained(&topic, FETCH_TIMEOUT)
        .await
        .map_err(|_| EvalError::MqttValue(topic.clone()))?
        .ok_or_else(|| EvalError::MqttValue(topic.clone()))?;
    let text = String::from_utf8_lossy(&payload).into_owned();

    // JSON payloads may carry a .key path; raw scalars arrive as text.
    let mut value: serde_json::Value = match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(_) => serde_json::Value::String(text),
    };
    for key in path {
        value = value
            .get(key)
            .cloned()
            .ok_or_else(|| EvalError::MqttValue(format!("{topic}.{key}")))?;
    }
    Ok(match value {
        serde_json::Value::Number(n) => EvalValue::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::Bool(b) => EvalValue::Bool(b),
        serde_json::Value::String(s) => EvalValue::Str(s),
        other => EvalValue::Str(other.to_string()),
    })
}

#[cfg(test)]
#[path = "eval_tests.rs"]
mod tests;
