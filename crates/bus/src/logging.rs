// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structured logging onto the bus.
//!
//! Jobs log twice: locally through `tracing`, and to
//! `pioreactor/<unit>/<experiment>/logs/<level>` so the leader's streamer
//! and the UI see every WARNING+ no matter which unit produced it.

use crate::client::{Bus, QosLevel};
use pio_core::telemetry::{LogLevel, LogMessage};
use pio_core::topics;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A bus-aware logger scoped to one task on one unit.
#[derive(Clone)]
pub struct BusLogger {
    bus: Arc<dyn Bus>,
    unit: String,
    experiment: String,
    /// Job or action name recorded in each line.
    task: String,
    source: String,
}

impl BusLogger {
    pub fn new(bus: Arc<dyn Bus>, unit: &str, experiment: &str, task: &str) -> Self {
        Self {
            bus,
            unit: unit.to_string(),
            experiment: experiment.to_string(),
            task: task.to_string(),
            source: "app".to_string(),
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }

    pub async fn debug(&self, message: &str) {
        debug!(task = %self.task, "{message}");
        self.emit(LogLevel::Debug, message).await;
    }

    pub async fn info(&self, message: &str) {
        info!(task = %self.task, "{message}");
        self.emit(LogLevel::Info, message).await;
    }

    pub async fn notice(&self, message: &str) {
        info!(task = %self.task, "{message}");
        self.emit(LogLevel::Notice, message).await;
    }

    pub async fn warning(&self, message: &str) {
        warn!(task = %self.task, "{message}");
        self.emit(LogLevel::Warning, message).await;
    }

    pub async fn error(&self, message: &str) {
        error!(task = %self.task, "{message}");
        self.emit(LogLevel::Error, message).await;
    }

    pub async fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => self.debug(message).await,
            LogLevel::Info => self.info(message).await,
            LogLevel::Notice => self.notice(message).await,
            LogLevel::Warning => self.warning(message).await,
            LogLevel::Error => self.error(message).await,
        }
    }

    async fn emit(&self, level: LogLevel, message: &str) {
        let line = LogMessage {
            timestamp: chrono::Utc::now(),
            message: message.to_string(),
            task: self.task.clone(),
            source: self.source.clone(),
            level,
        };
        let topic = topics::logs(&self.unit, &self.experiment, level.as_str());
        let payload = serde_json::to_vec(&line).unwrap_or_default();
        // Logging must never fail the caller; a dead broker just drops lines.
        let _ = self
            .bus
            .publish(&topic, payload, QosLevel::AtLeastOnce, false)
            .await;
    }
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
