// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dosing control.
//!
//! `dosing_control` is the registered parent job; the actual decision loop
//! runs as a `dosing_automation` sub-job sharing its lifecycle. Switching
//! automations (via an `automation_name` update) replaces the sub-job
//! without touching the parent's registration.

pub mod automation;

pub use automation::{DosingAutomation, DosingAutomationJob};

use crate::runtime::{spawn_sub_job, JobContext, JobError, JobRunner, JobSpec, SubJobHandle};
use async_trait::async_trait;
use pio_core::settings::PublishedSetting;
use serde_json::Value;

pub struct DosingControl {
    automation: Option<DosingAutomation>,
    child: Option<SubJobHandle>,
    ctx_for_child: JobContext,
}

impl DosingControl {
    pub fn new(automation: DosingAutomation, ctx_for_child: JobContext) -> Self {
        Self {
            automation: Some(automation),
            child: None,
            ctx_for_child,
        }
    }

    async fn start_child(&mut self, automation: DosingAutomation) {
        let spec = DosingAutomationJob::new(automation);
        self.child = Some(spawn_sub_job(spec, self.ctx_for_child.clone()));
    }

    async fn stop_child(&mut self) {
        if let Some(child) = self.child.take() {
            child.stop_and_join().await;
        }
    }
}

#[async_trait]
impl JobSpec for DosingControl {
    fn name(&self) -> &'static str {
        "dosing_control"
    }

    fn published_settings(&self) -> Vec<PublishedSetting> {
        let automation_name = self
            .automation
            .as_ref()
            .map(|a| a.name())
            .unwrap_or("silent");
        vec![PublishedSetting::json("automation", true)
            .with_value(serde_json::json!({ "automation_name": automation_name }))]
    }

    async fn on_ready(&mut self, _runner: &mut JobRunner) -> Result<(), JobError> {
        if self.child.is_none() {
            if let Some(automation) = self.automation.take() {
                self.start_child(automation).await;
            }
        }
        Ok(())
    }

    async fn set_setting(
        &mut self,
        runner: &mut JobRunner,
        key: &str,
        value: Value,
    ) -> Result<(), JobError> {
        if key == "automation" {
            match DosingAutomation::from_options(&value) {
                Ok(automation) => {
                    runner
                        .logger()
                        .info(&format!("switching dosing automation to {}", automation.name()))
                        .await;
                    self.stop_child().await;
                    self.start_child(automation).await;
                    runner.publish_setting(key, value).await
                }
                Err(e) => {
                    runner
                        .logger()
                        .warning(&format!("rejected automation update: {e}"))
                        .await;
                    Ok(())
                }
            }
        } else {
            runner.publish_setting(key, value).await
        }
    }

    async fn on_disconnected(&mut self, _runner: &mut JobRunner) -> Result<(), JobError> {
        self.stop_child().await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "dosing_tests.rs"]
mod tests;
