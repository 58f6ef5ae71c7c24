// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for inter-node control.
//!
//! One [`UnitClient`] per process, 5 s default timeout. [`HttpDispatcher`]
//! adapts it to the profile engine's dispatch seam: starts go straight to
//! the owning unit's API, updates/stops/logs go through the leader, and
//! pause/resume ride the bus as `$state/set` writes.

use async_trait::async_trait;
use pio_bus::{Bus, QosLevel};
use pio_core::topics;
use pio_profile::{ActionDispatcher, DispatchError};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Thin reqwest wrapper addressing unit and leader APIs by hostname.
#[derive(Clone)]
pub struct UnitClient {
    http: reqwest::Client,
    api_port: u16,
}

impl UnitClient {
    pub fn new(api_port: u16) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http, api_port }
    }

    pub fn unit_url(&self, unit: &str, path: &str) -> String {
        format!("http://{unit}:{}{path}", self.api_port)
    }

    async fn check(response: reqwest::Response) -> Result<Value, DispatchError> {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if status.is_success() {
            Ok(body)
        } else {
            Err(DispatchError::Failed(format!(
                "{status}: {}",
                body.get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("request failed")
            )))
        }
    }

    pub async fn post(&self, url: &str, body: Value) -> Result<Value, DispatchError> {
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Failed(e.to_string()))?;
        Self::check(response).await
    }

    pub async fn patch(&self, url: &str, body: Value) -> Result<Value, DispatchError> {
        let response = self
            .http
            .patch(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Failed(e.to_string()))?;
        Self::check(response).await
    }

    pub async fn put(&self, url: &str, body: Value) -> Result<Value, DispatchError> {
        let response = self
            .http
            .put(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Failed(e.to_string()))?;
        Self::check(response).await
    }

    pub async fn get(&self, url: &str) -> Result<Value, DispatchError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| DispatchError::Failed(e.to_string()))?;
        Self::check(response).await
    }
}

/// Profile-engine dispatcher over HTTP + bus.
pub struct HttpDispatcher {
    client: UnitClient,
    leader_hostname: String,
    experiment: String,
    /// `experiment_profile/<run>` recorded as JOB_SOURCE on starts.
    job_source: String,
    bus: Option<Arc<dyn Bus>>,
    /// Workers receiving the cancellation kill sweep.
    workers: Vec<String>,
}

impl HttpDispatcher {
    pub fn new(
        client: UnitClient,
        leader_hostname: &str,
        experiment: &str,
        job_source: &str,
        bus: Option<Arc<dyn Bus>>,
        workers: Vec<String>,
    ) -> Self {
        Self {
            client,
            leader_hostname: leader_hostname.to_string(),
            experiment: experiment.to_string(),
            job_source: job_source.to_string(),
            bus,
            workers,
        }
    }

    fn leader_url(&self, path: &str) -> String {
        self.client.unit_url(&self.leader_hostname, path)
    }

    async fn publish_state_set(&self, unit: &str, job: &str, desired: &str) -> Result<(), DispatchError> {
        let bus = self
            .bus
            .as_ref()
            .ok_or_else(|| DispatchError::Failed("no bus for pause/resume".to_string()))?;
        bus.publish(
            &topics::state_set(unit, &self.experiment, job),
            desired.as_bytes().to_vec(),
            QosLevel::ExactlyOnce,
            false,
        )
        .await
        .map_err(|e| DispatchError::Failed(e.to_string()))
    }
}

#[async_trait]
impl ActionDispatcher for HttpDispatcher {
    async fn start(
        &self,
        unit: &str,
        job: &str,
        options: &BTreeMap<String, Value>,
        args: &[String],
        config_overrides: &BTreeMap<String, Value>,
    ) -> Result<(), DispatchError> {
        let url = self
            .client
            .unit_url(unit, &format!("/unit_api/jobs/run/job_name/{job}"));
        self.client
            .post(
                &url,
                json!({
                    "options": options,
                    "args": args,
                    "env": {
                        "JOB_SOURCE": self.job_source,
                        "EXPERIMENT": self.experiment,
                    },
                    "config_overrides": config_overrides,
                }),
            )
            .await
            .map(|_| ())
    }

    async fn update(
        &self,
        unit: &str,
        job: &str,
        settings: &BTreeMap<String, Value>,
    ) -> Result<(), DispatchError> {
        let url = self.leader_url(&format!(
            "/api/workers/{unit}/jobs/update/job_name/{job}/experiments/{}",
            self.experiment
        ));
        self.client
            .patch(&url, json!({ "settings": settings }))
            .await
            .map(|_| ())
    }

    async fn stop(&self, unit: &str, job: &str) -> Result<(), DispatchError> {
        let url = self.leader_url(&format!(
            "/api/workers/{unit}/jobs/stop/job_name/{job}/experiments/{}",
            self.experiment
        ));
        self.client.post(&url, Value::Null).await.map(|_| ())
    }

    async fn pause(&self, unit: &str, job: &str) -> Result<(), DispatchError> {
        self.publish_state_set(unit, job, "sleeping").await
    }

    async fn resume(&self, unit: &str, job: &str) -> Result<(), DispatchError> {
        self.publish_state_set(unit, job, "ready").await
    }

    async fn log(&self, unit: &str, message: &str, level: &str) -> Result<(), DispatchError> {
        let url = self.leader_url(&format!(
            "/api/experiments/{}/logs/{level}",
            self.experiment
        ));
        self.client
            .post(
                &url,
                json!({
                    "message": message,
                    "unit": unit,
                    "task": "experiment_profile",
                    "source": "app",
                }),
            )
            .await
            .map(|_| ())
    }

    async fn assign_label(&self, unit: &str, label: &str) -> Result<(), DispatchError> {
        let url = self.leader_url(&format!(
            "/api/experiments/{}/unit_labels",
            self.experiment
        ));
        self.client
            .put(&url, json!({ "unit": unit, "label": label }))
            .await
            .map(|_| ())
    }

    async fn kill_profile_jobs(
        &self,
        experiment: &str,
        job_source: &str,
    ) -> Result<(), DispatchError> {
        for unit in &self.workers {
            let url = self.client.unit_url(unit, "/unit_api/jobs/stop");
            // Best-effort sweep; an unreachable worker must not stop the rest.
            let _ = self
                .client
                .post(
                    &url,
                    json!({
                        "experiment": experiment,
                        "job_source_prefix": job_source,
                    }),
                )
                .await;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
