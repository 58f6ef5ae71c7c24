// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for this crate's tests: an in-memory bus, temp-rooted
//! stores, mock hardware, and helpers to drive a hosted job from outside.

use crate::hardware::{MockHardware, PwmRegistry};
use crate::runtime::JobContext;
use pio_bus::{Bus, MemoryBus, QosLevel};
use pio_core::config::AppContext;
use pio_core::topics;
use pio_storage::{JobManager, ScopedKv};
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct Harness {
    pub dir: tempfile::TempDir,
    pub bus: Arc<MemoryBus>,
    pub kv: Arc<ScopedKv>,
    pub job_manager: Arc<JobManager>,
    pub hardware: Arc<MockHardware>,
    pub pwm: Arc<PwmRegistry>,
    pub app: AppContext,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = AppContext::at_root("unit1", "exp1", dir.path());
        let kv = Arc::new(ScopedKv::open(&app.kv_path()).expect("kv"));
        let job_manager = Arc::new(JobManager::open(&app.job_manager_db_path()).expect("jobs db"));
        Self {
            dir,
            bus: Arc::new(MemoryBus::new()),
            kv,
            job_manager,
            hardware: MockHardware::new(),
            pwm: PwmRegistry::new(),
            app,
        }
    }

    pub fn context(&self) -> JobContext {
        JobContext {
            app: self.app.clone(),
            bus: Arc::clone(&self.bus) as Arc<dyn Bus>,
            kv: Arc::clone(&self.kv),
            job_manager: Arc::clone(&self.job_manager),
            hardware: Arc::clone(&self.hardware) as Arc<dyn crate::hardware::Hardware>,
            pwm: Arc::clone(&self.pwm),
            job_source: "user".to_string(),
        }
    }

    /// Retained `$state` payload for a job, if any.
    pub fn state_of(&self, job: &str) -> Option<String> {
        self.bus
            .retained(&topics::state("unit1", "exp1", job))
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
    }

    /// Wait until the retained `$state` equals `expected` (or panic).
    pub async fn wait_for_state(&self, job: &str, expected: &str) {
        for _ in 0..500 {
            if self.state_of(job).as_deref() == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!(
            "job {job} never reached state {expected:?}, last = {:?}",
            self.state_of(job)
        );
    }

    /// Publish on a job's `$state/set` control topic.
    pub async fn set_state(&self, job: &str, desired: &str) {
        self.bus
            .publish(
                &topics::state_set("unit1", "exp1", job),
                desired.as_bytes().to_vec(),
                QosLevel::ExactlyOnce,
                false,
            )
            .await
            .expect("publish state set");
    }

    /// Publish on a job setting's `…/set` topic.
    pub async fn set_setting(&self, job: &str, key: &str, value: &str) {
        self.bus
            .publish(
                &topics::setting_set("unit1", "exp1", job, key),
                value.as_bytes().to_vec(),
                QosLevel::ExactlyOnce,
                false,
            )
            .await
            .expect("publish setting set");
    }

    /// Retained value of a job setting, parsed as UTF-8.
    pub fn setting_of(&self, job: &str, key: &str) -> Option<String> {
        self.bus
            .retained(&topics::setting("unit1", "exp1", job, key))
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
    }
}
