// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process wiring for CLI commands.
//!
//! Builds the [`JobContext`] every command shares: config from the storage
//! root, the bus (MQTT against the configured broker, in-memory under
//! `TESTING=1`), the KV store, the Job Manager, and the hardware backend.

use anyhow::{Context as _, Result};
use pio_bus::{Bus, LastWillSpec, MemoryBus, MqttBus, MqttBusOptions};
use pio_core::config::AppContext;
use pio_jobs::hardware::{detect, PwmRegistry};
use pio_jobs::JobContext;
use pio_storage::{JobManager, ScopedKv};
use std::sync::Arc;

pub struct CliContext {
    pub app: AppContext,
    pub bus: Arc<dyn Bus>,
    pub kv: Arc<ScopedKv>,
    pub job_manager: Arc<JobManager>,
}

impl CliContext {
    /// Wire up stores and the bus. `owned_job` registers the last will for
    /// a job this process is about to run.
    pub fn build(owned_job: Option<&str>) -> Result<Self> {
        let app = AppContext::from_env().context("loading configuration")?;
        let kv = Arc::new(ScopedKv::open(&app.kv_path()).context("opening kv store")?);
        let job_manager = Arc::new(
            JobManager::open(&app.job_manager_db_path()).context("opening job registry")?,
        );

        let bus: Arc<dyn Bus> = if app.testing {
            let bus = MemoryBus::new();
            if let Some(job) = owned_job {
                bus.register_will(LastWillSpec::lost_state(&app.unit, &app.experiment, job));
            }
            Arc::new(bus)
        } else {
            let mqtt = app.config.mqtt();
            Arc::new(MqttBus::connect(MqttBusOptions {
                client_id: format!("pio-{}-{}", app.unit, std::process::id()),
                broker_host: mqtt.broker_host,
                broker_port: mqtt.broker_port,
                keepalive_s: mqtt.keepalive_s,
                last_will: owned_job
                    .map(|job| LastWillSpec::lost_state(&app.unit, &app.experiment, job)),
            }))
        };

        Ok(Self {
            app,
            bus,
            kv,
            job_manager,
        })
    }

    pub fn job_context(&self, job_source: String) -> JobContext {
        JobContext {
            app: self.app.clone(),
            bus: Arc::clone(&self.bus),
            kv: Arc::clone(&self.kv),
            job_manager: Arc::clone(&self.job_manager),
            hardware: detect(self.app.testing),
            pwm: PwmRegistry::new(),
            job_source,
        }
    }
}
