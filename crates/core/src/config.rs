// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration and the per-process application context.
//!
//! There is no global config singleton: an [`AppContext`] is built once at
//! process start (from env + `config.toml`) and passed explicitly through
//! constructors. Tests build one against a tempdir.

use crate::unit;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading or querying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config override {0:?}, expected \"section.key=value\"")]
    BadOverride(String),
}

/// Parsed `config.toml`, kept as a table so plugins and profiles can address
/// sections this crate does not know about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    table: toml::Table,
}

impl Config {
    /// Load from disk. A missing file yields the built-in defaults — a fresh
    /// unit must be able to boot with an empty storage root.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_owned(),
                    source: e,
                })
            }
        };
        let table = raw.parse::<toml::Table>().map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;
        Ok(Self { table })
    }

    pub fn get_str(&self, section: &str, key: &str) -> Option<&str> {
        self.table.get(section)?.as_table()?.get(key)?.as_str()
    }

    pub fn get_f64(&self, section: &str, key: &str) -> Option<f64> {
        let value = self.table.get(section)?.as_table()?.get(key)?;
        value
            .as_float()
            .or_else(|| value.as_integer().map(|i| i as f64))
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Option<bool> {
        self.table.get(section)?.as_table()?.get(key)?.as_bool()
    }

    /// Apply one `section.key=value` override (profile `config_overrides`).
    pub fn apply_override(&mut self, dotted_key: &str, value: &str) -> Result<(), ConfigError> {
        let (section, key) = dotted_key
            .split_once('.')
            .ok_or_else(|| ConfigError::BadOverride(dotted_key.to_string()))?;
        let section_table = self
            .table
            .entry(section.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        let toml::Value::Table(section_table) = section_table else {
            return Err(ConfigError::BadOverride(dotted_key.to_string()));
        };
        // Values arrive as strings; keep numeric overrides numeric so typed
        // accessors still work.
        let parsed = value
            .parse::<f64>()
            .map(toml::Value::Float)
            .unwrap_or_else(|_| toml::Value::String(value.to_string()));
        section_table.insert(key.to_string(), parsed);
        Ok(())
    }

    pub fn mqtt(&self) -> MqttConfig {
        MqttConfig {
            broker_host: self
                .get_str("mqtt", "broker_address")
                .unwrap_or("localhost")
                .to_string(),
            broker_port: self.get_f64("mqtt", "broker_port").unwrap_or(1883.0) as u16,
            keepalive_s: self.get_f64("mqtt", "keepalive").unwrap_or(60.0) as u64,
        }
    }

    pub fn cluster(&self) -> ClusterConfig {
        ClusterConfig {
            leader_hostname: self
                .get_str("cluster", "leader_hostname")
                .unwrap_or("localhost")
                .to_string(),
            leader_api_port: self.get_f64("cluster", "leader_api_port").unwrap_or(4999.0) as u16,
            unit_api_port: self.get_f64("cluster", "unit_api_port").unwrap_or(4999.0) as u16,
        }
    }
}

/// `[mqtt]` section with defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub keepalive_s: u64,
}

/// `[cluster]` section with defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub leader_hostname: String,
    pub leader_api_port: u16,
    pub unit_api_port: u16,
}

/// Everything a process needs to know about itself.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub unit: String,
    pub experiment: String,
    pub leader_hostname: String,
    pub testing: bool,
    pub storage_root: PathBuf,
    pub config: Config,
}

impl AppContext {
    /// Build from the environment: `TESTING`, `DOT_PIOREACTOR`, `EXPERIMENT`,
    /// plus `config.toml` under the storage root.
    pub fn from_env() -> Result<Self, ConfigError> {
        let testing = unit::is_testing_env();
        let storage_root = storage_root_from_env();
        let config = Config::load(&storage_root.join("config.toml"))?;
        let experiment = unit::assigned_experiment()
            .unwrap_or_else(|| unit::NO_EXPERIMENT.to_string());
        Ok(Self {
            unit: unit::get_unit_name(),
            leader_hostname: config.cluster().leader_hostname,
            experiment,
            testing,
            storage_root,
            config,
        })
    }

    /// Context rooted at an explicit directory; used by tests and by the
    /// session engine when driving a remote unit's storage.
    pub fn at_root(unit: &str, experiment: &str, storage_root: &Path) -> Self {
        Self {
            unit: unit.to_string(),
            experiment: experiment.to_string(),
            leader_hostname: "localhost".to_string(),
            testing: true,
            storage_root: storage_root.to_owned(),
            config: Config::default(),
        }
    }

    pub fn with_experiment(mut self, experiment: &str) -> Self {
        self.experiment = experiment.to_string();
        self
    }

    /// `<root>/storage/kv.sqlite` — scoped KV store.
    pub fn kv_path(&self) -> PathBuf {
        self.storage_root.join("storage").join("kv.sqlite")
    }

    /// `<root>/storage/calibrations/` — one YAML per calibration.
    pub fn calibrations_dir(&self) -> PathBuf {
        self.storage_root.join("storage").join("calibrations")
    }

    /// Job Manager registry. Lives under the cache dir in production so a
    /// reboot clears it; under the storage root in tests.
    pub fn job_manager_db_path(&self) -> PathBuf {
        if self.testing {
            self.storage_root.join("storage").join("job_manager.sqlite")
        } else {
            PathBuf::from("/tmp/pioreactor_cache/job_manager.sqlite")
        }
    }

    /// Leader time-series database.
    pub fn timeseries_db_path(&self) -> PathBuf {
        self.storage_root.join("storage").join("timeseries.sqlite")
    }

    pub fn is_leader(&self) -> bool {
        self.unit == self.leader_hostname
    }
}

fn storage_root_from_env() -> PathBuf {
    if let Ok(root) = std::env::var("DOT_PIOREACTOR") {
        if !root.is_empty() {
            return PathBuf::from(root);
        }
    }
    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".pioreactor"))
        .unwrap_or_else(|_| PathBuf::from("/home/pioreactor/.pioreactor"))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
