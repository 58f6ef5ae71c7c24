// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Calibration persistence.
//!
//! Files live at `<root>/<device>/<name>.yaml`, one calibration each,
//! written atomically (temp file + rename). Which calibration is *in
//! effect* per device is a separate concern: the `active_calibrations`
//! scope of the KV store maps device → name.

use crate::structs::Calibration;
use pio_storage::{ScopedKv, StorageError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// KV scope holding the device → active-calibration-name map.
pub const ACTIVE_SCOPE: &str = "active_calibrations";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("calibration {name:?} was not found for device {device:?}")]
    NotFound { device: String, name: String },
    #[error("calibration {name:?} for device {device:?} is an empty file")]
    Empty { device: String, name: String },
    #[error("calibration {name:?} already exists for device {device:?}")]
    AlreadyExists { device: String, name: String },
    #[error("cannot decode {path}: {message}")]
    Decode { path: PathBuf, message: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Kv(#[from] StorageError),
}

/// Disk + KV view of calibrations for one unit.
pub struct CalibrationStore {
    root: PathBuf,
    kv: Arc<ScopedKv>,
}

impl CalibrationStore {
    pub fn new(calibrations_dir: &Path, kv: Arc<ScopedKv>) -> Self {
        Self {
            root: calibrations_dir.to_owned(),
            kv,
        }
    }

    fn path_for(&self, device: &str, name: &str) -> PathBuf {
        self.root.join(device).join(format!("{name}.yaml"))
    }

    pub fn load(&self, device: &str, name: &str) -> Result<Calibration, StoreError> {
        let path = self.path_for(device, name);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    device: device.to_string(),
                    name: name.to_string(),
                })
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        if raw.trim().is_empty() {
            return Err(StoreError::Empty {
                device: device.to_string(),
                name: name.to_string(),
            });
        }
        serde_yaml::from_str(&raw).map_err(|e| StoreError::Decode {
            path,
            message: e.to_string(),
        })
    }

    /// Write a calibration to its device directory.
    ///
    /// Refuses to clobber an existing file unless `overwrite` — saved
    /// calibrations are immutable and replacing one is an explicit choice.
    pub fn save(&self, calibration: &Calibration, overwrite: bool) -> Result<PathBuf, StoreError> {
        let device = calibration.device();
        let name = calibration.name();
        let path = self.path_for(device, name);
        if !overwrite && path.exists() {
            return Err(StoreError::AlreadyExists {
                device: device.to_string(),
                name: name.to_string(),
            });
        }
        let parent = path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_owned(),
            source,
        })?;
        let yaml = serde_yaml::to_string(calibration).map_err(|e| StoreError::Decode {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    pub fn exists(&self, device: &str, name: &str) -> bool {
        self.path_for(device, name).exists()
    }

    pub fn delete(&self, device: &str, name: &str) -> Result<(), StoreError> {
        let path = self.path_for(device, name);
        if !path.exists() {
            return Err(StoreError::NotFound {
                device: device.to_string(),
                name: name.to_string(),
            });
        }
        std::fs::remove_file(&path).map_err(|source| StoreError::Io { path, source })?;
        // A dangling active pointer would break the next load_active.
        if self.active_name(device)?.as_deref() == Some(name) {
            self.kv.delete(ACTIVE_SCOPE, device)?;
        }
        Ok(())
    }

    /// Names of saved calibrations for a device, sorted.
    pub fn list_names(&self, device: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.root.join(device);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path: dir, source }),
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
                    path.file_stem()
                        .and_then(|s| s.to_str())
                        .map(str::to_string)
                } else {
                    None
                }
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// Device directories that hold at least one calibration.
    pub fn list_devices(&self) -> Result<Vec<String>, StoreError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.root.clone(),
                    source,
                })
            }
        };
        let mut devices: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        devices.sort();
        Ok(devices)
    }

    /// Mark a saved calibration as the one in effect for its device.
    pub fn set_active(&self, device: &str, name: &str) -> Result<(), StoreError> {
        if !self.exists(device, name) {
            return Err(StoreError::NotFound {
                device: device.to_string(),
                name: name.to_string(),
            });
        }
        self.kv.put_str(ACTIVE_SCOPE, device, name)?;
        Ok(())
    }

    pub fn active_name(&self, device: &str) -> Result<Option<String>, StoreError> {
        Ok(self.kv.get_str(ACTIVE_SCOPE, device)?)
    }

    /// Load the calibration in effect for a device, if any is designated.
    pub fn load_active(&self, device: &str) -> Result<Option<Calibration>, StoreError> {
        match self.active_name(device)? {
            None => Ok(None),
            Some(name) => self.load(device, &name).map(Some),
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
