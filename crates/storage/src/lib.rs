// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pio-storage: durable per-unit state.
//!
//! Three stores, all SQLite with WAL journaling and a single writer per
//! connection:
//!
//! - [`ScopedKv`] — small named maps (active calibrations, sessions, pump
//!   throughput) that replay state across restarts;
//! - [`JobManager`] — the registry of running jobs and their published
//!   settings, used for duplicate prevention and kill-by-query;
//! - [`TimeseriesDb`] — the leader's tables fed by the bus→DB streamer.

pub mod job_manager;
pub mod kv;
pub mod timeseries;

pub use job_manager::{JobKiller, JobManager, JobQuery, SettingRow, ShellKiller};
pub use kv::ScopedKv;
pub use timeseries::TimeseriesDb;

#[cfg(any(test, feature = "test-support"))]
pub use job_manager::RecordingKiller;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from any of the stores.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid JSON for {scope}/{key}: {message}")]
    Codec {
        scope: String,
        key: String,
        message: String,
    },
    #[error("a job named {job_name:?} is already running on ({unit}, {experiment})")]
    DuplicateJob {
        unit: String,
        experiment: String,
        job_name: String,
    },
}

/// Open a SQLite connection with the pragmas every store uses.
pub(crate) fn open_connection(path: &Path) -> Result<rusqlite::Connection, StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
            path: parent.to_owned(),
            source,
        })?;
    }
    let conn = rusqlite::Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA busy_timeout=5000;
         PRAGMA foreign_keys=ON;
         PRAGMA synchronous=NORMAL;",
    )?;
    Ok(conn)
}
