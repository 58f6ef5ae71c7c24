// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry of running jobs and their published settings.
//!
//! Single-writer, local to each unit. The invariant the whole cluster leans
//! on: at most one row with `is_running = 1` per `(unit, experiment,
//! job_name)` — two stirrers fighting over one PWM pin is a hardware fault,
//! not a race to win.

use crate::{open_connection, StorageError};
use parking_lot::Mutex;
use pio_core::job::JobRecord;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use tracing::warn;

/// Filter for list/kill queries. Empty filter matches all running jobs.
#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    pub unit: Option<String>,
    pub experiment: Option<String>,
    pub job_name: Option<String>,
    /// Matches rows whose `job_source` starts with this prefix — profile
    /// cleanup kills `experiment_profile/…` without knowing the run number.
    pub job_source_prefix: Option<String>,
    /// Include finished jobs too.
    pub all_jobs: bool,
}

impl JobQuery {
    pub fn running() -> Self {
        Self::default()
    }

    pub fn by_name(job_name: &str) -> Self {
        Self {
            job_name: Some(job_name.to_string()),
            ..Self::default()
        }
    }

    pub fn by_experiment(experiment: &str) -> Self {
        Self {
            experiment: Some(experiment.to_string()),
            ..Self::default()
        }
    }
}

/// One published-setting row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingRow {
    pub setting: String,
    pub value: Option<Vec<u8>>,
    pub created_at: String,
    pub updated_at: String,
}

/// How killed jobs are actually stopped. Seam so tests never signal PIDs.
pub trait JobKiller: Send + Sync {
    /// SIGINT the process; the job's signal handler disconnects cleanly.
    fn signal_interrupt(&self, pid: u32) -> Result<(), String>;
    /// `led_intensity` has no long-running process to signal; stopping it
    /// means writing zero intensities back through the CLI.
    fn stop_leds(&self) -> Result<(), String>;
}

/// Production killer shelling out to `kill -2` and `pio run led_intensity`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellKiller;

impl JobKiller for ShellKiller {
    fn signal_interrupt(&self, pid: u32) -> Result<(), String> {
        std::process::Command::new("kill")
            .args(["-2", &pid.to_string()])
            .status()
            .map_err(|e| e.to_string())
            .and_then(|status| {
                if status.success() {
                    Ok(())
                } else {
                    Err(format!("kill -2 {pid} exited with {status}"))
                }
            })
    }

    fn stop_leds(&self) -> Result<(), String> {
        std::process::Command::new("pio")
            .args([
                "run",
                "led_intensity",
                "--A",
                "0",
                "--B",
                "0",
                "--C",
                "0",
                "--D",
                "0",
            ])
            .status()
            .map_err(|e| e.to_string())
            .map(|_| ())
    }
}

/// Test killer that records what it was asked to do.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Clone, Default)]
pub struct RecordingKiller {
    pub interrupted: std::sync::Arc<Mutex<Vec<u32>>>,
    pub led_stops: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

#[cfg(any(test, feature = "test-support"))]
impl JobKiller for RecordingKiller {
    fn signal_interrupt(&self, pid: u32) -> Result<(), String> {
        self.interrupted.lock().push(pid);
        Ok(())
    }

    fn stop_leds(&self) -> Result<(), String> {
        self.led_stops
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

/// The registry.
pub struct JobManager {
    conn: Mutex<Connection>,
}

impl JobManager {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = open_connection(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS jobs (
                job_id          INTEGER PRIMARY KEY AUTOINCREMENT,
                unit            TEXT NOT NULL,
                experiment      TEXT NOT NULL,
                job_name        TEXT NOT NULL,
                job_source      TEXT NOT NULL,
                pid             INTEGER NOT NULL,
                leader          TEXT NOT NULL,
                is_long_running INTEGER NOT NULL,
                is_running      INTEGER NOT NULL,
                started_at      TEXT NOT NULL,
                ended_at        TEXT
            );

            CREATE TABLE IF NOT EXISTS job_settings (
                job_id     INTEGER NOT NULL,
                setting    TEXT NOT NULL,
                value      BLOB,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs (job_id),
                UNIQUE (job_id, setting)
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_is_running ON jobs (is_running);
            CREATE INDEX IF NOT EXISTS idx_jobs_running_experiment ON jobs (is_running, experiment);
            CREATE INDEX IF NOT EXISTS idx_jobs_job_name ON jobs (job_name);
            CREATE INDEX IF NOT EXISTS idx_job_settings_job_id ON job_settings (job_id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Atomically register a new running job.
    ///
    /// Fails with [`StorageError::DuplicateJob`] when a live row already
    /// exists for the same `(unit, experiment, job_name)`.
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &self,
        unit: &str,
        experiment: &str,
        job_name: &str,
        job_source: &str,
        pid: u32,
        leader: &str,
        is_long_running: bool,
    ) -> Result<i64, StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let live: i64 = tx.query_row(
            "SELECT COUNT(*) FROM jobs
             WHERE is_running = 1 AND unit = ?1 AND experiment = ?2 AND job_name = ?3",
            params![unit, experiment, job_name],
            |row| row.get(0),
        )?;
        if live > 0 {
            return Err(StorageError::DuplicateJob {
                unit: unit.to_string(),
                experiment: experiment.to_string(),
                job_name: job_name.to_string(),
            });
        }
        tx.execute(
            "INSERT INTO jobs
                (unit, experiment, job_name, job_source, pid, leader,
                 is_long_running, is_running, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1,
                     STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'NOW'), NULL)",
            params![unit, experiment, job_name, job_source, pid, leader, is_long_running],
        )?;
        let job_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(job_id)
    }

    /// Upsert a published setting; `None` deletes the row.
    pub fn upsert_setting(
        &self,
        job_id: i64,
        setting: &str,
        value: Option<&[u8]>,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        match value {
            None => {
                conn.execute(
                    "DELETE FROM job_settings WHERE job_id = ?1 AND setting = ?2",
                    params![job_id, setting],
                )?;
            }
            Some(value) => {
                conn.execute(
                    "INSERT INTO job_settings (job_id, setting, value, created_at, updated_at)
                     VALUES (?1, ?2, ?3,
                             STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'NOW'),
                             STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'NOW'))
                     ON CONFLICT (job_id, setting) DO UPDATE SET
                         value = excluded.value,
                         updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'NOW')",
                    params![job_id, setting, value],
                )?;
            }
        }
        Ok(())
    }

    /// Count live rows for a `(unit, experiment, job_name)`.
    pub fn count_running(
        &self,
        unit: &str,
        experiment: &str,
        job_name: &str,
    ) -> Result<i64, StorageError> {
        let conn = self.conn.lock();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM jobs
             WHERE is_running = 1 AND unit = ?1 AND experiment = ?2 AND job_name = ?3",
            params![unit, experiment, job_name],
            |row| row.get(0),
        )?)
    }

    /// Is any live job registered with this PID? Used by sub-jobs to detect
    /// whether they run inside a registered parent.
    pub fn does_pid_exist(&self, pid: u32) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let row: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM jobs WHERE pid = ?1 AND is_running = 1",
                params![pid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.is_some())
    }

    pub fn list_jobs(&self, query: &JobQuery) -> Result<Vec<JobRecord>, StorageError> {
        let (where_clause, args) = build_where(query);
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT job_id, unit, experiment, job_name, job_source, pid, leader,
                    is_long_running, is_running, started_at, ended_at
             FROM jobs {where_clause} ORDER BY job_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every job ever registered, newest first.
    pub fn list_history(&self) -> Result<Vec<JobRecord>, StorageError> {
        self.list_jobs(&JobQuery {
            all_jobs: true,
            ..JobQuery::default()
        })
        .map(|mut rows| {
            rows.reverse();
            rows
        })
    }

    pub fn job_settings(&self, job_id: i64) -> Result<Vec<SettingRow>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT setting, value, created_at, updated_at
             FROM job_settings WHERE job_id = ?1 ORDER BY setting",
        )?;
        let rows = stmt
            .query_map(params![job_id], |row| {
                Ok(SettingRow {
                    setting: row.get(0)?,
                    value: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_not_running(&self, job_id: i64) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE jobs
             SET is_running = 0, ended_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'NOW')
             WHERE job_id = ?1",
            params![job_id],
        )?;
        Ok(())
    }

    pub fn remove_job(&self, job_id: i64) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM job_settings WHERE job_id = ?1", params![job_id])?;
        conn.execute("DELETE FROM jobs WHERE job_id = ?1", params![job_id])?;
        Ok(())
    }

    /// Stop every job matching the query. Returns how many were stopped.
    ///
    /// PIDs get SIGINT; `led_intensity` rows go through the LED stop path.
    /// A kill failure is logged and skipped — one unkillable PID must not
    /// strand the rest of the query.
    pub fn kill_jobs(&self, query: &JobQuery, killer: &dyn JobKiller) -> Result<usize, StorageError> {
        let matching = self.list_jobs(query)?;
        let mut stopped = 0;
        for job in matching {
            let result = if job.job_name == "led_intensity" {
                killer.stop_leds().map(|()| {
                    // No process to observe exiting; flip the row here.
                    let _ = self.set_not_running(job.job_id);
                })
            } else {
                killer.signal_interrupt(job.pid)
            };
            match result {
                Ok(()) => stopped += 1,
                Err(e) => warn!(
                    job_name = %job.job_name,
                    pid = job.pid,
                    error = %e,
                    "failed to stop job"
                ),
            }
        }
        Ok(stopped)
    }
}

fn build_where(query: &JobQuery) -> (String, Vec<String>) {
    let mut conditions = Vec::new();
    let mut args = Vec::new();
    if !query.all_jobs {
        conditions.push("is_running = 1".to_string());
    }
    if let Some(unit) = &query.unit {
        args.push(unit.clone());
        conditions.push(format!("unit = ?{}", args.len()));
    }
    if let Some(experiment) = &query.experiment {
        args.push(experiment.clone());
        conditions.push(format!("experiment = ?{}", args.len()));
    }
    if let Some(job_name) = &query.job_name {
        args.push(job_name.clone());
        conditions.push(format!("job_name = ?{}", args.len()));
    }
    if let Some(prefix) = &query.job_source_prefix {
        args.push(format!("{prefix}%"));
        conditions.push(format!("job_source LIKE ?{}", args.len()));
    }
    if conditions.is_empty() {
        (String::new(), args)
    } else {
        (format!("WHERE {}", conditions.join(" AND ")), args)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        job_id: row.get(0)?,
        unit: row.get(1)?,
        experiment: row.get(2)?,
        job_name: row.get(3)?,
        job_source: row.get(4)?,
        pid: row.get(5)?,
        leader: row.get(6)?,
        is_long_running: row.get(7)?,
        is_running: row.get(8)?,
        started_at: row.get(9)?,
        ended_at: row.get(10)?,
    })
}

#[cfg(test)]
#[path = "job_manager_tests.rs"]
mod tests;
