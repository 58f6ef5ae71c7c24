// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Leader time-series tables, fed by the bus→DB streamer.
//!
//! One table per stream, prepared inserts, a single writer. Reads back out
//! through the leader HTTP API for the dashboard.

use crate::{open_connection, StorageError};
use parking_lot::Mutex;
use pio_core::telemetry::{DosingEvent, LogMessage, RawODReading};
use rusqlite::{params, Connection};
use std::path::Path;

/// One row returned by the time-series read queries.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TimeseriesRow {
    pub unit: String,
    pub timestamp: String,
    pub value: f64,
}

pub struct TimeseriesDb {
    conn: Mutex<Connection>,
}

impl TimeseriesDb {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = open_connection(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS od_readings (
                experiment TEXT NOT NULL,
                unit       TEXT NOT NULL,
                timestamp  TEXT NOT NULL,
                channel    TEXT NOT NULL,
                angle      TEXT NOT NULL,
                od         REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS growth_rates (
                experiment TEXT NOT NULL,
                unit       TEXT NOT NULL,
                timestamp  TEXT NOT NULL,
                rate       REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS dosing_events (
                experiment       TEXT NOT NULL,
                unit             TEXT NOT NULL,
                timestamp        TEXT NOT NULL,
                event            TEXT NOT NULL,
                volume_change_ml REAL NOT NULL,
                source_of_event  TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS logs (
                experiment TEXT NOT NULL,
                unit       TEXT NOT NULL,
                timestamp  TEXT NOT NULL,
                level      TEXT NOT NULL,
                task       TEXT NOT NULL,
                source     TEXT NOT NULL,
                message    TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS temperature_readings (
                experiment TEXT NOT NULL,
                unit       TEXT NOT NULL,
                timestamp  TEXT NOT NULL,
                celsius    REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS pwm_dcs (
                experiment TEXT NOT NULL,
                unit       TEXT NOT NULL,
                timestamp  TEXT NOT NULL,
                channel    TEXT NOT NULL,
                duty_cycle REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS pid_logs (
                experiment TEXT NOT NULL,
                unit       TEXT NOT NULL,
                timestamp  TEXT NOT NULL,
                job        TEXT NOT NULL,
                setpoint   REAL NOT NULL,
                output     REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS experiments (
                experiment  TEXT PRIMARY KEY,
                created_at  TEXT NOT NULL,
                description TEXT
            );
            CREATE TABLE IF NOT EXISTS unit_labels (
                experiment TEXT NOT NULL,
                unit       TEXT NOT NULL,
                label      TEXT NOT NULL,
                PRIMARY KEY (experiment, unit)
            );
            CREATE INDEX IF NOT EXISTS idx_od_readings_experiment ON od_readings (experiment, timestamp);
            CREATE INDEX IF NOT EXISTS idx_growth_rates_experiment ON growth_rates (experiment, timestamp);
            CREATE INDEX IF NOT EXISTS idx_logs_experiment ON logs (experiment, timestamp);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn insert_od_reading(
        &self,
        experiment: &str,
        unit: &str,
        reading: &RawODReading,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO od_readings (experiment, unit, timestamp, channel, angle, od)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                experiment,
                unit,
                reading.timestamp.to_rfc3339(),
                reading.channel.as_str(),
                reading.angle.as_str(),
                reading.od
            ],
        )?;
        Ok(())
    }

    pub fn insert_growth_rate(
        &self,
        experiment: &str,
        unit: &str,
        timestamp: &str,
        rate: f64,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO growth_rates (experiment, unit, timestamp, rate) VALUES (?1, ?2, ?3, ?4)",
            params![experiment, unit, timestamp, rate],
        )?;
        Ok(())
    }

    pub fn insert_dosing_event(
        &self,
        experiment: &str,
        unit: &str,
        event: &DosingEvent,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO dosing_events
                (experiment, unit, timestamp, event, volume_change_ml, source_of_event)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                experiment,
                unit,
                event.timestamp.to_rfc3339(),
                event.event.to_string(),
                event.volume_change_ml,
                event.source_of_event
            ],
        )?;
        Ok(())
    }

    pub fn insert_log(
        &self,
        experiment: &str,
        unit: &str,
        line: &LogMessage,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO logs (experiment, unit, timestamp, level, task, source, message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                experiment,
                unit,
                line.timestamp.to_rfc3339(),
                line.level.as_str(),
                line.task,
                line.source,
                line.message
            ],
        )?;
        Ok(())
    }

    pub fn insert_temperature(
        &self,
        experiment: &str,
        unit: &str,
        timestamp: &str,
        celsius: f64,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO temperature_readings (experiment, unit, timestamp, celsius)
             VALUES (?1, ?2, ?3, ?4)",
            params![experiment, unit, timestamp, celsius],
        )?;
        Ok(())
    }

    pub fn insert_pwm_dc(
        &self,
        experiment: &str,
        unit: &str,
        timestamp: &str,
        channel: &str,
        duty_cycle: f64,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO pwm_dcs (experiment, unit, timestamp, channel, duty_cycle)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![experiment, unit, timestamp, channel, duty_cycle],
        )?;
        Ok(())
    }

    pub fn insert_pid_log(
        &self,
        experiment: &str,
        unit: &str,
        timestamp: &str,
        job: &str,
        setpoint: f64,
        output: f64,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO pid_logs (experiment, unit, timestamp, job, setpoint, output)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![experiment, unit, timestamp, job, setpoint, output],
        )?;
        Ok(())
    }

    /// Recent OD readings for an experiment, oldest first.
    pub fn od_readings(
        &self,
        experiment: &str,
        limit: usize,
    ) -> Result<Vec<TimeseriesRow>, StorageError> {
        self.read_series(
            "SELECT unit, timestamp, od FROM od_readings
             WHERE experiment = ?1 ORDER BY timestamp DESC LIMIT ?2",
            experiment,
            limit,
        )
    }

    pub fn growth_rates(
        &self,
        experiment: &str,
        limit: usize,
    ) -> Result<Vec<TimeseriesRow>, StorageError> {
        self.read_series(
            "SELECT unit, timestamp, rate FROM growth_rates
             WHERE experiment = ?1 ORDER BY timestamp DESC LIMIT ?2",
            experiment,
            limit,
        )
    }

    pub fn temperature_readings(
        &self,
        experiment: &str,
        limit: usize,
    ) -> Result<Vec<TimeseriesRow>, StorageError> {
        self.read_series(
            "SELECT unit, timestamp, celsius FROM temperature_readings
             WHERE experiment = ?1 ORDER BY timestamp DESC LIMIT ?2",
            experiment,
            limit,
        )
    }

    /// Record a new experiment; re-creating an existing one is a no-op.
    pub fn create_experiment(
        &self,
        experiment: &str,
        created_at: &str,
        description: Option<&str>,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO experiments (experiment, created_at, description)
             VALUES (?1, ?2, ?3)",
            params![experiment, created_at, description],
        )?;
        Ok(())
    }

    /// All experiments, newest first.
    pub fn list_experiments(&self) -> Result<Vec<(String, String, Option<String>)>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT experiment, created_at, description FROM experiments ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn latest_experiment(&self) -> Result<Option<String>, StorageError> {
        Ok(self.list_experiments()?.first().map(|(name, _, _)| name.clone()))
    }

    pub fn set_unit_label(
        &self,
        experiment: &str,
        unit: &str,
        label: &str,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO unit_labels (experiment, unit, label) VALUES (?1, ?2, ?3)
             ON CONFLICT (experiment, unit) DO UPDATE SET label = excluded.label",
            params![experiment, unit, label],
        )?;
        Ok(())
    }

    pub fn unit_labels(&self, experiment: &str) -> Result<Vec<(String, String)>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT unit, label FROM unit_labels WHERE experiment = ?1 ORDER BY unit",
        )?;
        let rows = stmt
            .query_map(params![experiment], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn read_series(
        &self,
        sql: &str,
        experiment: &str,
        limit: usize,
    ) -> Result<Vec<TimeseriesRow>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt
            .query_map(params![experiment, limit as i64], |row| {
                Ok(TimeseriesRow {
                    unit: row.get(0)?,
                    timestamp: row.get(1)?,
                    value: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.reverse();
        Ok(rows)
    }
}

#[cfg(test)]
#[path = "timeseries_tests.rs"]
mod tests;
