// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scoped persistent key/value store.
//!
//! One SQLite file holds every scope (`active_calibrations`,
//! `calibration_sessions`, `pump_throughput`, …). Values are opaque byte
//! blobs; callers layer JSON codecs via the `_json` helpers. Iteration is
//! ordered by key so replay on restart is deterministic.

use crate::{open_connection, StorageError};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Durable scoped map store.
pub struct ScopedKv {
    conn: Mutex<Connection>,
}

impl ScopedKv {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = open_connection(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                scope TEXT NOT NULL,
                key   TEXT NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (scope, key)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn get(&self, scope: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE scope = ?1 AND key = ?2",
                params![scope, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn put(&self, scope: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv (scope, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (scope, key) DO UPDATE SET value = excluded.value",
            params![scope, key, value],
        )?;
        Ok(())
    }

    pub fn delete(&self, scope: &str, key: &str) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM kv WHERE scope = ?1 AND key = ?2",
            params![scope, key],
        )?;
        Ok(n > 0)
    }

    /// All entries of a scope, ordered by key.
    pub fn iter(&self, scope: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT key, value FROM kv WHERE scope = ?1 ORDER BY key")?;
        let rows = stmt
            .query_map(params![scope], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_json<T: DeserializeOwned>(
        &self,
        scope: &str,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        match self.get(scope, key)? {
            None => Ok(None),
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| StorageError::Codec {
                    scope: scope.to_string(),
                    key: key.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    pub fn put_json<T: Serialize>(
        &self,
        scope: &str,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let raw = serde_json::to_vec(value).map_err(|e| StorageError::Codec {
            scope: scope.to_string(),
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.put(scope, key, &raw)
    }

    /// Get a plain UTF-8 string value (e.g. an active-calibration name).
    pub fn get_str(&self, scope: &str, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .get(scope, key)?
            .map(|raw| String::from_utf8_lossy(&raw).into_owned()))
    }

    pub fn put_str(&self, scope: &str, key: &str, value: &str) -> Result<(), StorageError> {
        self.put(scope, key, value.as_bytes())
    }
}

#[cfg(test)]
#[path = "kv_tests.rs"]
mod tests;
