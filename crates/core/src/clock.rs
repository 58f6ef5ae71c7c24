// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for deterministic tests.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Instant;

/// Source of wall-clock and monotonic time.
pub trait Clock: Send + Sync {
    /// Current UTC time for timestamps in persisted rows and wire structs.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Monotonic instant for deadlines and elapsed measurement.
    fn now(&self) -> Instant;

    /// UTC time as an ISO-8601 string with millisecond precision.
    fn iso_now(&self) -> String {
        self.now_utc().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }
}

/// Production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Test clock with a settable UTC time. The monotonic instant is still real;
/// tests that need deadline control should inject short durations instead.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Clone)]
pub struct FakeClock {
    epoch_ms: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeClock {
    pub fn at_epoch_ms(epoch_ms: u64) -> Self {
        Self {
            epoch_ms: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(epoch_ms)),
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.epoch_ms
            .fetch_add(ms, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Default for FakeClock {
    fn default() -> Self {
        // 2026-01-01T00:00:00Z
        Self::at_epoch_ms(1_767_225_600_000)
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Clock for FakeClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let ms = self.epoch_ms.load(std::sync::atomic::Ordering::SeqCst);
        Utc.timestamp_millis_opt(ms as i64).single().unwrap_or_default()
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
