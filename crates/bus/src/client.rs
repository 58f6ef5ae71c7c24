// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The [`Bus`] trait and shared message types.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Delivery guarantee for a publish or subscription.
///
/// Settings, state, and calibrations ride exactly-once; high-rate samples
/// ride at-least-once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// One message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// True when this was replayed from the broker's retained store rather
    /// than published while we were subscribed.
    pub retained: bool,
}

impl BusMessage {
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Last-will registration: published by the broker on our behalf when the
/// connection dies without a clean disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWillSpec {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QosLevel,
    pub retain: bool,
}

impl LastWillSpec {
    /// The will every background job registers: retained `lost` on its
    /// `$state` topic.
    pub fn lost_state(unit: &str, experiment: &str, job: &str) -> Self {
        Self {
            topic: pio_core::topics::state(unit, experiment, job),
            payload: b"lost".to_vec(),
            qos: QosLevel::ExactlyOnce,
            retain: true,
        }
    }
}

/// Errors surfaced by bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("broker unreachable after {attempts} attempts: {message}")]
    Unreachable { attempts: u32, message: String },
    #[error("bus connection closed")]
    Closed,
    #[error("subscription failed for {filter:?}: {message}")]
    Subscribe { filter: String, message: String },
}

/// The control-bus seam.
///
/// Implementations must preserve per-subscription message order and replay
/// retained values to late subscribers. No ordering is guaranteed across
/// subscriptions.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish. Transient broker failures are retried with linear backoff
    /// (≤10 attempts) before surfacing [`BusError::Unreachable`]; a publish
    /// error must never take down the owning job by panicking.
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), BusError>;

    /// Subscribe to a set of topic filters. Messages arrive on the returned
    /// channel in per-filter publish order, retained values first.
    async fn subscribe(
        &self,
        filters: &[String],
        qos: QosLevel,
    ) -> Result<mpsc::Receiver<BusMessage>, BusError>;

    /// Fetch the retained value of a single topic, waiting at most `timeout`.
    /// `Ok(None)` means no retained value appeared in time; callers decide
    /// whether that is an error.
    async fn fetch_retained(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, BusError>;

    /// Cleanly disconnect, suppressing the last will.
    async fn disconnect(&self) -> Result<(), BusError>;
}

/// Convenience: publish a serializable value as JSON, exactly-once retained.
pub async fn publish_json<T: serde::Serialize + Sync>(
    bus: &dyn Bus,
    topic: &str,
    value: &T,
    retain: bool,
) -> Result<(), BusError> {
    let payload = serde_json::to_vec(value).unwrap_or_default();
    bus.publish(topic, payload, QosLevel::ExactlyOnce, retain).await
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
