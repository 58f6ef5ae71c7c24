// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process bus with broker-faithful retained and last-will semantics.
//!
//! Used under `TESTING=1` and by unit tests across the workspace. One
//! `MemoryBus` plays the role of the broker; clone the `Arc` everywhere a
//! real process would open its own connection.

use crate::client::{Bus, BusError, BusMessage, LastWillSpec, QosLevel};
use async_trait::async_trait;
use parking_lot::Mutex;
use pio_core::topics;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Subscriber {
    filters: Vec<String>,
    tx: mpsc::Sender<BusMessage>,
}

#[derive(Default)]
struct Inner {
    retained: BTreeMap<String, Vec<u8>>,
    subscribers: Vec<Subscriber>,
    wills: Vec<LastWillSpec>,
}

/// In-memory broker + client in one.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a last will, delivered by [`MemoryBus::drop_connection`].
    pub fn register_will(&self, will: LastWillSpec) {
        self.inner.lock().wills.push(will);
    }

    /// Simulate the owning process dying: every registered will fires, as
    /// the broker would on an ungraceful disconnect.
    pub fn drop_connection(&self) {
        let wills = std::mem::take(&mut self.inner.lock().wills);
        for will in wills {
            self.publish_sync(&will.topic, will.payload, will.retain);
        }
    }

    /// Current retained payload for a topic, if any.
    pub fn retained(&self, topic: &str) -> Option<Vec<u8>> {
        self.inner.lock().retained.get(topic).cloned()
    }

    /// Synchronous publish used internally and by tests that are not async.
    pub fn publish_sync(&self, topic: &str, payload: Vec<u8>, retain: bool) {
        let mut inner = self.inner.lock();
        if retain {
            if payload.is_empty() {
                inner.retained.remove(topic);
            } else {
                inner.retained.insert(topic.to_string(), payload.clone());
            }
        }
        let message = BusMessage {
            topic: topic.to_string(),
            payload,
            retained: false,
        };
        // try_send: a subscriber that stopped draining loses messages, it
        // does not wedge every publisher. Closed receivers are pruned.
        inner.subscribers.retain(|sub| {
            if sub.filters.iter().any(|f| topics::matches_filter(f, topic)) {
                sub.tx.try_send(message.clone()).is_ok() || !sub.tx.is_closed()
            } else {
                true
            }
        });
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        _qos: QosLevel,
        retain: bool,
    ) -> Result<(), BusError> {
        self.publish_sync(topic, payload, retain);
        Ok(())
    }

    async fn subscribe(
        &self,
        filters: &[String],
        _qos: QosLevel,
    ) -> Result<mpsc::Receiver<BusMessage>, BusError> {
        let (tx, rx) = mpsc::channel(256);
        let mut inner = self.inner.lock();
        // Retained replay happens before registration so a racing publish
        // cannot appear ahead of older retained state.
        for (topic, payload) in &inner.retained {
            if filters.iter().any(|f| topics::matches_filter(f, topic)) {
                let _ = tx.try_send(BusMessage {
                    topic: topic.clone(),
                    payload: payload.clone(),
                    retained: true,
                });
            }
        }
        inner.subscribers.push(Subscriber {
            filters: filters.to_vec(),
            tx,
        });
        Ok(rx)
    }

    async fn fetch_retained(
        &self,
        topic: &str,
        _timeout: Duration,
    ) -> Result<Option<Vec<u8>>, BusError> {
        Ok(self.retained(topic))
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.inner.lock().wills.clear();
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
