// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Callback-style subscriptions.
//!
//! `subscribe_and_callback` runs a handler on a dedicated task, delivering
//! messages in arrival order. Handlers are isolated: a failing handler is
//! logged (locally and to the bus `logs/error` topic) and the listener keeps
//! going — one bad payload must never kill a control loop's subscriptions.

use crate::client::{Bus, BusError, BusMessage, QosLevel};
use crate::logging::BusLogger;
use std::sync::Arc;
use tracing::error;

/// Handle to a running listener task; abort to stop it.
pub struct ListenerHandle {
    task: tokio::task::JoinHandle<()>,
}

impl ListenerHandle {
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a listener task invoking `handler` for each message.
///
/// Handler errors are reported through `logger` and swallowed. The task ends
/// when the subscription channel closes (bus disconnect) or the handle is
/// dropped.
pub async fn subscribe_and_callback<F>(
    bus: Arc<dyn Bus>,
    filters: &[String],
    qos: QosLevel,
    logger: BusLogger,
    mut handler: F,
) -> Result<ListenerHandle, BusError>
where
    F: FnMut(BusMessage) -> Result<(), String> + Send + 'static,
{
    let mut rx = bus.subscribe(filters, qos).await?;
    let task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let topic = message.topic.clone();
            if let Err(e) = handler(message) {
                error!(topic = %topic, error = %e, "subscription handler failed");
                logger.error(&format!("handler for {topic} failed: {e}")).await;
            }
        }
    });
    Ok(ListenerHandle { task })
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
