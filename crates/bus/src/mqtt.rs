// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MQTT bus client over rumqttc.
//!
//! One `MqttBus` per process. The rumqttc event loop runs on a spawned task
//! that routes incoming publishes to subscription channels and rides out
//! broker outages with a linear backoff; it only exits on clean disconnect.

use crate::client::{Bus, BusError, BusMessage, LastWillSpec, QosLevel};
use async_trait::async_trait;
use parking_lot::Mutex;
use pio_core::topics;
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Publish retry budget: linear backoff, `attempt * 100ms`, at most 10 tries.
const PUBLISH_ATTEMPTS: u32 = 10;
const PUBLISH_BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Connection parameters, usually from `[mqtt]` config.
#[derive(Debug, Clone)]
pub struct MqttBusOptions {
    pub client_id: String,
    pub broker_host: String,
    pub broker_port: u16,
    pub keepalive_s: u64,
    /// Registered before connecting; the broker publishes it if we vanish.
    pub last_will: Option<LastWillSpec>,
}

struct Subscriber {
    filters: Vec<String>,
    tx: mpsc::Sender<BusMessage>,
}

#[derive(Default)]
struct Router {
    subscribers: Vec<Subscriber>,
}

impl Router {
    fn dispatch(&mut self, message: &BusMessage) {
        self.subscribers.retain(|sub| {
            if sub
                .filters
                .iter()
                .any(|f| topics::matches_filter(f, &message.topic))
            {
                sub.tx.try_send(message.clone()).is_ok() || !sub.tx.is_closed()
            } else {
                true
            }
        });
    }
}

/// rumqttc-backed [`Bus`].
pub struct MqttBus {
    client: AsyncClient,
    router: Arc<Mutex<Router>>,
    event_loop: tokio::task::JoinHandle<()>,
}

impl MqttBus {
    /// Connect and spawn the event-loop task.
    pub fn connect(options: MqttBusOptions) -> Self {
        let mut mqtt_options = MqttOptions::new(
            options.client_id,
            options.broker_host,
            options.broker_port,
        );
        mqtt_options.set_keep_alive(Duration::from_secs(options.keepalive_s));
        if let Some(will) = options.last_will {
            mqtt_options.set_last_will(LastWill::new(
                will.topic,
                will.payload,
                to_qos(will.qos),
                will.retain,
            ));
        }

        let (client, mut event_loop) = AsyncClient::new(mqtt_options, 64);
        let router = Arc::new(Mutex::new(Router::default()));

        let loop_router = Arc::clone(&router);
        let event_loop = tokio::spawn(async move {
            let mut failures: u32 = 0;
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        failures = 0;
                        let message = BusMessage {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                            retained: publish.retain,
                        };
                        loop_router.lock().dispatch(&message);
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        debug!("broker sent disconnect");
                        break;
                    }
                    Ok(_) => {
                        failures = 0;
                    }
                    Err(e) => {
                        // The event loop reconnects on the next poll; back
                        // off linearly so a dead broker is not hammered.
                        failures = (failures + 1).min(PUBLISH_ATTEMPTS);
                        warn!(error = %e, failures, "bus connection error, retrying");
                        tokio::time::sleep(PUBLISH_BACKOFF_STEP * failures).await;
                    }
                }
            }
        });

        Self {
            client,
            router,
            event_loop,
        }
    }
}

fn to_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

#[async_trait]
impl Bus for MqttBus {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), BusError> {
        let mut last_error = String::new();
        for attempt in 1..=PUBLISH_ATTEMPTS {
            match self
                .client
                .publish(topic, to_qos(qos), retain, payload.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_error = e.to_string();
                    tokio::time::sleep(PUBLISH_BACKOFF_STEP * attempt).await;
                }
            }
        }
        Err(BusError::Unreachable {
            attempts: PUBLISH_ATTEMPTS,
            message: last_error,
        })
    }

    async fn subscribe(
        &self,
        filters: &[String],
        qos: QosLevel,
    ) -> Result<mpsc::Receiver<BusMessage>, BusError> {
        let (tx, rx) = mpsc::channel(256);
        // Register with the router before the broker subscribe so retained
        // replies always find the channel.
        self.router.lock().subscribers.push(Subscriber {
            filters: filters.to_vec(),
            tx,
        });
        for filter in filters {
            self.client
                .subscribe(filter.clone(), to_qos(qos))
                .await
                .map_err(|e| BusError::Subscribe {
                    filter: filter.clone(),
                    message: e.to_string(),
                })?;
        }
        Ok(rx)
    }

    async fn fetch_retained(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, BusError> {
        let mut rx = self.subscribe(&[topic.to_string()], QosLevel::AtLeastOnce).await?;
        let result = tokio::time::timeout(timeout, rx.recv()).await;
        let _ = self.client.unsubscribe(topic).await;
        match result {
            Ok(Some(message)) => Ok(Some(message.payload)),
            Ok(None) => Err(BusError::Closed),
            Err(_) => Ok(None),
        }
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        let _ = self.client.disconnect().await;
        self.event_loop.abort();
        Ok(())
    }
}
