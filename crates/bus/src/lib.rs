// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pio-bus: the publish/subscribe control bus.
//!
//! Everything that crosses unit boundaries rides the bus: retained job
//! state, published settings, telemetry, and logs. [`Bus`] is the seam —
//! [`MqttBus`] speaks to a real broker via rumqttc, [`MemoryBus`] is a
//! faithful in-process stand-in used under `TESTING=1` and in unit tests
//! (retained replay, per-subscription ordering, last-will on drop).

pub mod client;
pub mod listener;
pub mod logging;
pub mod memory;
pub mod mqtt;

pub use client::{Bus, BusError, BusMessage, LastWillSpec, QosLevel};
pub use listener::{subscribe_and_callback, ListenerHandle};
pub use logging::BusLogger;
pub use memory::MemoryBus;
pub use mqtt::{MqttBus, MqttBusOptions};
