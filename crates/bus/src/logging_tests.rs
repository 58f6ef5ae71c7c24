// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::memory::MemoryBus;
use pio_core::telemetry::LogMessage;

#[tokio::test]
async fn log_lines_land_on_the_level_topic() {
    let bus = Arc::new(MemoryBus::new());
    let mut rx = bus
        .subscribe(&["pioreactor/u1/e1/logs/+".to_string()], QosLevel::AtLeastOnce)
        .await
        .unwrap();

    let logger = BusLogger::new(Arc::clone(&bus) as Arc<dyn Bus>, "u1", "e1", "stirring");
    logger.warning("rpm drifting").await;

    let message = rx.recv().await.unwrap();
    assert_eq!(message.topic, "pioreactor/u1/e1/logs/warning");
    let line: LogMessage = serde_json::from_slice(&message.payload).unwrap();
    assert_eq!(line.message, "rpm drifting");
    assert_eq!(line.task, "stirring");
    assert_eq!(line.level, LogLevel::Warning);
    assert_eq!(line.source, "app");
}

#[tokio::test]
async fn source_is_overridable_for_plugins() {
    let bus = Arc::new(MemoryBus::new());
    let mut rx = bus
        .subscribe(&["pioreactor/u1/e1/logs/info".to_string()], QosLevel::AtLeastOnce)
        .await
        .unwrap();

    let logger = BusLogger::new(Arc::clone(&bus) as Arc<dyn Bus>, "u1", "e1", "my_job")
        .with_source("my_plugin");
    logger.info("hello").await;

    let line: LogMessage = serde_json::from_slice(&rx.recv().await.unwrap().payload).unwrap();
    assert_eq!(line.source, "my_plugin");
}
