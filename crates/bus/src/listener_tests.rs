// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::memory::MemoryBus;
use std::sync::atomic::{AtomicUsize, Ordering};

fn test_logger(bus: &Arc<MemoryBus>) -> BusLogger {
    BusLogger::new(Arc::clone(bus) as Arc<dyn Bus>, "u1", "e1", "test")
}

#[tokio::test]
async fn handler_sees_messages_in_order() {
    let bus = Arc::new(MemoryBus::new());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let _handle = subscribe_and_callback(
        Arc::clone(&bus) as Arc<dyn Bus>,
        &["pioreactor/u1/e1/stirring/target_rpm".to_string()],
        QosLevel::ExactlyOnce,
        test_logger(&bus),
        move |message| {
            let _ = tx.send(message.payload);
            Ok(())
        },
    )
    .await
    .unwrap();

    for rpm in ["400", "500", "600"] {
        bus.publish_sync("pioreactor/u1/e1/stirring/target_rpm", rpm.into(), false);
    }

    assert_eq!(rx.recv().await.unwrap(), b"400");
    assert_eq!(rx.recv().await.unwrap(), b"500");
    assert_eq!(rx.recv().await.unwrap(), b"600");
}

#[tokio::test]
async fn failing_handler_does_not_stop_the_listener() {
    let bus = Arc::new(MemoryBus::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);

    let handle = subscribe_and_callback(
        Arc::clone(&bus) as Arc<dyn Bus>,
        &["pioreactor/u1/e1/job/#".to_string()],
        QosLevel::AtLeastOnce,
        test_logger(&bus),
        move |_| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err("bad payload".to_string())
            } else {
                Ok(())
            }
        },
    )
    .await
    .unwrap();

    bus.publish_sync("pioreactor/u1/e1/job/a", b"1".to_vec(), false);
    bus.publish_sync("pioreactor/u1/e1/job/b", b"2".to_vec(), false);

    // Drain: wait until both deliveries happened.
    for _ in 0..50 {
        if calls.load(Ordering::SeqCst) == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(handle.is_running());
}

#[tokio::test]
async fn handler_failures_log_to_the_bus() {
    let bus = Arc::new(MemoryBus::new());
    let mut errors = bus
        .subscribe(&["pioreactor/u1/e1/logs/error".to_string()], QosLevel::AtLeastOnce)
        .await
        .unwrap();

    let _handle = subscribe_and_callback(
        Arc::clone(&bus) as Arc<dyn Bus>,
        &["pioreactor/u1/e1/job/x".to_string()],
        QosLevel::AtLeastOnce,
        test_logger(&bus),
        |_| Err("boom".to_string()),
    )
    .await
    .unwrap();

    bus.publish_sync("pioreactor/u1/e1/job/x", b"1".to_vec(), false);

    let line = errors.recv().await.unwrap();
    assert!(line.payload_str().contains("boom"));
}
