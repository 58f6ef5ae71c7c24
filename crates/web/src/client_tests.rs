// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pio_bus::MemoryBus;
use pio_profile::ActionDispatcher as _;

#[test]
fn urls_address_units_by_hostname() {
    let client = UnitClient::new(4999);
    assert_eq!(
        client.unit_url("worker1", "/unit_api/jobs/running"),
        "http://worker1:4999/unit_api/jobs/running"
    );
}

#[tokio::test]
async fn pause_and_resume_ride_the_bus() {
    let bus = Arc::new(MemoryBus::new());
    let mut rx = bus
        .subscribe(
            &["pioreactor/worker1/exp_a/stirring/$state/set".to_string()],
            QosLevel::ExactlyOnce,
        )
        .await
        .unwrap();

    let dispatcher = HttpDispatcher::new(
        UnitClient::new(4999),
        "leader1",
        "exp_a",
        "experiment_profile/9",
        Some(Arc::clone(&bus) as Arc<dyn Bus>),
        vec!["worker1".to_string()],
    );

    dispatcher.pause("worker1", "stirring").await.unwrap();
    assert_eq!(rx.recv().await.unwrap().payload, b"sleeping");
    dispatcher.resume("worker1", "stirring").await.unwrap();
    assert_eq!(rx.recv().await.unwrap().payload, b"ready");
}

#[tokio::test]
async fn pause_without_a_bus_is_an_error() {
    let dispatcher = HttpDispatcher::new(
        UnitClient::new(4999),
        "leader1",
        "exp_a",
        "experiment_profile/9",
        None,
        Vec::new(),
    );
    assert!(dispatcher.pause("worker1", "stirring").await.is_err());
}
