// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::memory::MemoryBus;

#[test]
fn lost_state_will_targets_the_state_topic() {
    let will = LastWillSpec::lost_state("unit1", "exp1", "od_reading");
    assert_eq!(will.topic, "pioreactor/unit1/exp1/od_reading/$state");
    assert_eq!(will.payload, b"lost");
    assert!(will.retain);
    assert_eq!(will.qos, QosLevel::ExactlyOnce);
}

#[tokio::test]
async fn publish_json_round_trips() {
    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Payload {
        value: f64,
    }

    let bus = MemoryBus::new();
    publish_json(&bus, "pioreactor/u/e/job/setting", &Payload { value: 1.5 }, true)
        .await
        .unwrap();

    let raw = bus.retained("pioreactor/u/e/job/setting").unwrap();
    let decoded: Payload = serde_json::from_slice(&raw).unwrap();
    assert_eq!(decoded, Payload { value: 1.5 });
}

#[test]
fn payload_str_is_lossy() {
    let message = BusMessage {
        topic: "t".to_string(),
        payload: b"ready".to_vec(),
        retained: false,
    };
    assert_eq!(message.payload_str(), "ready");
}
