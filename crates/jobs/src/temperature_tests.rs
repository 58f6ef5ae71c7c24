// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::runtime::{run_job, JobOptions};
use crate::test_harness::Harness;

fn options() -> JobOptions {
    JobOptions {
        suppress_signals: true,
        stop: None,
    }
}

#[tokio::test]
async fn thermostat_heats_when_below_target() {
    let harness = Harness::new();
    harness.hardware.script_temp(&[25.0]);
    let job = tokio::spawn(run_job(
        TemperatureAutomation::thermostat(32.0),
        harness.context(),
        options(),
    ));
    harness.wait_for_state("temperature_automation", "ready").await;

    for _ in 0..500 {
        if harness
            .setting_of("temperature_automation", "heater_duty_cycle")
            .is_some()
        {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    let dc: f64 = harness
        .setting_of("temperature_automation", "heater_duty_cycle")
        .and_then(|raw| raw.parse().ok())
        .unwrap();
    assert!(dc > 0.0, "heater off while 7C below target");
    assert_eq!(harness.hardware.last_pwm(6), Some(dc));

    // a temperature reading is published retained
    assert!(harness
        .bus
        .retained("pioreactor/unit1/exp1/temperature_automation/temperature_reading")
        .is_some());

    harness.set_state("temperature_automation", "disconnected").await;
    let _ = job.await;
    assert_eq!(harness.hardware.last_pwm(6), Some(0.0));
}

#[tokio::test]
async fn emergency_latches_heater_off_and_flags_pumps() {
    let harness = Harness::new();
    harness.hardware.script_temp(&[60.0]);
    let job = tokio::spawn(run_job(
        TemperatureAutomation::thermostat(32.0),
        harness.context(),
        options(),
    ));
    harness.wait_for_state("temperature_automation", "ready").await;

    for _ in 0..500 {
        if harness
            .bus
            .retained(&crate::pump::emergency_stop_topic("unit1", "exp1"))
            .is_some()
        {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    assert_eq!(
        harness
            .bus
            .retained(&crate::pump::emergency_stop_topic("unit1", "exp1"))
            .as_deref(),
        Some(&b"1"[..])
    );
    assert_eq!(harness.hardware.last_pwm(6), Some(0.0));

    // job stays alive, heater stays off
    assert_eq!(
        harness.state_of("temperature_automation").as_deref(),
        Some("ready")
    );

    harness.set_state("temperature_automation", "disconnected").await;
    let _ = job.await;
}

#[tokio::test]
async fn sleeping_turns_the_heater_off() {
    let harness = Harness::new();
    harness.hardware.script_temp(&[25.0]);
    let job = tokio::spawn(run_job(
        TemperatureAutomation::thermostat(32.0),
        harness.context(),
        options(),
    ));
    harness.wait_for_state("temperature_automation", "ready").await;

    harness.set_state("temperature_automation", "sleeping").await;
    harness
        .wait_for_state("temperature_automation", "sleeping")
        .await;
    assert_eq!(harness.hardware.last_pwm(6), Some(0.0));

    harness.set_state("temperature_automation", "disconnected").await;
    let _ = job.await;
}
