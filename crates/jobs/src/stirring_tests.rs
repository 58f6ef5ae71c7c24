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
async fn starts_at_bootstrap_dc_and_parks_on_sleep() {
    let harness = Harness::new();
    let stirrer = Stirrer::new(500.0, None);
    let job = tokio::spawn(run_job(stirrer, harness.context(), options()));
    harness.wait_for_state("stirring", "ready").await;

    // config default bootstrap is 30%
    assert_eq!(harness.hardware.last_pwm(5), Some(30.0));
    assert_eq!(harness.setting_of("stirring", "target_rpm").as_deref(), Some("500.0"));

    harness.set_state("stirring", "sleeping").await;
    harness.wait_for_state("stirring", "sleeping").await;
    assert_eq!(harness.hardware.last_pwm(5), Some(0.0));

    harness.set_state("stirring", "ready").await;
    harness.wait_for_state("stirring", "ready").await;
    assert_eq!(harness.hardware.last_pwm(5), Some(30.0));

    harness.set_state("stirring", "disconnected").await;
    let _ = job.await;
    // channel released for the next owner
    assert!(harness.pwm.owner_of(5).is_none());
}

#[tokio::test]
async fn closed_loop_raises_dc_when_rpm_is_low() {
    let harness = Harness::new();
    let rpm = ScriptedRpm::new(&[100.0]);
    let stirrer = Stirrer::new(500.0, Some(rpm as Arc<dyn RpmSource>));
    let job = tokio::spawn(run_job(stirrer, harness.context(), options()));
    harness.wait_for_state("stirring", "ready").await;

    // wait for at least one closed-loop correction (measured_rpm published)
    for _ in 0..500 {
        if harness.setting_of("stirring", "measured_rpm").is_some() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(
        harness.setting_of("stirring", "measured_rpm").as_deref(),
        Some("100.0")
    );
    let dc = harness
        .setting_of("stirring", "duty_cycle")
        .and_then(|raw| raw.parse::<f64>().ok())
        .unwrap();
    assert!(dc > 30.0, "dc should rise above bootstrap, got {dc}");

    harness.set_state("stirring", "disconnected").await;
    let _ = job.await;
}

#[tokio::test]
async fn duplicate_stirrer_is_rejected_while_first_keeps_the_pin() {
    let harness = Harness::new();
    let job = tokio::spawn(run_job(
        Stirrer::new(500.0, None),
        harness.context(),
        options(),
    ));
    harness.wait_for_state("stirring", "ready").await;

    let second = run_job(Stirrer::new(400.0, None), harness.context(), options()).await;
    assert!(matches!(second, Err(crate::runtime::JobError::Duplicate(_))));
    assert_eq!(harness.state_of("stirring").as_deref(), Some("ready"));
    assert_eq!(harness.pwm.owner_of(5).as_deref(), Some("stirring"));

    harness.set_state("stirring", "disconnected").await;
    let _ = job.await;
}

#[tokio::test]
async fn target_rpm_write_updates_the_controller() {
    let harness = Harness::new();
    let rpm = ScriptedRpm::new(&[500.0]);
    let job = tokio::spawn(run_job(
        Stirrer::new(500.0, Some(rpm as Arc<dyn RpmSource>)),
        harness.context(),
        options(),
    ));
    harness.wait_for_state("stirring", "ready").await;

    harness.set_setting("stirring", "target_rpm", "650").await;
    for _ in 0..500 {
        if harness.setting_of("stirring", "target_rpm").as_deref() == Some("650.0") {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    assert_eq!(
        harness.setting_of("stirring", "target_rpm").as_deref(),
        Some("650.0")
    );

    harness.set_state("stirring", "disconnected").await;
    let _ = job.await;
}

#[tokio::test]
async fn block_until_rpm_close_to_target() {
    let harness = Harness::new();
    let bus = Arc::clone(&harness.bus) as Arc<dyn pio_bus::Bus>;
    // target retained but no measured rpm yet → times out
    harness.bus.publish_sync(
        &topics::setting("unit1", "exp1", "stirring", "target_rpm"),
        b"500".to_vec(),
        true,
    );
    assert!(
        !block_until_rpm_is_close_to_target(
            &bus,
            "unit1",
            "exp1",
            25.0,
            std::time::Duration::from_millis(50),
        )
        .await
    );

    harness.bus.publish_sync(
        &topics::setting("unit1", "exp1", "stirring", "measured_rpm"),
        b"510".to_vec(),
        true,
    );
    assert!(
        block_until_rpm_is_close_to_target(
            &bus,
            "unit1",
            "exp1",
            25.0,
            std::time::Duration::from_millis(200),
        )
        .await
    );
}
