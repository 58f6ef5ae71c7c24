// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::runtime::{run_job, JobOptions};
use crate::test_harness::Harness;
use pio_bus::{Bus, QosLevel};
use pio_calibration::structs::{
    Calibration, CalibrationBase, CurveData, PumpCalibration, RecordedData,
};
use pio_calibration::CalibrationStore;
use pio_core::telemetry::{DosingEvent, DosingEventKind, GrowthRate, ODFiltered};
use serde_json::json;

fn options() -> JobOptions {
    JobOptions {
        suppress_signals: true,
        stop: None,
    }
}

fn save_pump_calibrations(harness: &Harness) {
    let store = CalibrationStore::new(
        &harness.app.calibrations_dir(),
        std::sync::Arc::clone(&harness.kv),
    );
    for device in ["media_pump", "alt_media_pump", "waste_pump"] {
        let pump = PumpCalibration {
            base: CalibrationBase {
                calibration_name: format!("{device}-cal"),
                created_at: chrono::Utc::now(),
                calibrated_on_pioreactor_unit: "unit1".to_string(),
                recorded_data: RecordedData {
                    x: vec![1.0, 2.0, 3.0],
                    y: vec![0.5, 1.0, 1.5],
                },
                curve_data_: CurveData::Poly {
                    coefficients: vec![0.5, 0.0],
                },
            },
            hz: 250.0,
            dc: 100.0,
            voltage: 12.0,
        };
        let calibration = match device {
            "media_pump" => Calibration::MediaPump(pump),
            "alt_media_pump" => Calibration::AltMediaPump(pump),
            _ => Calibration::WastePump(pump),
        };
        store.save(&calibration, false).unwrap();
        store.set_active(device, &format!("{device}-cal")).unwrap();
    }
}

async fn publish_od_filtered(harness: &Harness, od: f64) {
    let payload = serde_json::to_vec(&ODFiltered {
        timestamp: chrono::Utc::now(),
        od_filtered: od,
    })
    .unwrap();
    harness
        .bus
        .publish(
            "pioreactor/unit1/exp1/od_filtered/od_filtered",
            payload,
            QosLevel::AtLeastOnce,
            false,
        )
        .await
        .unwrap();
}

async fn publish_growth_rate(harness: &Harness, rate: f64) {
    let payload = serde_json::to_vec(&GrowthRate {
        timestamp: chrono::Utc::now(),
        growth_rate: rate,
    })
    .unwrap();
    harness
        .bus
        .publish(
            "pioreactor/unit1/exp1/growth_rate/growth_rate",
            payload,
            QosLevel::AtLeastOnce,
            false,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn turbidostat_dilutes_when_od_crosses_target() {
    let harness = Harness::new();
    save_pump_calibrations(&harness);

    let mut events = harness
        .bus
        .subscribe(
            &["pioreactor/unit1/exp1/dosing_events".to_string()],
            QosLevel::AtLeastOnce,
        )
        .await
        .unwrap();

    let automation = DosingAutomation::Turbidostat {
        target_od: 0.5,
        volume_ml: 1.0,
        duration_minutes: 1.0,
    };
    let job = tokio::spawn(run_job(
        DosingAutomationJob::new(automation),
        harness.context(),
        options(),
    ));
    harness.wait_for_state("dosing_automation", "ready").await;

    publish_growth_rate(&harness, 0.4).await;
    // below target twice, above on the third and fourth sample
    for od in [0.4, 0.45, 0.55, 0.65] {
        publish_od_filtered(&harness, od).await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    // exactly one dilution: add_media 1.0 mL then remove_waste 1.0 mL
    let first: DosingEvent =
        serde_json::from_slice(&events.recv().await.unwrap().payload).unwrap();
    assert_eq!(first.event, DosingEventKind::AddMedia);
    assert_eq!(first.volume_change_ml, 1.0);
    let second: DosingEvent =
        serde_json::from_slice(&events.recv().await.unwrap().payload).unwrap();
    assert_eq!(second.event, DosingEventKind::RemoveWaste);
    assert_eq!(second.volume_change_ml, 1.0);

    // the fourth sample is inside the control period: no further events
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err(), "dosed again within one period");

    harness.set_state("dosing_automation", "disconnected").await;
    let _ = job.await;
}

#[tokio::test]
async fn silent_automation_never_doses() {
    let harness = Harness::new();
    save_pump_calibrations(&harness);
    let mut events = harness
        .bus
        .subscribe(
            &["pioreactor/unit1/exp1/dosing_events".to_string()],
            QosLevel::AtLeastOnce,
        )
        .await
        .unwrap();

    let job = tokio::spawn(run_job(
        DosingAutomationJob::new(DosingAutomation::Silent),
        harness.context(),
        options(),
    ));
    harness.wait_for_state("dosing_automation", "ready").await;

    publish_od_filtered(&harness, 5.0).await;
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert!(events.try_recv().is_err());

    harness.set_state("dosing_automation", "disconnected").await;
    let _ = job.await;
}

#[tokio::test]
async fn throughput_accumulates_in_the_kv() {
    let harness = Harness::new();
    save_pump_calibrations(&harness);

    let automation = DosingAutomation::Turbidostat {
        target_od: 0.5,
        volume_ml: 1.5,
        duration_minutes: 1.0,
    };
    let job = tokio::spawn(run_job(
        DosingAutomationJob::new(automation),
        harness.context(),
        options(),
    ));
    harness.wait_for_state("dosing_automation", "ready").await;

    publish_od_filtered(&harness, 0.9).await;
    for _ in 0..500 {
        if harness
            .kv
            .get_str(THROUGHPUT_SCOPE, "waste_ml")
            .unwrap()
            .is_some()
        {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    assert_eq!(
        harness.kv.get_str(THROUGHPUT_SCOPE, "media_ml").unwrap().as_deref(),
        Some("1.5")
    );
    assert_eq!(
        harness.kv.get_str(THROUGHPUT_SCOPE, "waste_ml").unwrap().as_deref(),
        Some("1.5")
    );

    harness.set_state("dosing_automation", "disconnected").await;
    let _ = job.await;
}

#[test]
fn options_parsing_accepts_known_automations() {
    let automation = DosingAutomation::from_options(&json!({
        "automation_name": "turbidostat",
        "target_normalized_od": 1.2,
        "volume": 0.75,
    }))
    .unwrap();
    assert_eq!(
        automation,
        DosingAutomation::Turbidostat {
            target_od: 1.2,
            volume_ml: 0.75,
            duration_minutes: 1.0,
        }
    );

    assert!(DosingAutomation::from_options(&json!({"automation_name": "nope"})).is_err());
    assert!(DosingAutomation::from_options(&json!({"automation_name": "turbidostat"})).is_err());
}

#[test]
fn morbidostat_splits_volume_by_growth_excess() {
    // sanity on the split math: rate at 2× target pushes all-alt media
    let excess: f64 = ((0.2 - 0.1) / 0.1_f64).clamp(0.0, 1.0);
    assert_eq!(excess, 1.0);
    let excess: f64 = ((0.1 - 0.1) / 0.1_f64).clamp(0.0, 1.0);
    assert_eq!(excess, 0.0);
}
