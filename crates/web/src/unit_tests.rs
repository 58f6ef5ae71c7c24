// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use axum::body::Body;
use axum::http::{header, Method, Request};
use pio_core::clock::SystemClock;
use pio_jobs::executor::LocalExecutor;
use pio_jobs::hardware::{MockHardware, PwmRegistry};
use tower::util::ServiceExt;

struct Fixture {
    _dir: tempfile::TempDir,
    state: UnitState,
    hardware: Arc<MockHardware>,
    launcher: Arc<RecordingLauncher>,
    system: Arc<RecordingSystem>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let app = AppContext::at_root("unit1", "exp1", dir.path());
    let kv = Arc::new(ScopedKv::open(&app.kv_path()).unwrap());
    let job_manager = Arc::new(JobManager::open(&app.job_manager_db_path()).unwrap());
    let hardware = MockHardware::new();
    let launcher = Arc::new(RecordingLauncher::default());
    let system = Arc::new(RecordingSystem::default());
    let executor = Arc::new(LocalExecutor::new(
        app.clone(),
        Arc::clone(&hardware) as Arc<dyn pio_jobs::Hardware>,
        PwmRegistry::new(),
        Arc::clone(&kv),
        None,
    ));
    let state = UnitState {
        app,
        bus: Arc::new(pio_bus::MemoryBus::new()),
        kv,
        job_manager,
        tasks: TaskRegistry::new(),
        launcher: Arc::clone(&launcher) as Arc<dyn JobLauncher>,
        system: Arc::clone(&system) as Arc<dyn SystemCommands>,
        executor,
        clock: Arc::new(SystemClock),
        session_write: Arc::new(tokio::sync::Mutex::new(())),
    };
    Fixture {
        _dir: dir,
        state,
        hardware,
        launcher,
        system,
    }
}

async fn request(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    let request = match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn run_job_launches_and_returns_a_task() {
    let fixture = fixture();
    let router = unit_router(fixture.state.clone());

    let (status, body) = request(
        &router,
        Method::POST,
        "/unit_api/jobs/run/job_name/stirring",
        Some(json!({"options": {"target_rpm": 500}, "env": {"JOB_SOURCE": "experiment_profile/1"}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let task_id = body["task_id"].as_str().unwrap().to_string();
    assert_eq!(
        body["result_url_path"],
        json!(format!("/unit_api/task_results/{task_id}"))
    );

    let launches = fixture.launcher.launches.lock().clone();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].0, "stirring");
    assert_eq!(launches[0].2.get("EXPERIMENT").map(String::as_str), Some("exp1"));
    assert_eq!(
        launches[0].2.get("JOB_SOURCE").map(String::as_str),
        Some("experiment_profile/1")
    );

    let (status, body) = request(
        &router,
        Method::GET,
        &format!("/unit_api/task_results/{task_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("complete"));
}

#[tokio::test]
async fn run_job_conflicts_when_already_running() {
    let fixture = fixture();
    fixture
        .state
        .job_manager
        .register("unit1", "exp1", "stirring", "user", 100, "leader", true)
        .unwrap();
    let router = unit_router(fixture.state.clone());

    let (status, body) = request(
        &router,
        Method::POST,
        "/unit_api/jobs/run/job_name/stirring",
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["description"].as_str().unwrap().contains("already running"));
    assert!(fixture.launcher.launches.lock().is_empty());
}

#[tokio::test]
async fn update_missing_job_is_404() {
    let fixture = fixture();
    let router = unit_router(fixture.state.clone());
    let (status, body) = request(
        &router,
        Method::PATCH,
        "/unit_api/jobs/update/job_name/stirring",
        Some(json!({"settings": {"target_rpm": 600}})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("not_found"));
}

#[tokio::test]
async fn update_publishes_setting_writes() {
    let fixture = fixture();
    fixture
        .state
        .job_manager
        .register("unit1", "exp1", "stirring", "user", 100, "leader", true)
        .unwrap();
    let bus: Arc<pio_bus::MemoryBus> = Arc::new(pio_bus::MemoryBus::new());
    let mut state = fixture.state.clone();
    state.bus = Arc::clone(&bus) as Arc<dyn Bus>;
    let router = unit_router(state);

    let mut rx = bus
        .subscribe(
            &["pioreactor/unit1/exp1/stirring/target_rpm/set".to_string()],
            QosLevel::ExactlyOnce,
        )
        .await
        .unwrap();

    let (status, _) = request(
        &router,
        Method::PATCH,
        "/unit_api/jobs/update/job_name/stirring",
        Some(json!({"settings": {"target_rpm": 600}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rx.recv().await.unwrap().payload, b"600");
}

#[tokio::test]
async fn system_endpoints_background_their_work() {
    let fixture = fixture();
    let router = unit_router(fixture.state.clone());

    let (status, body) = request(&router, Method::POST, "/unit_api/system/reboot", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["task_id"].is_string());
    assert_eq!(fixture.system.calls.lock().clone(), vec!["reboot"]);

    let (status, body) = request(&router, Method::GET, "/unit_api/system/utc_clock", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["clock_time"].as_str().unwrap().ends_with('Z'));

    let (status, _) = request(
        &router,
        Method::PATCH,
        "/unit_api/system/utc_clock",
        Some(json!({"clock_time": "2026-03-01T00:00:00Z"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(fixture
        .system
        .calls
        .lock()
        .iter()
        .any(|c| c.starts_with("set_clock")));

    let (status, body) = request(&router, Method::GET, "/unit_api/versions/app", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn calibration_session_full_walkthrough_over_http() {
    let fixture = fixture();
    // sensor voltages for: three standards then the blank
    fixture.hardware.script_adc(0, &[0.55, 1.05, 2.05, 0.05]);
    let router = unit_router(fixture.state.clone());

    // start a standards session on od90
    let (status, body) = request(
        &router,
        Method::POST,
        "/unit_api/calibrations/sessions",
        Some(json!({"protocol_name": "standards", "target_device": "od90"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["step"]["step_type"], json!("info"));
    let session_id = body["session"]["session_id"].as_str().unwrap().to_string();
    let inputs_uri = format!("/unit_api/calibrations/sessions/{session_id}/inputs");

    let advance = |inputs: Value| {
        let router = router.clone();
        let uri = inputs_uri.clone();
        async move {
            request(&router, Method::POST, &uri, Some(json!({ "inputs": inputs }))).await
        }
    };

    advance(json!({})).await; // intro → name
    advance(json!({"calibration_name": "http-cal"})).await; // → optics
    advance(json!({"pd_channel": "1", "ir_led_intensity": 70.0})).await; // → standards
    for od in [0.5, 1.0, 2.0] {
        advance(json!({"standard_od": od})).await;
        advance(json!({})).await; // measure
        advance(json!({"another": true})).await;
    }
    let (_, body) = advance(json!({"another": false})).await;
    assert_eq!(body["step"]["step_id"], json!("place_blank"));
    let (_, body) = advance(json!({})).await; // blank inserted
    assert_eq!(body["step"]["step_id"], json!("measure_blank"));
    let (status, body) = advance(json!({})).await; // blank measure + fit
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"]["step_type"], json!("result"));
    assert_eq!(body["session"]["status"], json!("complete"));

    // the calibration was saved on disk by the unit's executor
    assert!(fixture
        .state
        .app
        .calibrations_dir()
        .join("od90/http-cal.yaml")
        .exists());

    // a fresh GET (new tab, reload) sees the same terminal state
    let (status, body) = request(
        &router,
        Method::GET,
        &format!("/unit_api/calibrations/sessions/{session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["status"], json!("complete"));
}

#[tokio::test]
async fn session_input_errors_are_400_and_leave_the_session() {
    let fixture = fixture();
    let router = unit_router(fixture.state.clone());
    let (_, body) = request(
        &router,
        Method::POST,
        "/unit_api/calibrations/sessions",
        Some(json!({"protocol_name": "duration_based", "target_device": "media_pump"})),
    )
    .await;
    let session_id = body["session"]["session_id"].as_str().unwrap().to_string();
    let inputs_uri = format!("/unit_api/calibrations/sessions/{session_id}/inputs");

    request(&router, Method::POST, &inputs_uri, Some(json!({"inputs": {}}))).await; // intro
    request(&router, Method::POST, &inputs_uri, Some(json!({"inputs": {}}))).await; // default name
    // bad hz: out of range
    let (status, body) = request(
        &router,
        Method::POST,
        &inputs_uri,
        Some(json!({"inputs": {"hz": -4}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("session_input"));

    // still on the pwm step
    let (_, body) = request(
        &router,
        Method::GET,
        &format!("/unit_api/calibrations/sessions/{session_id}"),
        None,
    )
    .await;
    assert_eq!(body["session"]["step_id"], json!("pwm_settings"));
}

#[tokio::test]
async fn abort_marks_the_session_aborted() {
    let fixture = fixture();
    let router = unit_router(fixture.state.clone());
    let (_, body) = request(
        &router,
        Method::POST,
        "/unit_api/calibrations/sessions",
        Some(json!({"protocol_name": "dc_based", "target_device": "stirring"})),
    )
    .await;
    let session_id = body["session"]["session_id"].as_str().unwrap().to_string();

    let (status, body) = request(
        &router,
        Method::POST,
        &format!("/unit_api/calibrations/sessions/{session_id}/abort"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["status"], json!("aborted"));
}

#[tokio::test]
async fn unknown_protocol_is_404() {
    let fixture = fixture();
    let router = unit_router(fixture.state.clone());
    let (status, _) = request(
        &router,
        Method::POST,
        "/unit_api/calibrations/sessions",
        Some(json!({"protocol_name": "standards", "target_device": "media_pump"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn calibration_crud_round_trip() {
    let fixture = fixture();
    let router = unit_router(fixture.state.clone());

    // seed a calibration file directly through the store
    let store = CalibrationStore::new(
        &fixture.state.app.calibrations_dir(),
        Arc::clone(&fixture.state.kv),
    );
    let calibration = pio_calibration::structs::Calibration::Stirring(
        pio_calibration::structs::StirringCalibration {
            base: pio_calibration::structs::CalibrationBase {
                calibration_name: "stir-1".to_string(),
                created_at: chrono::Utc::now(),
                calibrated_on_pioreactor_unit: "unit1".to_string(),
                recorded_data: pio_calibration::structs::RecordedData {
                    x: vec![20.0, 40.0],
                    y: vec![200.0, 400.0],
                },
                curve_data_: pio_calibration::structs::CurveData::Poly {
                    coefficients: vec![10.0, 0.0],
                },
            },
            pwm_hz: 200.0,
            voltage: 12.0,
        },
    );
    store.save(&calibration, false).unwrap();

    let (status, body) = request(&router, Method::GET, "/unit_api/calibrations/stirring", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["calibrations"], json!(["stir-1"]));
    assert_eq!(body["active"], Value::Null);

    let (status, _) = request(
        &router,
        Method::PATCH,
        "/unit_api/calibrations/stirring/stir-1/active",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = request(&router, Method::GET, "/unit_api/calibrations/stirring", None).await;
    assert_eq!(body["active"], json!("stir-1"));

    let (status, body) = request(
        &router,
        Method::GET,
        "/unit_api/calibrations/stirring/stir-1",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["device"], json!("stirring"));

    let (status, _) = request(
        &router,
        Method::DELETE,
        "/unit_api/calibrations/stirring/stir-1",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(
        &router,
        Method::GET,
        "/unit_api/calibrations/stirring/stir-1",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
