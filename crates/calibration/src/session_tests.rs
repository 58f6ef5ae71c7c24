// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pio_core::clock::FakeClock;
use serde_json::json;

/// Two-step toy protocol: a form asking for a float, then completion.
fn toy_registry() -> StepRegistry {
    struct Ask;
    impl StepHandler for Ask {
        fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
            StepView::form(
                "Ask",
                "",
                vec![StepField::float("value", "A value").with_min(0.0)],
            )
        }
        fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
            let value = ctx.inputs.float("value", Some(0.0), None, None)?;
            ctx.data_set("value", json!(value));
            Ok(Some("finish".to_string()))
        }
    }

    struct Finish;
    impl StepHandler for Finish {
        fn render(&self, _ctx: &SessionContext<'_>) -> StepView {
            StepView::action("Finish", "")
        }
        fn advance(&self, ctx: &mut SessionContext<'_>) -> Result<Option<String>, SessionError> {
            let value = ctx.data_f64("value").unwrap_or(0.0);
            ctx.complete(json!({ "value": value }));
            Ok(None)
        }
    }

    let mut registry: StepRegistry = StepRegistry::new();
    registry.insert("ask", Box::new(Ask));
    registry.insert("finish", Box::new(Finish));
    registry
}

fn inputs(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn walks_to_completion() {
    let clock = FakeClock::default();
    let executor = ScriptedExecutor::default();
    let mut session = CalibrationSession::start("toy", "od90", "ask", &clock);
    let mut engine = SessionEngine::new(toy_registry(), &mut session, SessionMode::Ui, &executor, &clock);

    let step = engine.get_step().unwrap();
    assert_eq!(step.step_id, "ask");
    assert_eq!(step.step_type, StepType::Form);

    let step = engine.advance(inputs(&[("value", json!(1.5))])).unwrap();
    assert_eq!(step.step_id, "finish");

    let step = engine.advance(inputs(&[])).unwrap();
    assert_eq!(step.step_type, StepType::Result);
    assert_eq!(session.status, SessionStatus::Complete);
    assert_eq!(session.result, Some(json!({ "value": 1.5 })));
}

#[test]
fn invalid_input_leaves_the_session_in_place() {
    let clock = FakeClock::default();
    let executor = ScriptedExecutor::default();
    let mut session = CalibrationSession::start("toy", "od90", "ask", &clock);
    let mut engine = SessionEngine::new(toy_registry(), &mut session, SessionMode::Ui, &executor, &clock);

    let err = engine.advance(inputs(&[("value", json!(-1.0))])).unwrap_err();
    assert!(matches!(err, SessionError::Input(_)));
    assert_eq!(engine.session().step_id, "ask");
    assert_eq!(engine.session().status, SessionStatus::InProgress);

    let err = engine.advance(inputs(&[])).unwrap_err();
    assert!(matches!(err, SessionError::Input(_)), "missing value reprompts");
}

#[test]
fn get_step_is_idempotent() {
    let clock = FakeClock::default();
    let executor = ScriptedExecutor::default();
    let mut session = CalibrationSession::start("toy", "od90", "ask", &clock);
    let mut engine = SessionEngine::new(toy_registry(), &mut session, SessionMode::Ui, &executor, &clock);

    let a = engine.get_step().unwrap();
    let b = engine.get_step().unwrap();
    assert_eq!(a, b);
    assert_eq!(session.step_id, "ask");
}

#[test]
fn abort_renders_the_ended_step() {
    let clock = FakeClock::default();
    let executor = ScriptedExecutor::default();
    let mut session = CalibrationSession::start("toy", "od90", "ask", &clock);
    let mut engine = SessionEngine::new(toy_registry(), &mut session, SessionMode::Ui, &executor, &clock);

    engine.abort("operator cancelled");
    let step = engine.get_step().unwrap();
    assert_eq!(step.step_id, STEP_ENDED);
    assert!(step.body.contains("operator cancelled"));
    assert_eq!(session.status, SessionStatus::Aborted);

    // advancing a terminal session does not resurrect it
    let mut engine = SessionEngine::new(toy_registry(), &mut session, SessionMode::Ui, &executor, &clock);
    let step = engine.advance(inputs(&[("value", json!(1.0))])).unwrap();
    assert_eq!(step.step_id, STEP_ENDED);
}

#[test]
fn sessions_persist_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let kv = pio_storage::ScopedKv::open(&dir.path().join("kv.sqlite")).unwrap();
    let clock = FakeClock::default();

    let session = CalibrationSession::start("toy", "od90", "ask", &clock);
    let id = session.session_id.clone();
    session.save(&kv).unwrap();

    let reloaded = CalibrationSession::load(&kv, id.as_str()).unwrap().unwrap();
    assert_eq!(reloaded, session);
    assert!(CalibrationSession::load(&kv, "missing").unwrap().is_none());
}

#[test]
fn scripted_executor_replays_in_order() {
    let executor = ScriptedExecutor::default()
        .respond("read_aux_voltage", json!({"voltage": 1.0}))
        .respond("read_aux_voltage", json!({"voltage": 2.0}));

    assert_eq!(
        executor.execute("read_aux_voltage", json!(null)).unwrap()["voltage"],
        json!(1.0)
    );
    assert_eq!(
        executor.execute("read_aux_voltage", json!(null)).unwrap()["voltage"],
        json!(2.0)
    );
    assert!(executor.execute("read_aux_voltage", json!(null)).is_err());
}

#[test]
fn updated_at_moves_on_advance() {
    let clock = FakeClock::default();
    let executor = ScriptedExecutor::default();
    let mut session = CalibrationSession::start("toy", "od90", "ask", &clock);
    let created = session.updated_at.clone();

    clock.advance_ms(60_000);
    let mut engine = SessionEngine::new(toy_registry(), &mut session, SessionMode::Ui, &executor, &clock);
    engine.advance(inputs(&[("value", json!(2.0))])).unwrap();
    assert!(session.updated_at > created);
}
