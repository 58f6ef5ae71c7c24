// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pio_bus::{Bus, MemoryBus, QosLevel};

fn ctx(experiment: &str) -> EvalContext<'static> {
    EvalContext::new(experiment)
}

async fn eval_str(input: &str) -> EvalValue {
    evaluate(input, &ctx("exp1")).await.unwrap()
}

async fn eval_bool_str(input: &str) -> bool {
    evaluate_bool(input, &ctx("exp1")).await.unwrap()
}

#[tokio::test]
async fn identity_values() {
    assert_eq!(eval_str("test").await, EvalValue::Str("test".to_string()));
    assert_eq!(eval_str("test_test").await, EvalValue::Str("test_test".to_string()));
    assert_eq!(eval_str("-1.5").await, EvalValue::Number(-1.5));
    assert_eq!(eval_str("True").await, EvalValue::Bool(true));
}

#[tokio::test]
async fn simple_booleans() {
    assert!(eval_bool_str("True and True").await);
    assert!(!eval_bool_str("True and False").await);
    assert!(eval_bool_str("True or False").await);
    assert!(eval_bool_str("True and (True or False)").await);
    assert!(eval_bool_str("(False or True) or False").await);
    assert!(eval_bool_str("not False").await);
    assert!(!eval_bool_str("not (True)").await);
}

#[tokio::test]
async fn float_comparisons() {
    assert!(eval_bool_str("1 > 0").await);
    assert!(!eval_bool_str("1 < 0").await);
    assert!(eval_bool_str("1.1 > -1.1").await);
    assert!(!eval_bool_str("1.1 > 1.1").await);
    assert!(eval_bool_str("-1.1 > -2").await);
    assert!(eval_bool_str("(0 > 1) or (1 > 0)").await);
    assert!(eval_bool_str("1.0 == 1.0").await);
    assert!(eval_bool_str("1.0 >= 1.0").await);
    assert!(eval_bool_str("2.5 >= 1.0").await);
    assert!(!eval_bool_str("2.5 <= 1.0").await);
    assert!(eval_bool_str("-1 <= 1.0").await);
}

#[tokio::test]
async fn calculator() {
    assert_eq!(eval_str("True + True").await, EvalValue::Number(2.0));
    assert_eq!(eval_str("1 + 1").await, EvalValue::Number(2.0));
    assert_eq!(eval_str("1.0 - 1.0").await, EvalValue::Number(0.0));
    assert_eq!(eval_str("-1.5 * 2.0").await, EvalValue::Number(-3.0));
    assert_eq!(eval_str("-1.5 * -2.0").await, EvalValue::Number(3.0));
    assert_eq!(eval_str("-1.5 / -2.0").await, EvalValue::Number(0.75));
    assert_eq!(eval_str("4 ** 0.5").await, EvalValue::Number(2.0));
    assert_eq!(eval_str("1 ** 100.0").await, EvalValue::Number(1.0));
    assert_eq!(eval_str("2 ** (2 + 2)").await, EvalValue::Number(16.0));

    let random = eval_str("random()").await.as_number().unwrap();
    assert!((0.0..=1.0).contains(&random));
    let scaled = eval_str("25 + (25 * random())").await.as_number().unwrap();
    assert!((25.0..=50.0).contains(&scaled));
}

#[tokio::test]
async fn division_by_zero_errors() {
    let err = evaluate("-1.5 / 0", &ctx("exp1")).await.unwrap_err();
    assert_eq!(err, EvalError::ZeroDivision);
}

#[tokio::test]
async fn env_functions_and_variables() {
    let context = ctx("exp1").with_env("unit", EvalValue::Str("test".to_string()));
    assert!(evaluate_bool("unit() == test", &context).await.unwrap());

    let context = ctx("exp1").with_env("unit", EvalValue::Str("not_test".to_string()));
    assert!(!evaluate_bool("unit() == test", &context).await.unwrap());

    let err = evaluate("unit()", &ctx("exp1")).await.unwrap_err();
    assert!(matches!(err, EvalError::MissingEnv(_)));

    let context = ctx("exp1").with_env("rpm", EvalValue::Number(100.0));
    assert_eq!(
        evaluate("rpm + 5.0", &context).await.unwrap(),
        EvalValue::Number(105.0)
    );
    let context = ctx("exp1")
        .with_env("rpm_start", EvalValue::Number(10.0))
        .with_env("other", EvalValue::Number(6.6));
    assert_eq!(
        evaluate("rpm_start * other", &context).await.unwrap(),
        EvalValue::Number(66.0)
    );
    let context = ctx("exp1").with_env("b", EvalValue::Bool(true));
    assert!(evaluate_bool("b", &context).await.unwrap());
}

async fn bus_with_retained(topic: &str, payload: &str) -> MemoryBus {
    let bus = MemoryBus::new();
    bus.publish(topic, payload.as_bytes().to_vec(), QosLevel::ExactlyOnce, true)
        .await
        .unwrap();
    bus
}

#[tokio::test]
async fn mqtt_fetches_with_json_paths() {
    let bus = bus_with_retained(
        "pioreactor/u1/exp1/od_reading/od1",
        r#"{"od": 1.2, "angle": "90", "channel": "2", "ir_led_intensity": 90}"#,
    )
    .await;
    let context = EvalContext::new("exp1").with_bus(&bus);

    assert!(evaluate_bool("u1:od_reading:od1.od > 1.0", &context).await.unwrap());
    assert!(evaluate_bool("u1:od_reading:od1.od < 2.0", &context).await.unwrap());
    assert!(!evaluate_bool("u1:od_reading:od1.od > 2.0", &context).await.unwrap());
    assert_eq!(
        evaluate("2 * u1:od_reading:od1.od", &context).await.unwrap(),
        EvalValue::Number(2.4)
    );
    assert_eq!(
        evaluate(
            "u1:od_reading:od1.od + u1:od_reading:od1.od + u1:od_reading:od1.od",
            &context
        )
        .await
        .unwrap(),
        EvalValue::Number(3.5999999999999996)
    );
}

#[tokio::test]
async fn mqtt_fetches_scalars() {
    let bus = MemoryBus::new();
    for (topic, payload) in [
        ("pioreactor/u1/exp1/test_job/int", "101"),
        ("pioreactor/u1/exp1/test_job/float", "101.5"),
        ("pioreactor/u1/exp1/test_job/string", "hi"),
        ("pioreactor/u1/exp1/test_job/$state", "ready"),
        ("pioreactor/u1/exp1/test_job/bool_true", "true"),
        ("pioreactor/u1/exp1/test_job/bool_false", "false"),
    ] {
        bus.publish(topic, payload.as_bytes().to_vec(), QosLevel::ExactlyOnce, true)
            .await
            .unwrap();
    }
    let context = EvalContext::new("exp1").with_bus(&bus);

    assert!(evaluate_bool("u1:test_job:int == 101", &context).await.unwrap());
    assert!(evaluate_bool("u1:test_job:int > 100", &context).await.unwrap());
    assert!(evaluate_bool("u1:test_job:float > 100.0", &context).await.unwrap());
    assert!(evaluate_bool("u1:test_job:float == 101.5", &context).await.unwrap());
    assert!(evaluate_bool("u1:test_job:string == hi", &context).await.unwrap());
    assert!(evaluate_bool("not u1:test_job:string == test", &context).await.unwrap());
    assert!(evaluate_bool("u1:test_job:$state == ready", &context).await.unwrap());
    assert!(evaluate_bool("not u1:test_job:$state == sleeping", &context).await.unwrap());
    assert!(evaluate_bool("u1:test_job:bool_true", &context).await.unwrap());
    assert!(evaluate_bool("not u1:test_job:bool_false", &context).await.unwrap());
    assert!(
        evaluate_bool("u1:test_job:bool_false or u1:test_job:bool_true", &context)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn current_unit_substitution_needs_env() {
    let bus = bus_with_retained("pioreactor/u1/exp1/od_reading/od1", r#"{"od": 1.2}"#).await;
    let context = EvalContext::new("exp1")
        .with_bus(&bus)
        .with_env("unit", EvalValue::Str("u1".to_string()));
    assert!(evaluate_bool("::od_reading:od1.od > 1.0", &context).await.unwrap());
    assert!(!evaluate_bool("::od_reading:od1.od > 2.0", &context).await.unwrap());

    let no_env = EvalContext::new("exp1").with_bus(&bus);
    let err = evaluate_bool("::od_reading:od1.od > 2.0", &no_env).await.unwrap_err();
    assert!(matches!(err, EvalError::MissingEnv(_)));
}

#[tokio::test]
async fn fetch_segments_resolve_calls() {
    let bus = bus_with_retained("pioreactor/unit1/exp1/stirring/target_rpm", "100").await;
    let context = EvalContext::new("exp1")
        .with_bus(&bus)
        .with_env("unit", EvalValue::Str("unit1".to_string()))
        .with_env("job_name", EvalValue::Str("stirring".to_string()));
    assert_eq!(
        evaluate("unit():job_name():target_rpm", &context).await.unwrap(),
        EvalValue::Number(100.0)
    );
}

#[tokio::test]
async fn missing_retained_value_is_an_mqtt_error() {
    let bus = MemoryBus::new();
    let context = EvalContext::new("exp1").with_bus(&bus);
    let err = evaluate_bool("u1:test_job:does_not_exist or True", &context)
        .await
        .unwrap_err();
    assert!(matches!(err, EvalError::MqttValue(_)));
}

#[tokio::test]
async fn fetch_without_a_bus_errors() {
    let err = evaluate("u1:job:setting", &ctx("exp1")).await.unwrap_err();
    assert_eq!(err, EvalError::NoBus);
}
