// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn lifecycle_pending_to_complete() {
    let registry = TaskRegistry::new();
    let id = registry.create();
    assert_eq!(registry.status(id.as_str()), Some(TaskStatus::Pending));

    registry.complete(&id, Some(json!({"pid": 12})));
    assert!(matches!(
        registry.status(id.as_str()),
        Some(TaskStatus::Complete { .. })
    ));
}

#[test]
fn failures_keep_their_message() {
    let registry = TaskRegistry::new();
    let id = registry.create();
    registry.fail(&id, "spawn failed");
    let Some(TaskStatus::Failed { error }) = registry.status(id.as_str()) else {
        panic!("expected a failure");
    };
    assert_eq!(error, "spawn failed");
}

#[test]
fn unknown_ids_are_none() {
    let registry = TaskRegistry::new();
    assert!(registry.status("nope").is_none());
}

#[test]
fn status_serializes_with_a_tag() {
    let status = TaskStatus::Complete {
        result: Some(json!({"pid": 5})),
    };
    let value = serde_json::to_value(&status).unwrap();
    assert_eq!(value["status"], "complete");
    assert_eq!(value["result"]["pid"], 5);
}

#[test]
fn result_url_paths_are_stable() {
    let id = pio_core::id::TaskId::new("abc");
    assert_eq!(TaskRegistry::result_url_path(&id), "/unit_api/task_results/abc");
}
