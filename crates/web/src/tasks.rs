// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background task registry for 202-style endpoints.
//!
//! Long-running mutations (job launches, system updates) answer immediately
//! with a task id; `GET /unit_api/task_results/<id>` reports progress.

use parking_lot::Mutex;
use pio_core::id::TaskId;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum TaskStatus {
    Pending,
    Complete {
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    Failed {
        error: String,
    },
}

#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<BTreeMap<TaskId, TaskStatus>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending task and return its id.
    pub fn create(&self) -> TaskId {
        let id = TaskId::new(uuid::Uuid::new_v4().to_string());
        self.tasks.lock().insert(id.clone(), TaskStatus::Pending);
        id
    }

    pub fn complete(&self, id: &TaskId, result: Option<Value>) {
        self.tasks
            .lock()
            .insert(id.clone(), TaskStatus::Complete { result });
    }

    pub fn fail(&self, id: &TaskId, error: impl Into<String>) {
        self.tasks.lock().insert(
            id.clone(),
            TaskStatus::Failed {
                error: error.into(),
            },
        );
    }

    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.tasks.lock().get(id).cloned()
    }

    /// The path a client polls for this task.
    pub fn result_url_path(id: &TaskId) -> String {
        format!("/unit_api/task_results/{id}")
    }
}

#[cfg(test)]
#[path = "tasks_tests.rs"]
mod tests;
