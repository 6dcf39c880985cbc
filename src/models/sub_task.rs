//! Child-task progress rows.
//!
//! One row per (parent task, parent stage, child task), created at child
//! creation in status `init` and mutated exactly once to a terminal
//! status when the child finishes. The parent's stage is complete iff no
//! row for that stage remains in `init`.

use crate::constants::SubtaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One parent/child association row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTaskRecord {
    /// Parent task id.
    pub task_id: String,
    /// Parent stage active when the child was spawned.
    pub stage: String,
    /// Child task id.
    pub subtask_id: String,
    pub status: SubtaskStatus,
    /// Terminal payload reported by the child, once finished.
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubTaskRecord {
    pub fn new(task_id: String, stage: String, subtask_id: String) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            stage,
            subtask_id,
            status: SubtaskStatus::Init,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }
}
