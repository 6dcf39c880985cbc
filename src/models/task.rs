//! # Task Model
//!
//! The durable representation of one running workflow instance.
//!
//! A task row is created by the initializer at stage `on_init` and from
//! then on mutated exclusively through the lifecycle API; business code
//! never writes the row directly. Rows are never deleted by the engine —
//! finished tasks are summarized into the archive and left in place for
//! external housekeeping.

use crate::constants::{is_terminal_stage, MULTI_OBJECT_ID};
use crate::models::params::TaskParams;
use crate::persistence::{StoreError, TaskStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque caller identity, persisted so later stage dispatches run on
/// behalf of the original caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UserCred {
    pub user: String,
    pub project_id: String,
    pub domain_id: String,
}

/// One durable task row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique id, generated at creation.
    pub id: String,
    /// Registry key selecting the concrete task type.
    pub task_name: String,
    /// Type keyword of the primary target object.
    pub obj_type: String,
    /// Id of the primary target object, or [`MULTI_OBJECT_ID`] when the
    /// member set lives in TaskObject rows.
    pub obj_id: String,
    /// Display name of the primary target object.
    pub obj_name: String,
    pub user_cred: UserCred,
    /// Caller params plus engine metadata, persisted as one blob.
    pub params: TaskParams,
    /// Current stage; `complete` and `failed` are terminal.
    pub stage: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Whether this task has reached a terminal stage.
    pub fn is_terminal(&self) -> bool {
        is_terminal_stage(&self.stage)
    }

    /// Whether this task operates on multiple objects.
    pub fn is_multi_object(&self) -> bool {
        self.obj_id == MULTI_OBJECT_ID
    }

    /// Find a task by id.
    pub async fn find_by_id(
        store: &dyn TaskStore,
        id: &str,
    ) -> Result<Option<TaskRecord>, StoreError> {
        store.get_task(id).await
    }

    /// List tasks that have not reached a terminal stage, oldest first.
    pub async fn list_active(
        store: &dyn TaskStore,
        limit: i64,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        store.list_active_tasks(limit).await
    }
}
