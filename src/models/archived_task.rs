//! # Archived Task Model
//!
//! Append-only denormalized summary of a finished task, written once when
//! the task reaches a terminal stage and never updated.

use crate::persistence::{StoreError, TaskStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Long-term summary row for one finished task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedTaskRecord {
    /// Same id as the source task.
    pub id: String,
    pub task_name: String,
    pub obj_type: String,
    /// Ids of all target objects (one entry for single-object tasks).
    pub obj_ids: Vec<String>,
    pub obj_names: Vec<String>,
    pub project_id: String,
    pub domain_id: String,
    /// Terminal stage the task ended at: `complete` or `failed`.
    pub stage: String,
    pub failure_reason: Option<String>,
    pub succ_subtasks: i64,
    pub fail_subtasks: i64,
    /// When the source task was created.
    pub created_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}

impl ArchivedTaskRecord {
    /// Most recently archived tasks, newest first.
    pub async fn list_recent(
        store: &dyn TaskStore,
        limit: i64,
    ) -> Result<Vec<ArchivedTaskRecord>, StoreError> {
        store.list_archived_tasks(limit).await
    }
}
