//! Persistence façade: the store contract and its backends.
//!
//! The engine assumes single-row atomicity of `update_task` and no
//! cross-row transactions, with one deliberate exception:
//! [`TaskStore::complete_subtask`] must apply the child's terminal status
//! and compute the remaining-`init` count for the parent stage atomically.
//! That compound operation is what makes the parent completion barrier
//! race-free when the last two children finish near-simultaneously.

pub mod memory;
pub mod postgres;
pub mod sqlite;

pub use self::memory::MemoryStore;
pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use crate::constants::SubtaskStatus;
use crate::models::{ArchivedTaskRecord, SubTaskRecord, TaskObjectRecord, TaskRecord};
use async_trait::async_trait;
use serde_json::Value;

/// Errors surfaced by store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("update conflict on {record} after {attempts} attempts")]
    UpdateConflict { record: String, attempts: u32 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record {record}: {details}")]
    Corrupt { record: String, details: String },
}

/// Outcome of a terminal subtask mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtaskCompletion {
    /// Parent stage the completed row belongs to.
    pub stage: String,
    /// SubTask rows for that parent stage still in `init` after this
    /// mutation. Zero means the barrier is satisfied.
    pub remaining_init: i64,
}

/// Mutator applied to a fresh task row copy under the backend's
/// optimistic-concurrency policy.
pub type TaskMutator<'a> = &'a (dyn Fn(&mut TaskRecord) + Send + Sync);

/// Store contract used by the engine.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, task: &TaskRecord) -> Result<(), StoreError>;

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, StoreError>;

    /// Apply `mutator` to a fresh copy of the row and persist it, retrying
    /// under the backend's concurrency policy. Returns the stored row.
    async fn update_task(&self, id: &str, mutator: TaskMutator<'_>)
        -> Result<TaskRecord, StoreError>;

    /// Tasks not yet at a terminal stage, oldest first.
    async fn list_active_tasks(&self, limit: i64) -> Result<Vec<TaskRecord>, StoreError>;

    async fn insert_subtask(&self, sub: &SubTaskRecord) -> Result<(), StoreError>;

    /// Terminally mark the child row for `(parent_id, subtask_id)` and
    /// return the remaining-`init` count for its stage, atomically.
    ///
    /// Returns `Ok(None)` when the row is missing or already terminal; a
    /// doubly-delivered completion must not re-trigger the barrier.
    async fn complete_subtask(
        &self,
        parent_id: &str,
        subtask_id: &str,
        status: SubtaskStatus,
        result: &Value,
    ) -> Result<Option<SubtaskCompletion>, StoreError>;

    async fn list_subtasks(
        &self,
        parent_id: &str,
        stage: &str,
    ) -> Result<Vec<SubTaskRecord>, StoreError>;

    /// Total `(succ, fail)` counts across all stages of a parent.
    async fn subtask_status_counts(&self, parent_id: &str) -> Result<(i64, i64), StoreError>;

    async fn insert_task_objects(&self, objs: &[TaskObjectRecord]) -> Result<(), StoreError>;

    /// Member rows for a multi-object task, in input order.
    async fn list_task_objects(&self, task_id: &str)
        -> Result<Vec<TaskObjectRecord>, StoreError>;

    async fn insert_archived_task(&self, rec: &ArchivedTaskRecord) -> Result<(), StoreError>;

    /// Recently archived tasks, newest first.
    async fn list_archived_tasks(
        &self,
        limit: i64,
    ) -> Result<Vec<ArchivedTaskRecord>, StoreError>;

    async fn health_check(&self) -> Result<bool, StoreError>;
}
