//! # Task Finalizer
//!
//! Writes the denormalized archive summary when a task reaches a terminal
//! stage. The archive row is append-only and written exactly once; the
//! source task row is left in place for external housekeeping.

use crate::error::Result;
use crate::events::names::TASK_ARCHIVED;
use crate::models::{ArchivedTaskRecord, TaskRecord};
use crate::orchestration::engine::EngineInner;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

pub(crate) async fn archive_task(inner: &Arc<EngineInner>, task: &TaskRecord) -> Result<()> {
    let (succ_subtasks, fail_subtasks) = inner.store.subtask_status_counts(&task.id).await?;

    let (obj_ids, obj_names) = if task.is_multi_object() {
        let members = inner.store.list_task_objects(&task.id).await?;
        (
            members.iter().map(|m| m.obj_id.clone()).collect(),
            members.iter().map(|m| m.obj_name.clone()).collect(),
        )
    } else {
        (vec![task.obj_id.clone()], vec![task.obj_name.clone()])
    };

    let record = ArchivedTaskRecord {
        id: task.id.clone(),
        task_name: task.task_name.clone(),
        obj_type: task.obj_type.clone(),
        obj_ids,
        obj_names,
        project_id: task.user_cred.project_id.clone(),
        domain_id: task.user_cred.domain_id.clone(),
        stage: task.stage.clone(),
        failure_reason: task.params.failure_reason(),
        succ_subtasks,
        fail_subtasks,
        created_at: task.created_at,
        archived_at: Utc::now(),
    };
    inner.store.insert_archived_task(&record).await?;

    inner
        .events
        .publish(
            TASK_ARCHIVED,
            json!({ "task_id": task.id, "stage": task.stage }),
        )
        .await;
    Ok(())
}
