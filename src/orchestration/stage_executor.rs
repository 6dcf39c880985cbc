//! # Stage Executor
//!
//! Dispatches one inbound payload to one task's current stage handler.
//!
//! The dispatch rules:
//! 1. A payload carrying the failure marker selects the
//!    `<stage>_failed` variant of the current stage, otherwise the stage
//!    itself.
//! 2. The handler name resolves against the task type's stage table:
//!    exact name first, CamelCase fallback second.
//! 3. An unresolvable task type, stage handler or target object is a
//!    configuration error: the task is forced to `failed` with a
//!    diagnostic reason and never retried.
//!
//! The handler runs to completion inside the dispatch; the task then
//! stays parked at whatever stage the handler left it until the next
//! `schedule_run`.

use crate::constants::{is_failure_payload, payload_reason, FAILED_STAGE_SUFFIX};
use crate::models::TaskRecord;
use crate::orchestration::engine::EngineInner;
use crate::orchestration::lifecycle::{self, TaskHandle};
use crate::registry::ResourceObject;
use anyhow::anyhow;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub(crate) async fn run_task(inner: Arc<EngineInner>, task_id: String, data: Value) {
    let task = match inner.store.get_task(&task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => {
            error!(task_id, "dispatch for unknown task");
            return;
        }
        Err(e) => {
            error!(task_id, error = %e, "could not load task for dispatch");
            return;
        }
    };

    if task.is_terminal() {
        warn!(
            task_id,
            stage = %task.stage,
            "ignoring signal for terminal task"
        );
        return;
    }

    let Some(task_type) = inner.task_registry.resolve(&task.task_name) else {
        lifecycle::force_fail(
            &inner,
            &task_id,
            &format!("task type {} not registered", task.task_name),
        )
        .await;
        return;
    };

    let failure_branch = is_failure_payload(&data);
    let effective_stage = if failure_branch {
        format!("{}{}", task.stage, FAILED_STAGE_SUFFIX)
    } else {
        task.stage.clone()
    };

    let Some(handler) = task_type.resolve_stage(&effective_stage) else {
        // Keep the inbound failure reason visible in the terminal state
        // even though the failure branch itself is missing.
        let mut reason = format!(
            "no handler for stage {effective_stage} on task type {}",
            task.task_name
        );
        if let Some(inbound) = payload_reason(&data) {
            reason = format!("{inbound}; {reason}");
        }
        lifecycle::force_fail(&inner, &task_id, &reason).await;
        return;
    };

    let objects = match resolve_objects(&inner, &task).await {
        Ok(objects) => objects,
        Err(e) => {
            lifecycle::force_fail(
                &inner,
                &task_id,
                &format!("cannot resolve target objects: {e:#}"),
            )
            .await;
            return;
        }
    };

    debug!(
        task_id,
        task_name = %task.task_name,
        stage = %effective_stage,
        objects = objects.len(),
        "dispatching stage handler"
    );

    let handle = TaskHandle::new(inner.clone(), task);
    let result = handler(handle.clone(), objects, data).await;

    // Request-context mutations survive regardless of handler outcome.
    handle.flush_request_context().await;

    if let Err(e) = result {
        if let Err(fail_err) = handle.set_stage_failed(&format!("{e:#}")).await {
            error!(task_id = %handle.task_id(), error = %fail_err, "could not fail task after handler error");
        }
    }
}

/// Resolve a task's target objects through the object-manager registry.
/// Multi-object tasks fetch every member, preserving input order.
pub(crate) async fn resolve_objects(
    inner: &Arc<EngineInner>,
    task: &TaskRecord,
) -> anyhow::Result<Vec<Arc<dyn ResourceObject>>> {
    let manager = inner
        .object_registry
        .resolve(&task.obj_type)
        .ok_or_else(|| anyhow!("no object manager for keyword {}", task.obj_type))?;

    if task.is_multi_object() {
        let members = inner.store.list_task_objects(&task.id).await?;
        let ids: Vec<String> = members.iter().map(|m| m.obj_id.clone()).collect();
        manager.fetch_batch(&ids).await
    } else {
        Ok(vec![manager.fetch(&task.obj_id).await?])
    }
}
