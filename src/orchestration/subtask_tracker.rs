//! # Subtask Tracker
//!
//! Parent notification on child completion. Each child's own terminal
//! transition evaluates the parent's completion barrier; there is no
//! scheduler loop. The store's atomic subtask completion guarantees
//! exactly one child observes the barrier drop to zero, so the parent is
//! resumed exactly once per stage even when the last two children finish
//! together.

use crate::constants::SubtaskStatus;
use crate::models::TaskRecord;
use crate::orchestration::engine::{self, EngineInner};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub(crate) async fn notify_parent_task_complete(
    inner: &Arc<EngineInner>,
    task: &TaskRecord,
    body: Value,
    failed: bool,
) {
    let meta = &task.params.engine;

    if let Some(parent_id) = &meta.parent_task_id {
        let status = if failed {
            SubtaskStatus::Fail
        } else {
            SubtaskStatus::Succ
        };
        match inner
            .store
            .complete_subtask(parent_id, &task.id, status, &body)
            .await
        {
            Ok(Some(completion)) => {
                debug!(
                    parent_id,
                    child_id = %task.id,
                    status = %status,
                    stage = %completion.stage,
                    remaining = completion.remaining_init,
                    "subtask finished"
                );
                if completion.remaining_init == 0 {
                    resume_parent(inner, parent_id, body.clone()).await;
                }
            }
            Ok(None) => {
                warn!(
                    parent_id,
                    child_id = %task.id,
                    "subtask already terminal or unknown; dropping duplicate completion"
                );
            }
            Err(e) => {
                error!(
                    parent_id,
                    child_id = %task.id,
                    error = %e,
                    "could not record subtask completion"
                );
            }
        }
    }

    if let Some(url) = &meta.parent_notify_url {
        let notifier = inner.notifier.clone();
        let url = url.clone();
        let task_id = task.id.clone();
        let body = body.clone();
        let submitted = inner.aux_pool.submit(async move {
            notifier.notify(&url, &task_id, &body).await;
        });
        if let Err(e) = submitted {
            error!(task_id = %task.id, error = %e, "could not queue remote notification");
        }
    }
}

async fn resume_parent(inner: &Arc<EngineInner>, parent_id: &str, body: Value) {
    match inner.store.get_task(parent_id).await {
        Ok(Some(parent)) if parent.is_terminal() => {
            warn!(parent_id, stage = %parent.stage, "all children done but parent is terminal");
        }
        Ok(Some(_)) => {
            debug!(parent_id, "all children finished; resuming parent");
            if let Err(e) = engine::schedule_run(inner, parent_id, body).await {
                error!(parent_id, error = %e, "could not resume parent task");
            }
        }
        Ok(None) => warn!(parent_id, "all children done but parent is gone"),
        Err(e) => error!(parent_id, error = %e, "could not load parent for resume"),
    }
}
