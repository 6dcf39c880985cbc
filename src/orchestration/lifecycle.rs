//! # Task Lifecycle API
//!
//! [`TaskHandle`] is the in-process face of a task row: the object handed
//! to stage handlers, carrying every mutation a handler is allowed to
//! make. All writes go through the store's per-row update; business code
//! never touches the row directly.
//!
//! Stage transitions only move forward. Once a task reaches `complete`
//! or `failed` no further transition is applied; a repeated failure is
//! logged and dropped, so a doubly-delivered failure signal cannot
//! produce a second parent notification.

use crate::constants::{
    failure_payload, is_terminal_stage, STAGE_COMPLETE, STAGE_FAILED,
};
use crate::error::{EngineError, Result};
use crate::events::names::{TASK_COMPLETED, TASK_FAILED, TASK_STAGE_COMPLETED};
use crate::models::{TaskRecord, UserCred};
use crate::orchestration::engine::EngineInner;
use crate::orchestration::{stage_executor, subtask_tracker, task_finalizer};
use crate::registry::ResourceObject;
use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{error, warn};

/// Lifecycle handle for one task.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<EngineInner>,
    record: Arc<Mutex<TaskRecord>>,
    pending_context: Arc<Mutex<Option<Value>>>,
}

impl TaskHandle {
    pub(crate) fn new(inner: Arc<EngineInner>, record: TaskRecord) -> Self {
        Self {
            inner,
            record: Arc::new(Mutex::new(record)),
            pending_context: Arc::new(Mutex::new(None)),
        }
    }

    pub fn task_id(&self) -> String {
        self.record.lock().id.clone()
    }

    pub fn task_name(&self) -> String {
        self.record.lock().task_name.clone()
    }

    pub fn stage(&self) -> String {
        self.record.lock().stage.clone()
    }

    pub fn user_cred(&self) -> UserCred {
        self.record.lock().user_cred.clone()
    }

    /// Caller-supplied params document.
    pub fn params(&self) -> Map<String, Value> {
        self.record.lock().params.data.clone()
    }

    pub fn object_id(&self) -> String {
        self.record.lock().obj_id.clone()
    }

    pub fn object_type(&self) -> String {
        self.record.lock().obj_type.clone()
    }

    /// Snapshot of the underlying row.
    pub fn record(&self) -> TaskRecord {
        self.record.lock().clone()
    }

    /// Engine handle, for spawning child tasks or scheduling runs from
    /// inside a stage handler.
    pub fn engine(&self) -> crate::orchestration::engine::TaskEngine {
        crate::orchestration::engine::TaskEngine {
            inner: self.inner.clone(),
        }
    }

    /// Resolve this task's target objects (all members for a multi-object
    /// task, in input order).
    pub async fn get_objects(&self) -> Result<Vec<Arc<dyn ResourceObject>>> {
        let record = self.record();
        stage_executor::resolve_objects(&self.inner, &record)
            .await
            .map_err(|e| EngineError::Configuration(format!("{e:#}")))
    }

    /// Transition to the next stage, marking the current stage complete
    /// and merging `extra` into the caller params.
    pub async fn set_stage(&self, next: &str, extra: Option<Map<String, Value>>) -> Result<()> {
        let current = self.stage();
        if is_terminal_stage(&current) {
            warn!(
                task_id = %self.task_id(),
                stage = %current,
                next,
                "ignoring stage transition on terminal task"
            );
            return Ok(());
        }

        let next_owned = next.to_string();
        let stored = self
            .inner
            .store
            .update_task(&self.task_id(), &move |t| {
                let now = Utc::now();
                let from = t.stage.clone();
                t.params.checkpoint_stage(&from, now);
                if let Some(extra) = &extra {
                    t.params.merge(extra.clone());
                }
                t.stage = next_owned.clone();
            })
            .await?;
        *self.record.lock() = stored;

        self.inner
            .events
            .publish(
                TASK_STAGE_COMPLETED,
                json!({ "task_id": self.task_id(), "from": current, "to": next }),
            )
            .await;
        Ok(())
    }

    /// Terminal success. An empty payload is replaced with a minimal
    /// `{id, name}` summary before notifying the parent.
    pub async fn set_stage_complete(&self, data: Option<Value>) -> Result<()> {
        let current = self.stage();
        if is_terminal_stage(&current) {
            warn!(
                task_id = %self.task_id(),
                stage = %current,
                "ignoring completion of terminal task"
            );
            return Ok(());
        }

        let body = match data {
            Some(v) if !v.is_null() => v,
            _ => json!({ "id": self.task_id(), "name": self.task_name() }),
        };

        self.set_stage(STAGE_COMPLETE, None).await?;
        let record = self.record();

        self.inner
            .events
            .publish(TASK_COMPLETED, json!({ "task_id": record.id }))
            .await;
        if let Err(e) = task_finalizer::archive_task(&self.inner, &record).await {
            error!(task_id = %record.id, error = %e, "could not archive completed task");
        }
        subtask_tracker::notify_parent_task_complete(&self.inner, &record, body, false).await;
        Ok(())
    }

    /// Terminal failure. Idempotent: a second failure on an already
    /// failed task is logged and dropped. The reason is appended to the
    /// task's failure history rather than replacing it.
    pub async fn set_stage_failed(&self, reason: &str) -> Result<()> {
        let fresh = self
            .inner
            .store
            .get_task(&self.task_id())
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(self.task_id()))?;
        if fresh.stage == STAGE_FAILED {
            warn!(
                task_id = %fresh.id,
                reason,
                "task already failed; dropping repeated failure"
            );
            return Ok(());
        }
        if fresh.stage == STAGE_COMPLETE {
            warn!(
                task_id = %fresh.id,
                reason,
                "ignoring failure signal on completed task"
            );
            return Ok(());
        }

        let reason_owned = reason.to_string();
        let stored = self
            .inner
            .store
            .update_task(&fresh.id, &move |t| {
                let now = Utc::now();
                let from = t.stage.clone();
                t.params.checkpoint_stage(&from, now);
                t.params.engine.failure_reasons.push(reason_owned.clone());
                t.stage = STAGE_FAILED.to_string();
            })
            .await?;
        *self.record.lock() = stored.clone();

        let full_reason = stored.params.failure_reason().unwrap_or_default();
        self.inner
            .events
            .publish(
                TASK_FAILED,
                json!({ "task_id": stored.id, "reason": full_reason }),
            )
            .await;
        if let Err(e) = task_finalizer::archive_task(&self.inner, &stored).await {
            error!(task_id = %stored.id, error = %e, "could not archive failed task");
        }
        subtask_tracker::notify_parent_task_complete(
            &self.inner,
            &stored,
            failure_payload(&full_reason),
            true,
        )
        .await;
        Ok(())
    }

    /// Store a quota reservation snapshot in the task's metadata.
    pub async fn set_pending_usage<T: Serialize + ?Sized>(&self, usage: &T) -> Result<()> {
        let value = serde_json::to_value(usage)
            .map_err(|e| EngineError::InvalidRequest(format!("pending usage: {e}")))?;
        let stored = self
            .inner
            .store
            .update_task(&self.task_id(), &move |t| {
                t.params.engine.pending_usage = Some(value.clone());
            })
            .await?;
        *self.record.lock() = stored;
        Ok(())
    }

    /// Read back the quota reservation snapshot.
    pub async fn get_pending_usage<T: DeserializeOwned>(&self) -> Result<T> {
        let task_id = self.task_id();
        let fresh = self
            .inner
            .store
            .get_task(&task_id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.clone()))?;
        let value = fresh
            .params
            .engine
            .pending_usage
            .ok_or(EngineError::PendingUsageNotFound(task_id))?;
        serde_json::from_value(value)
            .map_err(|e| EngineError::InvalidRequest(format!("pending usage: {e}")))
    }

    /// Drop the quota reservation snapshot.
    pub async fn clear_pending_usage(&self) -> Result<()> {
        let stored = self
            .inner
            .store
            .update_task(&self.task_id(), &|t| {
                t.params.engine.pending_usage = None;
            })
            .await?;
        *self.record.lock() = stored;
        Ok(())
    }

    /// Stage ambient request-context changes; the executor persists them
    /// after the handler returns, whatever the handler's outcome.
    pub fn update_request_context(&self, context: Value) {
        *self.pending_context.lock() = Some(context);
    }

    pub(crate) async fn flush_request_context(&self) {
        let staged = self.pending_context.lock().take();
        let Some(context) = staged else { return };
        let result = self
            .inner
            .store
            .update_task(&self.task_id(), &move |t| {
                t.params.engine.request_context = Some(context.clone());
            })
            .await;
        match result {
            Ok(stored) => *self.record.lock() = stored,
            Err(e) => {
                error!(task_id = %self.task_id(), error = %e, "could not persist request context");
            }
        }
    }
}

/// Force a task to `failed` from engine plumbing (panic recovery,
/// unresolvable configuration); goes through the same idempotent path as
/// a handler-initiated failure.
pub(crate) async fn force_fail(inner: &Arc<EngineInner>, task_id: &str, reason: &str) {
    match inner.store.get_task(task_id).await {
        Ok(Some(task)) => {
            let handle = TaskHandle::new(inner.clone(), task);
            if let Err(e) = handle.set_stage_failed(reason).await {
                error!(task_id, error = %e, "could not force task failure");
            }
        }
        Ok(None) => error!(task_id, "cannot fail missing task"),
        Err(e) => error!(task_id, error = %e, "cannot load task to fail it"),
    }
}
