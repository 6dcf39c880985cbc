//! # Task Initializer
//!
//! Creates task records. Creation is the only point where the engine
//! takes locks: an object-scoped lock for single-object tasks and a
//! class-scoped lock for parallel tasks, held just long enough to write
//! the records. This serializes concurrent task creation on the same
//! target, never task execution.
//!
//! Both creation paths return a fully persisted task parked at `on_init`;
//! nothing runs until the caller invokes `schedule_run`.

use crate::constants::{MULTI_OBJECT_ID, STAGE_INIT};
use crate::error::{EngineError, Result};
use crate::events::names::TASK_CREATED;
use crate::models::{SubTaskRecord, TaskObjectRecord, TaskParams, TaskRecord, UserCred};
use crate::orchestration::engine::EngineInner;
use crate::registry::ResourceObject;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;
use uuid::Uuid;

/// Keyed creation locks. Entries are small and never evicted; the key
/// space is bounded by the set of objects under concurrent mutation.
#[derive(Default)]
pub(crate) struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(key.to_string()).or_default().clone();
        mutex.lock_owned().await
    }
}

/// Parameters for creating one task.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub task_name: String,
    pub user_cred: UserCred,
    pub params: Map<String, Value>,
    pub parent_task_id: Option<String>,
    pub parent_notify_url: Option<String>,
    pub request_context: Option<Value>,
    pub pending_usage: Option<Value>,
}

impl TaskRequest {
    pub fn new(task_name: impl Into<String>, user_cred: UserCred) -> Self {
        Self {
            task_name: task_name.into(),
            user_cred,
            params: Map::new(),
            parent_task_id: None,
            parent_notify_url: None,
            request_context: None,
            pending_usage: None,
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_parent(mut self, parent_task_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_task_id.into());
        self
    }

    pub fn with_notify_url(mut self, url: impl Into<String>) -> Self {
        self.parent_notify_url = Some(url.into());
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.request_context = Some(context);
        self
    }

    /// Seed the quota reservation snapshot; business logic releases or
    /// commits it later through the lifecycle API.
    pub fn with_pending_usage(mut self, usage: Value) -> Self {
        self.pending_usage = Some(usage);
        self
    }
}

pub(crate) async fn new_task(
    inner: &Arc<EngineInner>,
    request: &TaskRequest,
    target: &Arc<dyn ResourceObject>,
) -> Result<TaskRecord> {
    ensure_registered(inner, &request.task_name)?;

    let lock_key = format!("object/{}/{}", target.keyword(), target.id());
    let _guard = inner.creation_locks.lock(&lock_key).await;

    let task = build_record(
        request,
        target.keyword().to_string(),
        target.id().to_string(),
        target.name().to_string(),
    );
    inner.store.insert_task(&task).await?;
    link_parent(inner, &task).await?;

    publish_created(inner, &task).await;
    Ok(task)
}

pub(crate) async fn new_parallel_task(
    inner: &Arc<EngineInner>,
    request: &TaskRequest,
    targets: &[Arc<dyn ResourceObject>],
) -> Result<TaskRecord> {
    ensure_registered(inner, &request.task_name)?;
    let first = targets.first().ok_or_else(|| {
        EngineError::InvalidRequest("parallel task requires at least one target object".into())
    })?;

    let lock_key = format!(
        "class/{}/{}",
        first.keyword(),
        request.user_cred.project_id
    );
    let _guard = inner.creation_locks.lock(&lock_key).await;

    let task = build_record(
        request,
        first.keyword().to_string(),
        MULTI_OBJECT_ID.to_string(),
        first.name().to_string(),
    );
    inner.store.insert_task(&task).await?;

    let now = Utc::now();
    let members: Vec<TaskObjectRecord> = targets
        .iter()
        .enumerate()
        .map(|(i, obj)| TaskObjectRecord {
            task_id: task.id.clone(),
            obj_index: i as i64,
            obj_id: obj.id().to_string(),
            obj_name: obj.name().to_string(),
            created_at: now,
        })
        .collect();
    inner.store.insert_task_objects(&members).await?;

    link_parent(inner, &task).await?;

    publish_created(inner, &task).await;
    Ok(task)
}

fn ensure_registered(inner: &Arc<EngineInner>, task_name: &str) -> Result<()> {
    if !inner.task_registry.is_registered(task_name) {
        return Err(EngineError::UnregisteredTaskType(task_name.to_string()));
    }
    Ok(())
}

fn build_record(request: &TaskRequest, obj_type: String, obj_id: String, obj_name: String) -> TaskRecord {
    let now = Utc::now();
    TaskRecord {
        id: Uuid::new_v4().to_string(),
        task_name: request.task_name.clone(),
        obj_type,
        obj_id,
        obj_name,
        user_cred: request.user_cred.clone(),
        params: TaskParams::new(
            request.params.clone(),
            request.parent_task_id.clone(),
            request.parent_notify_url.clone(),
            request.request_context.clone(),
            request.pending_usage.clone(),
        ),
        stage: STAGE_INIT.to_string(),
        created_at: now,
        updated_at: now,
    }
}

/// Record the child against the parent's current stage so the parent's
/// completion barrier sees it.
async fn link_parent(inner: &Arc<EngineInner>, task: &TaskRecord) -> Result<()> {
    let Some(parent_id) = &task.params.engine.parent_task_id else {
        return Ok(());
    };
    let parent = inner
        .store
        .get_task(parent_id)
        .await?
        .ok_or_else(|| EngineError::TaskNotFound(parent_id.clone()))?;
    inner
        .store
        .insert_subtask(&SubTaskRecord::new(
            parent.id,
            parent.stage,
            task.id.clone(),
        ))
        .await?;
    Ok(())
}

async fn publish_created(inner: &Arc<EngineInner>, task: &TaskRecord) {
    info!(
        task_id = %task.id,
        task_name = %task.task_name,
        obj_type = %task.obj_type,
        obj_id = %task.obj_id,
        "task created"
    );
    inner
        .events
        .publish(
            TASK_CREATED,
            json!({
                "task_id": task.id,
                "task_name": task.task_name,
                "obj_type": task.obj_type,
                "obj_id": task.obj_id,
            }),
        )
        .await;
}
