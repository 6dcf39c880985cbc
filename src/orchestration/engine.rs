//! # Task Engine
//!
//! The assembled engine: store, registries, worker pools, notifier and
//! event stream behind one handle. Built once by the process entry point
//! via [`TaskEngine::builder`], after every workflow module has handed in
//! its task types and object managers.

use crate::config::EngineConfig;
use crate::constants::{failure_payload, is_failure_payload};
use crate::error::{EngineError, Result};
use crate::events::EventPublisher;
use crate::execution::worker_pool::{panic_message, PoolSnapshot, WorkerPool};
use crate::models::{TaskRecord, UpcallRecord};
use crate::orchestration::lifecycle::{self, TaskHandle};
use crate::orchestration::remote_notifier::RemoteNotifier;
use crate::orchestration::stage_executor;
use crate::orchestration::task_initializer::{self, KeyedLocks, TaskRequest};
use crate::persistence::{MemoryStore, TaskStore};
use crate::registry::{ObjectManager, ObjectRegistry, ResourceObject, TaskRegistry, TaskType};
use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{error, warn};

pub(crate) struct EngineInner {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) task_registry: Arc<TaskRegistry>,
    pub(crate) object_registry: Arc<ObjectRegistry>,
    pub(crate) events: EventPublisher,
    pub(crate) notifier: RemoteNotifier,
    pub(crate) stage_pool: WorkerPool,
    pub(crate) aux_pool: WorkerPool,
    pub(crate) dedicated_pools: HashMap<String, WorkerPool>,
    pub(crate) pool_overrides: HashMap<String, String>,
    pub(crate) creation_locks: KeyedLocks,
}

impl EngineInner {
    fn pool_for(&self, task_name: &str) -> &WorkerPool {
        self.pool_overrides
            .get(task_name)
            .and_then(|pool| self.dedicated_pools.get(pool))
            .unwrap_or(&self.stage_pool)
    }
}

/// Queue a dispatch for `task_id`. The sole entry point that (re-)drives
/// the stage executor; safe to call concurrently for different task ids.
pub(crate) async fn schedule_run(
    inner: &Arc<EngineInner>,
    task_id: &str,
    data: Value,
) -> Result<()> {
    let task = inner
        .store
        .get_task(task_id)
        .await?
        .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
    inner
        .pool_for(&task.task_name)
        .submit(guarded_dispatch(inner.clone(), task.id, data))?;
    Ok(())
}

/// One stage dispatch wrapped with panic recovery. A panicking handler is
/// converted into a synthetic failure payload and routed back through the
/// failure branch; a panic while already on the failure branch forces the
/// task to `failed` instead, so a deterministic panic cannot loop.
fn guarded_dispatch(
    inner: Arc<EngineInner>,
    task_id: String,
    data: Value,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let failure_branch = is_failure_payload(&data);
        let run = stage_executor::run_task(inner.clone(), task_id.clone(), data);
        if let Err(panic) = AssertUnwindSafe(run).catch_unwind().await {
            let reason = format!("stage handler panicked: {}", panic_message(&*panic));
            warn!(task_id = %task_id, reason = %reason, "recovered stage handler panic");
            if failure_branch {
                lifecycle::force_fail(&inner, &task_id, &reason).await;
            } else if let Err(e) =
                schedule_run(&inner, &task_id, failure_payload(&reason)).await
            {
                error!(
                    task_id = %task_id,
                    error = %e,
                    "could not route panic through failure branch; forcing failure"
                );
                lifecycle::force_fail(&inner, &task_id, &reason).await;
            }
        }
    })
}

/// Builder for [`TaskEngine`].
#[derive(Default)]
pub struct TaskEngineBuilder {
    store: Option<Arc<dyn TaskStore>>,
    config: EngineConfig,
    task_types: Vec<TaskType>,
    object_managers: Vec<Arc<dyn ObjectManager>>,
    events: Option<EventPublisher>,
}

impl TaskEngineBuilder {
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Hand in one task type. Duplicate names panic at build time.
    pub fn register(mut self, task_type: TaskType) -> Self {
        self.task_types.push(task_type);
        self
    }

    pub fn object_manager(mut self, manager: Arc<dyn ObjectManager>) -> Self {
        self.object_managers.push(manager);
        self
    }

    pub fn events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    /// Assemble the engine. Must run inside a tokio runtime; worker pool
    /// dispatchers are spawned here.
    pub fn build(self) -> Result<TaskEngine> {
        let task_registry = TaskRegistry::new();
        for task_type in self.task_types {
            task_registry.register(task_type);
        }
        let object_registry = ObjectRegistry::new();
        for manager in self.object_managers {
            object_registry.register(manager);
        }

        let config = self.config;
        for (task_name, pool) in &config.pool_overrides {
            if !config.dedicated_pools.contains_key(pool) {
                return Err(EngineError::Configuration(format!(
                    "pool override for {task_name} references unknown pool {pool}"
                )));
            }
        }

        let dedicated_pools = config
            .dedicated_pools
            .iter()
            .map(|(name, cfg)| (name.clone(), WorkerPool::start(name.clone(), *cfg)))
            .collect();

        let inner = EngineInner {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryStore::new())),
            task_registry: Arc::new(task_registry),
            object_registry: Arc::new(object_registry),
            events: self.events.unwrap_or_default(),
            notifier: RemoteNotifier::new(config.notify_retries, config.notify_timeout_ms)?,
            stage_pool: WorkerPool::start("stage", config.stage_pool),
            aux_pool: WorkerPool::start("aux", config.aux_pool),
            dedicated_pools,
            pool_overrides: config.pool_overrides.clone(),
            creation_locks: KeyedLocks::new(),
        };
        Ok(TaskEngine {
            inner: Arc::new(inner),
        })
    }
}

/// Handle to a running task engine.
#[derive(Clone)]
pub struct TaskEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl TaskEngine {
    pub fn builder() -> TaskEngineBuilder {
        TaskEngineBuilder::default()
    }

    /// Create a single-object task parked at `on_init`.
    pub async fn new_task(
        &self,
        request: &TaskRequest,
        target: &Arc<dyn ResourceObject>,
    ) -> Result<TaskRecord> {
        task_initializer::new_task(&self.inner, request, target).await
    }

    /// Create a multi-object task parked at `on_init`, with one TaskObject
    /// row per member.
    pub async fn new_parallel_task(
        &self,
        request: &TaskRequest,
        targets: &[Arc<dyn ResourceObject>],
    ) -> Result<TaskRecord> {
        task_initializer::new_parallel_task(&self.inner, request, targets).await
    }

    /// Resume a parked task with an inbound payload.
    pub async fn schedule_run(&self, task_id: &str, data: Value) -> Result<()> {
        schedule_run(&self.inner, task_id, data).await
    }

    /// External upcall entry point: audit the upcall, then resume the
    /// task. The audit record is written off the dispatch path.
    pub async fn perform_action(&self, task_id: &str, data: Value) -> Result<()> {
        let task = self
            .inner
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;

        let status = if is_failure_payload(&data) { "error" } else { "ok" };
        let store = self.inner.store.clone();
        let id = task.id.clone();
        self.inner.aux_pool.submit(async move {
            let record = UpcallRecord {
                received_at: Utc::now(),
                status: status.to_string(),
            };
            let mutator = move |t: &mut TaskRecord| t.params.engine.upcalls.push(record.clone());
            if let Err(e) = store.update_task(&id, &mutator).await {
                warn!(task_id = %id, error = %e, "could not record upcall");
            }
        })?;

        schedule_run(&self.inner, task_id, data).await
    }

    /// Lifecycle handle for a task, for business-object methods that
    /// mutate task state outside a stage dispatch.
    pub async fn task_handle(&self, task_id: &str) -> Result<TaskHandle> {
        let task = self
            .inner
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
        Ok(TaskHandle::new(self.inner.clone(), task))
    }

    pub fn events(&self) -> &EventPublisher {
        &self.inner.events
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.inner.store.clone()
    }

    /// Counters for every pool, keyed by pool name.
    pub fn pool_stats(&self) -> Vec<(String, PoolSnapshot)> {
        let mut stats = vec![
            ("stage".to_string(), self.inner.stage_pool.snapshot()),
            ("aux".to_string(), self.inner.aux_pool.snapshot()),
        ];
        for (name, pool) in &self.inner.dedicated_pools {
            stats.push((name.clone(), pool.snapshot()));
        }
        stats
    }
}
