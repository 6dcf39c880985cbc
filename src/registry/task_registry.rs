//! # Task Type Registry
//!
//! Maps a task-type name to its stage handler table. The registry is an
//! explicit value owned by the engine and populated by the process entry
//! point before any task is created; there is no global mutable table and
//! no load-order dependency between workflow modules.
//!
//! Each task type carries a map from snake_case stage name to a handler
//! function value, built once at registration. Dispatch resolves an
//! inbound stage name against that map: exact match first, then a
//! CamelCase-to-snake_case transform for stage identifiers supplied by
//! external callers.

use crate::constants::snake_case_stage;
use crate::orchestration::lifecycle::TaskHandle;
use crate::registry::object_registry::ResourceObject;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;

/// Future returned by a stage handler.
pub type StageFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// One stage handler: receives the task, its resolved target objects and
/// the inbound payload. A handler that returns `Err` fails the task.
pub type StageFn =
    Arc<dyn Fn(TaskHandle, Vec<Arc<dyn ResourceObject>>, Value) -> StageFuture + Send + Sync>;

/// One concrete task type: a name plus its stage handler table.
#[derive(Clone)]
pub struct TaskType {
    name: String,
    stages: HashMap<String, StageFn>,
}

impl TaskType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a handler for `stage`. The name is canonicalized to
    /// snake_case; registering the same stage twice is a programmer error
    /// and panics, like a duplicate task-type registration.
    pub fn stage<F>(mut self, stage: &str, handler: F) -> Self
    where
        F: Fn(TaskHandle, Vec<Arc<dyn ResourceObject>>, Value) -> StageFuture
            + Send
            + Sync
            + 'static,
    {
        let canonical = snake_case_stage(stage);
        if self
            .stages
            .insert(canonical.clone(), Arc::new(handler))
            .is_some()
        {
            panic!(
                "stage {canonical} registered twice on task type {}",
                self.name
            );
        }
        self
    }

    /// Resolve an inbound stage name: exact match, then the snake_case
    /// transform.
    pub fn resolve_stage(&self, inbound: &str) -> Option<StageFn> {
        if let Some(handler) = self.stages.get(inbound) {
            return Some(handler.clone());
        }
        self.stages.get(&snake_case_stage(inbound)).cloned()
    }

    /// Registered stage names, for diagnostics.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskType")
            .field("name", &self.name)
            .field("stages", &self.stages.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Process-wide table of registered task types.
#[derive(Default)]
pub struct TaskRegistry {
    types: DashMap<String, Arc<TaskType>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task type. Panics on a duplicate name: a registration
    /// collision is a build-time programmer error, not a runtime
    /// condition to recover from.
    pub fn register(&self, task_type: TaskType) {
        let name = task_type.name().to_string();
        if self
            .types
            .insert(name.clone(), Arc::new(task_type))
            .is_some()
        {
            panic!("task type {name} registered twice");
        }
        info!(task_name = %name, "task type registered");
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<TaskType>> {
        self.types.get(name).map(|t| t.value().clone())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
