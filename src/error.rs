//! Structured error handling for the engine.
//!
//! Configuration mistakes (unregistered task types, missing stage
//! handlers, unresolvable objects) are never surfaced through this type to
//! business code; the engine converts them into a `failed` task with a
//! diagnostic reason. `EngineError` covers the operations callers invoke
//! directly: task creation, scheduling and store access.

use crate::execution::worker_pool::WorkerPoolError;
use crate::persistence::StoreError;

/// Errors returned by the engine's public operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("task type not registered: {0}")]
    UnregisteredTaskType(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("worker pool error: {0}")]
    Pool(#[from] WorkerPoolError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("pending usage not found for task {0}")]
    PendingUsageNotFound(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
