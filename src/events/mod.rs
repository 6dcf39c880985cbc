pub mod publisher;

// Re-export key types for convenience
pub use publisher::{EventPublisher, PublishedEvent};

/// Lifecycle event names published by the engine.
pub mod names {
    pub const TASK_CREATED: &str = "task.created";
    pub const TASK_STAGE_COMPLETED: &str = "task.stage_completed";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_ARCHIVED: &str = "task.archived";
}
