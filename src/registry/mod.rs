//! Component registration and discovery.

pub mod object_registry;
pub mod task_registry;

pub use object_registry::{ObjectManager, ObjectRegistry, ResourceObject};
pub use task_registry::{StageFn, StageFuture, TaskRegistry, TaskType};
