//! # Orchestration Engine
//!
//! The stage-dispatch state machine and everything that drives it: task
//! creation, the lifecycle API handed to stage handlers, the parent/child
//! completion barrier, remote callback delivery and terminal archival.
//!
//! Control flow in one line: a trigger creates a task and calls
//! `schedule_run`; the stage executor dispatches to the task type's
//! handler for the current stage; the handler issues its outbound action
//! and returns; some later event calls `schedule_run` again. The task is
//! a continuation persisted between every hop.

pub mod engine;
pub mod lifecycle;
pub mod remote_notifier;
pub mod stage_executor;
pub mod subtask_tracker;
pub mod task_finalizer;
pub mod task_initializer;

pub use engine::{TaskEngine, TaskEngineBuilder};
pub use lifecycle::TaskHandle;
pub use remote_notifier::{DeliveryReport, RemoteNotifier, TASK_ID_HEADER};
pub use task_initializer::TaskRequest;
