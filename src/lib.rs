//! # Stagehand
//!
//! Durable stage-dispatch task engine for long-running operations on
//! managed cloud resources.
//!
//! ## Overview
//!
//! A task is a persisted workflow instance composed of named stages. Each
//! stage handler performs one outbound action (a hypervisor call, a cloud
//! API request, a message to another service) and returns; the task stays
//! parked in the store until an external event resumes it through
//! `schedule_run`. Tasks can fan out child tasks and resume only when the
//! last child reports a terminal result, and can notify a remote parent
//! over HTTP when the caller lives in another process.
//!
//! ## Architecture
//!
//! - [`registry`] - task-type and object-manager registration
//! - [`models`] - the persisted record types (Task, SubTask, TaskObject,
//!   ArchivedTask) and the params envelope
//! - [`persistence`] - the store façade with memory, SQLite and
//!   PostgreSQL backends
//! - [`orchestration`] - the engine: stage executor, lifecycle API,
//!   subtask barrier, remote notifier, archiver
//! - [`execution`] - bounded worker pools with panic isolation
//! - [`events`] - in-process lifecycle event stream
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stagehand::{TaskEngine, TaskRequest, TaskType, UserCred};
//! use serde_json::json;
//!
//! # async fn example(manager: std::sync::Arc<dyn stagehand::ObjectManager>,
//! #                  guest: std::sync::Arc<dyn stagehand::ResourceObject>)
//! #     -> stagehand::Result<()> {
//! let engine = TaskEngine::builder()
//!     .register(TaskType::new("GuestRestartTask").stage(
//!         "on_init",
//!         |task, _objects, _body| {
//!             Box::pin(async move {
//!                 // issue the restart, then finish
//!                 task.set_stage_complete(None).await?;
//!                 Ok(())
//!             })
//!         },
//!     ))
//!     .object_manager(manager)
//!     .build()?;
//!
//! let request = TaskRequest::new("GuestRestartTask", UserCred::default())
//!     .with_param("force", json!(true));
//! let task = engine.new_task(&request, &guest).await?;
//! engine.schedule_run(&task.id, json!({})).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod execution;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod registry;

pub use config::{EngineConfig, PoolConfig};
pub use constants::{
    SubtaskStatus, MULTI_OBJECT_ID, STAGE_COMPLETE, STAGE_FAILED, STAGE_INIT,
};
pub use error::{EngineError, Result};
pub use events::{EventPublisher, PublishedEvent};
pub use execution::{PoolSnapshot, WorkerPool, WorkerPoolError};
pub use models::{
    ArchivedTaskRecord, SubTaskRecord, TaskObjectRecord, TaskParams, TaskRecord, UserCred,
};
pub use orchestration::{
    DeliveryReport, RemoteNotifier, TaskEngine, TaskEngineBuilder, TaskHandle, TaskRequest,
};
pub use persistence::{MemoryStore, PostgresStore, SqliteStore, StoreError, TaskStore};
pub use registry::{
    ObjectManager, ObjectRegistry, ResourceObject, StageFn, StageFuture, TaskRegistry, TaskType,
};
