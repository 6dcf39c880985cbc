//! Member-object rows for multi-object tasks.
//!
//! The set of rows for a task is written once at creation and immutable
//! afterwards; `obj_index` preserves the caller's input order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One member object of a multi-object task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskObjectRecord {
    pub task_id: String,
    /// Position in the caller-supplied object list.
    pub obj_index: i64,
    pub obj_id: String,
    pub obj_name: String,
    pub created_at: DateTime<Utc>,
}
