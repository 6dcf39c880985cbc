//! # Task Parameter Envelope
//!
//! Every task carries a single persisted parameter blob composed of two
//! parts: the open key/value document supplied by the caller, and a
//! versioned block of engine-private metadata (parent linkage, stage
//! history, quota snapshot, upcall audit log). Keeping the two composed
//! rather than flattened into one map means a caller key can never
//! collide with engine housekeeping, while the storage layer still sees
//! one JSON column.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current metadata layout version, bumped on incompatible changes.
pub const ENGINE_META_VERSION: u32 = 1;

/// One persisted parameter blob: caller data plus engine metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskParams {
    /// Caller-supplied arguments, merged with `extra` on each stage
    /// transition. Opaque to the engine.
    pub data: Map<String, Value>,
    /// Engine-private housekeeping.
    pub engine: EngineMeta,
}

/// Engine-private task metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineMeta {
    /// Layout version of this block.
    pub version: u32,
    /// Id of the parent task awaiting this one, if any.
    pub parent_task_id: Option<String>,
    /// Callback URL of a remote parent, if any. Independent of
    /// `parent_task_id`; both may be set.
    pub parent_notify_url: Option<String>,
    /// Caller-supplied quota reservation snapshot.
    pub pending_usage: Option<Value>,
    /// Serialized ambient request context, persisted across dispatches.
    pub request_context: Option<Value>,
    /// Completed stages with completion timestamps, oldest first.
    pub stage_history: Vec<StageCheckpoint>,
    /// Inbound upcalls delivered through `perform_action`.
    pub upcalls: Vec<UpcallRecord>,
    /// Accumulated failure reasons; never truncated, so a repeated
    /// failure preserves its history.
    pub failure_reasons: Vec<String>,
}

impl Default for EngineMeta {
    fn default() -> Self {
        Self {
            version: ENGINE_META_VERSION,
            parent_task_id: None,
            parent_notify_url: None,
            pending_usage: None,
            request_context: None,
            stage_history: Vec::new(),
            upcalls: Vec::new(),
            failure_reasons: Vec::new(),
        }
    }
}

/// A completed stage and when it completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCheckpoint {
    pub stage: String,
    pub completed_at: DateTime<Utc>,
}

/// Audit record of one inbound upcall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcallRecord {
    pub received_at: DateTime<Utc>,
    /// `"ok"` or `"error"`, from the payload's status marker.
    pub status: String,
}

impl TaskParams {
    /// Build an envelope from caller data and parent linkage.
    pub fn new(
        data: Map<String, Value>,
        parent_task_id: Option<String>,
        parent_notify_url: Option<String>,
        request_context: Option<Value>,
        pending_usage: Option<Value>,
    ) -> Self {
        Self {
            data,
            engine: EngineMeta {
                parent_task_id,
                parent_notify_url,
                request_context,
                pending_usage,
                ..EngineMeta::default()
            },
        }
    }

    /// Merge extra caller keys into the data document, overwriting on
    /// collision.
    pub fn merge(&mut self, extra: Map<String, Value>) {
        for (k, v) in extra {
            self.data.insert(k, v);
        }
    }

    /// Record completion of `stage` at `at`.
    pub fn checkpoint_stage(&mut self, stage: &str, at: DateTime<Utc>) {
        self.engine.stage_history.push(StageCheckpoint {
            stage: stage.to_string(),
            completed_at: at,
        });
    }

    /// Joined failure reason history, newest last.
    pub fn failure_reason(&self) -> Option<String> {
        if self.engine.failure_reasons.is_empty() {
            None
        } else {
            Some(self.engine.failure_reasons.join("; "))
        }
    }
}
