//! In-memory store backend.
//!
//! The default for tests and embedded use. All compound operations run
//! under one write lock, which trivially satisfies the atomicity the
//! subtask barrier requires.

use crate::constants::{is_terminal_stage, SubtaskStatus};
use crate::models::{ArchivedTaskRecord, SubTaskRecord, TaskObjectRecord, TaskRecord};
use crate::persistence::{StoreError, SubtaskCompletion, TaskMutator, TaskStore};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, TaskRecord>,
    subtasks: Vec<SubTaskRecord>,
    task_objects: Vec<TaskObjectRecord>,
    archived: Vec<ArchivedTaskRecord>,
}

/// Process-local store over plain maps.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert_task(&self, task: &TaskRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.tasks.contains_key(&task.id) {
            return Err(StoreError::Duplicate(format!("task {}", task.id)));
        }
        inner.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.inner.read().tasks.get(id).cloned())
    }

    async fn update_task(
        &self,
        id: &str,
        mutator: TaskMutator<'_>,
    ) -> Result<TaskRecord, StoreError> {
        let mut inner = self.inner.write();
        let task = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
        mutator(task);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn list_active_tasks(&self, limit: i64) -> Result<Vec<TaskRecord>, StoreError> {
        let inner = self.inner.read();
        let mut active: Vec<TaskRecord> = inner
            .tasks
            .values()
            .filter(|t| !is_terminal_stage(&t.stage))
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        active.truncate(limit.max(0) as usize);
        Ok(active)
    }

    async fn insert_subtask(&self, sub: &SubTaskRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner
            .subtasks
            .iter()
            .any(|s| s.task_id == sub.task_id && s.stage == sub.stage && s.subtask_id == sub.subtask_id)
        {
            return Err(StoreError::Duplicate(format!(
                "subtask {}/{}/{}",
                sub.task_id, sub.stage, sub.subtask_id
            )));
        }
        inner.subtasks.push(sub.clone());
        Ok(())
    }

    async fn complete_subtask(
        &self,
        parent_id: &str,
        subtask_id: &str,
        status: SubtaskStatus,
        result: &Value,
    ) -> Result<Option<SubtaskCompletion>, StoreError> {
        let mut inner = self.inner.write();
        let Some(row) = inner
            .subtasks
            .iter_mut()
            .find(|s| s.task_id == parent_id && s.subtask_id == subtask_id)
        else {
            return Ok(None);
        };
        if row.status.is_terminal() {
            return Ok(None);
        }
        row.status = status;
        row.result = Some(result.clone());
        row.updated_at = Utc::now();
        let stage = row.stage.clone();

        let remaining_init = inner
            .subtasks
            .iter()
            .filter(|s| {
                s.task_id == parent_id && s.stage == stage && s.status == SubtaskStatus::Init
            })
            .count() as i64;

        Ok(Some(SubtaskCompletion {
            stage,
            remaining_init,
        }))
    }

    async fn list_subtasks(
        &self,
        parent_id: &str,
        stage: &str,
    ) -> Result<Vec<SubTaskRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .subtasks
            .iter()
            .filter(|s| s.task_id == parent_id && s.stage == stage)
            .cloned()
            .collect())
    }

    async fn subtask_status_counts(&self, parent_id: &str) -> Result<(i64, i64), StoreError> {
        let inner = self.inner.read();
        let mut succ = 0;
        let mut fail = 0;
        for s in inner.subtasks.iter().filter(|s| s.task_id == parent_id) {
            match s.status {
                SubtaskStatus::Succ => succ += 1,
                SubtaskStatus::Fail => fail += 1,
                SubtaskStatus::Init => {}
            }
        }
        Ok((succ, fail))
    }

    async fn insert_task_objects(&self, objs: &[TaskObjectRecord]) -> Result<(), StoreError> {
        self.inner.write().task_objects.extend_from_slice(objs);
        Ok(())
    }

    async fn list_task_objects(
        &self,
        task_id: &str,
    ) -> Result<Vec<TaskObjectRecord>, StoreError> {
        let mut rows: Vec<TaskObjectRecord> = self
            .inner
            .read()
            .task_objects
            .iter()
            .filter(|o| o.task_id == task_id)
            .cloned()
            .collect();
        rows.sort_by_key(|o| o.obj_index);
        Ok(rows)
    }

    async fn insert_archived_task(&self, rec: &ArchivedTaskRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.archived.iter().any(|a| a.id == rec.id) {
            return Err(StoreError::Duplicate(format!("archived task {}", rec.id)));
        }
        inner.archived.push(rec.clone());
        Ok(())
    }

    async fn list_archived_tasks(
        &self,
        limit: i64,
    ) -> Result<Vec<ArchivedTaskRecord>, StoreError> {
        let inner = self.inner.read();
        let mut rows = inner.archived.clone();
        rows.sort_by(|a, b| b.archived_at.cmp(&a.archived_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::STAGE_INIT;
    use crate::models::{TaskParams, UserCred};
    use serde_json::json;

    fn sample_task(id: &str) -> TaskRecord {
        let now = Utc::now();
        TaskRecord {
            id: id.to_string(),
            task_name: "SampleTask".to_string(),
            obj_type: "guest".to_string(),
            obj_id: "g-1".to_string(),
            obj_name: "vm-1".to_string(),
            user_cred: UserCred::default(),
            params: TaskParams::default(),
            stage: STAGE_INIT.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn task_insert_get_update() {
        let store = MemoryStore::new();
        store.insert_task(&sample_task("t1")).await.unwrap();
        assert!(store.insert_task(&sample_task("t1")).await.is_err());

        let updated = store
            .update_task("t1", &|t| t.stage = "deploy".to_string())
            .await
            .unwrap();
        assert_eq!(updated.stage, "deploy");
        assert_eq!(store.get_task("t1").await.unwrap().unwrap().stage, "deploy");
        assert!(store.get_task("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subtask_completion_is_terminal_and_counted() {
        let store = MemoryStore::new();
        for child in ["c1", "c2"] {
            store
                .insert_subtask(&SubTaskRecord::new(
                    "p1".to_string(),
                    "wait_children".to_string(),
                    child.to_string(),
                ))
                .await
                .unwrap();
        }

        let first = store
            .complete_subtask("p1", "c1", SubtaskStatus::Succ, &json!({"ok": true}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.remaining_init, 1);

        // Second terminal mutation of the same row is rejected.
        assert!(store
            .complete_subtask("p1", "c1", SubtaskStatus::Fail, &json!({}))
            .await
            .unwrap()
            .is_none());

        let last = store
            .complete_subtask("p1", "c2", SubtaskStatus::Fail, &json!({"ok": false}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.remaining_init, 0);

        assert_eq!(store.subtask_status_counts("p1").await.unwrap(), (1, 1));
    }

    #[tokio::test]
    async fn task_objects_keep_input_order() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let rows: Vec<TaskObjectRecord> = (0..3)
            .map(|i| TaskObjectRecord {
                task_id: "t1".to_string(),
                obj_index: i,
                obj_id: format!("obj-{i}"),
                obj_name: format!("name-{i}"),
                created_at: now,
            })
            .collect();
        store.insert_task_objects(&rows).await.unwrap();

        let listed = store.list_task_objects("t1").await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|o| o.obj_id.as_str()).collect();
        assert_eq!(ids, vec!["obj-0", "obj-1", "obj-2"]);
    }
}
