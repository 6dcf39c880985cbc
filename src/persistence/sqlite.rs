//! SQLite-backed store.
//!
//! Queries are built at runtime so the crate compiles with no database
//! reachable. Timestamps are stored as RFC 3339 text with microsecond
//! precision; `updated_at` doubles as the optimistic-concurrency token
//! for `update_task`.

use crate::constants::{SubtaskStatus, STAGE_COMPLETE, STAGE_FAILED};
use crate::models::{ArchivedTaskRecord, SubTaskRecord, TaskObjectRecord, TaskRecord};
use crate::persistence::{StoreError, SubtaskCompletion, TaskMutator, TaskStore};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

const UPDATE_RETRIES: u32 = 5;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        task_name TEXT NOT NULL,
        obj_type TEXT NOT NULL,
        obj_id TEXT NOT NULL,
        obj_name TEXT NOT NULL,
        user_cred TEXT NOT NULL,
        params TEXT NOT NULL,
        stage TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subtasks (
        task_id TEXT NOT NULL,
        stage TEXT NOT NULL,
        subtask_id TEXT NOT NULL,
        status TEXT NOT NULL,
        result TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (task_id, stage, subtask_id)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_subtasks_parent_stage_status
        ON subtasks (task_id, stage, status)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_objects (
        task_id TEXT NOT NULL,
        obj_index INTEGER NOT NULL,
        obj_id TEXT NOT NULL,
        obj_name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (task_id, obj_index)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS archived_tasks (
        id TEXT PRIMARY KEY,
        task_name TEXT NOT NULL,
        obj_type TEXT NOT NULL,
        obj_ids TEXT NOT NULL,
        obj_names TEXT NOT NULL,
        project_id TEXT NOT NULL,
        domain_id TEXT NOT NULL,
        stage TEXT NOT NULL,
        failure_reason TEXT,
        succ_subtasks INTEGER NOT NULL,
        fail_subtasks INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        archived_at TEXT NOT NULL
    )
    "#,
];

/// SQLite-backed store provider.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool; the schema must already exist.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) a database file and bootstrap the
    /// schema.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path.as_ref().to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;
        Self::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Private in-memory database, handy for tests. Single connection so
    /// every query sees the same database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn ensure_schema(pool: &SqlitePool) -> Result<(), StoreError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(pool).await?;
        }
        Ok(())
    }
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(record: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            record: record.to_string(),
            details: format!("bad timestamp {raw:?}: {e}"),
        })
}

fn task_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<TaskRecord, StoreError> {
    let id: String = row.try_get("id")?;
    let record = format!("task {id}");
    Ok(TaskRecord {
        task_name: row.try_get("task_name")?,
        obj_type: row.try_get("obj_type")?,
        obj_id: row.try_get("obj_id")?,
        obj_name: row.try_get("obj_name")?,
        user_cred: serde_json::from_str(row.try_get::<String, _>("user_cred")?.as_str())?,
        params: serde_json::from_str(row.try_get::<String, _>("params")?.as_str())?,
        stage: row.try_get("stage")?,
        created_at: parse_ts(&record, row.try_get::<String, _>("created_at")?.as_str())?,
        updated_at: parse_ts(&record, row.try_get::<String, _>("updated_at")?.as_str())?,
        id,
    })
}

fn subtask_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SubTaskRecord, StoreError> {
    let task_id: String = row.try_get("task_id")?;
    let subtask_id: String = row.try_get("subtask_id")?;
    let record = format!("subtask {task_id}/{subtask_id}");
    let status_raw: String = row.try_get("status")?;
    let result_raw: Option<String> = row.try_get("result")?;
    Ok(SubTaskRecord {
        stage: row.try_get("stage")?,
        status: SubtaskStatus::from_str(&status_raw).map_err(|details| StoreError::Corrupt {
            record: record.clone(),
            details,
        })?,
        result: result_raw
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?,
        created_at: parse_ts(&record, row.try_get::<String, _>("created_at")?.as_str())?,
        updated_at: parse_ts(&record, row.try_get::<String, _>("updated_at")?.as_str())?,
        task_id,
        subtask_id,
    })
}

fn archived_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ArchivedTaskRecord, StoreError> {
    let id: String = row.try_get("id")?;
    let record = format!("archived task {id}");
    Ok(ArchivedTaskRecord {
        task_name: row.try_get("task_name")?,
        obj_type: row.try_get("obj_type")?,
        obj_ids: serde_json::from_str(row.try_get::<String, _>("obj_ids")?.as_str())?,
        obj_names: serde_json::from_str(row.try_get::<String, _>("obj_names")?.as_str())?,
        project_id: row.try_get("project_id")?,
        domain_id: row.try_get("domain_id")?,
        stage: row.try_get("stage")?,
        failure_reason: row.try_get("failure_reason")?,
        succ_subtasks: row.try_get("succ_subtasks")?,
        fail_subtasks: row.try_get("fail_subtasks")?,
        created_at: parse_ts(&record, row.try_get::<String, _>("created_at")?.as_str())?,
        archived_at: parse_ts(&record, row.try_get::<String, _>("archived_at")?.as_str())?,
        id,
    })
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn insert_task(&self, task: &TaskRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, task_name, obj_type, obj_id, obj_name,
                               user_cred, params, stage, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.task_name)
        .bind(&task.obj_type)
        .bind(&task.obj_id)
        .bind(&task.obj_name)
        .bind(serde_json::to_string(&task.user_cred)?)
        .bind(serde_json::to_string(&task.params)?)
        .bind(&task.stage)
        .bind(fmt_ts(task.created_at))
        .bind(fmt_ts(task.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn update_task(
        &self,
        id: &str,
        mutator: TaskMutator<'_>,
    ) -> Result<TaskRecord, StoreError> {
        for _ in 0..UPDATE_RETRIES {
            let mut task = self
                .get_task(id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
            let token = fmt_ts(task.updated_at);
            mutator(&mut task);
            task.updated_at = Utc::now();

            let result = sqlx::query(
                r#"
                UPDATE tasks
                SET task_name = ?, obj_type = ?, obj_id = ?, obj_name = ?,
                    user_cred = ?, params = ?, stage = ?, updated_at = ?
                WHERE id = ? AND updated_at = ?
                "#,
            )
            .bind(&task.task_name)
            .bind(&task.obj_type)
            .bind(&task.obj_id)
            .bind(&task.obj_name)
            .bind(serde_json::to_string(&task.user_cred)?)
            .bind(serde_json::to_string(&task.params)?)
            .bind(&task.stage)
            .bind(fmt_ts(task.updated_at))
            .bind(id)
            .bind(&token)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                return Ok(task);
            }
        }
        Err(StoreError::UpdateConflict {
            record: format!("task {id}"),
            attempts: UPDATE_RETRIES,
        })
    }

    async fn list_active_tasks(&self, limit: i64) -> Result<Vec<TaskRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE stage NOT IN (?, ?) ORDER BY created_at ASC LIMIT ?",
        )
        .bind(STAGE_COMPLETE)
        .bind(STAGE_FAILED)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn insert_subtask(&self, sub: &SubTaskRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO subtasks (task_id, stage, subtask_id, status, result,
                                  created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&sub.task_id)
        .bind(&sub.stage)
        .bind(&sub.subtask_id)
        .bind(sub.status.as_str())
        .bind(
            sub.result
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(fmt_ts(sub.created_at))
        .bind(fmt_ts(sub.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_subtask(
        &self,
        parent_id: &str,
        subtask_id: &str,
        status: SubtaskStatus,
        result: &Value,
    ) -> Result<Option<SubtaskCompletion>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT stage, status FROM subtasks WHERE task_id = ? AND subtask_id = ?",
        )
        .bind(parent_id)
        .bind(subtask_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let stage: String = row.try_get("stage")?;
        let current_raw: String = row.try_get("status")?;
        let current =
            SubtaskStatus::from_str(&current_raw).map_err(|details| StoreError::Corrupt {
                record: format!("subtask {parent_id}/{subtask_id}"),
                details,
            })?;
        if current.is_terminal() {
            return Ok(None);
        }

        sqlx::query(
            r#"
            UPDATE subtasks SET status = ?, result = ?, updated_at = ?
            WHERE task_id = ? AND stage = ? AND subtask_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(serde_json::to_string(result)?)
        .bind(fmt_ts(Utc::now()))
        .bind(parent_id)
        .bind(&stage)
        .bind(subtask_id)
        .execute(&mut *tx)
        .await?;

        let remaining_init: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM subtasks WHERE task_id = ? AND stage = ? AND status = ?",
        )
        .bind(parent_id)
        .bind(&stage)
        .bind(SubtaskStatus::Init.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

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
        let rows = sqlx::query(
            "SELECT * FROM subtasks WHERE task_id = ? AND stage = ? ORDER BY created_at ASC",
        )
        .bind(parent_id)
        .bind(stage)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(subtask_from_row).collect()
    }

    async fn subtask_status_counts(&self, parent_id: &str) -> Result<(i64, i64), StoreError> {
        let succ: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM subtasks WHERE task_id = ? AND status = ?",
        )
        .bind(parent_id)
        .bind(SubtaskStatus::Succ.as_str())
        .fetch_one(&self.pool)
        .await?;
        let fail: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM subtasks WHERE task_id = ? AND status = ?",
        )
        .bind(parent_id)
        .bind(SubtaskStatus::Fail.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok((succ, fail))
    }

    async fn insert_task_objects(&self, objs: &[TaskObjectRecord]) -> Result<(), StoreError> {
        for obj in objs {
            sqlx::query(
                r#"
                INSERT INTO task_objects (task_id, obj_index, obj_id, obj_name, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&obj.task_id)
            .bind(obj.obj_index)
            .bind(&obj.obj_id)
            .bind(&obj.obj_name)
            .bind(fmt_ts(obj.created_at))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn list_task_objects(
        &self,
        task_id: &str,
    ) -> Result<Vec<TaskObjectRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM task_objects WHERE task_id = ? ORDER BY obj_index ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let task_id: String = row.try_get("task_id")?;
                let record = format!("task object {task_id}");
                Ok(TaskObjectRecord {
                    obj_index: row.try_get("obj_index")?,
                    obj_id: row.try_get("obj_id")?,
                    obj_name: row.try_get("obj_name")?,
                    created_at: parse_ts(
                        &record,
                        row.try_get::<String, _>("created_at")?.as_str(),
                    )?,
                    task_id,
                })
            })
            .collect()
    }

    async fn insert_archived_task(&self, rec: &ArchivedTaskRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO archived_tasks (id, task_name, obj_type, obj_ids, obj_names,
                                        project_id, domain_id, stage, failure_reason,
                                        succ_subtasks, fail_subtasks, created_at, archived_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rec.id)
        .bind(&rec.task_name)
        .bind(&rec.obj_type)
        .bind(serde_json::to_string(&rec.obj_ids)?)
        .bind(serde_json::to_string(&rec.obj_names)?)
        .bind(&rec.project_id)
        .bind(&rec.domain_id)
        .bind(&rec.stage)
        .bind(&rec.failure_reason)
        .bind(rec.succ_subtasks)
        .bind(rec.fail_subtasks)
        .bind(fmt_ts(rec.created_at))
        .bind(fmt_ts(rec.archived_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_archived_tasks(
        &self,
        limit: i64,
    ) -> Result<Vec<ArchivedTaskRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM archived_tasks ORDER BY archived_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(archived_from_row).collect()
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(true)
    }
}
