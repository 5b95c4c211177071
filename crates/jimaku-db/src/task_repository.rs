//! SQLite implementation of the `TaskStorePort` trait.
//!
//! Status transition rules are enforced here, inside a transaction, so
//! every writer in every process sees the same gate. Writes to a single
//! task are serialized by the database; the last legal writer wins.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use jimaku_core::{
    EdgeKind, StoreError, TaskId, TaskRecord, TaskStatus, TaskStorePort, TaskType, TaskUpdate,
};

/// SQLite implementation of the `TaskStorePort` trait.
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStorePort for SqliteTaskStore {
    async fn create_task(
        &self,
        task_type: TaskType,
        source_url: Option<&str>,
    ) -> Result<TaskId, StoreError> {
        let record = TaskRecord::new(task_type, source_url.map(str::to_string));

        sqlx::query(
            r#"
            INSERT INTO tasks (task_id, status, task_type, progress, message, queued_at, source_url)
            VALUES (?, ?, ?, 0, '', ?, ?)
            "#,
        )
        .bind(record.task_id.to_string())
        .bind(record.status.as_str())
        .bind(task_type.as_str())
        .bind(record.queued_at.map(|t| t.to_rfc3339()))
        .bind(record.source_url.as_deref())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        tracing::info!(task_id = %record.task_id, task_type = task_type.as_str(), "created task");
        Ok(record.task_id)
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT task_id, status, task_type, progress, message, error,
                   output_ref, queued_at, started_at, completed_at, source_url
            FROM tasks WHERE task_id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.as_ref().map(row_to_task).transpose()
    }

    async fn update(&self, id: TaskId, update: TaskUpdate) -> Result<TaskStatus, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let row = sqlx::query("SELECT status, started_at, completed_at FROM tasks WHERE task_id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        let Some(row) = row else {
            return Err(StoreError::NotFound(id));
        };

        let prev = TaskStatus::parse(row.try_get::<String, _>("status").map_err(map_sqlx)?.as_str());
        let had_started: Option<String> = row.try_get("started_at").map_err(map_sqlx)?;
        let had_completed: Option<String> = row.try_get("completed_at").map_err(map_sqlx)?;

        // A non-empty error forces the status to Failed.
        let mut next_status = update.status;
        if update.error.as_deref().is_some_and(|e| !e.is_empty()) {
            next_status = Some(TaskStatus::Failed);
        }

        if let Some(next) = next_status {
            if !prev.can_transition_to(next) {
                return Err(StoreError::IllegalTransition { from: prev, to: next });
            }
        }
        let effective = next_status.unwrap_or(prev);

        // progress = 100 is reserved for Completed tasks.
        let progress = update.progress.map(|p| {
            let p = p.min(100);
            if p == 100 && effective != TaskStatus::Completed {
                99
            } else {
                p
            }
        });

        let now = Utc::now().to_rfc3339();
        let stamp_started = matches!(next_status, Some(TaskStatus::Running)) && had_started.is_none();
        let stamp_completed =
            next_status.is_some_and(|s| s.is_terminal()) && had_completed.is_none();

        sqlx::query(
            r#"
            UPDATE tasks SET
                status = COALESCE(?, status),
                progress = COALESCE(?, progress),
                message = COALESCE(?, message),
                error = COALESCE(?, error),
                output_ref = COALESCE(?, output_ref),
                started_at = COALESCE(started_at, ?),
                completed_at = COALESCE(completed_at, ?)
            WHERE task_id = ?
            "#,
        )
        .bind(next_status.map(|s| s.as_str()))
        .bind(progress.map(i64::from))
        .bind(update.message)
        .bind(update.error.filter(|e| !e.is_empty()))
        .bind(update.output_ref)
        .bind(stamp_started.then(|| now.clone()))
        .bind(stamp_completed.then(|| now.clone()))
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;

        tracing::debug!(
            task_id = %id,
            from = prev.as_str(),
            to = effective.as_str(),
            "updated task"
        );
        Ok(prev)
    }

    async fn set_edge(&self, from: TaskId, kind: EdgeKind, to: TaskId) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO task_edges (from_task, edge_kind, to_task, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(from_task, edge_kind) DO UPDATE SET to_task = excluded.to_task
            "#,
        )
        .bind(from.to_string())
        .bind(kind.as_str())
        .bind(to.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn get_edge(&self, from: TaskId, kind: EdgeKind) -> Result<Option<TaskId>, StoreError> {
        let row =
            sqlx::query("SELECT to_task FROM task_edges WHERE from_task = ? AND edge_kind = ?")
                .bind(from.to_string())
                .bind(kind.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;

        row.map(|r| {
            let to: String = r.try_get("to_task").map_err(map_sqlx)?;
            Uuid::parse_str(&to).map_err(|e| StoreError::Storage(format!("bad task id: {e}")))
        })
        .transpose()
    }

    async fn edges_by_kind(&self, kind: EdgeKind, to: TaskId) -> Result<Vec<TaskId>, StoreError> {
        let rows =
            sqlx::query("SELECT from_task FROM task_edges WHERE edge_kind = ? AND to_task = ?")
                .bind(kind.as_str())
                .bind(to.to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx)?;

        rows.iter()
            .map(|r| {
                let from: String = r.try_get("from_task").map_err(map_sqlx)?;
                Uuid::parse_str(&from)
                    .map_err(|e| StoreError::Storage(format!("bad task id: {e}")))
            })
            .collect()
    }

    async fn prune_completed(&self, older_than_days: u32) -> Result<u64, StoreError> {
        let cutoff = (Utc::now() - Duration::days(i64::from(older_than_days))).to_rfc3339();

        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        sqlx::query(
            r#"
            DELETE FROM task_edges WHERE from_task IN (
                SELECT task_id FROM tasks
                WHERE status IN ('completed', 'failed', 'cancelled') AND completed_at < ?
            ) OR to_task IN (
                SELECT task_id FROM tasks
                WHERE status IN ('completed', 'failed', 'cancelled') AND completed_at < ?
            )
            "#,
        )
        .bind(&cutoff)
        .bind(&cutoff)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let result = sqlx::query(
            r#"
            DELETE FROM tasks
            WHERE status IN ('completed', 'failed', 'cancelled') AND completed_at < ?
            "#,
        )
        .bind(&cutoff)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }
}

/// Convert a database row to a `TaskRecord`.
fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<TaskRecord, StoreError> {
    let task_id: String = row.try_get("task_id").map_err(map_sqlx)?;
    let status: String = row.try_get("status").map_err(map_sqlx)?;
    let task_type: String = row.try_get("task_type").map_err(map_sqlx)?;
    let progress: i64 = row.try_get("progress").map_err(map_sqlx)?;
    let message: String = row.try_get("message").map_err(map_sqlx)?;
    let error: Option<String> = row.try_get("error").map_err(map_sqlx)?;
    let output_ref: Option<String> = row.try_get("output_ref").map_err(map_sqlx)?;
    let queued_at: Option<String> = row.try_get("queued_at").map_err(map_sqlx)?;
    let started_at: Option<String> = row.try_get("started_at").map_err(map_sqlx)?;
    let completed_at: Option<String> = row.try_get("completed_at").map_err(map_sqlx)?;
    let source_url: Option<String> = row.try_get("source_url").map_err(map_sqlx)?;

    Ok(TaskRecord {
        task_id: Uuid::parse_str(&task_id)
            .map_err(|e| StoreError::Storage(format!("bad task id: {e}")))?,
        status: TaskStatus::parse(&status),
        task_type: TaskType::parse(&task_type)
            .ok_or_else(|| StoreError::Storage(format!("bad task type: {task_type}")))?,
        progress: u8::try_from(progress.clamp(0, 100)).unwrap_or(0),
        message,
        error,
        output_ref,
        queued_at: queued_at.as_deref().and_then(parse_ts),
        started_at: started_at.as_deref().and_then(parse_ts),
        completed_at: completed_at.as_deref().and_then(parse_ts),
        source_url,
    })
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn map_sqlx(e: sqlx::Error) -> StoreError {
    StoreError::Storage(e.to_string())
}
