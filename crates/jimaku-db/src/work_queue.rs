//! SQLite implementation of the `WorkQueuePort` trait.
//!
//! A leased SQL queue: rows become leasable when `visible_at` has
//! passed and no unexpired lease holds them. Leasing stamps
//! `lease_expires_at` and increments `attempt` in one statement, so a
//! worker that dies mid-lease simply lets the unit surface again after
//! the visibility timeout with the next attempt number.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use jimaku_core::{LeasedUnit, QueueError, TaskId, WorkKind, WorkQueuePort, WorkUnit};

/// SQLite implementation of the `WorkQueuePort` trait.
pub struct SqliteWorkQueue {
    pool: SqlitePool,
}

impl SqliteWorkQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of entries currently in the dead-letter log (test/ops hook).
    pub async fn dead_letter_count(&self) -> Result<u64, QueueError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(u64::try_from(row.0).unwrap_or(0))
    }
}

#[async_trait]
impl WorkQueuePort for SqliteWorkQueue {
    async fn enqueue(
        &self,
        kind: WorkKind,
        task_id: TaskId,
        payload: serde_json::Value,
    ) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            INSERT INTO work_units (queue, task_id, payload, attempt, visible_at, enqueued_at)
            VALUES (?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(kind.queue_name())
        .bind(task_id.to_string())
        .bind(payload.to_string())
        .bind(Utc::now().timestamp())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        tracing::debug!(queue = kind.queue_name(), task_id = %task_id, "enqueued work unit");
        Ok(())
    }

    async fn lease(
        &self,
        kind: WorkKind,
        visibility: Duration,
    ) -> Result<Option<LeasedUnit>, QueueError> {
        let now = Utc::now().timestamp();
        let lease_until = now + i64::try_from(visibility.as_secs()).unwrap_or(i64::MAX);

        // One statement claims the oldest leasable row; concurrent
        // leasers are serialized by the database write lock.
        let row = sqlx::query(
            r#"
            UPDATE work_units
            SET lease_expires_at = ?, attempt = attempt + 1
            WHERE id = (
                SELECT id FROM work_units
                WHERE queue = ?
                  AND visible_at <= ?
                  AND (lease_expires_at IS NULL OR lease_expires_at <= ?)
                ORDER BY id
                LIMIT 1
            )
            RETURNING id, task_id, payload, attempt
            "#,
        )
        .bind(lease_until)
        .bind(kind.queue_name())
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lease_id: i64 = row.try_get("id").map_err(map_sqlx)?;
        let task_id: String = row.try_get("task_id").map_err(map_sqlx)?;
        let payload: String = row.try_get("payload").map_err(map_sqlx)?;
        let attempt: i64 = row.try_get("attempt").map_err(map_sqlx)?;

        Ok(Some(LeasedUnit {
            lease_id,
            unit: WorkUnit {
                kind,
                task_id: Uuid::parse_str(&task_id)
                    .map_err(|e| QueueError::Payload(format!("bad task id: {e}")))?,
                attempt: u32::try_from(attempt).unwrap_or(u32::MAX),
                payload: serde_json::from_str(&payload)
                    .map_err(|e| QueueError::Payload(e.to_string()))?,
            },
        }))
    }

    async fn ack(&self, lease_id: i64) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM work_units WHERE id = ?")
            .bind(lease_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn nack(&self, lease_id: i64, retry_after: Duration) -> Result<u32, QueueError> {
        let visible_at =
            Utc::now().timestamp() + i64::try_from(retry_after.as_secs()).unwrap_or(i64::MAX);

        let row = sqlx::query(
            r#"
            UPDATE work_units SET visible_at = ?, lease_expires_at = NULL
            WHERE id = ?
            RETURNING attempt
            "#,
        )
        .bind(visible_at)
        .bind(lease_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let attempt: i64 = row
            .ok_or_else(|| QueueError::Storage(format!("unknown lease {lease_id}")))?
            .try_get("attempt")
            .map_err(map_sqlx)?;
        Ok(u32::try_from(attempt).unwrap_or(u32::MAX) + 1)
    }

    async fn dead_letter(&self, lease_id: i64, error: &str) -> Result<(), QueueError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        sqlx::query(
            r#"
            INSERT INTO dead_letters (queue, task_id, payload, attempt, error, dead_at)
            SELECT queue, task_id, payload, attempt, ?, ? FROM work_units WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(lease_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        sqlx::query("DELETE FROM work_units WHERE id = ?")
            .bind(lease_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;

        tracing::warn!(lease_id, error, "work unit moved to dead-letter log");
        Ok(())
    }
}

fn map_sqlx(e: sqlx::Error) -> QueueError {
    QueueError::Storage(e.to_string())
}
