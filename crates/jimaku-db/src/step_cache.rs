//! SQLite implementation of the `StepCachePort` trait.
//!
//! Values are opaque bytes with a unix-seconds expiry. Expired rows are
//! read as misses and deleted lazily on the next get.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use jimaku_core::{CacheError, StepCachePort};

/// SQLite implementation of the `StepCachePort` trait.
pub struct SqliteStepCache {
    pool: SqlitePool,
}

impl SqliteStepCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StepCachePort for SqliteStepCache {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let row =
            sqlx::query("SELECT value, expires_at FROM step_cache WHERE namespace = ? AND key = ?")
                .bind(namespace)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: i64 = row.try_get("expires_at").map_err(map_sqlx)?;
        if expires_at <= Utc::now().timestamp() {
            sqlx::query("DELETE FROM step_cache WHERE namespace = ? AND key = ?")
                .bind(namespace)
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
            return Ok(None);
        }

        let value: Vec<u8> = row.try_get("value").map_err(map_sqlx)?;
        Ok(Some(value))
    }

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = Utc::now().timestamp() + i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
            INSERT INTO step_cache (namespace, key, value, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(namespace, key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }
}

fn map_sqlx(e: sqlx::Error) -> CacheError {
    CacheError::Unavailable(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::setup_test_database;

    async fn cache() -> SqliteStepCache {
        SqliteStepCache::new(setup_test_database().await.unwrap())
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cache = cache().await;
        cache
            .put("asr", "abc123", b"segments", Duration::from_secs(3600))
            .await
            .unwrap();

        let value = cache.get("asr", "abc123").await.unwrap();
        assert_eq!(value.as_deref(), Some(b"segments".as_slice()));
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let cache = cache().await;
        assert!(cache.get("asr", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_namespaces_are_separate() {
        let cache = cache().await;
        cache
            .put("asr", "k", b"a", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.get("llm", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_read_as_miss() {
        let cache = cache().await;
        cache
            .put("llm", "old", b"v", Duration::from_secs(60))
            .await
            .unwrap();

        // Backdate the expiry.
        sqlx::query("UPDATE step_cache SET expires_at = 1 WHERE key = 'old'")
            .execute(&cache.pool)
            .await
            .unwrap();

        assert!(cache.get("llm", "old").await.unwrap().is_none());

        // The lazy delete removed the row.
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM step_cache WHERE key = 'old'")
            .fetch_one(&cache.pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let cache = cache().await;
        cache
            .put("llm", "k", b"first", Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .put("llm", "k", b"second", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            cache.get("llm", "k").await.unwrap().as_deref(),
            Some(b"second".as_slice())
        );
    }
}
