//! Database setup and initialization.
//!
//! Entry points call `setup_database()` with the resolved database path;
//! the full schema is created with `IF NOT EXISTS`, so calling it on an
//! existing database is a no-op.

use anyhow::Result;
use sqlx::{SqlitePool, sqlite::SqliteConnectOptions};
use std::path::Path;

/// Sets up the SQLite database connection and ensures the schema exists.
///
/// Creates the database file (and parent directory) if missing, then
/// creates all tables and indexes.
///
/// # Errors
///
/// Returns an error if the file cannot be opened/created or schema
/// creation fails.
pub async fn setup_database(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pool = SqlitePool::connect_with(
        SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true),
    )
    .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Sets up an in-memory SQLite database for testing, with the full
/// production schema.
#[cfg(any(test, feature = "test-utils"))]
pub async fn setup_test_database() -> Result<SqlitePool> {
    let pool = SqlitePool::connect("sqlite::memory:").await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Creates the complete database schema.
///
/// Safe to call multiple times: all operations use `IF NOT EXISTS`.
async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Task rows. Timestamps are RFC 3339 text.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            task_id TEXT PRIMARY KEY NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            task_type TEXT NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            message TEXT NOT NULL DEFAULT '',
            error TEXT,
            output_ref TEXT,
            queued_at TEXT,
            started_at TEXT,
            completed_at TEXT,
            source_url TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)")
        .execute(pool)
        .await?;

    // Typed directed edges between tasks, unique per (from, kind).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_edges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            from_task TEXT NOT NULL,
            edge_kind TEXT NOT NULL,
            to_task TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_edges_from_kind ON task_edges(from_task, edge_kind)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_edges_to ON task_edges(to_task, edge_kind)")
        .execute(pool)
        .await?;

    // Step cache: opaque bytes with unix-seconds expiry.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS step_cache (
            namespace TEXT NOT NULL,
            key TEXT NOT NULL,
            value BLOB NOT NULL,
            expires_at INTEGER NOT NULL,
            PRIMARY KEY (namespace, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Work queue: rows are leasable when visible_at has passed and any
    // lease has expired. `attempt` counts deliveries, not enqueues.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS work_units (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            queue TEXT NOT NULL,
            task_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            attempt INTEGER NOT NULL DEFAULT 0,
            visible_at INTEGER NOT NULL,
            lease_expires_at INTEGER,
            enqueued_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_work_units_queue ON work_units(queue, visible_at)",
    )
    .execute(pool)
    .await?;

    // Dead-letter log for units whose retries exhausted.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dead_letters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            queue TEXT NOT NULL,
            task_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            attempt INTEGER NOT NULL,
            error TEXT NOT NULL,
            dead_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
