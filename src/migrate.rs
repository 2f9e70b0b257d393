//! Idempotent schema setup.
//!
//! All timestamps are Unix milliseconds. Entity sets are JSON arrays.
//! Vectors are little-endian `f32` BLOBs.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS decisions (
        id TEXT PRIMARY KEY,
        thread_id TEXT NOT NULL,
        ts INTEGER NOT NULL,
        author_id TEXT NOT NULL,
        decision_type TEXT NOT NULL,
        text TEXT NOT NULL,
        components_json TEXT NOT NULL DEFAULT '[]',
        requirements_json TEXT NOT NULL DEFAULT '[]',
        embedding_status TEXT NOT NULL DEFAULT 'pending',
        embedding BLOB,
        embedding_dims INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_decisions_ts ON decisions(ts)",
    "CREATE INDEX IF NOT EXISTS idx_decisions_author ON decisions(author_id)",
    "CREATE INDEX IF NOT EXISTS idx_decisions_status ON decisions(embedding_status, ts)",
    r#"
    CREATE TABLE IF NOT EXISTS decision_components (
        decision_id TEXT NOT NULL,
        component TEXT NOT NULL,
        PRIMARY KEY (decision_id, component),
        FOREIGN KEY (decision_id) REFERENCES decisions(id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_decision_components ON decision_components(component)",
    r#"
    CREATE TABLE IF NOT EXISTS thread_participants (
        thread_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        PRIMARY KEY (thread_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS gaps (
        id TEXT PRIMARY KEY,
        gap_type TEXT NOT NULL,
        severity TEXT NOT NULL,
        description TEXT NOT NULL,
        assignee_id TEXT NOT NULL,
        related_decision_id TEXT,
        recommendation TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        fingerprint TEXT NOT NULL UNIQUE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_gaps_created ON gaps(created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS gap_priorities (
        gap_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        priority INTEGER NOT NULL,
        PRIMARY KEY (gap_id, user_id),
        FOREIGN KEY (gap_id) REFERENCES gaps(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS buffer_channels (
        channel_id TEXT PRIMARY KEY,
        expires_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS buffer_messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        channel_id TEXT NOT NULL,
        message_id TEXT NOT NULL,
        ts INTEGER NOT NULL,
        message_json TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_buffer_messages_channel ON buffer_messages(channel_id, ts)",
];

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::debug!(statements = SCHEMA.len(), "schema applied");
    Ok(())
}
