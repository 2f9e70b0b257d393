//! SQLite-backed [`ContextBuffer`].
//!
//! Lets separate `relay` processes share one live buffer through the
//! database. Each insert runs in a single transaction that clears a cold
//! channel, appends the message, trims to the newest N by timestamp, and
//! refreshes the channel TTL. Within one process, writes to the same
//! channel are additionally serialized by a per-channel async mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};

use decision_relay_core::buffer::{
    effective_max_age, BufferSettings, ChannelStats, ContextBuffer, EXTEND_TTL_BELOW_SECS,
};
use decision_relay_core::clock::{Clock, SystemClock};
use decision_relay_core::error::{CoreError, Result};
use decision_relay_core::models::ContextMessage;

pub struct SqliteBuffer {
    pool: SqlitePool,
    settings: BufferSettings,
    clock: Arc<dyn Clock>,
    writers: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SqliteBuffer {
    pub fn new(pool: SqlitePool, settings: BufferSettings) -> Self {
        Self::with_clock(pool, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: SqlitePool, settings: BufferSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            settings,
            clock,
            writers: Mutex::new(HashMap::new()),
        }
    }

    fn writer(&self, channel_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut writers = self.writers.lock().unwrap_or_else(|e| e.into_inner());
        writers
            .entry(channel_id.to_string())
            .or_default()
            .clone()
    }

    /// Expiry of a live channel, `None` when unknown or expired.
    async fn live_expiry(&self, channel_id: &str, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let expires_at: Option<i64> =
            sqlx::query_scalar("SELECT expires_at FROM buffer_channels WHERE channel_id = ?")
                .bind(channel_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err("read channel expiry"))?;
        Ok(expires_at
            .and_then(DateTime::from_timestamp_millis)
            .filter(|exp| now < *exp))
    }
}

fn db_err(op: &'static str) -> impl FnOnce(sqlx::Error) -> CoreError {
    move |e| CoreError::storage_with(format!("sqlite buffer: {} failed", op), e)
}

fn decode_message(raw: &str) -> Option<ContextMessage> {
    match serde_json::from_str(raw) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = %e, "skipping undecodable buffered message");
            None
        }
    }
}

#[async_trait]
impl ContextBuffer for SqliteBuffer {
    async fn add(&self, channel_id: &str, message: &ContextMessage) -> Result<()> {
        let writer = self.writer(channel_id);
        let _guard = writer.lock().await;

        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let payload = serde_json::to_string(message)
            .map_err(|e| CoreError::Inconsistency(format!("cannot encode message: {}", e)))?;

        let mut tx = self.pool.begin().await.map_err(db_err("begin"))?;

        // Cold channel: drop what is left before appending.
        sqlx::query(
            "DELETE FROM buffer_messages WHERE channel_id = ? AND EXISTS \
             (SELECT 1 FROM buffer_channels WHERE channel_id = ? AND expires_at <= ?)",
        )
        .bind(channel_id)
        .bind(channel_id)
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(db_err("clear expired channel"))?;

        sqlx::query(
            "INSERT INTO buffer_messages (channel_id, message_id, ts, message_json) VALUES (?, ?, ?, ?)",
        )
        .bind(channel_id)
        .bind(&message.message_id)
        .bind(message.timestamp.timestamp_millis())
        .bind(&payload)
        .execute(&mut *tx)
        .await
        .map_err(db_err("insert message"))?;

        sqlx::query(
            r#"
            DELETE FROM buffer_messages
            WHERE channel_id = ?
              AND seq NOT IN (
                  SELECT seq FROM buffer_messages
                  WHERE channel_id = ?
                  ORDER BY ts DESC, seq DESC
                  LIMIT ?
              )
            "#,
        )
        .bind(channel_id)
        .bind(channel_id)
        .bind(self.settings.max_messages_per_channel as i64)
        .execute(&mut *tx)
        .await
        .map_err(db_err("trim channel"))?;

        sqlx::query(
            "INSERT INTO buffer_channels (channel_id, expires_at) VALUES (?, ?) \
             ON CONFLICT(channel_id) DO UPDATE SET expires_at = excluded.expires_at",
        )
        .bind(channel_id)
        .bind((now + self.settings.ttl).timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(db_err("refresh channel ttl"))?;

        tx.commit().await.map_err(db_err("commit"))?;
        Ok(())
    }

    async fn recent_context(&self, channel_id: &str, max_age: Duration) -> Result<Vec<ContextMessage>> {
        let now = self.clock.now();
        if self.live_expiry(channel_id, now).await?.is_none() {
            return Ok(Vec::new());
        }

        let cutoff = now - effective_max_age(max_age, &self.settings);
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT message_json FROM buffer_messages WHERE channel_id = ? AND ts >= ? \
             ORDER BY ts DESC, seq DESC",
        )
        .bind(channel_id)
        .bind(cutoff.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("read recent context"))?;

        Ok(rows.iter().filter_map(|raw| decode_message(raw)).collect())
    }

    async fn channel_stats(&self, channel_id: &str) -> Result<Option<ChannelStats>> {
        let now = self.clock.now();
        let Some(expires_at) = self.live_expiry(channel_id, now).await? else {
            return Ok(None);
        };

        let row = sqlx::query(
            "SELECT COUNT(*) AS n, MIN(ts) AS oldest, MAX(ts) AS newest \
             FROM buffer_messages WHERE channel_id = ?",
        )
        .bind(channel_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err("channel stats"))?;

        let count: i64 = row.get("n");
        let oldest: Option<i64> = row.get("oldest");
        let newest: Option<i64> = row.get("newest");

        Ok(Some(ChannelStats {
            channel_id: channel_id.to_string(),
            message_count: count as usize,
            ttl_remaining_secs: (expires_at - now).num_seconds(),
            oldest: oldest.and_then(DateTime::from_timestamp_millis),
            newest: newest.and_then(DateTime::from_timestamp_millis),
        }))
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now_ms = self.clock.now().timestamp_millis();
        let mut tx = self.pool.begin().await.map_err(db_err("begin"))?;

        sqlx::query(
            "DELETE FROM buffer_messages WHERE channel_id IN \
             (SELECT channel_id FROM buffer_channels WHERE expires_at <= ?)",
        )
        .bind(now_ms)
        .execute(&mut *tx)
        .await
        .map_err(db_err("purge messages"))?;

        let removed = sqlx::query("DELETE FROM buffer_channels WHERE expires_at <= ?")
            .bind(now_ms)
            .execute(&mut *tx)
            .await
            .map_err(db_err("purge channels"))?
            .rows_affected();

        tx.commit().await.map_err(db_err("commit"))?;
        if removed > 0 {
            tracing::debug!(channels = removed, "purged expired buffer channels");
        }
        Ok(removed as usize)
    }

    async fn extend_ttl(&self, channel_ids: &[String]) -> Result<usize> {
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let threshold_ms = (now + Duration::seconds(EXTEND_TTL_BELOW_SECS)).timestamp_millis();
        let new_expiry = (now + self.settings.ttl).timestamp_millis();

        let mut extended = 0;
        for id in channel_ids {
            let result = sqlx::query(
                "UPDATE buffer_channels SET expires_at = ? \
                 WHERE channel_id = ? AND expires_at > ? AND expires_at < ?",
            )
            .bind(new_expiry)
            .bind(id)
            .bind(now_ms)
            .bind(threshold_ms)
            .execute(&self.pool)
            .await
            .map_err(db_err("extend ttl"))?;
            extended += result.rows_affected() as usize;
        }
        Ok(extended)
    }
}
