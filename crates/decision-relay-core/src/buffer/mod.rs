//! Live context buffer: a per-channel, size- and time-bounded window of
//! recent messages.
//!
//! Two mechanisms bound each channel independently:
//!
//! - **Rank trim**: after every insert only the newest
//!   `max_messages_per_channel` entries (by message timestamp) survive.
//! - **Channel TTL**: every insert refreshes the channel's expiry to
//!   `now + ttl`. A channel that sees no writes for `ttl` goes cold and
//!   returns nothing.
//!
//! Writes to one channel are serialized by each backend so concurrent
//! writers cannot reorder the "keep newest N" trim.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::ContextMessage;

pub use memory::MemoryBuffer;

/// Default number of messages retained per channel.
pub const DEFAULT_MAX_MESSAGES_PER_CHANNEL: usize = 30;

/// Default channel TTL in seconds (two hours).
pub const DEFAULT_TTL_SECS: i64 = 7200;

/// Channels with less than this much TTL left are refreshed by
/// [`ContextBuffer::extend_ttl`].
pub const EXTEND_TTL_BELOW_SECS: i64 = 3600;

/// Bounds applied to every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSettings {
    pub max_messages_per_channel: usize,
    pub ttl: Duration,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            max_messages_per_channel: DEFAULT_MAX_MESSAGES_PER_CHANNEL,
            ttl: Duration::seconds(DEFAULT_TTL_SECS),
        }
    }
}

/// Snapshot of one channel's buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStats {
    pub channel_id: String,
    pub message_count: usize,
    pub ttl_remaining_secs: i64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Storage backend for the live context buffer.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](ContextBuffer::add) | Insert, trim to newest N, refresh TTL |
/// | [`recent_context`](ContextBuffer::recent_context) | Newest-first window |
/// | [`channel_stats`](ContextBuffer::channel_stats) | Count, TTL, time span |
/// | [`purge_expired`](ContextBuffer::purge_expired) | Drop cold channels |
/// | [`extend_ttl`](ContextBuffer::extend_ttl) | Refresh nearly-cold channels |
#[async_trait]
pub trait ContextBuffer: Send + Sync {
    async fn add(&self, channel_id: &str, message: &ContextMessage) -> Result<()>;

    /// Messages newer than `now - max_age`, newest first.
    ///
    /// Never returns anything from an expired channel, and never an entry
    /// older than the configured TTL even when `max_age` is larger.
    async fn recent_context(&self, channel_id: &str, max_age: Duration) -> Result<Vec<ContextMessage>>;

    /// `None` when the channel is unknown or expired.
    async fn channel_stats(&self, channel_id: &str) -> Result<Option<ChannelStats>>;

    /// Remove every channel whose TTL has elapsed. Returns the count removed.
    async fn purge_expired(&self) -> Result<usize>;

    /// Refresh the TTL of live channels with less than an hour remaining.
    /// Returns the count refreshed.
    async fn extend_ttl(&self, channel_ids: &[String]) -> Result<usize>;
}

/// Effective lookback for [`ContextBuffer::recent_context`].
pub fn effective_max_age(max_age: Duration, settings: &BufferSettings) -> Duration {
    if max_age > settings.ttl {
        settings.ttl
    } else {
        max_age
    }
}
