//! In-memory [`ContextBuffer`] for tests and single-process deployments.
//!
//! Each channel lives behind its own `Mutex`, so writes to one channel are
//! serialized while other channels proceed independently. Entries carry an
//! insertion sequence number that breaks timestamp ties during the trim.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::models::ContextMessage;

use super::{effective_max_age, BufferSettings, ChannelStats, ContextBuffer, EXTEND_TTL_BELOW_SECS};

struct Entry {
    seq: u64,
    message: ContextMessage,
}

struct Channel {
    entries: Vec<Entry>,
    next_seq: u64,
    expires_at: DateTime<Utc>,
}

impl Channel {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

pub struct MemoryBuffer {
    settings: BufferSettings,
    clock: Arc<dyn Clock>,
    channels: RwLock<HashMap<String, Arc<Mutex<Channel>>>>,
}

impl MemoryBuffer {
    pub fn new(settings: BufferSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: BufferSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &BufferSettings {
        &self.settings
    }

    fn channel(&self, channel_id: &str) -> Option<Arc<Mutex<Channel>>> {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        channels.get(channel_id).cloned()
    }

    fn channel_or_create(&self, channel_id: &str) -> Arc<Mutex<Channel>> {
        if let Some(ch) = self.channel(channel_id) {
            return ch;
        }
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(channel_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Channel {
                    entries: Vec::new(),
                    next_seq: 0,
                    expires_at: self.clock.now(),
                }))
            })
            .clone()
    }
}

impl Default for MemoryBuffer {
    fn default() -> Self {
        Self::new(BufferSettings::default())
    }
}

#[async_trait]
impl ContextBuffer for MemoryBuffer {
    async fn add(&self, channel_id: &str, message: &ContextMessage) -> Result<()> {
        let channel = self.channel_or_create(channel_id);
        let mut ch = channel.lock().unwrap_or_else(|e| e.into_inner());
        let now = self.clock.now();

        if ch.is_expired(now) {
            ch.entries.clear();
        }

        let seq = ch.next_seq;
        ch.next_seq += 1;
        ch.entries.push(Entry {
            seq,
            message: message.clone(),
        });

        ch.entries
            .sort_by(|a, b| (a.message.timestamp, a.seq).cmp(&(b.message.timestamp, b.seq)));
        let max = self.settings.max_messages_per_channel;
        if ch.entries.len() > max {
            let excess = ch.entries.len() - max;
            ch.entries.drain(..excess);
        }

        ch.expires_at = now + self.settings.ttl;
        Ok(())
    }

    async fn recent_context(&self, channel_id: &str, max_age: Duration) -> Result<Vec<ContextMessage>> {
        let Some(channel) = self.channel(channel_id) else {
            return Ok(Vec::new());
        };
        let ch = channel.lock().unwrap_or_else(|e| e.into_inner());
        let now = self.clock.now();
        if ch.is_expired(now) {
            return Ok(Vec::new());
        }

        let cutoff = now - effective_max_age(max_age, &self.settings);
        Ok(ch
            .entries
            .iter()
            .rev()
            .filter(|e| e.message.timestamp >= cutoff)
            .map(|e| e.message.clone())
            .collect())
    }

    async fn channel_stats(&self, channel_id: &str) -> Result<Option<ChannelStats>> {
        let Some(channel) = self.channel(channel_id) else {
            return Ok(None);
        };
        let ch = channel.lock().unwrap_or_else(|e| e.into_inner());
        let now = self.clock.now();
        if ch.is_expired(now) {
            return Ok(None);
        }

        Ok(Some(ChannelStats {
            channel_id: channel_id.to_string(),
            message_count: ch.entries.len(),
            ttl_remaining_secs: (ch.expires_at - now).num_seconds(),
            oldest: ch.entries.first().map(|e| e.message.timestamp),
            newest: ch.entries.last().map(|e| e.message.timestamp),
        }))
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        let before = channels.len();
        channels.retain(|_, ch| {
            let expired = ch.lock().unwrap_or_else(|e| e.into_inner()).is_expired(now);
            !expired
        });
        Ok(before - channels.len())
    }

    async fn extend_ttl(&self, channel_ids: &[String]) -> Result<usize> {
        let now = self.clock.now();
        let threshold = Duration::seconds(EXTEND_TTL_BELOW_SECS);
        let mut extended = 0;
        for id in channel_ids {
            let Some(channel) = self.channel(id) else {
                continue;
            };
            let mut ch = channel.lock().unwrap_or_else(|e| e.into_inner());
            if ch.is_expired(now) {
                continue;
            }
            if ch.expires_at - now < threshold {
                ch.expires_at = now + self.settings.ttl;
                extended += 1;
            }
        }
        Ok(extended)
    }
}
