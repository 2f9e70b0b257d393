//! Storage abstraction for decisions, thread participation, and gaps.
//!
//! The [`DecisionStore`] trait covers everything the pipeline persists,
//! enabling pluggable backends (SQLite in the app crate, in-memory here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::{Decision, DecisionType, EmbeddingStatus, Gap};

pub use memory::InMemoryDecisionStore;

/// Structured filter over the decision set. All set fields combine with
/// logical AND; results are always newest first.
#[derive(Debug, Clone, Default)]
pub struct DecisionQuery {
    /// Match decisions affecting any of these components. Empty means any.
    pub components: BTreeSet<String>,
    pub author_id: Option<String>,
    pub decision_type: Option<DecisionType>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub embedding_status: Option<EmbeddingStatus>,
    pub limit: Option<usize>,
}

impl DecisionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn components<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.components = components.into_iter().map(Into::into).collect();
        self
    }

    pub fn author(mut self, author_id: impl Into<String>) -> Self {
        self.author_id = Some(author_id.into());
        self
    }

    pub fn decision_type(mut self, decision_type: DecisionType) -> Self {
        self.decision_type = Some(decision_type);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn status(mut self, status: EmbeddingStatus) -> Self {
        self.embedding_status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `decision` satisfies every set filter. Ignores `limit`.
    pub fn matches(&self, decision: &Decision) -> bool {
        if !self.components.is_empty()
            && decision.affected_components.is_disjoint(&self.components)
        {
            return false;
        }
        if let Some(author) = &self.author_id {
            if &decision.author_id != author {
                return false;
            }
        }
        if let Some(t) = self.decision_type {
            if decision.decision_type != t {
                return false;
            }
        }
        if let Some(since) = self.since {
            if decision.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if decision.timestamp > until {
                return false;
            }
        }
        if let Some(status) = self.embedding_status {
            if decision.embedding_status != status {
                return false;
            }
        }
        true
    }
}

/// Outcome of [`DecisionStore::create_gap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapInsert {
    /// ID of the stored gap: the new one, or the existing one with the
    /// same fingerprint.
    pub gap_id: String,
    pub created: bool,
}

/// Decisions per embedding status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmbeddingCounts {
    pub pending: u64,
    pub embedded: u64,
    pub failed: u64,
}

impl EmbeddingCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.embedded + self.failed
    }
}

/// Abstract persistent store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_decision`](DecisionStore::create_decision) | Append a pending decision |
/// | [`query_decisions`](DecisionStore::query_decisions) | Structured filter, newest first |
/// | [`mark_embedded`](DecisionStore::mark_embedded) | `pending -> embedded` with vector |
/// | [`mark_failed`](DecisionStore::mark_failed) | `pending -> failed` |
/// | [`reset_failed`](DecisionStore::reset_failed) | `failed -> pending` |
/// | [`record_participant`](DecisionStore::record_participant) | Thread membership |
/// | [`create_gap`](DecisionStore::create_gap) | Idempotent by fingerprint |
/// | [`set_gap_priority`](DecisionStore::set_gap_priority) | Per-user triage annotation |
#[async_trait]
pub trait DecisionStore: Send + Sync {
    /// Insert a new decision. Decisions are append-only; reusing an ID is
    /// an error.
    async fn create_decision(&self, decision: &Decision) -> Result<()>;

    async fn get_decision(&self, decision_id: &str) -> Result<Option<Decision>>;

    async fn query_decisions(&self, query: &DecisionQuery) -> Result<Vec<Decision>>;

    /// Attach a vector and move `pending -> embedded`. Fails unless the
    /// vector has exactly `dims` entries.
    async fn mark_embedded(&self, decision_id: &str, vector: &[f32], dims: usize) -> Result<()>;

    async fn mark_failed(&self, decision_id: &str) -> Result<()>;

    async fn reset_failed(&self, decision_id: &str) -> Result<()>;

    /// Oldest pending decisions first, so a backfill makes steady progress.
    async fn pending_embeddings(&self, limit: usize) -> Result<Vec<Decision>>;

    async fn embedding_counts(&self) -> Result<EmbeddingCounts>;

    async fn record_participant(&self, thread_id: &str, user_id: &str) -> Result<()>;

    async fn thread_participants(&self, thread_id: &str) -> Result<BTreeSet<String>>;

    /// Store a gap unless one with the same fingerprint exists. Rejects
    /// gaps whose `related_decision_id` does not resolve.
    async fn create_gap(&self, gap: &Gap) -> Result<GapInsert>;

    /// Gaps created at or after `since`, oldest first. Rows referencing a
    /// missing decision are skipped.
    async fn list_gaps(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Gap>>;

    async fn set_gap_priority(&self, gap_id: &str, user_id: &str, priority: i64) -> Result<()>;

    async fn gap_priority(&self, gap_id: &str, user_id: &str) -> Result<Option<i64>>;
}

/// Shared transition check used by every backend.
pub fn check_transition(
    decision_id: &str,
    from: EmbeddingStatus,
    to: EmbeddingStatus,
) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(crate::error::CoreError::InvalidTransition {
            decision_id: decision_id.to_string(),
            from: from.as_str(),
            to: to.as_str(),
        })
    }
}

/// Reject vectors that do not have the configured dimension.
pub fn check_dims(decision_id: &str, vector: &[f32], dims: usize) -> Result<()> {
    if vector.len() != dims {
        return Err(crate::error::CoreError::Embedding(format!(
            "decision {} vector has {} dims, expected {}",
            decision_id,
            vector.len(),
            dims
        )));
    }
    Ok(())
}

/// Start of a lookback window of `window_days` ending at `now`.
///
/// Fails on windows shorter than one day or too long to represent.
pub fn window_start(now: DateTime<Utc>, window_days: i64) -> Result<DateTime<Utc>> {
    if window_days < 1 {
        return Err(crate::error::CoreError::Config(format!(
            "window must be at least 1 day, got {}",
            window_days
        )));
    }
    Duration::try_days(window_days)
        .and_then(|d| now.checked_sub_signed(d))
        .ok_or_else(|| crate::error::CoreError::Config(format!("window of {} days is out of range", window_days)))
}
