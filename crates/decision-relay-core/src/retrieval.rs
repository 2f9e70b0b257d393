//! Two-stage hybrid retrieval over the decision store.
//!
//! # Algorithm
//!
//! 1. **Structured filter.** Query the store for embedded decisions that
//!    overlap the requested components, fall inside the time window, and
//!    match the optional author and type filters. Newest first, capped at
//!    `min(100, limit × 5)` candidates.
//! 2. **Semantic re-rank.** When query text is present, embed it and sort
//!    the candidates by cosine similarity (ties keep recency order), then
//!    truncate to `limit`. Blank query text skips this stage entirely and
//!    returns the stage-1 candidates by recency.
//!
//! Every call reports per-stage timings in [`RetrievalStats`]. Exceeding the
//! latency budget is logged and flagged but never fails the query.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::clock::Clock;
use crate::directory::OwnershipDirectory;
use crate::embedding::{cosine_similarity, embed_one, EmbeddingBackend};
use crate::error::Result;
use crate::models::{DecisionType, EmbeddingStatus, RetrievalResult};
use crate::store::{window_start, DecisionQuery, DecisionStore};

/// Hard cap on stage-1 candidates.
pub const MAX_CANDIDATES: usize = 100;

/// Stage-1 candidates fetched per requested result.
pub const CANDIDATE_MULTIPLIER: usize = 5;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalParams {
    pub budget_ms: u64,
    pub window_days: i64,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            budget_ms: 40,
            window_days: 30,
        }
    }
}

/// Optional stage-1 filters supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RetrievalFilters {
    /// Components to overlap. Empty means the asking user's owned
    /// components, or no component filter if they own none.
    pub components: BTreeSet<String>,
    pub author_id: Option<String>,
    pub decision_type: Option<DecisionType>,
    /// Overrides [`RetrievalParams::window_days`].
    pub window_days: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    SqlOnly,
    Hybrid,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SqlOnly => "sql_only",
            Self::Hybrid => "hybrid",
        }
    }
}

/// Per-call instrumentation.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalStats {
    pub total_ms: f64,
    pub filter_ms: f64,
    pub semantic_ms: f64,
    pub candidates_found: usize,
    pub final_results: usize,
    pub query_type: QueryType,
    pub budget_ms: u64,
    pub budget_exceeded: bool,
}

/// Stage-1 candidate cap for a requested result count.
pub fn candidate_cap(limit: usize) -> usize {
    limit.saturating_mul(CANDIDATE_MULTIPLIER).min(MAX_CANDIDATES)
}

pub struct HybridRetrieval {
    store: Arc<dyn DecisionStore>,
    embedder: Option<Arc<dyn EmbeddingBackend>>,
    directory: Arc<dyn OwnershipDirectory>,
    clock: Arc<dyn Clock>,
    params: RetrievalParams,
}

impl HybridRetrieval {
    pub fn new(
        store: Arc<dyn DecisionStore>,
        embedder: Option<Arc<dyn EmbeddingBackend>>,
        directory: Arc<dyn OwnershipDirectory>,
        clock: Arc<dyn Clock>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            store,
            embedder,
            directory,
            clock,
            params,
        }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Run both stages for `user_id`.
    pub async fn search(
        &self,
        user_id: &str,
        query_text: Option<&str>,
        filters: &RetrievalFilters,
        limit: usize,
    ) -> Result<(Vec<RetrievalResult>, RetrievalStats)> {
        let started = Instant::now();

        let components = if filters.components.is_empty() {
            self.directory.components_of(user_id)
        } else {
            filters.components.clone()
        };
        let window = filters.window_days.unwrap_or(self.params.window_days);
        let since = window_start(self.clock.now(), window)?;

        let mut query = DecisionQuery::new()
            .components(components)
            .since(since)
            .status(EmbeddingStatus::Embedded)
            .limit(candidate_cap(limit));
        query.author_id = filters.author_id.clone();
        query.decision_type = filters.decision_type;

        let candidates = self.store.query_decisions(&query).await?;
        let filter_ms = elapsed_ms(started);
        let candidates_found = candidates.len();

        let text = query_text.map(str::trim).filter(|t| !t.is_empty());
        let (results, query_type, semantic_ms) = match text {
            None => {
                let results: Vec<RetrievalResult> = candidates
                    .iter()
                    .take(limit)
                    .map(|d| RetrievalResult::from_decision(d, 0.0))
                    .collect();
                (results, QueryType::SqlOnly, 0.0)
            }
            Some(text) => {
                let semantic_started = Instant::now();
                let query_vec = self.embed_query(text).await;
                let mut scored: Vec<RetrievalResult> = candidates
                    .iter()
                    .map(|d| {
                        let sim = match (&query_vec, &d.embedding_vector) {
                            (Some(q), Some(v)) => cosine_similarity(q, v) as f64,
                            _ => 0.0,
                        };
                        RetrievalResult::from_decision(d, sim)
                    })
                    .collect();
                // Stable sort: equal scores keep stage-1 recency order.
                scored.sort_by(|a, b| {
                    b.similarity_score
                        .partial_cmp(&a.similarity_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                scored.truncate(limit);
                (scored, QueryType::Hybrid, elapsed_ms(semantic_started))
            }
        };

        let total_ms = elapsed_ms(started);
        let budget_exceeded = total_ms > self.params.budget_ms as f64;
        if budget_exceeded {
            tracing::warn!(
                total_ms,
                budget_ms = self.params.budget_ms,
                candidates = candidates_found,
                "retrieval exceeded latency budget"
            );
        }

        let stats = RetrievalStats {
            total_ms,
            filter_ms,
            semantic_ms,
            candidates_found,
            final_results: results.len(),
            query_type,
            budget_ms: self.params.budget_ms,
            budget_exceeded,
        };
        Ok((results, stats))
    }

    async fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        let Some(embedder) = &self.embedder else {
            tracing::warn!("no embedding backend configured; semantic scores default to 0");
            return None;
        };
        match embed_one(embedder.as_ref(), text).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed; semantic scores default to 0");
                None
            }
        }
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
