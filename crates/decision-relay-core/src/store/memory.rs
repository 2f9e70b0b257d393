//! In-memory [`DecisionStore`] for tests and embedded use.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Queries are linear scans, which is fine at test scale.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{CoreError, Result};
use crate::models::{Decision, EmbeddingStatus, Gap};

use super::{check_dims, check_transition, DecisionQuery, DecisionStore, EmbeddingCounts, GapInsert};

/// In-memory store for tests and single-process use.
pub struct InMemoryDecisionStore {
    decisions: RwLock<HashMap<String, Decision>>,
    participants: RwLock<HashMap<String, BTreeSet<String>>>,
    gaps: RwLock<Vec<Gap>>,
    priorities: RwLock<HashMap<(String, String), i64>>,
}

impl InMemoryDecisionStore {
    pub fn new() -> Self {
        Self {
            decisions: RwLock::new(HashMap::new()),
            participants: RwLock::new(HashMap::new()),
            gaps: RwLock::new(Vec::new()),
            priorities: RwLock::new(HashMap::new()),
        }
    }

    fn transition(
        &self,
        decision_id: &str,
        to: EmbeddingStatus,
        vector: Option<Vec<f32>>,
    ) -> Result<()> {
        let mut decisions = self.decisions.write().map_err(poisoned)?;
        let decision = decisions
            .get_mut(decision_id)
            .ok_or_else(|| CoreError::Inconsistency(format!("decision not found: {}", decision_id)))?;
        check_transition(decision_id, decision.embedding_status, to)?;
        decision.embedding_status = to;
        decision.embedding_vector = vector;
        Ok(())
    }
}

impl Default for InMemoryDecisionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> CoreError {
    CoreError::storage("in-memory store lock poisoned")
}

fn newest_first(a: &Decision, b: &Decision) -> std::cmp::Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then_with(|| a.decision_id.cmp(&b.decision_id))
}

#[async_trait]
impl DecisionStore for InMemoryDecisionStore {
    async fn create_decision(&self, decision: &Decision) -> Result<()> {
        let mut decisions = self.decisions.write().map_err(poisoned)?;
        if decisions.contains_key(&decision.decision_id) {
            return Err(CoreError::Inconsistency(format!(
                "decision already exists: {}",
                decision.decision_id
            )));
        }
        decisions.insert(decision.decision_id.clone(), decision.clone());
        Ok(())
    }

    async fn get_decision(&self, decision_id: &str) -> Result<Option<Decision>> {
        let decisions = self.decisions.read().map_err(poisoned)?;
        Ok(decisions.get(decision_id).cloned())
    }

    async fn query_decisions(&self, query: &DecisionQuery) -> Result<Vec<Decision>> {
        let decisions = self.decisions.read().map_err(poisoned)?;
        let mut out: Vec<Decision> = decisions
            .values()
            .filter(|d| query.matches(d))
            .cloned()
            .collect();
        out.sort_by(newest_first);
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn mark_embedded(&self, decision_id: &str, vector: &[f32], dims: usize) -> Result<()> {
        check_dims(decision_id, vector, dims)?;
        self.transition(decision_id, EmbeddingStatus::Embedded, Some(vector.to_vec()))
    }

    async fn mark_failed(&self, decision_id: &str) -> Result<()> {
        self.transition(decision_id, EmbeddingStatus::Failed, None)
    }

    async fn reset_failed(&self, decision_id: &str) -> Result<()> {
        self.transition(decision_id, EmbeddingStatus::Pending, None)
    }

    async fn pending_embeddings(&self, limit: usize) -> Result<Vec<Decision>> {
        let decisions = self.decisions.read().map_err(poisoned)?;
        let mut out: Vec<Decision> = decisions
            .values()
            .filter(|d| d.embedding_status == EmbeddingStatus::Pending)
            .cloned()
            .collect();
        out.sort_by(|a, b| newest_first(b, a));
        out.truncate(limit);
        Ok(out)
    }

    async fn embedding_counts(&self) -> Result<EmbeddingCounts> {
        let decisions = self.decisions.read().map_err(poisoned)?;
        let mut counts = EmbeddingCounts::default();
        for d in decisions.values() {
            match d.embedding_status {
                EmbeddingStatus::Pending => counts.pending += 1,
                EmbeddingStatus::Embedded => counts.embedded += 1,
                EmbeddingStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn record_participant(&self, thread_id: &str, user_id: &str) -> Result<()> {
        let mut participants = self.participants.write().map_err(poisoned)?;
        participants
            .entry(thread_id.to_string())
            .or_default()
            .insert(user_id.to_string());
        Ok(())
    }

    async fn thread_participants(&self, thread_id: &str) -> Result<BTreeSet<String>> {
        let participants = self.participants.read().map_err(poisoned)?;
        Ok(participants.get(thread_id).cloned().unwrap_or_default())
    }

    async fn create_gap(&self, gap: &Gap) -> Result<GapInsert> {
        if let Some(related) = &gap.related_decision_id {
            let decisions = self.decisions.read().map_err(poisoned)?;
            if !decisions.contains_key(related) {
                return Err(CoreError::Inconsistency(format!(
                    "gap references missing decision: {}",
                    related
                )));
            }
        }

        let mut gaps = self.gaps.write().map_err(poisoned)?;
        if let Some(existing) = gaps.iter().find(|g| g.fingerprint == gap.fingerprint) {
            return Ok(GapInsert {
                gap_id: existing.gap_id.clone(),
                created: false,
            });
        }
        gaps.push(gap.clone());
        Ok(GapInsert {
            gap_id: gap.gap_id.clone(),
            created: true,
        })
    }

    async fn list_gaps(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Gap>> {
        let decisions = self.decisions.read().map_err(poisoned)?;
        let gaps = self.gaps.read().map_err(poisoned)?;
        let mut out: Vec<Gap> = gaps
            .iter()
            .filter(|g| since.map_or(true, |s| g.created_at >= s))
            .filter(|g| match &g.related_decision_id {
                Some(id) if !decisions.contains_key(id) => {
                    tracing::warn!(gap_id = %g.gap_id, decision_id = %id, "skipping gap with dangling decision reference");
                    false
                }
                _ => true,
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn set_gap_priority(&self, gap_id: &str, user_id: &str, priority: i64) -> Result<()> {
        {
            let gaps = self.gaps.read().map_err(poisoned)?;
            if !gaps.iter().any(|g| g.gap_id == gap_id) {
                return Err(CoreError::Inconsistency(format!("gap not found: {}", gap_id)));
            }
        }
        let mut priorities = self.priorities.write().map_err(poisoned)?;
        priorities.insert((gap_id.to_string(), user_id.to_string()), priority);
        Ok(())
    }

    async fn gap_priority(&self, gap_id: &str, user_id: &str) -> Result<Option<i64>> {
        let priorities = self.priorities.read().map_err(poisoned)?;
        Ok(priorities
            .get(&(gap_id.to_string(), user_id.to_string()))
            .copied())
    }
}
