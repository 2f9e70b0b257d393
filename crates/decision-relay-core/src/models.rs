//! Core data models that flow through the context pipeline.
//!
//! Messages enter as text, pick up [`ExtractedEntities`], may become a
//! [`Decision`], sit in the live buffer as a [`ContextMessage`], and may
//! produce [`Gap`]s once related history is analyzed.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::CoreError;

/// Which extraction strategy produced a set of entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    Llm,
    Pattern,
}

/// Structured entities pulled out of one chat message.
///
/// Sets are ordered so every consumer (matcher, gap detector, templates)
/// iterates them deterministically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntities {
    #[serde(default)]
    pub requirement_ids: BTreeSet<String>,
    #[serde(default)]
    pub components: BTreeSet<String>,
    #[serde(default)]
    pub mentioned_users: BTreeSet<String>,
    #[serde(default)]
    pub topics: BTreeSet<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub extraction_latency_ms: f64,
    #[serde(default = "default_source")]
    pub source: ExtractionSource,
}

fn default_confidence() -> f64 {
    0.6
}

fn default_source() -> ExtractionSource {
    ExtractionSource::Pattern
}

impl ExtractedEntities {
    /// An empty result attributed to `source`.
    pub fn empty(source: ExtractionSource) -> Self {
        Self {
            requirement_ids: BTreeSet::new(),
            components: BTreeSet::new(),
            mentioned_users: BTreeSet::new(),
            topics: BTreeSet::new(),
            confidence: 0.0,
            extraction_latency_ms: 0.0,
            source,
        }
    }

    /// True when nothing usable for matching was extracted.
    ///
    /// Mentions alone do not count: they identify people, not subjects.
    pub fn has_no_match_signal(&self) -> bool {
        self.requirement_ids.is_empty() && self.components.is_empty() && self.topics.is_empty()
    }

    /// Number of requirement IDs plus components, reported on ingest.
    pub fn entity_count(&self) -> usize {
        self.requirement_ids.len() + self.components.len()
    }

    pub fn with_latency(mut self, ms: f64) -> Self {
        self.extraction_latency_ms = ms;
        self
    }
}

/// A message held in the live context buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub message_id: String,
    pub user_id: String,
    pub channel_id: String,
    pub thread_id: String,
    pub text: String,
    pub entities: ExtractedEntities,
    /// Weak link to the decision created from this message, if any.
    pub decision_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    RequirementChange,
    DesignDecision,
    Approval,
    TechnicalDecision,
    Discussion,
}

impl DecisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequirementChange => "requirement_change",
            Self::DesignDecision => "design_decision",
            Self::Approval => "approval",
            Self::TechnicalDecision => "technical_decision",
            Self::Discussion => "discussion",
        }
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requirement_change" => Ok(Self::RequirementChange),
            "design_decision" => Ok(Self::DesignDecision),
            "approval" => Ok(Self::Approval),
            "technical_decision" => Ok(Self::TechnicalDecision),
            "discussion" => Ok(Self::Discussion),
            other => Err(CoreError::Inconsistency(format!(
                "unknown decision type: '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle of a decision's embedding.
///
/// ```text
/// pending ──▶ embedded
///    │
///    └──────▶ failed ──(reset)──▶ pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    Pending,
    Embedded,
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Embedded => "embedded",
            Self::Failed => "failed",
        }
    }

    /// Whether the state machine permits `self -> next`.
    pub fn can_transition_to(&self, next: EmbeddingStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Embedded)
                | (Self::Pending, Self::Failed)
                | (Self::Failed, Self::Pending)
        )
    }
}

impl FromStr for EmbeddingStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "embedded" => Ok(Self::Embedded),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::Inconsistency(format!(
                "unknown embedding status: '{}'",
                other
            ))),
        }
    }
}

/// An engineering decision persisted from a decision-worthy message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: String,
    pub thread_id: String,
    pub timestamp: DateTime<Utc>,
    pub author_id: String,
    pub decision_type: DecisionType,
    pub text: String,
    pub affected_components: BTreeSet<String>,
    pub referenced_requirements: BTreeSet<String>,
    pub embedding_status: EmbeddingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_vector: Option<Vec<f32>>,
}

impl Decision {
    /// Build a new pending decision with a fresh ID.
    pub fn new(
        thread_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        author_id: impl Into<String>,
        decision_type: DecisionType,
        text: impl Into<String>,
        entities: &ExtractedEntities,
    ) -> Self {
        Self {
            decision_id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            timestamp,
            author_id: author_id.into(),
            decision_type,
            text: text.into(),
            affected_components: entities.components.clone(),
            referenced_requirements: entities.requirement_ids.clone(),
            embedding_status: EmbeddingStatus::Pending,
            embedding_vector: None,
        }
    }

    /// Short excerpt used in gap descriptions and templates.
    pub fn excerpt(&self, max_chars: usize) -> String {
        excerpt(&self.text, max_chars)
    }
}

/// Truncate `text` to `max_chars` characters, appending `...` when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapType {
    MissingStakeholder,
    Conflict,
    BrokenDependency,
}

impl GapType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingStakeholder => "missing_stakeholder",
            Self::Conflict => "conflict",
            Self::BrokenDependency => "broken_dependency",
        }
    }
}

impl FromStr for GapType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "missing_stakeholder" => Ok(Self::MissingStakeholder),
            "conflict" => Ok(Self::Conflict),
            "broken_dependency" => Ok(Self::BrokenDependency),
            other => Err(CoreError::Inconsistency(format!(
                "unknown gap type: '{}'",
                other
            ))),
        }
    }
}

/// Gap severity. `Critical` orders before `Warning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
        }
    }
}

impl FromStr for Severity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "warning" => Ok(Self::Warning),
            other => Err(CoreError::Inconsistency(format!(
                "unknown severity: '{}'",
                other
            ))),
        }
    }
}

/// A detected coordination failure.
///
/// Priority is deliberately absent: it is a per-user annotation kept by the
/// store, keyed by `(gap_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub gap_id: String,
    pub gap_type: GapType,
    pub severity: Severity,
    pub description: String,
    pub assignee_id: String,
    pub related_decision_id: Option<String>,
    pub recommendation: String,
    pub created_at: DateTime<Utc>,
    /// SHA-256 over the gap's content; equal for equal findings.
    pub fingerprint: String,
}

impl Gap {
    pub fn new(
        gap_type: GapType,
        severity: Severity,
        description: String,
        assignee_id: String,
        related_decision_id: Option<String>,
        recommendation: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        let fingerprint = gap_fingerprint(
            gap_type,
            severity,
            &description,
            &assignee_id,
            related_decision_id.as_deref(),
        );
        Self {
            gap_id: Uuid::new_v4().to_string(),
            gap_type,
            severity,
            description,
            assignee_id,
            related_decision_id,
            recommendation,
            created_at,
            fingerprint,
        }
    }
}

/// Content hash identifying a gap independent of its generated ID.
pub fn gap_fingerprint(
    gap_type: GapType,
    severity: Severity,
    description: &str,
    assignee_id: &str,
    related_decision_id: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(gap_type.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(severity.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(description.as_bytes());
    hasher.update([0u8]);
    hasher.update(assignee_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(related_decision_id.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

/// A decision returned from hybrid retrieval with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub decision_id: String,
    pub thread_id: String,
    pub author_id: String,
    pub decision_type: DecisionType,
    pub text: String,
    pub affected_components: BTreeSet<String>,
    pub referenced_requirements: BTreeSet<String>,
    pub timestamp: DateTime<Utc>,
    pub similarity_score: f64,
}

impl RetrievalResult {
    pub fn from_decision(decision: &Decision, similarity_score: f64) -> Self {
        Self {
            decision_id: decision.decision_id.clone(),
            thread_id: decision.thread_id.clone(),
            author_id: decision.author_id.clone(),
            decision_type: decision.decision_type,
            text: decision.text.clone(),
            affected_components: decision.affected_components.clone(),
            referenced_requirements: decision.referenced_requirements.clone(),
            timestamp: decision.timestamp,
            similarity_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_transitions() {
        use EmbeddingStatus::*;
        assert!(Pending.can_transition_to(Embedded));
        assert!(Pending.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Embedded.can_transition_to(Failed));
        assert!(!Embedded.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Embedded));
    }

    #[test]
    fn test_fingerprint_ignores_generated_fields() {
        let now = Utc::now();
        let a = Gap::new(
            GapType::Conflict,
            Severity::Critical,
            "Contradictory decisions for REQ-1".into(),
            "alice".into(),
            Some("d1".into()),
            "Resolve".into(),
            now,
        );
        let b = Gap::new(
            GapType::Conflict,
            Severity::Critical,
            "Contradictory decisions for REQ-1".into(),
            "alice".into(),
            Some("d1".into()),
            "Resolve".into(),
            now + chrono::Duration::hours(1),
        );
        assert_ne!(a.gap_id, b.gap_id);
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_entities_payload_defaults() {
        let parsed: ExtractedEntities =
            serde_json::from_str(r#"{"components": ["motor"]}"#).unwrap();
        assert!(parsed.requirement_ids.is_empty());
        assert!((parsed.confidence - 0.6).abs() < 1e-9);
        assert_eq!(parsed.source, ExtractionSource::Pattern);
        assert!(!parsed.has_no_match_signal());
    }

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("abcdef", 3), "abc...");
    }

    #[test]
    fn test_severity_orders_critical_first() {
        assert!(Severity::Critical < Severity::Warning);
    }
}
