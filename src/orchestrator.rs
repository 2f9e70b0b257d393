//! Message-ingest pipeline.
//!
//! [`Orchestrator::process_message`] runs one chat message through every
//! stage:
//!
//! ```text
//! text ─▶ extract ─▶ participants ─▶ decision? ─▶ buffer add ─▶ match
//!                                                                │ inject
//!                                                   gaps ◀───────┤
//!                                                   reply ◀──────┘
//! ```
//!
//! The whole call shares one deadline. Each stage awaits under
//! `timeout_at(deadline)`; on expiry the result reports `timed_out` along
//! with whatever already completed. Storage failures are logged, counted,
//! and skipped. Nothing here returns an error to the caller.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use decision_relay_core::buffer::{ChannelStats, ContextBuffer, MemoryBuffer};
use decision_relay_core::clock::{Clock, SystemClock};
use decision_relay_core::decision::{classify_decision_type, is_decision_worthy};
use decision_relay_core::directory::OwnershipDirectory;
use decision_relay_core::embedding::EmbeddingBackend;
use decision_relay_core::entities::ExtractorChain;
use decision_relay_core::error::CoreError;
use decision_relay_core::gaps::{persist_gaps, DependencyGraph, GapDetector, GapReport, PersistSummary};
use decision_relay_core::matcher::{matching_messages, overlap, should_inject, Tier};
use decision_relay_core::models::{ContextMessage, Decision, ExtractedEntities, RetrievalResult};
use decision_relay_core::respond::{ContextDigest, ResponseRequest, ResponseSynthesizer, TemplateResponder};
use decision_relay_core::retrieval::{HybridRetrieval, RetrievalFilters, RetrievalParams, RetrievalStats};
use decision_relay_core::stats::{OrchestratorStats, StatsSnapshot};
use decision_relay_core::store::DecisionStore;

use crate::config::Config;
use crate::sqlite_buffer::SqliteBuffer;
use crate::sqlite_store::SqliteDecisionStore;
use crate::{embedding, extract, respond};

/// One incoming chat message.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub message_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
    /// Defaults to the message ID, making the message its own thread root.
    pub thread_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Entities extracted ahead of time, e.g. by batch import.
    pub entities: Option<ExtractedEntities>,
}

impl IngestRequest {
    pub fn new(
        channel_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            text: text.into(),
            thread_id: None,
            timestamp,
            entities: None,
        }
    }

    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_entities(mut self, entities: ExtractedEntities) -> Self {
        self.entities = Some(entities);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub message_id: String,
    pub decision_created: bool,
    pub decision_id: Option<String>,
    pub entities_extracted: usize,
    pub context_injected: bool,
    pub tier: Tier,
    pub score: f64,
    pub gap_created: bool,
    pub gap_ids: Vec<String>,
    pub response: Option<String>,
    pub processing_time_ms: f64,
    pub timed_out: bool,
    /// First failure encountered, as `CATEGORY: message`.
    pub error: Option<String>,
}

impl IngestResult {
    fn new(message_id: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            decision_created: false,
            decision_id: None,
            entities_extracted: 0,
            context_injected: false,
            tier: Tier::None,
            score: 0.0,
            gap_created: false,
            gap_ids: Vec::new(),
            response: None,
            processing_time_ms: 0.0,
            timed_out: false,
            error: None,
        }
    }
}

/// Injected capabilities.
pub struct OrchestratorParts {
    pub extractor: ExtractorChain,
    pub buffer: Arc<dyn ContextBuffer>,
    pub store: Arc<dyn DecisionStore>,
    pub directory: Arc<dyn OwnershipDirectory>,
    pub embedder: Option<Arc<dyn EmbeddingBackend>>,
    pub responder: Arc<dyn ResponseSynthesizer>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Minimum tier that injects context.
    pub threshold: Tier,
    /// Lookback for buffered context.
    pub max_age: chrono::Duration,
    pub ingest_timeout: Duration,
    pub retrieval: RetrievalParams,
    pub graph: DependencyGraph,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            threshold: Tier::Medium,
            max_age: chrono::Duration::seconds(7200),
            ingest_timeout: Duration::from_secs(5),
            retrieval: RetrievalParams::default(),
            graph: DependencyGraph::default(),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            threshold: config.matching.tier()?,
            max_age: chrono::Duration::seconds(config.matching.max_age_secs),
            ingest_timeout: Duration::from_millis(config.orchestrator.ingest_timeout_ms),
            retrieval: config.retrieval.params(),
            graph: config.gaps.graph(),
        })
    }
}

/// A stage did not finish before the ingest deadline.
struct DeadlineExceeded(&'static str);

async fn within<F: Future>(
    deadline: tokio::time::Instant,
    stage: &'static str,
    fut: F,
) -> std::result::Result<F::Output, DeadlineExceeded> {
    tokio::time::timeout_at(deadline, fut)
        .await
        .map_err(|_| DeadlineExceeded(stage))
}

pub struct Orchestrator {
    extractor: Arc<ExtractorChain>,
    buffer: Arc<dyn ContextBuffer>,
    store: Arc<dyn DecisionStore>,
    retrieval: HybridRetrieval,
    detector: GapDetector,
    responder: Arc<dyn ResponseSynthesizer>,
    clock: Arc<dyn Clock>,
    stats: OrchestratorStats,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(parts: OrchestratorParts, settings: OrchestratorSettings) -> Self {
        let retrieval = HybridRetrieval::new(
            parts.store.clone(),
            parts.embedder,
            parts.directory.clone(),
            parts.clock.clone(),
            settings.retrieval,
        );
        let detector = GapDetector::new(parts.directory, settings.graph.clone());
        Self {
            extractor: Arc::new(parts.extractor),
            buffer: parts.buffer,
            store: parts.store,
            retrieval,
            detector,
            responder: parts.responder,
            clock: parts.clock,
            stats: OrchestratorStats::new(),
            settings,
        }
    }

    /// Wire SQLite storage, the configured buffer backend, and the
    /// configured LLM and embedding providers.
    pub fn from_pool(config: &Config, pool: SqlitePool) -> Result<Self> {
        Self::from_pool_with_clock(config, pool, Arc::new(SystemClock))
    }

    /// Like [`Orchestrator::from_pool`], with every time-dependent part
    /// (buffer TTLs, gap windows, retrieval windows) reading `clock`.
    pub fn from_pool_with_clock(config: &Config, pool: SqlitePool, clock: Arc<dyn Clock>) -> Result<Self> {
        let settings = OrchestratorSettings::from_config(config)?;

        let buffer: Arc<dyn ContextBuffer> = match config.buffer.backend.as_str() {
            "memory" => Arc::new(MemoryBuffer::with_clock(config.buffer.settings(), clock.clone())),
            _ => Arc::new(SqliteBuffer::with_clock(
                pool.clone(),
                config.buffer.settings(),
                clock.clone(),
            )),
        };

        let parts = OrchestratorParts {
            extractor: extract::build_chain(&config.extraction),
            buffer,
            store: Arc::new(SqliteDecisionStore::new(pool)),
            directory: Arc::new(config.directory.build()),
            embedder: embedding::create_backend(&config.embedding)?,
            responder: respond::build_responder(&config.extraction, clock.clone()),
            clock,
        };

        tracing::debug!(
            strategies = ?parts.extractor.strategy_names(),
            buffer = %config.buffer.backend,
            responder = parts.responder.name(),
            "orchestrator ready"
        );
        Ok(Self::new(parts, settings))
    }

    pub fn store(&self) -> &Arc<dyn DecisionStore> {
        &self.store
    }

    pub fn extractor(&self) -> &Arc<ExtractorChain> {
        &self.extractor
    }

    /// Run one message through the pipeline.
    #[tracing::instrument(skip_all, fields(channel = %request.channel_id, user = %request.user_id))]
    pub async fn process_message(&self, request: IngestRequest) -> IngestResult {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.settings.ingest_timeout;
        let mut result = IngestResult::new(&request.message_id);

        if let Err(DeadlineExceeded(stage)) = self.pipeline(&request, deadline, &mut result).await {
            tracing::warn!(stage, timeout_ms = self.settings.ingest_timeout.as_millis() as u64, "ingest deadline exceeded");
            result.timed_out = true;
            self.stats.record_timeout();
        }

        let elapsed = started.elapsed();
        result.processing_time_ms = elapsed.as_secs_f64() * 1000.0;
        self.stats.record_message(elapsed.as_micros() as u64);

        tracing::info!(
            message_id = %result.message_id,
            decision_created = result.decision_created,
            context_injected = result.context_injected,
            tier = %result.tier,
            gaps = result.gap_ids.len(),
            timed_out = result.timed_out,
            ms = result.processing_time_ms,
            "message processed"
        );
        result
    }

    async fn pipeline(
        &self,
        request: &IngestRequest,
        deadline: tokio::time::Instant,
        out: &mut IngestResult,
    ) -> std::result::Result<(), DeadlineExceeded> {
        let entities = match &request.entities {
            Some(entities) => entities.clone(),
            None => {
                let outcome = within(deadline, "extraction", self.extractor.extract(&request.text)).await?;
                if outcome.used_fallback() {
                    self.stats.record_fallback();
                }
                outcome.entities
            }
        };
        out.entities_extracted = entities.entity_count();

        let thread_id = request
            .thread_id
            .clone()
            .unwrap_or_else(|| request.message_id.clone());

        for user in std::iter::once(&request.user_id).chain(entities.mentioned_users.iter()) {
            let recorded = within(deadline, "participants", self.store.record_participant(&thread_id, user)).await?;
            if let Err(e) = recorded {
                self.store_failure("record participant", &e, out);
            }
        }

        let decision = if is_decision_worthy(&request.text, &entities) {
            let decision = Decision::new(
                &thread_id,
                request.timestamp,
                &request.user_id,
                classify_decision_type(&request.text),
                &request.text,
                &entities,
            );
            match within(deadline, "decision", self.store.create_decision(&decision)).await? {
                Ok(()) => {
                    tracing::debug!(decision_id = %decision.decision_id, decision_type = %decision.decision_type, "decision created");
                    out.decision_created = true;
                    out.decision_id = Some(decision.decision_id.clone());
                    self.stats.record_decision();
                    Some(decision)
                }
                Err(e) => {
                    self.store_failure("create decision", &e, out);
                    None
                }
            }
        } else {
            None
        };

        let message = ContextMessage {
            message_id: request.message_id.clone(),
            user_id: request.user_id.clone(),
            channel_id: request.channel_id.clone(),
            thread_id: thread_id.clone(),
            text: request.text.clone(),
            entities: entities.clone(),
            decision_id: decision.as_ref().map(|d| d.decision_id.clone()),
            timestamp: request.timestamp,
        };
        if let Err(e) = within(deadline, "buffer write", self.buffer.add(&request.channel_id, &message)).await? {
            self.buffer_failure("add", &e, out);
        }

        let recent: Vec<ContextMessage> = match within(
            deadline,
            "buffer read",
            self.buffer.recent_context(&request.channel_id, self.settings.max_age),
        )
        .await?
        {
            Ok(messages) => messages
                .into_iter()
                .filter(|m| m.message_id != request.message_id)
                .collect(),
            Err(e) => {
                self.buffer_failure("recent context", &e, out);
                Vec::new()
            }
        };

        let buffered: Vec<&ExtractedEntities> = recent.iter().map(|m| &m.entities).collect();
        let scored = overlap(&entities, &buffered);
        out.tier = scored.tier;
        out.score = scored.score;
        if !should_inject(&entities, &buffered, self.settings.threshold) {
            return Ok(());
        }
        out.context_injected = true;
        self.stats.record_injection();
        let matches = matching_messages(&entities, &recent);

        if let Some(decision) = &decision {
            let participants = match within(deadline, "participants read", self.store.thread_participants(&thread_id)).await? {
                Ok(p) => p,
                Err(e) => {
                    self.store_failure("thread participants", &e, out);
                    BTreeSet::new()
                }
            };

            let gaps = self
                .detector
                .maybe_create_gap(decision, &matches, &participants, self.clock.now());
            let mut created = 0u64;
            for gap in &gaps {
                match within(deadline, "gap write", self.store.create_gap(gap)).await? {
                    Ok(insert) => {
                        if insert.created {
                            created += 1;
                        }
                        out.gap_ids.push(insert.gap_id);
                    }
                    Err(e) => self.store_failure("create gap", &e, out),
                }
            }
            out.gap_created = created > 0;
            self.stats.record_gaps(created);
        }

        let digest = ContextDigest::from_matches(&entities, &matches);
        let reply_request = ResponseRequest {
            user_id: &request.user_id,
            user_message: &request.text,
            digest: &digest,
            gap_created: out.gap_created,
        };
        match tokio::time::timeout_at(deadline, self.responder.respond(&reply_request)).await {
            Ok(Ok(text)) => out.response = Some(text),
            Ok(Err(e)) => {
                tracing::warn!(responder = self.responder.name(), error = %e, "reply synthesis failed, using template");
                out.response = Some(TemplateResponder::new().render(&reply_request));
            }
            Err(_) => {
                out.response = Some(TemplateResponder::new().render(&reply_request));
                return Err(DeadlineExceeded("reply"));
            }
        }

        Ok(())
    }

    fn store_failure(&self, op: &str, error: &CoreError, out: &mut IngestResult) {
        let category = error.category();
        tracing::error!(op, category = category.as_str(), error = %error, "store operation failed");
        self.stats.record_failure(category);
        out.error
            .get_or_insert_with(|| format!("{}: {}", category.as_str(), error));
    }

    fn buffer_failure(&self, op: &str, error: &CoreError, out: &mut IngestResult) {
        let category = error.category();
        tracing::error!(op, category = category.as_str(), error = %error, "buffer operation failed");
        self.stats.record_buffer_failure();
        out.error
            .get_or_insert_with(|| format!("{}: {}", category.as_str(), error));
    }

    /// Two-stage retrieval on behalf of `user_id`.
    pub async fn hybrid_search(
        &self,
        user_id: &str,
        query_text: Option<&str>,
        filters: &RetrievalFilters,
        limit: usize,
    ) -> decision_relay_core::Result<(Vec<RetrievalResult>, RetrievalStats)> {
        match self.retrieval.search(user_id, query_text, filters, limit).await {
            Ok((results, stats)) => {
                self.stats.record_retrieval(stats.budget_exceeded);
                Ok((results, stats))
            }
            Err(e) => {
                self.stats.record_failure(e.category());
                Err(e)
            }
        }
    }

    /// Run every gap family over the last `window_days` of decisions.
    pub async fn detect_gaps(&self, window_days: i64) -> decision_relay_core::Result<GapReport> {
        self.detector
            .detect(self.store.as_ref(), window_days, self.clock.now())
            .await
    }

    /// Store a report's gaps idempotently.
    pub async fn persist_gaps(&self, report: &GapReport) -> decision_relay_core::Result<PersistSummary> {
        let summary = persist_gaps(self.store.as_ref(), report).await?;
        self.stats.record_gaps(summary.created as u64);
        Ok(summary)
    }

    pub async fn channel_stats(&self, channel_id: &str) -> decision_relay_core::Result<Option<ChannelStats>> {
        self.buffer.channel_stats(channel_id).await
    }

    /// Drop expired buffer channels.
    pub async fn purge_buffers(&self) -> decision_relay_core::Result<usize> {
        self.buffer.purge_expired().await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use decision_relay_core::buffer::BufferSettings;
    use decision_relay_core::clock::ManualClock;
    use decision_relay_core::directory::{StaticDirectory, UserProfile};
    use decision_relay_core::models::{GapType, Severity};
    use decision_relay_core::store::InMemoryDecisionStore;

    fn user(id: &str, role: &str, owns: &[&str]) -> UserProfile {
        UserProfile {
            user_id: id.into(),
            name: id.to_uppercase(),
            role: role.into(),
            owned_components: owns.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn orchestrator(clock: Arc<ManualClock>, buffer: Arc<dyn ContextBuffer>) -> Orchestrator {
        let directory = StaticDirectory::new([
            user("alice", "Mechanical Engineer", &["mechanical"]),
            user("bob", "Firmware Engineer", &["firmware"]),
        ]);
        let parts = OrchestratorParts {
            extractor: ExtractorChain::pattern_only(),
            buffer,
            store: Arc::new(InMemoryDecisionStore::new()),
            directory: Arc::new(directory),
            embedder: None,
            responder: Arc::new(TemplateResponder::new()),
            clock: clock.clone(),
        };
        Orchestrator::new(parts, OrchestratorSettings::default())
    }

    fn memory_buffer(clock: &Arc<ManualClock>) -> Arc<dyn ContextBuffer> {
        Arc::new(MemoryBuffer::with_clock(BufferSettings::default(), clock.clone()))
    }

    #[tokio::test]
    async fn test_req_245_motor_scenario() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let orch = orchestrator(clock.clone(), memory_buffer(&clock));

        let a = orch
            .process_message(IngestRequest::new(
                "hw",
                "alice",
                "REQ-245 motor torque changed from 2.0Nm to 2.5Nm",
                start,
            ))
            .await;
        assert!(a.decision_created);
        assert!(!a.context_injected);
        let decision = orch
            .store()
            .get_decision(a.decision_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(decision.referenced_requirements.contains("REQ-245"));
        assert!(decision.affected_components.contains("motor"));

        clock.advance(chrono::Duration::minutes(5));
        let b = orch
            .process_message(IngestRequest::new(
                "hw",
                "bob",
                "what are the motor power requirements",
                clock.now(),
            ))
            .await;
        assert!(b.context_injected);
        assert!(b.tier >= Tier::Medium);
        assert!(!b.decision_created);
        assert!(!b.gap_created);
        assert!(b.response.unwrap().contains("motor"));

        clock.advance(chrono::Duration::minutes(5));
        let c = orch
            .process_message(IngestRequest::new(
                "hw",
                "bob",
                "decided to change the motor and firmware driver timing",
                clock.now(),
            ))
            .await;
        assert!(c.decision_created);
        assert!(c.context_injected);
        assert!(c.gap_created);

        let gaps = orch.store().list_gaps(None).await.unwrap();
        assert!(gaps
            .iter()
            .any(|g| g.gap_type == GapType::MissingStakeholder && g.assignee_id == "alice"));
        assert!(gaps.iter().all(|g| g.assignee_id != "bob"));

        let snap = orch.stats();
        assert_eq!(snap.messages_processed, 3);
        assert_eq!(snap.decisions_created, 2);
        assert_eq!(snap.context_injections, 2);
        assert!(snap.gaps_created >= 1);
    }

    #[tokio::test]
    async fn test_no_entities_never_injects() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let orch = orchestrator(clock.clone(), memory_buffer(&clock));

        orch.process_message(IngestRequest::new("hw", "alice", "motor mount update", start))
            .await;
        let r = orch
            .process_message(IngestRequest::new("hw", "bob", "sounds good, thanks!", start))
            .await;
        assert!(!r.context_injected);
        assert_eq!(r.tier, Tier::None);
        assert_eq!(r.entities_extracted, 0);
        assert!(r.response.is_none());
    }

    struct DownBuffer;

    #[async_trait]
    impl ContextBuffer for DownBuffer {
        async fn add(&self, _: &str, _: &ContextMessage) -> decision_relay_core::Result<()> {
            Err(CoreError::storage("buffer unreachable"))
        }
        async fn recent_context(&self, _: &str, _: chrono::Duration) -> decision_relay_core::Result<Vec<ContextMessage>> {
            Err(CoreError::storage("buffer unreachable"))
        }
        async fn channel_stats(&self, _: &str) -> decision_relay_core::Result<Option<ChannelStats>> {
            Ok(None)
        }
        async fn purge_expired(&self) -> decision_relay_core::Result<usize> {
            Ok(0)
        }
        async fn extend_ttl(&self, _: &[String]) -> decision_relay_core::Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_buffer_outage_keeps_decision() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let orch = orchestrator(clock.clone(), Arc::new(DownBuffer));

        let r = orch
            .process_message(IngestRequest::new("hw", "alice", "REQ-7 firmware update approved", clock.now()))
            .await;
        assert!(r.decision_created);
        assert!(!r.context_injected);
        assert!(r.error.as_deref().unwrap().starts_with("STORAGE_ERROR"));
        assert!(!r.timed_out);
        assert_eq!(orch.stats().buffer_failures, 2);
    }

    struct StallingBuffer;

    #[async_trait]
    impl ContextBuffer for StallingBuffer {
        async fn add(&self, _: &str, _: &ContextMessage) -> decision_relay_core::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
        async fn recent_context(&self, _: &str, _: chrono::Duration) -> decision_relay_core::Result<Vec<ContextMessage>> {
            Ok(Vec::new())
        }
        async fn channel_stats(&self, _: &str) -> decision_relay_core::Result<Option<ChannelStats>> {
            Ok(None)
        }
        async fn purge_expired(&self) -> decision_relay_core::Result<usize> {
            Ok(0)
        }
        async fn extend_ttl(&self, _: &[String]) -> decision_relay_core::Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_deadline_reports_partial_progress() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let directory = StaticDirectory::new(Vec::new());
        let parts = OrchestratorParts {
            extractor: ExtractorChain::pattern_only(),
            buffer: Arc::new(StallingBuffer),
            store: Arc::new(InMemoryDecisionStore::new()),
            directory: Arc::new(directory),
            embedder: None,
            responder: Arc::new(TemplateResponder::new()),
            clock: clock.clone(),
        };
        let settings = OrchestratorSettings {
            ingest_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let orch = Orchestrator::new(parts, settings);

        let r = orch
            .process_message(IngestRequest::new("hw", "alice", "REQ-9 pcb layout approved", clock.now()))
            .await;
        assert!(r.timed_out);
        assert!(r.decision_created);
        assert!(!r.context_injected);
        assert_eq!(orch.stats().ingest_timeouts, 1);
    }

    #[tokio::test]
    async fn test_detect_and_persist_gaps() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let orch = orchestrator(clock.clone(), memory_buffer(&clock));

        orch.process_message(
            IngestRequest::new("hw", "carol", "REQ-12 firmware and mechanical mounting decided", start)
                .thread("t-1"),
        )
        .await;

        let report = orch.detect_gaps(30).await.unwrap();
        let assignees: Vec<&str> = report
            .missing_stakeholders
            .iter()
            .map(|g| g.assignee_id.as_str())
            .collect();
        assert!(assignees.contains(&"alice"));
        assert!(assignees.contains(&"bob"));
        assert!(report
            .missing_stakeholders
            .iter()
            .all(|g| g.severity == Severity::Warning));

        let first = orch.persist_gaps(&report).await.unwrap();
        assert_eq!(first.created, report.len());
        let second = orch.persist_gaps(&report).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.existing, report.len());
    }
}
