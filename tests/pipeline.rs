//! End-to-end pipeline tests over SQLite with custom capability
//! implementations.
//!
//! A deterministic embedding backend and a recording responder are plugged
//! into the orchestrator next to the real SQLite store and buffer, proving
//! the trait seams work through ingest, backfill, and hybrid retrieval.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use decision_relay::config::Config;
use decision_relay::embed_cmd::embed_pending;
use decision_relay::orchestrator::{IngestRequest, Orchestrator, OrchestratorParts, OrchestratorSettings};
use decision_relay::sqlite_buffer::SqliteBuffer;
use decision_relay::sqlite_store::SqliteDecisionStore;
use decision_relay::{db, migrate};
use decision_relay_core::buffer::BufferSettings;
use decision_relay_core::clock::SystemClock;
use decision_relay_core::directory::{StaticDirectory, UserProfile};
use decision_relay_core::embedding::EmbeddingBackend;
use decision_relay_core::entities::ExtractorChain;
use decision_relay_core::respond::{ResponseRequest, ResponseSynthesizer};
use decision_relay_core::retrieval::{QueryType, RetrievalFilters};
use decision_relay_core::store::DecisionStore;

// ─── Test Backends ──────────────────────────────────────────────────

/// Embeds by keyword presence so similarity is predictable.
struct KeywordEmbedder;

const KEYWORDS: [&str; 4] = ["torque", "voltage", "firmware", "thermal"];

#[async_trait]
impl EmbeddingBackend for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keywords"
    }

    fn dims(&self) -> usize {
        KEYWORDS.len()
    }

    async fn embed(&self, texts: &[String]) -> decision_relay_core::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                KEYWORDS
                    .iter()
                    .map(|k| if lower.contains(k) { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect())
    }
}

/// Records every reply request it sees.
#[derive(Default)]
struct RecordingResponder {
    seen: Mutex<Vec<(String, bool)>>,
}

#[async_trait]
impl ResponseSynthesizer for RecordingResponder {
    fn name(&self) -> &str {
        "recording"
    }

    async fn respond(&self, request: &ResponseRequest<'_>) -> decision_relay_core::Result<String> {
        self.seen
            .lock()
            .unwrap()
            .push((request.user_id.to_string(), request.gap_created));
        Ok(format!("{} related message(s)", request.digest.total_matches))
    }
}

fn user(id: &str, owns: &[&str]) -> UserProfile {
    UserProfile {
        user_id: id.into(),
        name: String::new(),
        role: "Engineer".into(),
        owned_components: owns.iter().map(|s| s.to_string()).collect(),
    }
}

async fn setup(tmp: &TempDir, responder: Arc<RecordingResponder>) -> (Orchestrator, Arc<SqliteDecisionStore>) {
    let config = Config::with_db_path(tmp.path().join("relay.sqlite"));
    migrate::run_migrations(&config).await.unwrap();
    let pool = db::connect(&config).await.unwrap();

    let store = Arc::new(SqliteDecisionStore::new(pool.clone()));
    let parts = OrchestratorParts {
        extractor: ExtractorChain::pattern_only(),
        buffer: Arc::new(SqliteBuffer::new(pool, BufferSettings::default())),
        store: store.clone(),
        directory: Arc::new(StaticDirectory::new([
            user("alice", &["mechanical"]),
            user("bob", &["motor"]),
        ])),
        embedder: Some(Arc::new(KeywordEmbedder)),
        responder,
        clock: Arc::new(SystemClock),
    };
    (Orchestrator::new(parts, OrchestratorSettings::default()), store)
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_ingest_backfill_then_hybrid_search() {
    let tmp = TempDir::new().unwrap();
    let responder = Arc::new(RecordingResponder::default());
    let (relay, store) = setup(&tmp, responder.clone()).await;

    let now = Utc::now();
    let torque = relay
        .process_message(IngestRequest::new(
            "hw",
            "alice",
            "REQ-245 motor torque changed from 2.0Nm to 2.5Nm",
            now - chrono::Duration::minutes(10),
        ))
        .await;
    let voltage = relay
        .process_message(IngestRequest::new(
            "hw",
            "carol",
            "REQ-246 motor voltage changed to 24V",
            now - chrono::Duration::minutes(5),
        ))
        .await;
    assert!(torque.decision_created && voltage.decision_created);
    // The second message shares the motor component with the first.
    assert!(voltage.context_injected);
    assert_eq!(voltage.response.as_deref(), Some("1 related message(s)"));

    // Nothing is searchable until embedded.
    let (results, _) = relay
        .hybrid_search("bob", None, &RetrievalFilters::default(), 10)
        .await
        .unwrap();
    assert!(results.is_empty());

    let summary = embed_pending(store.as_ref(), &KeywordEmbedder, 8, None).await.unwrap();
    assert_eq!(summary.embedded, 2);
    assert_eq!(store.embedding_counts().await.unwrap().embedded, 2);

    // bob owns motor, so both decisions are candidates; the query re-ranks.
    let (results, stats) = relay
        .hybrid_search("bob", Some("what torque do we need"), &RetrievalFilters::default(), 10)
        .await
        .unwrap();
    assert_eq!(stats.query_type, QueryType::Hybrid);
    assert_eq!(stats.candidates_found, 2);
    assert_eq!(results[0].decision_id, torque.decision_id.clone().unwrap());
    assert!(results[0].similarity_score > results[1].similarity_score);

    // Without a query, newest first.
    let (results, stats) = relay
        .hybrid_search("bob", None, &RetrievalFilters::default(), 10)
        .await
        .unwrap();
    assert_eq!(stats.query_type, QueryType::SqlOnly);
    assert_eq!(results[0].decision_id, voltage.decision_id.unwrap());

    assert_eq!(relay.stats().retrieval_queries, 3);
}

#[tokio::test]
async fn test_gap_flows_to_store_and_responder() {
    let tmp = TempDir::new().unwrap();
    let responder = Arc::new(RecordingResponder::default());
    let (relay, store) = setup(&tmp, responder.clone()).await;

    let now = Utc::now();
    relay
        .process_message(IngestRequest::new(
            "hw",
            "alice",
            "REQ-245 motor torque changed from 2.0Nm to 2.5Nm",
            now - chrono::Duration::minutes(2),
        ))
        .await;
    let result = relay
        .process_message(
            IngestRequest::new("hw", "carol", "REQ-245 revised again, motor now 3.0Nm", now).thread("t-9"),
        )
        .await;

    assert!(result.context_injected);
    assert!(result.gap_created);
    let gaps = store.list_gaps(None).await.unwrap();
    let assignees: Vec<&str> = gaps.iter().map(|g| g.assignee_id.as_str()).collect();
    // bob owns motor; alice made the earlier related decision.
    assert!(assignees.contains(&"bob"));
    assert!(assignees.contains(&"alice"));
    assert!(!assignees.contains(&"carol"));

    let seen = responder.seen.lock().unwrap().clone();
    assert_eq!(seen.last(), Some(&("carol".to_string(), true)));
}
