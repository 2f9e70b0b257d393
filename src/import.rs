//! `relay import`: replay a chat export through the ingest pipeline.
//!
//! The input is JSON Lines, one message per line:
//!
//! ```json
//! {"channel_id": "hw", "user_id": "alice", "text": "REQ-245 torque ...", "timestamp": "2026-03-02T10:00:00Z"}
//! ```
//!
//! `message_id` and `thread_id` are optional. Entities for all messages are
//! extracted up front with bounded concurrency, then messages are replayed
//! in timestamp order against a replay clock that steps to each message's
//! timestamp, so buffer TTLs and gap windows see them as they happened.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

use decision_relay_core::clock::ManualClock;

use crate::config::Config;
use crate::db;
use crate::extract::extract_batch;
use crate::orchestrator::{IngestRequest, Orchestrator};

#[derive(Debug, Clone, Deserialize)]
pub struct ImportRecord {
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

impl ImportRecord {
    fn into_request(self) -> IngestRequest {
        let mut request = IngestRequest::new(self.channel_id, self.user_id, self.text, self.timestamp);
        if let Some(id) = self.message_id {
            request = request.message_id(id);
        }
        if let Some(thread) = self.thread_id {
            request = request.thread(thread);
        }
        request
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub messages: usize,
    pub decisions: usize,
    pub injections: usize,
    pub gaps: usize,
    pub extraction_fallbacks: usize,
    pub timeouts: usize,
    pub errors: usize,
}

/// Parse JSON Lines. Blank lines are ignored; a malformed line is an error
/// naming its line number.
pub fn parse_records(input: &str) -> Result<Vec<ImportRecord>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<ImportRecord>(line).with_context(|| format!("line {}: invalid message", i + 1))
        })
        .collect()
}

/// Extract entities for every record, then ingest in timestamp order.
///
/// `clock` must be the clock `orchestrator` was built with; it is set to
/// each record's timestamp before that record is processed.
pub async fn import_records(
    orchestrator: &Orchestrator,
    clock: &ManualClock,
    mut records: Vec<ImportRecord>,
    max_concurrency: usize,
) -> ImportSummary {
    records.sort_by_key(|r| r.timestamp);

    let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
    let outcomes = extract_batch(orchestrator.extractor().clone(), texts, max_concurrency).await;

    let mut summary = ImportSummary::default();
    for (record, outcome) in records.into_iter().zip(outcomes) {
        if outcome.used_fallback() {
            summary.extraction_fallbacks += 1;
        }
        clock.set(record.timestamp);
        let result = orchestrator
            .process_message(record.into_request().with_entities(outcome.entities))
            .await;

        summary.messages += 1;
        summary.decisions += result.decision_created as usize;
        summary.injections += result.context_injected as usize;
        summary.gaps += result.gap_ids.len();
        summary.timeouts += result.timed_out as usize;
        summary.errors += result.error.is_some() as usize;
    }
    summary
}

/// Replay `records` into the database behind `pool` with a replay clock.
pub async fn replay(config: &Config, pool: SqlitePool, records: Vec<ImportRecord>) -> Result<ImportSummary> {
    let start = records.iter().map(|r| r.timestamp).min().unwrap_or_else(Utc::now);
    let clock = Arc::new(ManualClock::new(start));
    let orchestrator = Orchestrator::from_pool_with_clock(config, pool, clock.clone())?;
    Ok(import_records(&orchestrator, &clock, records, config.extraction.max_concurrency).await)
}

pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let input = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let records = parse_records(&input)?;

    let pool = db::connect(config).await?;
    let summary = replay(config, pool.clone(), records).await;
    pool.close().await;
    let summary = summary?;

    println!("import {}", path.display());
    println!("  messages: {}", summary.messages);
    println!("  decisions: {}", summary.decisions);
    println!("  context injections: {}", summary.injections);
    println!("  gaps flagged: {}", summary.gaps);
    if summary.extraction_fallbacks > 0 {
        println!("  extraction fallbacks: {}", summary.extraction_fallbacks);
    }
    if summary.timeouts > 0 || summary.errors > 0 {
        println!("  timeouts: {}, errors: {}", summary.timeouts, summary.errors);
    }
    Ok(())
}
