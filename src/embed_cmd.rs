//! Embedding backfill for stored decisions.
//!
//! Decisions are created `pending`. `relay embed pending` walks them oldest
//! first in batches, moving each to `embedded` (with its vector) or
//! `failed`. `relay embed reset-failed` moves failed decisions back to
//! `pending` for another attempt.

use anyhow::{bail, Result};
use serde::Serialize;

use decision_relay_core::embedding::EmbeddingBackend;
use decision_relay_core::models::EmbeddingStatus;
use decision_relay_core::store::{DecisionQuery, DecisionStore};

use crate::config::Config;
use crate::sqlite_store::SqliteDecisionStore;
use crate::{db, embedding};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmbedSummary {
    pub embedded: u64,
    pub failed: u64,
}

/// Embed up to `limit` pending decisions (all of them when `None`).
///
/// A failed batch marks each of its decisions `failed`, so the loop always
/// drains the pending set.
pub async fn embed_pending(
    store: &dyn DecisionStore,
    backend: &dyn EmbeddingBackend,
    batch_size: usize,
    limit: Option<usize>,
) -> Result<EmbedSummary> {
    let batch_size = batch_size.max(1);
    let mut summary = EmbedSummary::default();

    loop {
        let done = (summary.embedded + summary.failed) as usize;
        let take = match limit {
            Some(limit) if done >= limit => break,
            Some(limit) => batch_size.min(limit - done),
            None => batch_size,
        };

        let batch = store.pending_embeddings(take).await?;
        if batch.is_empty() {
            break;
        }

        let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();
        match backend.embed(&texts).await {
            Ok(vectors) if vectors.len() != batch.len() => {
                tracing::warn!(
                    batch = batch.len(),
                    vectors = vectors.len(),
                    "embedding backend returned the wrong number of vectors"
                );
                for decision in &batch {
                    store.mark_failed(&decision.decision_id).await?;
                    summary.failed += 1;
                }
            }
            Ok(vectors) => {
                for (decision, vector) in batch.iter().zip(vectors.iter()) {
                    match store
                        .mark_embedded(&decision.decision_id, vector, backend.dims())
                        .await
                    {
                        Ok(()) => summary.embedded += 1,
                        Err(e) => {
                            tracing::warn!(decision_id = %decision.decision_id, error = %e, "could not store embedding");
                            store.mark_failed(&decision.decision_id).await?;
                            summary.failed += 1;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(batch = batch.len(), error = %e, "embedding batch failed");
                for decision in &batch {
                    store.mark_failed(&decision.decision_id).await?;
                    summary.failed += 1;
                }
            }
        }
    }

    Ok(summary)
}

/// Move every failed decision back to `pending`. Returns how many moved.
pub async fn reset_failed(store: &dyn DecisionStore) -> Result<u64> {
    let failed = store
        .query_decisions(&DecisionQuery::new().status(EmbeddingStatus::Failed))
        .await?;
    let mut reset = 0u64;
    for decision in &failed {
        store.reset_failed(&decision.decision_id).await?;
        reset += 1;
    }
    Ok(reset)
}

pub async fn run_embed_pending(config: &Config, limit: Option<usize>) -> Result<()> {
    let Some(backend) = embedding::create_backend(&config.embedding)? else {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    };

    let pool = db::connect(config).await?;
    let store = SqliteDecisionStore::new(pool.clone());

    let before = store.embedding_counts().await?;
    if before.pending == 0 {
        println!("embed pending");
        println!("  all decisions up to date");
        pool.close().await;
        return Ok(());
    }

    let summary = embed_pending(&store, backend.as_ref(), config.embedding.batch_size, limit).await?;

    println!("embed pending");
    println!("  model: {} ({} dims)", backend.model_name(), backend.dims());
    println!("  total pending: {}", before.pending);
    println!("  embedded: {}", summary.embedded);
    println!("  failed: {}", summary.failed);

    pool.close().await;
    Ok(())
}

pub async fn run_embed_reset_failed(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteDecisionStore::new(pool.clone());

    let reset = reset_failed(&store).await?;
    println!("embed reset-failed");
    println!("  reset to pending: {}", reset);

    pool.close().await;
    Ok(())
}
