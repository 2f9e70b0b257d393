//! Aggregate pipeline counters.
//!
//! Every counter is an `AtomicU64` updated with relaxed ordering; readers
//! take a [`StatsSnapshot`] that is internally consistent per field.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::ErrorCategory;

#[derive(Debug, Default)]
pub struct OrchestratorStats {
    messages_processed: AtomicU64,
    decisions_created: AtomicU64,
    context_injections: AtomicU64,
    gaps_created: AtomicU64,
    total_processing_us: AtomicU64,
    buffer_failures: AtomicU64,
    store_failures: AtomicU64,
    extraction_fallbacks: AtomicU64,
    ingest_timeouts: AtomicU64,
    retrieval_queries: AtomicU64,
    retrieval_budget_violations: AtomicU64,
}

/// Point-in-time copy of [`OrchestratorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub messages_processed: u64,
    pub decisions_created: u64,
    pub context_injections: u64,
    pub gaps_created: u64,
    pub avg_processing_ms: f64,
    pub buffer_failures: u64,
    pub store_failures: u64,
    pub extraction_fallbacks: u64,
    pub ingest_timeouts: u64,
    pub retrieval_queries: u64,
    pub retrieval_budget_violations: u64,
}

impl OrchestratorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message(&self, processing_us: u64) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        self.total_processing_us
            .fetch_add(processing_us, Ordering::Relaxed);
    }

    pub fn record_decision(&self) {
        self.decisions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_injection(&self) {
        self.context_injections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gaps(&self, count: u64) {
        self.gaps_created.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.extraction_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.ingest_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retrieval(&self, budget_exceeded: bool) {
        self.retrieval_queries.fetch_add(1, Ordering::Relaxed);
        if budget_exceeded {
            self.retrieval_budget_violations
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_buffer_failure(&self) {
        self.buffer_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failure by category. Storage errors from the buffer are
    /// counted separately through [`record_buffer_failure`](Self::record_buffer_failure).
    pub fn record_failure(&self, category: ErrorCategory) {
        match category {
            ErrorCategory::Extraction => self.record_fallback(),
            _ => self.record_store_failure(),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let processed = self.messages_processed.load(Ordering::Relaxed);
        let total_us = self.total_processing_us.load(Ordering::Relaxed);
        let avg_processing_ms = if processed == 0 {
            0.0
        } else {
            total_us as f64 / processed as f64 / 1000.0
        };

        StatsSnapshot {
            messages_processed: processed,
            decisions_created: self.decisions_created.load(Ordering::Relaxed),
            context_injections: self.context_injections.load(Ordering::Relaxed),
            gaps_created: self.gaps_created.load(Ordering::Relaxed),
            avg_processing_ms,
            buffer_failures: self.buffer_failures.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            extraction_fallbacks: self.extraction_fallbacks.load(Ordering::Relaxed),
            ingest_timeouts: self.ingest_timeouts.load(Ordering::Relaxed),
            retrieval_queries: self.retrieval_queries.load(Ordering::Relaxed),
            retrieval_budget_violations: self.retrieval_budget_violations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_average_processing_time() {
        let stats = OrchestratorStats::new();
        assert_eq!(stats.snapshot().avg_processing_ms, 0.0);
        stats.record_message(2_000);
        stats.record_message(4_000);
        let snap = stats.snapshot();
        assert_eq!(snap.messages_processed, 2);
        assert!((snap.avg_processing_ms - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = Arc::new(OrchestratorStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_injection();
                        stats.record_retrieval(true);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.context_injections, 8000);
        assert_eq!(snap.retrieval_budget_violations, 8000);
    }

    #[test]
    fn test_failure_categories() {
        let stats = OrchestratorStats::new();
        stats.record_failure(ErrorCategory::Extraction);
        stats.record_failure(ErrorCategory::Storage);
        stats.record_failure(ErrorCategory::Inconsistency);
        let snap = stats.snapshot();
        assert_eq!(snap.extraction_fallbacks, 1);
        assert_eq!(snap.store_failures, 2);
    }
}
