//! LLM-backed entity extraction and batch extraction.
//!
//! [`LlmExtractor`] is the first strategy of the [`ExtractorChain`]; it
//! runs under a hard timeout and any failure hands the message to the
//! pattern extractor.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use decision_relay_core::entities::{parse_entity_payload, ExtractionOutcome, ExtractionStrategy, ExtractorChain};
use decision_relay_core::error::{CoreError, Result};
use decision_relay_core::models::ExtractedEntities;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::ExtractionConfig;
use crate::llm::{ChatClient, ChatMessage, ChatOptions};

const EXTRACTION_OPTIONS: ChatOptions = ChatOptions {
    max_tokens: 200,
    temperature: 0.1,
    json: true,
};

fn extraction_prompt(text: &str) -> String {
    format!(
        r#"Extract entities from this hardware engineering message. Only extract entities that are explicitly mentioned.

Message: "{}"

Return JSON with these fields:
- reqs: array of requirement IDs (REQ-XXX format)
- components: array of hardware components (motor, pcb, firmware, power_supply, ...)
- users_mentioned: array of @username mentions
- topics: array of engineering topics
- confidence: float 0-1 for extraction confidence

Example: {{"reqs": ["REQ-245"], "components": ["motor", "power_supply"], "users_mentioned": ["@alice"], "topics": ["torque_specs"], "confidence": 0.9}}"#,
        text
    )
}

pub struct LlmExtractor {
    chat: Arc<ChatClient>,
    timeout: Duration,
}

impl LlmExtractor {
    pub fn new(chat: Arc<ChatClient>, timeout: Duration) -> Self {
        Self { chat, timeout }
    }
}

#[async_trait]
impl ExtractionStrategy for LlmExtractor {
    fn name(&self) -> &str {
        "llm"
    }

    async fn extract(&self, text: &str) -> Result<ExtractedEntities> {
        let messages = [ChatMessage::user(extraction_prompt(text))];
        let raw = tokio::time::timeout(self.timeout, self.chat.complete(&messages, EXTRACTION_OPTIONS))
            .await
            .map_err(|_| {
                CoreError::Extraction(format!("timed out after {}ms", self.timeout.as_millis()))
            })?
            .map_err(|e| CoreError::Extraction(format!("{:#}", e)))?;

        parse_entity_payload(&raw)
    }
}

/// Build the strategy chain for `config`. A missing API key degrades to
/// pattern-only extraction rather than failing startup.
pub fn build_chain(config: &ExtractionConfig) -> ExtractorChain {
    if !config.is_enabled() {
        return ExtractorChain::pattern_only();
    }
    match ChatClient::from_config(config) {
        Ok(chat) => {
            tracing::info!(model = chat.model(), timeout_ms = config.timeout_ms, "LLM extraction enabled");
            ExtractorChain::new(vec![Box::new(LlmExtractor::new(
                Arc::new(chat),
                Duration::from_millis(config.timeout_ms),
            ))])
        }
        Err(e) => {
            tracing::warn!(error = %e, "LLM extraction unavailable, using patterns only");
            ExtractorChain::pattern_only()
        }
    }
}

/// Extract entities for many messages with at most `max_concurrency`
/// extractions in flight. Results come back in input order.
pub async fn extract_batch(
    chain: Arc<ExtractorChain>,
    texts: Vec<String>,
    max_concurrency: usize,
) -> Vec<ExtractionOutcome> {
    let permits = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, text) in texts.iter().cloned().enumerate() {
        let chain = chain.clone();
        let permits = permits.clone();
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            (index, chain.extract(&text).await)
        });
    }

    let mut results: Vec<Option<ExtractionOutcome>> = vec![None; texts.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => results[index] = Some(outcome),
            Err(e) => tracing::error!(error = %e, "extraction task panicked"),
        }
    }

    // A panicked task still yields a pattern-only result for its message.
    let fallback = ExtractorChain::pattern_only();
    let mut out = Vec::with_capacity(texts.len());
    for (slot, text) in results.into_iter().zip(texts.iter()) {
        match slot {
            Some(outcome) => out.push(outcome),
            None => out.push(fallback.extract(text).await),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slow;

    #[async_trait]
    impl ExtractionStrategy for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn extract(&self, _text: &str) -> Result<ExtractedEntities> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Err(CoreError::Extraction("unreachable".into()))
        }
    }

    /// Wraps a strategy in the same timeout the LLM extractor applies.
    struct Bounded<S>(S, Duration);

    #[async_trait]
    impl<S: ExtractionStrategy> ExtractionStrategy for Bounded<S> {
        fn name(&self) -> &str {
            self.0.name()
        }

        async fn extract(&self, text: &str) -> Result<ExtractedEntities> {
            tokio::time::timeout(self.1, self.0.extract(text))
                .await
                .map_err(|_| CoreError::Extraction("timed out".into()))?
        }
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_patterns() {
        let chain = ExtractorChain::new(vec![Box::new(Bounded(Slow, Duration::from_millis(20)))]);
        let outcome = chain.extract("REQ-245 motor torque changed").await;
        assert!(outcome.used_fallback());
        assert_eq!(outcome.failed_strategies, vec!["slow".to_string()]);
        assert!(outcome.entities.requirement_ids.contains("REQ-245"));
        assert!(outcome.entities.extraction_latency_ms < 400.0);
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let chain = Arc::new(ExtractorChain::pattern_only());
        let texts = vec![
            "REQ-1 motor".to_string(),
            "nothing here".to_string(),
            "pcb and firmware".to_string(),
        ];
        let outcomes = extract_batch(chain, texts, 2).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].entities.requirement_ids.contains("REQ-1"));
        assert!(outcomes[1].entities.has_no_match_signal());
        assert!(outcomes[2].entities.components.contains("pcb"));
    }

    #[test]
    fn test_disabled_provider_is_pattern_only() {
        let chain = build_chain(&ExtractionConfig::default());
        assert_eq!(chain.strategy_names(), vec!["pattern"]);
    }
}
