//! Entity extraction strategies.
//!
//! Extraction is an ordered chain of [`ExtractionStrategy`] implementations
//! tried in sequence until one succeeds. The chain always ends with the
//! deterministic [`PatternExtractor`], which cannot fail, so callers get
//! entities for every message regardless of which strategies are available.
//!
//! ```text
//!  text ──▶ [LLM strategy] ──err──▶ [...] ──err──▶ PatternExtractor ──▶ entities
//!               │ ok                                    (confidence 0.6)
//!               └──────────────────────────────────────────────▶ entities
//! ```
//!
//! Network-backed strategies live in the application crate and enforce
//! their own timeouts; this module only defines the seam, the pattern
//! tables, and the closed payload type LLM responses are decoded into.

use std::collections::BTreeSet;
use std::time::Instant;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::{CoreError, Result};
use crate::models::{ExtractedEntities, ExtractionSource};

/// Confidence assigned to every pattern-based extraction.
pub const PATTERN_CONFIDENCE: f64 = 0.6;

/// Confidence assumed when an LLM payload omits one.
pub const DEFAULT_LLM_CONFIDENCE: f64 = 0.8;

/// A single way of turning text into entities.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// Short name used in logs (e.g. `"openai"`, `"pattern"`).
    fn name(&self) -> &str;

    async fn extract(&self, text: &str) -> Result<ExtractedEntities>;
}

static REQUIREMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bREQ-\d+\b").unwrap());
static MENTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(\w+)").unwrap());

static COMPONENT_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\b(?:motor|actuator|servo|stepper)s?\b", "motor"),
        (r"\b(?:pcb|circuit\s+board|board)s?\b", "pcb"),
        (r"\b(?:power\s+supply|psu|voltage|current)\b", "power_supply"),
        (r"\b(?:firmware|software|code)\b", "firmware"),
        (r"\b(?:thermal|heat|temperature|cooling)\b", "thermal"),
        (r"\b(?:mechanical|mounting|assembly)\b", "mechanical"),
        (r"\b(?:security|encryption|auth)\b", "security"),
        (r"\b(?:validation|testing|qa|test)\b", "testing"),
        (r"\b(?:architecture|system|integration)\b", "architecture"),
        (r"\b(?:protocol|communication|interface)\b", "protocol"),
    ]
    .into_iter()
    .map(|(p, c)| (Regex::new(&format!("(?i){}", p)).unwrap(), c))
    .collect()
});

static TOPIC_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\b(?:torque|force|power)\b", "mechanical_specs"),
        (r"\b(?:temperature|thermal|heat)\b", "thermal_management"),
        (r"\b(?:voltage|current|power)\b", "electrical_specs"),
        (r"\b(?:can\s+bus|i2c|spi|uart)\b", "communication_protocols"),
        (r"\b(?:stackup|layer|trace)\b", "pcb_design"),
        (r"\b(?:boot|secure|encryption)\b", "security_features"),
    ]
    .into_iter()
    .map(|(p, t)| (Regex::new(&format!("(?i){}", p)).unwrap(), t))
    .collect()
});

/// Deterministic regex-table extractor. Never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternExtractor;

impl PatternExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous extraction, usable outside async contexts.
    pub fn extract_sync(&self, text: &str) -> ExtractedEntities {
        let requirement_ids: BTreeSet<String> = REQUIREMENT_RE
            .find_iter(text)
            .map(|m| m.as_str().to_uppercase())
            .collect();

        let mentioned_users: BTreeSet<String> = MENTION_RE
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect();

        let components: BTreeSet<String> = COMPONENT_PATTERNS
            .iter()
            .filter(|(re, _)| re.is_match(text))
            .map(|(_, c)| c.to_string())
            .collect();

        let topics: BTreeSet<String> = TOPIC_PATTERNS
            .iter()
            .filter(|(re, _)| re.is_match(text))
            .map(|(_, t)| t.to_string())
            .collect();

        ExtractedEntities {
            requirement_ids,
            components,
            mentioned_users,
            topics,
            confidence: PATTERN_CONFIDENCE,
            extraction_latency_ms: 0.0,
            source: ExtractionSource::Pattern,
        }
    }
}

#[async_trait]
impl ExtractionStrategy for PatternExtractor {
    fn name(&self) -> &str {
        "pattern"
    }

    async fn extract(&self, text: &str) -> Result<ExtractedEntities> {
        Ok(self.extract_sync(text))
    }
}

/// Closed shape of an LLM extraction response.
///
/// Every field is optional at the wire boundary and defaulted here, so
/// partial responses still decode. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EntityPayload {
    pub version: u32,
    #[serde(alias = "requirement_ids", alias = "requirements")]
    pub reqs: Vec<String>,
    pub components: Vec<String>,
    #[serde(alias = "mentioned_users", alias = "mentions")]
    pub users_mentioned: Vec<String>,
    pub topics: Vec<String>,
    pub confidence: Option<f64>,
}

impl EntityPayload {
    pub fn into_entities(self) -> ExtractedEntities {
        let clean = |v: Vec<String>, f: fn(&str) -> String| -> BTreeSet<String> {
            v.into_iter()
                .map(|s| f(s.trim()))
                .filter(|s| !s.is_empty())
                .collect()
        };
        ExtractedEntities {
            requirement_ids: clean(self.reqs, |s| s.to_uppercase()),
            components: clean(self.components, |s| s.to_lowercase().replace(' ', "_")),
            mentioned_users: clean(self.users_mentioned, |s| s.trim_start_matches('@').to_string()),
            topics: clean(self.topics, |s| s.to_lowercase().replace(' ', "_")),
            confidence: self
                .confidence
                .unwrap_or(DEFAULT_LLM_CONFIDENCE)
                .clamp(0.0, 1.0),
            extraction_latency_ms: 0.0,
            source: ExtractionSource::Llm,
        }
    }
}

/// Decode an LLM response body into entities.
///
/// Tolerates surrounding prose and fenced code blocks by decoding the
/// outermost `{ ... }` span.
pub fn parse_entity_payload(raw: &str) -> Result<ExtractedEntities> {
    let start = raw
        .find('{')
        .ok_or_else(|| CoreError::Extraction("no JSON object in response".into()))?;
    let end = raw
        .rfind('}')
        .ok_or_else(|| CoreError::Extraction("unterminated JSON object in response".into()))?;
    if end < start {
        return Err(CoreError::Extraction("malformed JSON object in response".into()));
    }
    let payload: EntityPayload = serde_json::from_str(&raw[start..=end])
        .map_err(|e| CoreError::Extraction(format!("invalid entity payload: {}", e)))?;
    Ok(payload.into_entities())
}

/// Result of running the strategy chain for one message.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub entities: ExtractedEntities,
    /// Strategies that failed before one succeeded.
    pub failed_strategies: Vec<String>,
}

impl ExtractionOutcome {
    pub fn used_fallback(&self) -> bool {
        !self.failed_strategies.is_empty()
    }
}

/// Ordered list of strategies terminated by the pattern extractor.
pub struct ExtractorChain {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    fallback: PatternExtractor,
}

impl ExtractorChain {
    /// A chain with only the pattern extractor.
    pub fn pattern_only() -> Self {
        Self {
            strategies: Vec::new(),
            fallback: PatternExtractor,
        }
    }

    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self {
            strategies,
            fallback: PatternExtractor,
        }
    }

    pub fn push(&mut self, strategy: Box<dyn ExtractionStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies
            .iter()
            .map(|s| s.name())
            .chain(std::iter::once(self.fallback.name()))
            .collect()
    }

    /// Try each strategy in order; the pattern extractor catches everything.
    pub async fn extract(&self, text: &str) -> ExtractionOutcome {
        let started = Instant::now();
        let mut failed_strategies = Vec::new();

        for strategy in &self.strategies {
            match strategy.extract(text).await {
                Ok(entities) => {
                    let ms = started.elapsed().as_secs_f64() * 1000.0;
                    return ExtractionOutcome {
                        entities: entities.with_latency(ms),
                        failed_strategies,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        strategy = strategy.name(),
                        error = %e,
                        "Entity extraction strategy failed, trying next"
                    );
                    failed_strategies.push(strategy.name().to_string());
                }
            }
        }

        let ms = started.elapsed().as_secs_f64() * 1000.0;
        ExtractionOutcome {
            entities: self.fallback.extract_sync(text).with_latency(ms),
            failed_strategies,
        }
    }
}

impl Default for ExtractorChain {
    fn default() -> Self {
        Self::pattern_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pattern_requirement_and_components() {
        let e = PatternExtractor.extract_sync("REQ-245 motor torque changed from 2.0Nm to 2.5Nm");
        assert_eq!(e.requirement_ids, set(&["REQ-245"]));
        assert!(e.components.contains("motor"));
        assert!(e.topics.contains("mechanical_specs"));
        assert!((e.confidence - PATTERN_CONFIDENCE).abs() < 1e-9);
        assert_eq!(e.source, ExtractionSource::Pattern);
    }

    #[test]
    fn test_pattern_normalizes_requirement_case() {
        let e = PatternExtractor.extract_sync("see req-12 and REQ-12");
        assert_eq!(e.requirement_ids, set(&["REQ-12"]));
    }

    #[test]
    fn test_pattern_mentions() {
        let e = PatternExtractor.extract_sync("@alice can you check the PCB thermal analysis? cc @bob");
        assert_eq!(e.mentioned_users, set(&["alice", "bob"]));
        assert!(e.components.contains("pcb"));
        assert!(e.components.contains("thermal"));
    }

    #[test]
    fn test_pattern_question_without_requirement() {
        let e = PatternExtractor.extract_sync("what are the motor power requirements");
        assert!(e.requirement_ids.is_empty());
        assert_eq!(e.components, set(&["motor"]));
        assert!(e.topics.contains("electrical_specs"));
    }

    #[test]
    fn test_pattern_nothing_found() {
        let e = PatternExtractor.extract_sync("lunch at noon?");
        assert!(e.has_no_match_signal());
    }

    #[test]
    fn test_parse_payload_fenced() {
        let raw = "```json\n{\"reqs\": [\"req-1\"], \"components\": [\"Power Supply\"], \"users_mentioned\": [\"@erik\"], \"confidence\": 1.7}\n```";
        let e = parse_entity_payload(raw).unwrap();
        assert_eq!(e.requirement_ids, set(&["REQ-1"]));
        assert_eq!(e.components, set(&["power_supply"]));
        assert_eq!(e.mentioned_users, set(&["erik"]));
        assert!((e.confidence - 1.0).abs() < 1e-9);
        assert_eq!(e.source, ExtractionSource::Llm);
    }

    #[test]
    fn test_parse_payload_missing_fields_defaults() {
        let e = parse_entity_payload("{\"topics\": [\"torque_specs\"]}").unwrap();
        assert!(e.components.is_empty());
        assert!((e.confidence - DEFAULT_LLM_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn test_parse_payload_malformed() {
        assert!(parse_entity_payload("no json here").is_err());
        assert!(parse_entity_payload("{\"reqs\": [1, }").is_err());
    }

    struct Failing;

    #[async_trait]
    impl ExtractionStrategy for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        async fn extract(&self, _text: &str) -> Result<ExtractedEntities> {
            Err(CoreError::Extraction("provider unavailable".into()))
        }
    }

    struct Fixed;

    #[async_trait]
    impl ExtractionStrategy for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn extract(&self, _text: &str) -> Result<ExtractedEntities> {
            parse_entity_payload(r#"{"components": ["motor"], "confidence": 0.95}"#)
        }
    }

    #[tokio::test]
    async fn test_chain_falls_back_to_patterns() {
        let chain = ExtractorChain::new(vec![Box::new(Failing)]);
        let outcome = chain.extract("REQ-9 firmware update").await;
        assert!(outcome.used_fallback());
        assert_eq!(outcome.failed_strategies, vec!["failing".to_string()]);
        assert_eq!(outcome.entities.source, ExtractionSource::Pattern);
        assert!(outcome.entities.requirement_ids.contains("REQ-9"));
    }

    #[tokio::test]
    async fn test_chain_stops_at_first_success() {
        let chain = ExtractorChain::new(vec![Box::new(Failing), Box::new(Fixed)]);
        let outcome = chain.extract("anything").await;
        assert_eq!(outcome.entities.source, ExtractionSource::Llm);
        assert!((outcome.entities.confidence - 0.95).abs() < 1e-9);
        assert_eq!(chain.strategy_names(), vec!["failing", "fixed", "pattern"]);
    }
}
