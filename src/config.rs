//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to the defaults
//! the pipeline was tuned with: a 30-message, two-hour buffer per channel,
//! a 200 ms extraction timeout, medium-tier injection, and a 40 ms
//! retrieval budget.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use decision_relay_core::buffer::BufferSettings;
use decision_relay_core::directory::{StaticDirectory, UserProfile};
use decision_relay_core::gaps::DependencyGraph;
use decision_relay_core::matcher::Tier;
use decision_relay_core::retrieval::RetrievalParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub gaps: GapsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BufferConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages_per_channel: usize,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: i64,
    /// `memory` keeps the buffer in-process; `sqlite` shares it through
    /// the database so separate `relay ingest` runs see each other.
    #[serde(default = "default_buffer_backend")]
    pub backend: String,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_messages_per_channel: default_max_messages(),
            ttl_secs: default_ttl_secs(),
            backend: default_buffer_backend(),
        }
    }
}

impl BufferConfig {
    pub fn settings(&self) -> BufferSettings {
        BufferSettings {
            max_messages_per_channel: self.max_messages_per_channel,
            ttl: chrono::Duration::seconds(self.ttl_secs),
        }
    }
}

fn default_max_messages() -> usize {
    30
}
fn default_ttl_secs() -> i64 {
    7200
}
fn default_buffer_backend() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_extraction_model")]
    pub model: String,
    #[serde(default = "default_extraction_timeout_ms")]
    pub timeout_ms: u64,
    /// Parallel requests used by batch extraction.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Chat-completions endpoint shared with response synthesis.
    #[serde(default = "default_chat_url")]
    pub url: String,
    /// Use the language model for injected-context replies as well.
    #[serde(default)]
    pub llm_responses: bool,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_extraction_model(),
            timeout_ms: default_extraction_timeout_ms(),
            max_concurrency: default_max_concurrency(),
            url: default_chat_url(),
            llm_responses: false,
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl ExtractionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_extraction_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_extraction_timeout_ms() -> u64 {
    200
}
fn default_max_concurrency() -> usize {
    4
}
fn default_chat_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_response_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    /// Minimum tier that injects context: `low`, `medium`, or `high`.
    #[serde(default = "default_threshold")]
    pub threshold: String,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: i64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            max_age_secs: default_max_age_secs(),
        }
    }
}

impl MatchingConfig {
    pub fn tier(&self) -> Result<Tier> {
        self.threshold
            .parse::<Tier>()
            .with_context(|| format!("invalid matching.threshold: '{}'", self.threshold))
    }
}

fn default_threshold() -> String {
    "medium".to_string()
}
fn default_max_age_secs() -> i64 {
    7200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    #[serde(default = "default_budget_ms")]
    pub budget_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            window_days: default_window_days(),
            budget_ms: default_budget_ms(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            budget_ms: self.budget_ms,
            window_days: self.window_days,
        }
    }
}

fn default_limit() -> usize {
    20
}
fn default_window_days() -> i64 {
    30
}
fn default_budget_ms() -> u64 {
    40
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_embeddings_url")]
    pub url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: default_embeddings_url(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_embeddings_url() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub users: Vec<UserProfile>,
}

impl DirectoryConfig {
    pub fn build(&self) -> StaticDirectory {
        StaticDirectory::new(self.users.iter().cloned())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    /// Deadline for one `process_message` call.
    #[serde(default = "default_ingest_timeout_ms")]
    pub ingest_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ingest_timeout_ms: default_ingest_timeout_ms(),
        }
    }
}

fn default_ingest_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GapsConfig {
    /// Component dependency graph: `component = ["dependency", ...]`.
    /// Omit to use the built-in hardware graph.
    #[serde(default)]
    pub dependencies: Option<BTreeMap<String, Vec<String>>>,
}

impl GapsConfig {
    pub fn graph(&self) -> DependencyGraph {
        match &self.dependencies {
            Some(edges) => DependencyGraph::new(edges.clone()),
            None => DependencyGraph::default(),
        }
    }
}

impl Config {
    /// Config with defaults for every optional section.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            buffer: BufferConfig::default(),
            extraction: ExtractionConfig::default(),
            matching: MatchingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            directory: DirectoryConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            gaps: GapsConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.buffer.max_messages_per_channel == 0 {
        anyhow::bail!("buffer.max_messages_per_channel must be > 0");
    }
    if config.buffer.ttl_secs <= 0 {
        anyhow::bail!("buffer.ttl_secs must be > 0");
    }
    match config.buffer.backend.as_str() {
        "memory" | "sqlite" => {}
        other => anyhow::bail!(
            "Unknown buffer backend: '{}'. Must be memory or sqlite.",
            other
        ),
    }

    match config.extraction.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown extraction provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.extraction.timeout_ms == 0 {
        anyhow::bail!("extraction.timeout_ms must be > 0");
    }
    if config.extraction.max_concurrency == 0 {
        anyhow::bail!("extraction.max_concurrency must be > 0");
    }

    config.matching.tier()?;
    if config.matching.max_age_secs <= 0 {
        anyhow::bail!("matching.max_age_secs must be > 0");
    }

    if config.retrieval.default_limit < 1 {
        anyhow::bail!("retrieval.default_limit must be >= 1");
    }
    if config.retrieval.window_days < 1 {
        anyhow::bail!("retrieval.window_days must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.orchestrator.ingest_timeout_ms == 0 {
        anyhow::bail!("orchestrator.ingest_timeout_ms must be > 0");
    }

    for user in &config.directory.users {
        if user.user_id.trim().is_empty() {
            anyhow::bail!("directory.users entries need a non-empty user_id");
        }
    }

    Ok(())
}

/// Validate a `--days` lookback flag.
pub fn check_days(days: i64) -> Result<i64> {
    if days < 1 {
        anyhow::bail!("--days must be >= 1, got {}", days);
    }
    Ok(days)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse("[db]\npath = \"./data/relay.sqlite\"\n").unwrap();
        assert_eq!(config.buffer.max_messages_per_channel, 30);
        assert_eq!(config.buffer.ttl_secs, 7200);
        assert_eq!(config.extraction.timeout_ms, 200);
        assert_eq!(config.matching.tier().unwrap(), Tier::Medium);
        assert_eq!(config.retrieval.budget_ms, 40);
        assert_eq!(config.retrieval.default_limit, 20);
        assert!(!config.embedding.is_enabled());
        assert!(config.directory.build().is_empty());
    }

    #[test]
    fn test_directory_and_graph() {
        let config = parse(
            r#"
[db]
path = "relay.sqlite"

[[directory.users]]
user_id = "alice"
name = "Alice"
role = "Mechanical Lead"
owned_components = ["motor", "mechanical"]

[gaps.dependencies]
motor = ["thermal"]
"#,
        )
        .unwrap();
        let dir = config.directory.build();
        assert_eq!(dir.len(), 1);
        let graph = config.gaps.graph();
        assert_eq!(graph.dependents_of("thermal"), vec!["motor"]);
        assert!(graph.dependents_of("motor").is_empty());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse("[db]\npath = \"x\"\n[matching]\nthreshold = \"extreme\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[buffer]\nbackend = \"redis\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[buffer]\nmax_messages_per_channel = 0\n").is_err());
    }

    #[test]
    fn test_check_days() {
        assert_eq!(check_days(7).unwrap(), 7);
        assert!(check_days(0).is_err());
        assert!(check_days(-2).unwrap_err().to_string().contains("-2"));
    }
}
