//! Configuration for the hybrid router
//!
//! Every section is optional; a missing section or field takes the default
//! documented on it. API keys are never stored here, only the name of the
//! environment variable that holds them.

use crate::index::Metric;
use crate::routing::AgentKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Embedding providers the router knows how to build
pub const EMBEDDING_PROVIDERS: &[&str] = &["openai", "offline"];

/// Intent extractor providers the router knows how to build
pub const INTENT_PROVIDERS: &[&str] = &["openai", "none"];

/// Top-level router configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RouterConfig {
    #[serde(default)]
    pub embedding: EmbeddingSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub index: IndexSection,
    #[serde(default)]
    pub fusion: FusionSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub intent: IntentSection,
    #[serde(default)]
    pub exemplars: ExemplarSection,
}

/// Embedding provider section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingSection {
    /// Provider name ("openai" or "offline")
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// Embedding model identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Environment variable containing the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Override for the provider base URL
    pub base_url: Option<String>,
    /// Vector dimension (default: 1536)
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Per-call timeout in milliseconds (default: 5000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum concurrent outbound embedding calls (default: 10)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Texts per outbound batch request (default: 100)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            api_key_env: default_api_key_env(),
            base_url: None,
            dimension: default_dimension(),
            timeout_ms: default_timeout_ms(),
            max_concurrency: default_max_concurrency(),
            batch_size: default_batch_size(),
        }
    }
}

/// Persistent embedding cache section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSection {
    /// Backing file; `None` keeps the cache in memory only
    #[serde(default = "default_cache_path")]
    pub path: Option<PathBuf>,
    /// Periodic flush interval in seconds; unset flushes only on shutdown
    pub flush_interval_secs: Option<u64>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            flush_interval_secs: None,
        }
    }
}

/// ANN index section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexSection {
    #[serde(default)]
    pub metric: Metric,
    /// Max neighbours per node on upper layers (layer 0 allows 2*m)
    #[serde(default = "default_m")]
    pub m: usize,
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
    /// Neighbours considered by the semantic router
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Seed for level assignment, so builds are reproducible
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            metric: Metric::default(),
            m: default_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            top_k: default_top_k(),
            seed: default_seed(),
        }
    }
}

/// Signal fusion section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FusionSection {
    #[serde(default = "default_pattern_weight")]
    pub pattern_weight: f64,
    #[serde(default = "default_intent_weight")]
    pub intent_weight: f64,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    /// Below this every signal counts as "no signal"
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f64,
    /// A semantic score at or above this is "strong"
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,
    /// Pattern confidence at or above this skips the other stages
    #[serde(default = "default_short_circuit_threshold")]
    pub short_circuit_threshold: f64,
    /// Gap between the two best semantic agents that earns full confidence
    #[serde(default = "default_ambiguity_margin")]
    pub ambiguity_margin: f64,
    #[serde(default = "default_fallback_agent")]
    pub fallback_agent: AgentKind,
}

impl Default for FusionSection {
    fn default() -> Self {
        Self {
            pattern_weight: default_pattern_weight(),
            intent_weight: default_intent_weight(),
            semantic_weight: default_semantic_weight(),
            low_threshold: default_low_threshold(),
            high_threshold: default_high_threshold(),
            short_circuit_threshold: default_short_circuit_threshold(),
            ambiguity_margin: default_ambiguity_margin(),
            fallback_agent: default_fallback_agent(),
        }
    }
}

/// Session turn budget section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Turn count at which the session is forced to conclude
    #[serde(default = "default_force_conclusion_turn")]
    pub force_conclusion_turn: u32,
    /// Handler that receives forced conclusions
    #[serde(default = "default_conclusion_agent")]
    pub conclusion_agent: AgentKind,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            force_conclusion_turn: default_force_conclusion_turn(),
            conclusion_agent: default_conclusion_agent(),
        }
    }
}

/// Intent extractor section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentSection {
    /// Provider name ("openai" or "none")
    #[serde(default = "default_intent_provider")]
    pub provider: String,
    #[serde(default = "default_intent_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_intent_temperature")]
    pub temperature: f32,
}

impl Default for IntentSection {
    fn default() -> Self {
        Self {
            provider: default_intent_provider(),
            model: default_intent_model(),
            api_key_env: default_api_key_env(),
            base_url: None,
            timeout_ms: default_timeout_ms(),
            temperature: default_intent_temperature(),
        }
    }
}

/// Exemplar corpus section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExemplarSection {
    /// Extra exemplars appended to the built-in corpus
    pub path: Option<PathBuf>,
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_dimension() -> usize {
    1536
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_concurrency() -> usize {
    10
}

fn default_batch_size() -> usize {
    100
}

fn default_cache_path() -> Option<PathBuf> {
    Some(PathBuf::from("embedding_cache.json"))
}

fn default_m() -> usize {
    16
}

fn default_ef_construction() -> usize {
    200
}

fn default_ef_search() -> usize {
    50
}

fn default_top_k() -> usize {
    3
}

fn default_seed() -> u64 {
    42
}

fn default_pattern_weight() -> f64 {
    0.5
}

fn default_intent_weight() -> f64 {
    0.3
}

fn default_semantic_weight() -> f64 {
    0.2
}

fn default_low_threshold() -> f64 {
    0.3
}

fn default_high_threshold() -> f64 {
    0.7
}

fn default_short_circuit_threshold() -> f64 {
    0.85
}

fn default_ambiguity_margin() -> f64 {
    0.1
}

fn default_fallback_agent() -> AgentKind {
    AgentKind::General
}

fn default_max_turns() -> u32 {
    5
}

fn default_force_conclusion_turn() -> u32 {
    4
}

fn default_conclusion_agent() -> AgentKind {
    AgentKind::Exploration
}

fn default_intent_provider() -> String {
    "openai".to_string()
}

fn default_intent_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_intent_temperature() -> f32 {
    0.1
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RouterConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RouterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every cross-field constraint; fails on the first violation
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.index.validate()?;
        self.fusion.validate()?;
        self.session.validate()?;
        self.intent.validate()?;
        Ok(())
    }

    /// Get the embedding API key from its environment variable
    pub fn get_embedding_api_key(&self) -> Result<String, ConfigError> {
        get_env_var_required(&self.embedding.api_key_env)
    }

    /// Get the intent extractor API key from its environment variable
    pub fn get_intent_api_key(&self) -> Result<String, ConfigError> {
        get_env_var_required(&self.intent.api_key_env)
    }
}

impl EmbeddingSection {
    fn validate(&self) -> Result<(), ConfigError> {
        require_known("embedding.provider", &self.provider, EMBEDDING_PROVIDERS)?;
        require_positive("embedding.dimension", self.dimension as u64)?;
        require_positive("embedding.timeout_ms", self.timeout_ms)?;
        require_positive("embedding.max_concurrency", self.max_concurrency as u64)?;
        require_positive("embedding.batch_size", self.batch_size as u64)?;
        Ok(())
    }
}

impl IndexSection {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.m < 2 {
            return Err(ConfigError::InvalidConfig(format!(
                "index.m must be at least 2, got {}",
                self.m
            )));
        }
        require_positive("index.ef_construction", self.ef_construction as u64)?;
        require_positive("index.ef_search", self.ef_search as u64)?;
        require_positive("index.top_k", self.top_k as u64)?;
        Ok(())
    }
}

impl FusionSection {
    /// Fusion weights as (pattern, intent, semantic)
    pub fn weights(&self) -> (f64, f64, f64) {
        (self.pattern_weight, self.intent_weight, self.semantic_weight)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let (w1, w2, w3) = self.weights();
        if [w1, w2, w3].iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::InvalidConfig(format!(
                "Fusion weights must be non-negative, got ({w1}, {w2}, {w3})"
            )));
        }
        let sum = w1 + w2 + w3;
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ConfigError::InvalidConfig(format!(
                "Fusion weights must sum to 1.0, got {sum}"
            )));
        }

        for (name, value) in [
            ("fusion.low_threshold", self.low_threshold),
            ("fusion.high_threshold", self.high_threshold),
            ("fusion.short_circuit_threshold", self.short_circuit_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.low_threshold > self.high_threshold {
            return Err(ConfigError::InvalidConfig(format!(
                "fusion.low_threshold ({}) must not exceed fusion.high_threshold ({})",
                self.low_threshold, self.high_threshold
            )));
        }
        if !(self.ambiguity_margin.is_finite() && self.ambiguity_margin > 0.0) {
            return Err(ConfigError::InvalidConfig(format!(
                "fusion.ambiguity_margin must be positive, got {}",
                self.ambiguity_margin
            )));
        }
        Ok(())
    }
}

impl SessionSection {
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("session.max_turns", u64::from(self.max_turns))?;
        if self.force_conclusion_turn == 0 || self.force_conclusion_turn > self.max_turns {
            return Err(ConfigError::InvalidConfig(format!(
                "session.force_conclusion_turn must be within 1..={}, got {}",
                self.max_turns, self.force_conclusion_turn
            )));
        }
        Ok(())
    }
}

impl IntentSection {
    fn validate(&self) -> Result<(), ConfigError> {
        require_known("intent.provider", &self.provider, INTENT_PROVIDERS)?;
        require_positive("intent.timeout_ms", self.timeout_ms)?;
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidConfig(format!(
                "intent.temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

fn require_positive(name: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidConfig(format!(
            "{name} must be positive"
        )));
    }
    Ok(())
}

fn require_known(name: &str, value: &str, known: &[&str]) -> Result<(), ConfigError> {
    if !known.contains(&value) {
        return Err(ConfigError::InvalidConfig(format!(
            "Unknown {name} '{value}', expected one of: {}",
            known.join(", ")
        )));
    }
    Ok(())
}

fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
    std::env::var(env_var_name).map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = RouterConfig::from_toml_str("").unwrap();

        assert_eq!(config.embedding.provider, "openai");
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.embedding.dimension, 1536);
        assert_eq!(config.embedding.max_concurrency, 10);
        assert_eq!(config.index.metric, Metric::Cosine);
        assert_eq!(config.index.m, 16);
        assert_eq!(config.index.ef_construction, 200);
        assert_eq!(config.index.ef_search, 50);
        assert_eq!(config.index.top_k, 3);
        assert_eq!(config.fusion.weights(), (0.5, 0.3, 0.2));
        assert_eq!(config.fusion.fallback_agent, AgentKind::General);
        assert_eq!(config.session.max_turns, 5);
        assert_eq!(config.session.force_conclusion_turn, 4);
        assert_eq!(config.intent.model, "gpt-4o-mini");
        assert_eq!(config, RouterConfig::default());
    }

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[embedding]
provider = "offline"
dimension = 64
max_concurrency = 4

[cache]
path = "/tmp/cache.json"
flush_interval_secs = 30

[index]
metric = "l2"
m = 8
ef_construction = 64
ef_search = 32
top_k = 5

[fusion]
pattern_weight = 0.6
intent_weight = 0.2
semantic_weight = 0.2
fallback_agent = "exploration"

[session]
max_turns = 6
force_conclusion_turn = 5
conclusion_agent = "comparison"

[intent]
provider = "none"
"#;

        let config = RouterConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.embedding.provider, "offline");
        assert_eq!(config.embedding.dimension, 64);
        assert_eq!(config.cache.path, Some(PathBuf::from("/tmp/cache.json")));
        assert_eq!(config.cache.flush_interval_secs, Some(30));
        assert_eq!(config.index.metric, Metric::L2);
        assert_eq!(config.index.top_k, 5);
        assert_eq!(config.fusion.fallback_agent, AgentKind::Exploration);
        assert_eq!(config.session.conclusion_agent, AgentKind::Comparison);
        assert_eq!(config.intent.provider, "none");
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let result = RouterConfig::from_toml_str(
            r#"
[fusion]
pattern_weight = 0.6
intent_weight = 0.3
semantic_weight = 0.2
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(msg)) if msg.contains("sum to 1.0")));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = RouterConfig::default();
        config.fusion.pattern_weight = 1.2;
        config.fusion.intent_weight = -0.2;
        config.fusion.semantic_weight = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_thresholds_validated() {
        let mut config = RouterConfig::default();
        config.fusion.low_threshold = 0.8;
        assert!(config.validate().is_err());

        let mut config = RouterConfig::default();
        config.fusion.short_circuit_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_ann_parameters_rejected() {
        for field in ["m", "ef_construction", "ef_search", "top_k"] {
            let toml_content = format!("[index]\n{field} = 0\n");
            let result = RouterConfig::from_toml_str(&toml_content);
            assert!(
                matches!(result, Err(ConfigError::InvalidConfig(ref msg)) if msg.contains(field)),
                "{field} = 0 should be rejected"
            );
        }
    }

    #[test]
    fn test_single_link_graph_rejected() {
        let result = RouterConfig::from_toml_str("[index]\nm = 1\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(ref msg)) if msg.contains("index.m")));
        assert!(RouterConfig::from_toml_str("[index]\nm = 2\n").is_ok());
    }

    #[test]
    fn test_force_conclusion_turn_bounds() {
        let mut config = RouterConfig::default();
        config.session.force_conclusion_turn = 0;
        assert!(config.validate().is_err());

        config.session.force_conclusion_turn = 6;
        assert!(config.validate().is_err());

        config.session.force_conclusion_turn = 5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let result = RouterConfig::from_toml_str("[embedding]\nprovider = \"cohere\"\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(msg)) if msg.contains("cohere")));
    }

    #[test]
    fn test_unknown_agent_kind_fails_parse() {
        let result = RouterConfig::from_toml_str("[fusion]\nfallback_agent = \"warehouse\"\n");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_missing_api_key_env() {
        let mut config = RouterConfig::default();
        config.embedding.api_key_env = "HYBRID_ROUTER_TEST_UNSET_KEY".to_string();
        assert!(matches!(
            config.get_embedding_api_key(),
            Err(ConfigError::EnvVarNotFound(name)) if name == "HYBRID_ROUTER_TEST_UNSET_KEY"
        ));
    }
}
