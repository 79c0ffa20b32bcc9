//! # Pipeline Configuration Types
//!
//! Plain `serde` structures for every tunable part of the pipeline. Each section
//! has a `Default` that matches the values shipped in the server's `config.yml`,
//! so library users can build a pipeline without any configuration file.

use crate::constants::{
    DEFAULT_MAX_TURNS, DEFAULT_RETAINED_SNAPSHOTS, DEFAULT_ROW_CAP, DEFAULT_TOKEN_BUDGET,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the language-model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Either `local` (OpenAI-compatible) or `ollama`.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_llm_provider() -> String {
    "ollama".to_string()
}
fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_llm_model() -> String {
    "gemma:2b".to_string()
}
fn default_llm_timeout() -> u64 {
    45
}
fn default_top_p() -> f32 {
    0.9
}
fn default_max_tokens() -> u32 {
    512
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_url: default_llm_url(),
            api_key: None,
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
            temperature: 0.0,
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            seed: None,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Token bucket parameters for outgoing model calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_calls")]
    pub max_calls: u32,
    #[serde(default = "default_period")]
    pub period_secs: u64,
}

fn default_max_calls() -> u32 {
    60
}
fn default_period() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: default_max_calls(),
            period_secs: default_period(),
        }
    }
}

/// Settings for the embedding model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Either `api` (OpenAI-compatible endpoint) or `hashing` (offline).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}
fn default_dimensions() -> usize {
    256
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_url: None,
            model: None,
            api_key: None,
            dimensions: default_dimensions(),
        }
    }
}

/// Retrieval and context-budget settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_schema_top_k")]
    pub schema_top_k: usize,
    #[serde(default = "default_example_top_k")]
    pub example_top_k: usize,
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    /// Chunks scoring below this are never offered to the model.
    #[serde(default)]
    pub min_similarity: f32,
}

fn default_schema_top_k() -> usize {
    5
}
fn default_example_top_k() -> usize {
    3
}
fn default_token_budget() -> usize {
    DEFAULT_TOKEN_BUDGET
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            schema_top_k: default_schema_top_k(),
            example_top_k: default_example_top_k(),
            token_budget: default_token_budget(),
            min_similarity: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

fn default_confidence_threshold() -> f64 {
    0.6
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

/// Limits enforced by the validation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_row_cap")]
    pub row_cap: u64,
    #[serde(default = "default_max_joins")]
    pub max_joins: usize,
    #[serde(default = "default_max_subquery_depth")]
    pub max_subquery_depth: usize,
    /// Tables with at least this many rows must be filtered, grouped or limited.
    #[serde(default = "default_large_table_rows")]
    pub large_table_rows: u64,
    /// Shortest run of question words that counts as prompt leakage.
    #[serde(default = "default_min_leaked_words")]
    pub min_leaked_words: usize,
}

fn default_row_cap() -> u64 {
    DEFAULT_ROW_CAP
}
fn default_max_joins() -> usize {
    5
}
fn default_max_subquery_depth() -> usize {
    3
}
fn default_large_table_rows() -> u64 {
    100_000
}
fn default_min_leaked_words() -> usize {
    5
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            row_cap: default_row_cap(),
            max_joins: default_max_joins(),
            max_subquery_depth: default_max_subquery_depth(),
            large_table_rows: default_large_table_rows(),
            min_leaked_words: default_min_leaked_words(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}
fn default_idle_timeout() -> u64 {
    1800
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

/// Schema Change Monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_retained")]
    pub retained_snapshots: usize,
}

fn default_true() -> bool {
    true
}
fn default_interval() -> u64 {
    300
}
fn default_retained() -> usize {
    DEFAULT_RETAINED_SNAPSHOTS
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval(),
            retained_snapshots: default_retained(),
        }
    }
}

/// Everything the executor needs besides its collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    /// Latency target that is logged against, never enforced.
    #[serde(default = "default_slo")]
    pub slo_latency_ms: u64,
}

fn default_slo() -> u64 {
    5000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            rag: RagConfig::default(),
            generation: GenerationConfig::default(),
            validation: ValidationConfig::default(),
            conversation: ConversationConfig::default(),
            slo_latency_ms: default_slo(),
        }
    }
}
