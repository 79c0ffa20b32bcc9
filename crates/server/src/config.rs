//! # Application Configuration
//!
//! Loads the server configuration from programmatic defaults, a `config.yml`
//! file and environment variables, in that order of precedence (last wins).
//! The pipeline sections deserialize straight into the library's config
//! structs, so the file mirrors `sqlrag::types`.

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use regex::{Captures, Regex};
use serde::Deserialize;
use sqlrag::types::{
    ConversationConfig, EmbeddingConfig, GenerationConfig, LlmConfig, MonitorConfig,
    PipelineConfig, RagConfig, ValidationConfig,
};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// A custom error type for configuration issues.
#[derive(Debug)]
pub enum ConfigError {
    /// Indicates an error from the underlying `config` crate.
    General(String),
    /// Indicates a required configuration file was not found.
    NotFound(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::General(msg) => write!(f, "Configuration error: {msg}"),
            ConfigError::NotFound(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::General(err.to_string())
    }
}

/// Where the queried database and the pipeline's own state live.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Persisted snapshots, example queries and business rules.
    #[serde(default = "default_state_path")]
    pub state_path: String,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

fn default_state_path() -> String {
    sqlrag::constants::DEFAULT_STATE_DB_FILE.to_string()
}
fn default_query_timeout() -> u64 {
    30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SloConfig {
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
}

fn default_latency_ms() -> u64 {
    5000
}

impl Default for SloConfig {
    fn default() -> Self {
        Self {
            latency_ms: default_latency_ms(),
        }
    }
}

/// The root configuration structure, mapping directly to `config.yml`.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// The port for the server to listen on. Loaded from `PORT` env var.
    #[serde(default = "default_port")]
    pub port: u16,
    /// The database questions are answered against. Loaded from `DB_URL` env var.
    #[serde(default = "default_db_url")]
    pub db_url: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub slo: SloConfig,
}

fn default_port() -> u16 {
    9090
}
fn default_db_url() -> String {
    sqlrag::constants::DEFAULT_TARGET_DB_FILE.to_string()
}

impl AppConfig {
    /// The subset of settings the executor needs.
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            llm: self.llm.clone(),
            rag: self.rag.clone(),
            generation: self.generation.clone(),
            validation: self.validation.clone(),
            conversation: self.conversation.clone(),
            slo_latency_ms: self.slo.latency_ms,
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.database.query_timeout_secs)
    }
}

/// Replaces `${VAR}` and `${VAR:default}` with values from the environment.
/// Unset variables without a default become empty strings.
pub fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{(?P<var>[A-Z0-9_]+)(?::(?P<default>[^}]*))?\}")
        .map_err(|e| ConfigError::General(format!("Invalid substitution pattern: {e}")))?;
    let expanded = re.replace_all(content, |caps: &Captures| {
        match env::var(&caps["var"]) {
            Ok(value) if !value.is_empty() => value,
            _ => caps
                .name("default")
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        }
    });
    Ok(expanded.into_owned())
}

// Returns Ok(None) if the file does not exist.
fn read_and_substitute(path: &str) -> Result<Option<String>, ConfigError> {
    if !Path::new(path).exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .map_err(|e| ConfigError::General(format!("Failed to read config file '{path}': {e}")))?;
    substitute_env_vars(&content).map(Some)
}

/// Loads the application configuration.
///
/// - An explicit `config_path_override` must exist; the default
///   `config.yml` next to the server manifest is optional.
/// - Top-level keys like `port` and `db_url` are overridden by `PORT` and `DB_URL`.
/// - Nested keys are overridden by `SQLRAG_...` variables (e.g. `SQLRAG_LLM__MODEL`).
pub fn get_config(config_path_override: Option<&str>) -> Result<AppConfig, ConfigError> {
    let mut builder = ConfigBuilder::builder()
        .set_default("port", default_port())?
        .set_default("db_url", default_db_url())?;

    match config_path_override {
        Some(path) => {
            let content = read_and_substitute(path)?.ok_or_else(|| {
                ConfigError::NotFound(format!("Config file not found at '{path}'."))
            })?;
            info!("Loading configuration from '{path}'.");
            builder = builder.add_source(File::from_str(&content, FileFormat::Yaml));
        }
        None => {
            let default_path = format!("{}/config.yml", env!("CARGO_MANIFEST_DIR"));
            match read_and_substitute(&default_path)? {
                Some(content) => {
                    info!("Loading configuration from '{default_path}'.");
                    builder = builder.add_source(File::from_str(&content, FileFormat::Yaml));
                }
                None => info!("'{default_path}' not found; using built-in defaults."),
            }
        }
    }

    let settings = builder
        .add_source(Environment::default())
        .add_source(
            Environment::with_prefix("SQLRAG")
                .prefix_separator("_")
                .try_parsing(true)
                .separator("__"),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}
