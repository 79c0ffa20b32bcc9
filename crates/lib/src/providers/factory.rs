//! # Provider Factory
//!
//! Builds the language-model and embedding providers from configuration so the
//! server and the CLI construct them the same way.

use crate::{
    errors::SqlRagError,
    providers::ai::{
        local::LocalAiProvider, ollama::OllamaProvider, rate_limit::RateLimitedProvider,
        AiProvider, ApiEmbedder, Embedder, HashingEmbedder,
    },
    types::{EmbeddingConfig, LlmConfig},
};
use std::time::Duration;
use tracing::info;

/// Creates the configured language-model provider, wrapped in its rate limiter.
pub fn create_ai_provider(config: &LlmConfig) -> Result<Box<dyn AiProvider>, SqlRagError> {
    let provider: Box<dyn AiProvider> = match config.provider.as_str() {
        "ollama" => {
            info!(base_url = %config.api_url, model = %config.model, "Configuring Ollama provider");
            Box::new(OllamaProvider::new(
                config.api_url.clone(),
                config.model.clone(),
            )?)
        }
        "local" => {
            info!(
                api_url = %config.api_url,
                model = %config.model,
                "Configuring OpenAI-compatible provider"
            );
            Box::new(LocalAiProvider::new(
                config.api_url.clone(),
                config.api_key.clone(),
                Some(config.model.clone()),
            )?)
        }
        other => {
            return Err(SqlRagError::InvalidConfig(format!(
                "Unsupported llm provider '{other}'. Expected 'local' or 'ollama'."
            )))
        }
    };

    Ok(Box::new(RateLimitedProvider::new(
        provider,
        config.rate_limit.max_calls,
        Duration::from_secs(config.rate_limit.period_secs),
    )))
}

pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>, SqlRagError> {
    match config.provider.as_str() {
        "hashing" => Ok(Box::new(HashingEmbedder::new(config.dimensions))),
        "api" => {
            let api_url = config.api_url.clone().ok_or_else(|| {
                SqlRagError::InvalidConfig(
                    "embedding.api_url is required for the 'api' embedder".to_string(),
                )
            })?;
            let model = config.model.clone().ok_or_else(|| {
                SqlRagError::InvalidConfig(
                    "embedding.model is required for the 'api' embedder".to_string(),
                )
            })?;
            Ok(Box::new(ApiEmbedder::new(api_url, model, config.api_key.clone())?))
        }
        other => Err(SqlRagError::InvalidConfig(format!(
            "Unsupported embedding provider '{other}'. Expected 'api' or 'hashing'."
        ))),
    }
}
