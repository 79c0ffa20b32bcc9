//! # Ollama Provider
//!
//! Talks to Ollama's native `/api/generate` endpoint.

use crate::{
    errors::SqlRagError,
    providers::ai::{AiProvider, Completion, DecodingParams, Prompt},
};
use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct OllamaProvider {
    client: ReqwestClient,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    /// `base_url` is the server root, e.g. `http://localhost:11434`.
    pub fn new(base_url: String, model: String) -> Result<Self, SqlRagError> {
        let client = ReqwestClient::builder()
            .build()
            .map_err(SqlRagError::ReqwestClientBuild)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    async fn send(
        &self,
        prompt: &Prompt,
        params: &DecodingParams,
    ) -> Result<Completion, SqlRagError> {
        let body = OllamaRequest {
            model: &self.model,
            prompt: &prompt.user,
            system: &prompt.system,
            stream: false,
            options: OllamaOptions {
                temperature: params.temperature,
                top_p: params.top_p,
                num_predict: params.max_tokens,
                seed: params.seed,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(SqlRagError::AiRequest)?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SqlRagError::AiApi(error_text));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(SqlRagError::AiDeserialization)?;

        debug!(
            prompt_tokens = ?parsed.prompt_eval_count,
            completion_tokens = ?parsed.eval_count,
            "<-- Ollama generation finished"
        );

        Ok(Completion {
            text: parsed.response,
            mean_logprob: None,
            model: parsed.model.or_else(|| Some(self.model.clone())),
        })
    }
}

#[async_trait]
impl AiProvider for OllamaProvider {
    async fn complete(
        &self,
        prompt: &Prompt,
        params: &DecodingParams,
        deadline: Duration,
    ) -> Result<Completion, SqlRagError> {
        tokio::time::timeout(deadline, self.send(prompt, params))
            .await
            .map_err(|_| SqlRagError::GenerationTimeout(deadline))?
    }
}
