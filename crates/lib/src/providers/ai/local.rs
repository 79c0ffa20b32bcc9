use crate::{
    errors::SqlRagError,
    providers::ai::{AiProvider, Completion, DecodingParams, Prompt},
};
use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;
use tracing::debug;

// --- OpenAI-compatible request and response structures ---

#[derive(Serialize)]
struct LocalAiRequest<'a> {
    messages: Vec<LocalAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    logprobs: bool,
    stream: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct LocalAiMessage {
    role: String,
    content: String,
}

#[derive(Deserialize, Debug)]
struct LocalAiResponse {
    choices: Vec<LocalAiChoice>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize, Debug)]
struct LocalAiChoice {
    message: LocalAiMessage,
    #[serde(default)]
    logprobs: Option<LocalAiLogprobs>,
}

#[derive(Deserialize, Debug)]
struct LocalAiLogprobs {
    #[serde(default)]
    content: Vec<LocalAiTokenLogprob>,
}

#[derive(Deserialize, Debug)]
struct LocalAiTokenLogprob {
    logprob: f64,
}

// --- Local Provider implementation ---

/// A provider for a local or OpenAI-compatible chat-completions API.
#[derive(Clone, Debug)]
pub struct LocalAiProvider {
    client: ReqwestClient,
    api_url: String,
    api_key: Option<String>,
    model: Option<String>,
}

impl LocalAiProvider {
    /// Creates a new `LocalAiProvider`. `api_url` is the full completions endpoint.
    pub fn new(
        api_url: String,
        api_key: Option<String>,
        model: Option<String>,
    ) -> Result<Self, SqlRagError> {
        let client = ReqwestClient::builder()
            .build()
            .map_err(SqlRagError::ReqwestClientBuild)?;
        Ok(Self {
            client,
            api_url,
            api_key,
            model,
        })
    }

    async fn send(
        &self,
        prompt: &Prompt,
        params: &DecodingParams,
    ) -> Result<Completion, SqlRagError> {
        let messages = vec![
            LocalAiMessage {
                role: "system".to_string(),
                content: prompt.system.clone(),
            },
            LocalAiMessage {
                role: "user".to_string(),
                content: prompt.user.clone(),
            },
        ];

        let request_body = LocalAiRequest {
            messages,
            model: self.model.as_deref(),
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
            seed: params.seed,
            logprobs: true,
            stream: false,
        };

        let mut request_builder = self.client.post(&self.api_url);

        if let Some(key) = &self.api_key {
            request_builder = request_builder.bearer_auth(key);
        }

        let response = request_builder
            .json(&request_body)
            .send()
            .await
            .map_err(SqlRagError::AiRequest)?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SqlRagError::AiApi(error_text));
        }

        let local_ai_response: LocalAiResponse = response
            .json()
            .await
            .map_err(SqlRagError::AiDeserialization)?;

        let choice = local_ai_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| SqlRagError::AiApi("Response contained no choices".to_string()))?;

        let mean_logprob = choice.logprobs.and_then(|lp| {
            if lp.content.is_empty() {
                None
            } else {
                let sum: f64 = lp.content.iter().map(|t| t.logprob).sum();
                Some(sum / lp.content.len() as f64)
            }
        });

        Ok(Completion {
            text: choice.message.content,
            mean_logprob,
            model: local_ai_response.model.or_else(|| self.model.clone()),
        })
    }
}

#[async_trait]
impl AiProvider for LocalAiProvider {
    async fn complete(
        &self,
        prompt: &Prompt,
        params: &DecodingParams,
        deadline: Duration,
    ) -> Result<Completion, SqlRagError> {
        debug!(api_url = %self.api_url, "--> Sending chat completion request");
        tokio::time::timeout(deadline, self.send(prompt, params))
            .await
            .map_err(|_| SqlRagError::GenerationTimeout(deadline))?
    }
}
