pub mod embedding;
pub mod local;
pub mod ollama;
pub mod rate_limit;

use crate::errors::SqlRagError;
use async_trait::async_trait;
use dyn_clone::DynClone;
pub use embedding::{cosine_similarity, ApiEmbedder, Embedder, HashingEmbedder};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

/// A system/user prompt pair sent to the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Decoding settings. A temperature of 0 (or a pinned seed) keeps output reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub seed: Option<u64>,
}

impl Default for DecodingParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 0.9,
            max_tokens: 512,
            seed: None,
        }
    }
}

/// Raw model output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    /// Mean per-token log-probability, when the backend reports it.
    pub mean_logprob: Option<f64>,
    pub model: Option<String>,
}

/// A trait for interacting with a language-model backend.
///
/// The pipeline treats the backend as a single text-completion operation. The
/// implementation must give up once `deadline` has elapsed and report
/// `SqlRagError::GenerationTimeout`.
#[async_trait]
pub trait AiProvider: Send + Sync + Debug + DynClone {
    async fn complete(
        &self,
        prompt: &Prompt,
        params: &DecodingParams,
        deadline: Duration,
    ) -> Result<Completion, SqlRagError>;
}

dyn_clone::clone_trait_object!(AiProvider);
