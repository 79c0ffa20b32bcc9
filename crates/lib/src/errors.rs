use crate::validation::Violation;
use std::time::Duration;
use thiserror::Error;

/// Custom error types for the pipeline.
#[derive(Error, Debug)]
pub enum SqlRagError {
    #[error("Schema index is unavailable: no snapshot has been indexed yet")]
    IndexUnavailable,
    #[error("Schema chunk '{chunk_id}' needs ~{tokens} tokens, which exceeds the context budget of {budget}")]
    ContextTooLarge {
        chunk_id: String,
        tokens: usize,
        budget: usize,
    },
    #[error("Language model did not respond within {0:?}")]
    GenerationTimeout(Duration),
    #[error("{0}")]
    Validation(Violation),
    #[error("Query execution failed: {0}")]
    Execution(String),
    #[error("Session '{0}' already has a question in flight")]
    ConcurrencyConflict(String),
    #[error("Snapshot version {0} is not retained")]
    SnapshotNotFound(u64),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Failed to build Reqwest client: {0}")]
    ReqwestClientBuild(reqwest::Error),
    #[error("Failed to send request to AI provider: {0}")]
    AiRequest(reqwest::Error),
    #[error("Failed to deserialize AI provider response: {0}")]
    AiDeserialization(reqwest::Error),
    #[error("AI provider returned an error: {0}")]
    AiApi(String),
    #[error("Rate limit exhausted; next slot in {0:?}")]
    RateLimited(Duration),
    #[error("Embedding failed: {0}")]
    Embedding(String),
    #[error("Storage connection error: {0}")]
    StorageConnection(String),
    #[error("Storage operation failed: {0}")]
    StorageOperationFailed(String),
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

/// Coarse error classes used for retry policy and status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Validation,
    Timeout,
    Execution,
    Concurrency,
    Backend,
}

impl SqlRagError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SqlRagError::IndexUnavailable
            | SqlRagError::ContextTooLarge { .. }
            | SqlRagError::SnapshotNotFound(_)
            | SqlRagError::InvalidConfig(_) => ErrorKind::Configuration,
            SqlRagError::Validation(_) => ErrorKind::Validation,
            SqlRagError::GenerationTimeout(_) => ErrorKind::Timeout,
            SqlRagError::Execution(_) => ErrorKind::Execution,
            SqlRagError::ConcurrencyConflict(_) => ErrorKind::Concurrency,
            _ => ErrorKind::Backend,
        }
    }

    /// Configuration-class errors are fatal for the request and never retried.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}
