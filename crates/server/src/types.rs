use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize, Default)]
pub struct DebugParams {
    pub debug: Option<bool>,
}

#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<Value>,
    pub result: T,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    /// A new session is started when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    pub question: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub sql: String,
    #[serde(default)]
    pub question: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub version: u64,
}

#[derive(Debug, Deserialize)]
pub struct AddExampleRequest {
    pub question: String,
    pub sql: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RollbackResponse {
    pub version: u64,
    pub tables: Vec<String>,
}
