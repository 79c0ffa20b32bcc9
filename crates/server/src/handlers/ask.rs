//! # Question Handlers
//!
//! `/ask`, the conversation endpoints and `/validate`.

use super::{wrap_response, ApiResponse, AppError, AppState, DebugParams};
use crate::types::{AskRequest, ValidateRequest};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::json;
use sqlrag::{AskResponse, ConversationTurn, ValidationVerdict};
use tracing::info;
use uuid::Uuid;

/// Answers one question. Validation rejections are successful responses with
/// `status: "rejected"`; only pipeline failures become HTTP errors.
pub async fn ask_handler(
    State(app_state): State<AppState>,
    debug_params: Query<DebugParams>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<ApiResponse<AskResponse>>, AppError> {
    let question = payload.question.trim();
    if question.is_empty() {
        return Err(AppError::BadRequest("question must not be empty".to_string()));
    }
    let session_id = payload
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    info!(session_id = %session_id, question = %question, "Received question");

    let mut response = app_state.executor.ask(&session_id, question).await?;
    let verdict = response.verdict.take();
    let debug_info = Some(json!({
        "verdict": verdict,
        "prompt_chars": response.prompt_chars,
        "token_budget": app_state.config.rag.token_budget,
    }));
    Ok(wrap_response(response, debug_params, debug_info))
}

pub async fn reset_conversation_handler(
    State(app_state): State<AppState>,
    debug_params: Query<DebugParams>,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    app_state.executor.reset_conversation(&session_id).await?;
    Ok(wrap_response(
        json!({ "session_id": session_id, "reset": true }),
        debug_params,
        None,
    ))
}

pub async fn conversation_history_handler(
    State(app_state): State<AppState>,
    debug_params: Query<DebugParams>,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<ConversationTurn>>>, AppError> {
    let turns = app_state.executor.history(&session_id).await;
    Ok(wrap_response(turns, debug_params, None))
}

/// Runs caller-supplied SQL through the validation pipeline without executing it.
pub async fn validate_handler(
    State(app_state): State<AppState>,
    debug_params: Query<DebugParams>,
    Json(payload): Json<ValidateRequest>,
) -> Result<Json<ApiResponse<ValidationVerdict>>, AppError> {
    let verdict = app_state
        .executor
        .validate_only(&payload.sql, payload.question.as_deref())?;
    Ok(wrap_response(verdict, debug_params, None))
}
