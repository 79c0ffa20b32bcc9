//! # Example and Business-Rule Handlers

use super::{wrap_response, ApiResponse, AppError, AppState, DebugParams};
use crate::types::AddExampleRequest;
use axum::{
    extract::{Query, State},
    Json,
};
use sqlrag::{BusinessRule, ExampleQuery, NewBusinessRule, SqlRagError};

pub async fn list_examples_handler(
    State(app_state): State<AppState>,
    debug_params: Query<DebugParams>,
) -> Result<Json<ApiResponse<Vec<ExampleQuery>>>, AppError> {
    Ok(wrap_response(
        app_state.executor.examples.list(),
        debug_params,
        None,
    ))
}

/// Stores a validated question/SQL pair. Rejected SQL returns 422.
pub async fn add_example_handler(
    State(app_state): State<AppState>,
    debug_params: Query<DebugParams>,
    Json(payload): Json<AddExampleRequest>,
) -> Result<Json<ApiResponse<ExampleQuery>>, AppError> {
    let example = app_state
        .executor
        .add_example(&payload.question, &payload.sql)
        .await?;
    Ok(wrap_response(example, debug_params, None))
}

pub async fn list_rules_handler(
    State(app_state): State<AppState>,
    debug_params: Query<DebugParams>,
) -> Result<Json<ApiResponse<Vec<BusinessRule>>>, AppError> {
    Ok(wrap_response(app_state.executor.rules.list(), debug_params, None))
}

pub async fn add_rule_handler(
    State(app_state): State<AppState>,
    debug_params: Query<DebugParams>,
    Json(payload): Json<NewBusinessRule>,
) -> Result<Json<ApiResponse<BusinessRule>>, AppError> {
    let rule = app_state
        .executor
        .add_rule(payload)
        .await
        .map_err(|e| match e {
            SqlRagError::InvalidConfig(message) => AppError::BadRequest(message),
            other => AppError::Pipeline(other),
        })?;
    Ok(wrap_response(rule, debug_params, None))
}
