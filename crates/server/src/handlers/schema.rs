//! # Schema Administration Handlers

use super::{wrap_response, ApiResponse, AppError, AppState, DebugParams};
use crate::types::{RollbackRequest, RollbackResponse};
use axum::{
    extract::{Query, State},
    Json,
};
use serde_json::json;
use sqlrag::{schema::SnapshotInfo, DriftReport, RefreshOutcome};

pub async fn drift_handler(
    State(app_state): State<AppState>,
    debug_params: Query<DebugParams>,
) -> Result<Json<ApiResponse<DriftReport>>, AppError> {
    let report = app_state.executor.monitor.check_for_drift().await?;
    let debug_info = Some(json!({ "has_drift": report.has_drift() }));
    Ok(wrap_response(report, debug_params, debug_info))
}

/// Captures the live schema as a new snapshot and reindexes.
pub async fn refresh_handler(
    State(app_state): State<AppState>,
    debug_params: Query<DebugParams>,
) -> Result<Json<ApiResponse<RefreshOutcome>>, AppError> {
    let outcome = app_state.executor.monitor.refresh().await?;
    Ok(wrap_response(outcome, debug_params, None))
}

pub async fn snapshots_handler(
    State(app_state): State<AppState>,
    debug_params: Query<DebugParams>,
) -> Result<Json<ApiResponse<Vec<SnapshotInfo>>>, AppError> {
    Ok(wrap_response(
        app_state.executor.snapshots.versions(),
        debug_params,
        None,
    ))
}

pub async fn rollback_handler(
    State(app_state): State<AppState>,
    debug_params: Query<DebugParams>,
    Json(payload): Json<RollbackRequest>,
) -> Result<Json<ApiResponse<RollbackResponse>>, AppError> {
    let snapshot = app_state.executor.monitor.rollback_to(payload.version).await?;
    Ok(wrap_response(
        RollbackResponse {
            version: snapshot.version,
            tables: snapshot.table_names().map(str::to_string).collect(),
        },
        debug_params,
        None,
    ))
}
