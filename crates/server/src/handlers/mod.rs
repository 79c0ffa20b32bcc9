//! # API Route Handlers
//!
//! Handlers are split by concern: questions and conversations, schema
//! administration, and the example/rule knowledge stores.

pub mod ask;
pub mod general;
pub mod knowledge;
pub mod schema;

pub use ask::*;
pub use general::*;
pub use knowledge::*;
pub use schema::*;

// Shared items used by multiple handler modules.
use super::{
    errors::AppError,
    state::AppState,
    types::{ApiResponse, DebugParams},
};
use axum::{extract::Query, Json};
use serde_json::Value;

/// Wraps a successful result in the standard `ApiResponse` envelope, adding
/// debug information only when `?debug=true` was requested.
pub(crate) fn wrap_response<T>(
    result: T,
    debug_params: Query<DebugParams>,
    debug_info: Option<Value>,
) -> Json<ApiResponse<T>> {
    let debug = if debug_params.debug.unwrap_or(false) {
        debug_info
    } else {
        None
    };
    Json(ApiResponse { debug, result })
}
