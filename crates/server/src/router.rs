use super::{handlers, state::AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Creates the Axum router with all the application routes.
pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/ask", post(handlers::ask_handler))
        .route(
            "/conversations/{id}",
            get(handlers::conversation_history_handler),
        )
        .route(
            "/conversations/{id}/reset",
            post(handlers::reset_conversation_handler),
        )
        .route("/validate", post(handlers::validate_handler))
        .route("/schema/drift", get(handlers::drift_handler))
        .route("/schema/refresh", post(handlers::refresh_handler))
        .route("/schema/snapshots", get(handlers::snapshots_handler))
        .route("/schema/rollback", post(handlers::rollback_handler))
        .route(
            "/examples",
            get(handlers::list_examples_handler).post(handlers::add_example_handler),
        )
        .route(
            "/rules",
            get(handlers::list_rules_handler).post(handlers::add_rule_handler),
        )
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}
