use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handler;
use crate::state::AppState;

/// Build the axum router with all Arbor endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(handler::health_handler))
        .route("/v1/info", get(handler::info_handler))
        .route("/v1/sessions", get(handler::list_sessions))
        .route(
            "/v1/sessions/:session/checkpoints",
            get(handler::list_checkpoints).post(handler::append_checkpoint),
        )
        .route(
            "/v1/sessions/:session/checkpoints/:checkpoint/branches",
            get(handler::list_branches),
        )
        .route("/v1/sessions/:session/tree", get(handler::session_tree))
        .route("/v1/sessions/:session/diff", get(handler::diff_checkpoints))
        .route("/v1/sessions/:session/merge", axum::routing::post(handler::merge_checkpoints))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
