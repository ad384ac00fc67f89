//! HTTP API routes

pub mod cleaned;
pub mod health;
pub mod queue;
pub mod upload;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router
pub fn build_router(state: AppState) -> Router {
    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let max_upload_bytes = state.config().storage.max_upload_bytes;

    Router::new()
        .merge(upload::router(max_upload_bytes))
        .nest("/health", health::router())
        .nest("/api/v1/queue", queue::router())
        .nest("/api/v1/cleaned", cleaned::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
