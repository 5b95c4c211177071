//! Route definitions and router construction.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use crate::handlers;
use crate::state::AppState;

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        // Analysis pipeline
        .route("/video/analyze", post(handlers::video::start_analysis))
        .route("/video/analyze/{id}", get(handlers::video::get_status))
        .route(
            "/video/analyze/{id}/stream",
            get(handlers::video::stream_status),
        )
        // Subtitle artifacts
        .route("/subtitle/{id}/content", get(handlers::subtitle::content))
        .route(
            "/subtitle/dictionary/query",
            post(handlers::dictionary::query),
        );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(handlers::health::health))
        .layer(cors)
        .with_state(state)
}
