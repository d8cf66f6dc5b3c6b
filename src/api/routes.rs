//! API route definitions

use super::chat_handlers;
use super::handlers::{self, CoordinatorState};
use super::session_handlers;
use axum::{
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Create the API router
pub fn create_router(state: CoordinatorState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Answers its own preflight, so it sits outside the CORS layer
    let chat = Router::new()
        .route(
            "/proxy/chat",
            post(chat_handlers::post_chat).options(chat_handlers::chat_preflight),
        )
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ));

    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // ====================================================================
        // Sessions
        // ====================================================================
        .route(
            "/sessions",
            get(session_handlers::list_sessions).post(session_handlers::create_session),
        )
        .route(
            "/sessions/{id}/transcript",
            get(session_handlers::get_transcript),
        )
        // ====================================================================
        // Generic pass-through to the backend API
        // ====================================================================
        .route(
            "/proxy/{*path}",
            get(chat_handlers::passthrough)
                .post(chat_handlers::passthrough)
                .put(chat_handlers::passthrough)
                .patch(chat_handlers::passthrough)
                .delete(chat_handlers::passthrough),
        )
        .layer(cors)
        .merge(chat)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
