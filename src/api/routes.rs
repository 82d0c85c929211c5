//! API route definitions.

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::auth_middleware;
use crate::ws;

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let auth_state = state.auth.clone();

    // Protected routes (require authentication)
    let protected_routes = Router::new()
        // Location
        .route("/location/update", post(handlers::location::update_location))
        .route("/location/current", get(handlers::location::current_location))
        // Personas
        .route("/personas", post(handlers::persona::upsert_persona))
        .route("/personas", get(handlers::persona::list_personas))
        // Scenes
        .route("/scenes/start", post(handlers::scene::start_scene))
        .route("/scenes/stop", post(handlers::scene::stop_scene))
        .route("/scenes/active", get(handlers::scene::active_scene))
        .route("/scenes/nearby", get(handlers::scene::nearby_scenes))
        // Chat
        .route("/chat/requests", post(handlers::chat::propose))
        .route("/chat/requests/inbox", get(handlers::chat::inbox))
        .route("/chat/requests/sent", get(handlers::chat::sent))
        .route("/chat/requests/{id}/accept", post(handlers::chat::accept))
        .route("/chat/requests/{id}/reject", post(handlers::chat::reject))
        .route("/chat/requests/{id}/cancel", post(handlers::chat::cancel))
        .route("/chat/requests/{id}/messages", get(handlers::chat::messages))
        .route("/chat/messages", post(handlers::chat::post_message))
        .route("/chat/sessions", get(handlers::chat::sessions))
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    // Public routes
    let public_routes = Router::new()
        .route("/auth/send-otp", post(handlers::auth::send_otp))
        .route("/auth/verify-otp", post(handlers::auth::verify_otp));

    Router::new()
        .route("/health", get(handlers::system::health))
        // The WebSocket endpoint authenticates via query parameter.
        .route("/ws", get(ws::ws_handler))
        .nest("/api/v1", public_routes.merge(protected_routes))
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(state: &AppState) -> CorsLayer {
    if state.cors_origins.is_empty() {
        // Development default: allow anything, no credentials.
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = state
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
        ])
        .allow_credentials(true)
}
