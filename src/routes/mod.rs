//! HTTP and WebSocket route configuration.

use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{health, intake, media};
use crate::middleware::intake_auth;
use crate::state::AppState;

/// Media-stream WebSocket route.
///
/// `GET /media`: WebSocket upgrade for the telephony provider's media
/// stream. Event-tagged JSON per the provider's streaming protocol.
pub fn create_media_router() -> Router<AppState> {
    Router::new()
        .route("/media", get(media::media_handler))
        .layer(TraceLayer::new_for_http())
}

/// Intake API routes, guarded by the shared-secret middleware.
///
/// `POST /intake/call`: create the session for an accepted call.
/// `POST /intake/status`: call-status callback.
pub fn create_intake_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/intake/call", post(intake::intake_call))
        .route("/intake/status", post(intake::intake_status))
        .layer(axum::middleware::from_fn_with_state(state, intake_auth))
        .layer(TraceLayer::new_for_http())
}

/// Health probe routes. Unauthenticated; load balancers poll these.
pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
}

/// The complete application router.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_allowed_origins);
    Router::new()
        .merge(create_media_router())
        .merge(create_intake_router(state.clone()))
        .merge(create_health_router())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(allowed_origins: &str) -> CorsLayer {
    if allowed_origins.trim() == "*" {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
