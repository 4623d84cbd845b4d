//! Shared-secret authentication for the intake API.
//!
//! The intake endpoints are called only by the telephony routing layer, so
//! auth is a single bearer secret compared in constant time. When no secret
//! is configured the endpoints are open; deployments behind a private
//! network run that way.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use crate::state::AppState;

/// Extract a bearer token from the Authorization header.
fn extract_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Constant-time byte comparison so a mismatched secret does not leak its
/// prefix length through timing.
fn secrets_match(candidate: &str, expected: &str) -> bool {
    let candidate = candidate.as_bytes();
    let expected = expected.as_bytes();
    if candidate.len() != expected.len() {
        return false;
    }
    candidate
        .iter()
        .zip(expected)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Middleware guarding the intake routes.
pub async fn intake_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(secret) = state.config.intake_shared_secret.as_deref() else {
        debug!("intake auth not configured, request allowed");
        return next.run(request).await;
    };

    match extract_token(&request) {
        Some(token) if secrets_match(&token, secret) => next.run(request).await,
        Some(_) => {
            warn!(path = %request.uri().path(), "intake auth failed: secret mismatch");
            unauthorized()
        }
        None => {
            warn!(path = %request.uri().path(), "intake auth failed: missing bearer token");
            unauthorized()
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "unauthorized" })),
    )
        .into_response()
}
