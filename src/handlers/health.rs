//! Health probe endpoints.

use axum::{extract::State, http::StatusCode, response::Json};

use crate::core::health::{LivenessSnapshot, OverallStatus, ReadinessSnapshot};
use crate::state::AppState;

/// `GET /health/live`: server vitals only, always 200 while the process
/// can answer at all.
pub async fn liveness(State(state): State<AppState>) -> Json<LivenessSnapshot> {
    Json(state.health.liveness())
}

/// `GET /health/ready`: per-dependency status. Answers 503 only when the
/// persistence dependency is down; degraded states still serve traffic.
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessSnapshot>) {
    let snapshot = state.health.readiness().await;
    let code = match snapshot.status {
        OverallStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        OverallStatus::Healthy | OverallStatus::Degraded => StatusCode::OK,
    };
    (code, Json(snapshot))
}
