//! Call intake router.
//!
//! The telephony provider's routing layer POSTs here when a call is
//! accepted, before the media socket opens. Creating the session first and
//! pre-warming the AI peer keeps the media handler's start path cheap: by
//! the time audio arrives the peer connection is usually already up.

use axum::{extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::core::health::Alert;
use crate::core::session::{EndReason, SessionError};
use crate::state::AppState;

/// Body of `POST /intake/call`.
#[derive(Debug, Clone, Deserialize)]
pub struct IntakeCallRequest {
    pub call_sid: String,
    pub business_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct IntakeCallResponse {
    pub call_sid: String,
    pub status: &'static str,
}

/// Body of `POST /intake/status`, the provider's call-status callback.
#[derive(Debug, Clone, Deserialize)]
pub struct IntakeStatusRequest {
    pub call_sid: String,
    pub call_status: String,
}

/// Accept a call: create its session and pre-warm the AI peer.
///
/// Pre-warming is best-effort and runs in the background so the provider's
/// routing layer gets its answer immediately. A failed pre-warm surfaces a
/// critical alert and ends the session with reason `failed`; the media
/// handler's init fallback covers sessions created without pre-warm.
pub async fn intake_call(
    State(state): State<AppState>,
    Json(request): Json<IntakeCallRequest>,
) -> Result<(StatusCode, Json<IntakeCallResponse>), (StatusCode, Json<Value>)> {
    let session = state
        .registry
        .create_session(
            &request.call_sid,
            &request.business_id,
            &request.agent_id,
            &request.from,
            &request.to,
        )
        .map_err(|e| match e {
            SessionError::Duplicate(_) => (
                StatusCode::CONFLICT,
                Json(json!({ "error": "session already exists" })),
            ),
            other => {
                warn!(call_sid = %request.call_sid, "intake failed: {other}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "failed to create session" })),
                )
            }
        })?;

    let registry = state.registry.clone();
    let alerts = state.alerts.clone();
    let call_sid = session.call_sid.clone();
    let business_id = session.business_id.clone();
    tokio::spawn(async move {
        if let Err(e) = registry.init_ai_peer(&call_sid).await {
            warn!(call_sid, "AI peer pre-warm failed: {e}");
            alerts.dispatch(
                Alert::critical("AI peer initialization failed", &e.to_string())
                    .with_business_id(&business_id)
                    .with_metadata(json!({ "call_sid": call_sid })),
            );
            registry.end_session(&call_sid, EndReason::Failed).await;
        }
    });

    Ok((
        StatusCode::CREATED,
        Json(IntakeCallResponse {
            call_sid: request.call_sid,
            status: "created",
        }),
    ))
}

/// Administrative status callback from the telephony provider.
///
/// Terminal statuses end the session with the matching reason; transient
/// ones (`ringing`, `in-progress`) are acknowledged without action. Always
/// answers 200 so the provider does not retry.
pub async fn intake_status(
    State(state): State<AppState>,
    Json(request): Json<IntakeStatusRequest>,
) -> Json<Value> {
    match end_reason_for_status(&request.call_status) {
        Some(reason) => {
            info!(
                call_sid = %request.call_sid,
                call_status = %request.call_status,
                "status callback ends call"
            );
            state.registry.end_session(&request.call_sid, reason).await;
        }
        None => {
            debug!(
                call_sid = %request.call_sid,
                call_status = %request.call_status,
                "non-terminal status callback"
            );
        }
    }
    Json(json!({ "status": "ok" }))
}

fn end_reason_for_status(call_status: &str) -> Option<EndReason> {
    match call_status {
        "completed" => Some(EndReason::Completed),
        "no-answer" | "busy" => Some(EndReason::Missed),
        "failed" | "canceled" => Some(EndReason::Failed),
        _ => None,
    }
}
