//! Gateway webhooks
//!
//! The payout gateway retries aggressively on anything but 200, so every
//! notification that was durably stored is acknowledged with 200 whatever the
//! correlation outcome. Only a failure to store answers 500, which makes the
//! gateway redeliver.

use std::sync::Arc;

use axum::{Json, body::Bytes, extract::State, http::StatusCode};
use serde::Serialize;
use serde_json::{Value, json};
use utoipa::ToSchema;

use super::super::state::AppState;
use crate::callback::CallbackType;

/// Acknowledgement body expected by the gateway
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "PascalCase")]
pub struct CallbackAck {
    #[schema(example = 0)]
    pub result_code: i32,
    #[schema(example = "Accepted")]
    pub result_desc: String,
}

impl CallbackAck {
    fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted".to_string(),
        }
    }

    fn retry_later() -> Self {
        Self {
            result_code: 1,
            result_desc: "Temporary failure, retry".to_string(),
        }
    }
}

/// Payout result webhook
///
/// POST /callbacks/payout-result
#[utoipa::path(
    post,
    path = "/callbacks/payout-result",
    request_body(content = String, description = "Gateway result envelope `{\"Result\": {...}}`", content_type = "application/json"),
    responses(
        (status = 200, description = "Notification stored", body = CallbackAck),
        (status = 500, description = "Notification could not be stored", body = CallbackAck)
    ),
    tag = "Callbacks"
)]
pub async fn payout_result_callback(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> (StatusCode, Json<CallbackAck>) {
    handle(&state, CallbackType::Result, &body).await
}

/// Queue-timeout webhook
///
/// POST /callbacks/payout-timeout
#[utoipa::path(
    post,
    path = "/callbacks/payout-timeout",
    request_body(content = String, description = "Gateway queue-timeout envelope", content_type = "application/json"),
    responses(
        (status = 200, description = "Notification stored", body = CallbackAck),
        (status = 500, description = "Notification could not be stored", body = CallbackAck)
    ),
    tag = "Callbacks"
)]
pub async fn payout_timeout_callback(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> (StatusCode, Json<CallbackAck>) {
    handle(&state, CallbackType::Timeout, &body).await
}

async fn handle(
    state: &AppState,
    callback_type: CallbackType,
    body: &[u8],
) -> (StatusCode, Json<CallbackAck>) {
    // Unparseable bodies are still stored so nothing the gateway sent is lost
    let raw: Value = serde_json::from_slice(body).unwrap_or_else(|e| {
        tracing::warn!(callback_type = %callback_type, error = %e, "Callback body is not JSON");
        json!({ "unparsed": String::from_utf8_lossy(body) })
    });

    match state.correlator.handle(callback_type, raw).await {
        Ok(outcome) => {
            tracing::debug!(callback_type = %callback_type, outcome = ?outcome, "Callback handled");
            (StatusCode::OK, Json(CallbackAck::accepted()))
        }
        Err(e) if e.is_stored() => {
            // Replayed by the retry job
            tracing::warn!(callback_type = %callback_type, error = %e, "Callback stored but not applied");
            (StatusCode::OK, Json(CallbackAck::accepted()))
        }
        Err(e) => {
            tracing::error!(callback_type = %callback_type, error = %e, "Failed to store callback");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(CallbackAck::retry_later()),
            )
        }
    }
}
