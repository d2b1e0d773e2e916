//! Health check handler

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use utoipa::ToSchema;

use super::super::state::AppState;
use super::super::types::{ApiResponse, error_codes};

/// Health check response data
#[derive(serde::Serialize, ToSchema)]
pub struct HealthResponse {
    /// Server timestamp in milliseconds
    #[schema(example = 1760600000000_i64)]
    pub timestamp_ms: i64,
    /// Build identifier (git short hash)
    #[schema(example = "3f9c2ab")]
    pub build: String,
}

/// Health check endpoint
///
/// Pings the disbursement and wallet stores. Does NOT expose which one
/// failed in the response; the reason is logged.
///
/// - Healthy: 200 OK + {code: 0, data: {timestamp_ms, build}}
/// - Unhealthy: 503 Service Unavailable + {code: 5001, msg: "unavailable"}
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse, content_type = "application/json"),
        (status = 503, description = "Service unavailable")
    ),
    tag = "System"
)]
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let mut healthy = true;
    if let Err(e) = state.coordinator.repo().health_check().await {
        tracing::error!("[HEALTH] Disbursement store ping failed: {}", e);
        healthy = false;
    }
    if let Err(e) = state.reconciler.wallets().health_check().await {
        tracing::error!("[HEALTH] Wallet store ping failed: {}", e);
        healthy = false;
    }

    if healthy {
        (
            StatusCode::OK,
            Json(ApiResponse::success(HealthResponse {
                timestamp_ms: Utc::now().timestamp_millis(),
                build: env!("PAYOUT_ENGINE_BUILD").to_string(),
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse {
                code: error_codes::SERVICE_UNAVAILABLE,
                msg: "unavailable".to_string(),
                error: Some("SERVICE_UNAVAILABLE".to_string()),
                data: None,
            }),
        )
    }
}
