//! Disbursement handlers: submission, lookup, retry history, operator retry

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use validator::Validate;

use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResponse, ApiResult, ChargeView, DisbursementView, RetryLogView, RetryRequest,
    SubmitDisbursementRequest, SubmitDisbursementResponse, ok,
};
use super::parse_disbursement_id;
use crate::retry::BatchReport;

/// Submit a payout
///
/// POST /disbursements
///
/// Idempotent on `(partner_id, client_request_id)`: a repeat returns the
/// existing disbursement with `created = false` and HTTP 200.
#[utoipa::path(
    post,
    path = "/disbursements",
    request_body = SubmitDisbursementRequest,
    responses(
        (status = 202, description = "Disbursement created", body = SubmitDisbursementResponse),
        (status = 200, description = "Known client_request_id, existing disbursement returned", body = SubmitDisbursementResponse),
        (status = 400, description = "Invalid parameters"),
        (status = 422, description = "Partner not configured")
    ),
    tag = "Disbursements"
)]
pub async fn submit_disbursement(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitDisbursementRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SubmitDisbursementResponse>>), ApiError> {
    req.validate()?;

    let result = state.coordinator.submit(req.into()).await?;
    let status = if result.created {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    let record = result.record;

    Ok((
        status,
        Json(ApiResponse::success(SubmitDisbursementResponse {
            disbursement_id: record.id.to_string(),
            status: record.status.to_string(),
            conversation_id: record.conversation_id,
            created: result.created,
            result_code: record.result_code,
            error_classification: result
                .gateway_error
                .map(|e| e.classification().to_string()),
        })),
    ))
}

/// Get disbursement status
///
/// GET /disbursements/{id}
#[utoipa::path(
    get,
    path = "/disbursements/{id}",
    params(
        ("id" = String, Path, description = "Disbursement ID (ULID)")
    ),
    responses(
        (status = 200, description = "Disbursement", body = DisbursementView),
        (status = 400, description = "Invalid disbursement id"),
        (status = 404, description = "Disbursement not found")
    ),
    tag = "Disbursements"
)]
pub async fn get_disbursement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<DisbursementView> {
    let id = parse_disbursement_id(&id)?;
    let record = state.coordinator.get(id).await?;
    ok(record.into())
}

/// List retry attempts of a disbursement
///
/// GET /disbursements/{id}/retries
#[utoipa::path(
    get,
    path = "/disbursements/{id}/retries",
    params(
        ("id" = String, Path, description = "Disbursement ID (ULID)")
    ),
    responses(
        (status = 200, description = "Retry log, oldest attempt first", body = [RetryLogView]),
        (status = 404, description = "Disbursement not found")
    ),
    tag = "Disbursements"
)]
pub async fn get_retry_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Vec<RetryLogView>> {
    let id = parse_disbursement_id(&id)?;
    let log = state.coordinator.retry_history(id).await?;
    ok(log.into_iter().map(RetryLogView::from).collect())
}

/// List partner charges raised for a disbursement
///
/// GET /disbursements/{id}/charges
#[utoipa::path(
    get,
    path = "/disbursements/{id}/charges",
    params(
        ("id" = String, Path, description = "Disbursement ID (ULID)")
    ),
    responses(
        (status = 200, description = "Charge transactions", body = [ChargeView]),
        (status = 404, description = "Disbursement not found")
    ),
    tag = "Disbursements"
)]
pub async fn get_disbursement_charges(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Vec<ChargeView>> {
    let id = parse_disbursement_id(&id)?;
    let record = state.coordinator.get(id).await?;
    let charges = state.reconciler.charges(&record.partner_id, id).await?;
    ok(charges.into_iter().map(ChargeView::from).collect())
}

/// Operator-triggered retry
///
/// POST /disbursements/retry
///
/// `{"disbursement_id": "..."}` retries one disbursement now, ignoring its
/// schedule; `{}` runs the eligible batch.
#[utoipa::path(
    post,
    path = "/disbursements/retry",
    request_body = RetryRequest,
    responses(
        (status = 200, description = "Per-item retry report", body = BatchReport),
        (status = 400, description = "Invalid disbursement id"),
        (status = 404, description = "Disbursement not found")
    ),
    tag = "Disbursements"
)]
pub async fn retry_disbursements(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RetryRequest>,
) -> ApiResult<BatchReport> {
    let report = match req.disbursement_id.as_deref() {
        Some(raw) => {
            let id = parse_disbursement_id(raw)?;
            tracing::info!(disbursement_id = %id, "Operator retry requested");
            state.scheduler.run_single(id).await?
        }
        None => {
            tracing::info!("Operator batch retry requested");
            state.scheduler.run_batch().await?
        }
    };
    ok(report)
}
