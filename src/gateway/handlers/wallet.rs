//! Partner wallet handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use validator::Validate;

use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResult, ChargeConfigRequest, LedgerQuery, WalletAdjustmentRequest,
    WalletTransactionView, WalletView, ok,
};
use crate::wallet::{ChargeConfig, ChargeType, WalletTransactionType};

const DEFAULT_LEDGER_LIMIT: usize = 50;
const MAX_LEDGER_LIMIT: usize = 500;

/// Get wallet balance
///
/// GET /wallets/{partner_id}
#[utoipa::path(
    get,
    path = "/wallets/{partner_id}",
    params(
        ("partner_id" = String, Path, description = "Partner ID")
    ),
    responses(
        (status = 200, description = "Wallet", body = WalletView),
        (status = 404, description = "No wallet for partner")
    ),
    tag = "Wallets"
)]
pub async fn get_wallet(
    State(state): State<Arc<AppState>>,
    Path(partner_id): Path<String>,
) -> ApiResult<WalletView> {
    let wallet = state.reconciler.balance(&partner_id).await?;
    ok(wallet.into())
}

/// List wallet ledger, newest first
///
/// GET /wallets/{partner_id}/transactions?limit=50
#[utoipa::path(
    get,
    path = "/wallets/{partner_id}/transactions",
    params(
        ("partner_id" = String, Path, description = "Partner ID"),
        ("limit" = Option<usize>, Query, description = "Max rows (default 50, max 500)")
    ),
    responses(
        (status = 200, description = "Ledger rows", body = [WalletTransactionView]),
        (status = 404, description = "No wallet for partner")
    ),
    tag = "Wallets"
)]
pub async fn get_wallet_transactions(
    State(state): State<Arc<AppState>>,
    Path(partner_id): Path<String>,
    Query(query): Query<LedgerQuery>,
) -> ApiResult<Vec<WalletTransactionView>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEDGER_LIMIT)
        .clamp(1, MAX_LEDGER_LIMIT);
    let rows = state.reconciler.transactions(&partner_id, limit).await?;
    ok(rows.into_iter().map(WalletTransactionView::from).collect())
}

/// Manual credit or top-up
///
/// POST /wallets/{partner_id}/credit
#[utoipa::path(
    post,
    path = "/wallets/{partner_id}/credit",
    params(
        ("partner_id" = String, Path, description = "Partner ID")
    ),
    request_body = WalletAdjustmentRequest,
    responses(
        (status = 200, description = "Ledger row written", body = WalletTransactionView),
        (status = 400, description = "Invalid parameters")
    ),
    tag = "Wallets"
)]
pub async fn credit_wallet(
    State(state): State<Arc<AppState>>,
    Path(partner_id): Path<String>,
    Json(req): Json<WalletAdjustmentRequest>,
) -> ApiResult<WalletTransactionView> {
    req.validate()?;
    let transaction_type = if req.top_up {
        WalletTransactionType::TopUp
    } else {
        WalletTransactionType::ManualCredit
    };
    let row = state
        .reconciler
        .credit(
            &partner_id,
            transaction_type,
            req.amount,
            &req.reference,
            &req.description,
        )
        .await?;
    ok(row.into())
}

/// Manual debit; never takes the balance below zero
///
/// POST /wallets/{partner_id}/debit
#[utoipa::path(
    post,
    path = "/wallets/{partner_id}/debit",
    params(
        ("partner_id" = String, Path, description = "Partner ID")
    ),
    request_body = WalletAdjustmentRequest,
    responses(
        (status = 200, description = "Ledger row written", body = WalletTransactionView),
        (status = 404, description = "No wallet for partner"),
        (status = 422, description = "Insufficient balance")
    ),
    tag = "Wallets"
)]
pub async fn debit_wallet(
    State(state): State<Arc<AppState>>,
    Path(partner_id): Path<String>,
    Json(req): Json<WalletAdjustmentRequest>,
) -> ApiResult<WalletTransactionView> {
    req.validate()?;
    if req.top_up {
        return ApiError::bad_request("top_up is only valid for credits").into_err();
    }
    let row = state
        .reconciler
        .debit(&partner_id, req.amount, &req.reference, &req.description)
        .await?;
    ok(row.into())
}

/// Replace the partner's active fee schedule for one charge type
///
/// PUT /wallets/{partner_id}/charge-config
#[utoipa::path(
    put,
    path = "/wallets/{partner_id}/charge-config",
    params(
        ("partner_id" = String, Path, description = "Partner ID")
    ),
    request_body = ChargeConfigRequest,
    responses(
        (status = 200, description = "Charge config id"),
        (status = 400, description = "Invalid parameters")
    ),
    tag = "Wallets"
)]
pub async fn set_charge_config(
    State(state): State<Arc<AppState>>,
    Path(partner_id): Path<String>,
    Json(req): Json<ChargeConfigRequest>,
) -> ApiResult<String> {
    req.validate()?;
    if req.percentage.is_sign_negative() {
        return ApiError::bad_request("percentage must not be negative").into_err();
    }
    if let Some(max) = req.max_amount
        && max < req.min_amount
    {
        return ApiError::bad_request("max_amount is below min_amount").into_err();
    }

    let charge_type = req
        .charge_type
        .as_deref()
        .map(ChargeType::parse)
        .unwrap_or(ChargeType::Disbursement);
    let wallets = state.reconciler.wallets();

    if let Some(mut previous) = wallets.active_charge_config(&partner_id, &charge_type).await? {
        previous.is_active = false;
        wallets.save_charge_config(&previous).await?;
    }

    let config = ChargeConfig {
        id: ulid::Ulid::new().to_string(),
        partner_id: partner_id.clone(),
        charge_type,
        flat_amount: req.flat_amount,
        percentage: req.percentage,
        min_amount: req.min_amount,
        max_amount: req.max_amount,
        is_active: true,
    };
    wallets.save_charge_config(&config).await?;
    tracing::info!(
        partner_id = %partner_id,
        charge_config_id = %config.id,
        charge_type = %config.charge_type.as_str(),
        "Charge config replaced"
    );
    ok(config.id)
}
