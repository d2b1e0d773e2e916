//! OpenAPI / Swagger UI Documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::OpenApi;

use crate::gateway::handlers::HealthResponse;
use crate::gateway::handlers::callback::CallbackAck;
use crate::gateway::types::{
    ChargeConfigRequest, ChargeView, DisbursementView, RetryLogView, RetryRequest,
    SubmitDisbursementRequest, SubmitDisbursementResponse, WalletAdjustmentRequest,
    WalletTransactionView, WalletView,
};
use crate::retry::{BatchReport, RetryItemReport};

/// Main API Documentation struct
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Payout Engine API",
        version = "1.0.0",
        description = "Mobile-money disbursements with callback correlation, scheduled retries and partner wallet charging.",
        license(
            name = "MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::health::health_check,
        crate::gateway::handlers::disbursement::submit_disbursement,
        crate::gateway::handlers::disbursement::get_disbursement,
        crate::gateway::handlers::disbursement::get_retry_history,
        crate::gateway::handlers::disbursement::get_disbursement_charges,
        crate::gateway::handlers::disbursement::retry_disbursements,
        crate::gateway::handlers::callback::payout_result_callback,
        crate::gateway::handlers::callback::payout_timeout_callback,
        crate::gateway::handlers::wallet::get_wallet,
        crate::gateway::handlers::wallet::get_wallet_transactions,
        crate::gateway::handlers::wallet::credit_wallet,
        crate::gateway::handlers::wallet::debit_wallet,
        crate::gateway::handlers::wallet::set_charge_config,
    ),
    components(
        schemas(
            HealthResponse,
            SubmitDisbursementRequest,
            SubmitDisbursementResponse,
            DisbursementView,
            RetryLogView,
            RetryRequest,
            BatchReport,
            RetryItemReport,
            CallbackAck,
            WalletView,
            WalletTransactionView,
            WalletAdjustmentRequest,
            ChargeConfigRequest,
            ChargeView,
        )
    ),
    tags(
        (name = "Disbursements", description = "Payout submission, status and retries"),
        (name = "Callbacks", description = "Gateway webhooks (always acknowledged once stored)"),
        (name = "Wallets", description = "Partner wallet balance, ledger and fee schedule"),
        (name = "System", description = "Health checks and system info")
    )
)]
pub struct ApiDoc;
