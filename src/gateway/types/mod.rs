//! Gateway types module
//!
//! ## Input Types
//! - [`SubmitDisbursementRequest`], [`RetryRequest`]
//! - [`WalletAdjustmentRequest`], [`ChargeConfigRequest`]
//!
//! ## Output Types
//! - [`ApiResponse<T>`]: Unified API response wrapper
//! - [`ApiError`]: Error response with HTTP status
//! - View DTOs for disbursements, retry history and wallets

pub mod disbursement;
pub mod response;
pub mod wallet;

pub use disbursement::{
    DisbursementView, RetryLogView, RetryRequest, SubmitDisbursementRequest,
    SubmitDisbursementResponse,
};
pub use response::{ApiError, ApiResponse, ApiResult, error_codes, ok};
pub use wallet::{
    ChargeConfigRequest, ChargeView, LedgerQuery, WalletAdjustmentRequest, WalletTransactionView,
    WalletView,
};
