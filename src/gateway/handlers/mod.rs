//! HTTP handlers

pub mod callback;
pub mod disbursement;
pub mod health;
pub mod wallet;

pub use callback::{payout_result_callback, payout_timeout_callback};
pub use disbursement::{
    get_disbursement, get_disbursement_charges, get_retry_history, retry_disbursements,
    submit_disbursement,
};
pub use health::{HealthResponse, health_check};
pub use wallet::{credit_wallet, debit_wallet, get_wallet, get_wallet_transactions, set_charge_config};

use crate::disbursement::{DisbursementError, DisbursementId};

use super::types::ApiError;

/// Parse a path id, rejecting anything that is not a ULID
pub(crate) fn parse_disbursement_id(raw: &str) -> Result<DisbursementId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::from(DisbursementError::InvalidId(raw.to_string())))
}
