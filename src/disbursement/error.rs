//! Disbursement Error Types

use thiserror::Error;

use crate::provider::{CredentialError, ProviderError};

#[derive(Error, Debug, Clone)]
pub enum DisbursementError {
    // === Validation Errors ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Invalid recipient MSISDN: {0}")]
    InvalidMsisdn(String),

    #[error("Invalid disbursement id: {0}")]
    InvalidId(String),

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    // === Partner Errors ===
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    // === Gateway Errors ===
    #[error(transparent)]
    Gateway(#[from] ProviderError),

    // === Lifecycle Errors ===
    #[error("Disbursement not found: {0}")]
    NotFound(String),

    #[error("Disbursement {0} is not eligible for retry")]
    NotRetryable(String),

    #[error("Concurrent update on disbursement {0}")]
    Conflict(String),

    // === System Errors ===
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal system error: {0}")]
    SystemError(String),
}

impl DisbursementError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            DisbursementError::InvalidAmount => "INVALID_AMOUNT",
            DisbursementError::InvalidMsisdn(_) => "INVALID_MSISDN",
            DisbursementError::InvalidId(_) => "INVALID_DISBURSEMENT_ID",
            DisbursementError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            DisbursementError::Credentials(CredentialError::Storage(_)) => "DATABASE_ERROR",
            DisbursementError::Credentials(_) => "PARTNER_NOT_CONFIGURED",
            DisbursementError::Gateway(e) => e.classification(),
            DisbursementError::NotFound(_) => "DISBURSEMENT_NOT_FOUND",
            DisbursementError::NotRetryable(_) => "NOT_RETRYABLE",
            DisbursementError::Conflict(_) => "CONCURRENT_UPDATE",
            DisbursementError::DatabaseError(_) => "DATABASE_ERROR",
            DisbursementError::SystemError(_) => "SYSTEM_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            DisbursementError::InvalidAmount
            | DisbursementError::InvalidMsisdn(_)
            | DisbursementError::InvalidId(_)
            | DisbursementError::UnsupportedCurrency(_) => 400,
            DisbursementError::Credentials(CredentialError::Storage(_)) => 500,
            DisbursementError::Credentials(_) => 422,
            DisbursementError::Gateway(ProviderError::Permanent { .. }) => 422,
            DisbursementError::Gateway(ProviderError::Transient { .. }) => 502,
            DisbursementError::NotFound(_) => 404,
            DisbursementError::NotRetryable(_) | DisbursementError::Conflict(_) => 409,
            DisbursementError::DatabaseError(_) | DisbursementError::SystemError(_) => 500,
        }
    }
}

impl From<sqlx::Error> for DisbursementError {
    fn from(e: sqlx::Error) -> Self {
        DisbursementError::DatabaseError(e.to_string())
    }
}
