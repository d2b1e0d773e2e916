use thiserror::Error;

use crate::disbursement::{DisbursementError, MinorUnits};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("No wallet for partner {0}")]
    WalletNotFound(String),

    #[error("Disbursement not found: {0}")]
    DisbursementNotFound(String),

    #[error("Charge not found: {0}")]
    ChargeNotFound(String),

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: MinorUnits,
        available: MinorUnits,
    },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Disbursement store error: {0}")]
    Store(String),
}

impl WalletError {
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            WalletError::DisbursementNotFound(_) => "DISBURSEMENT_NOT_FOUND",
            WalletError::ChargeNotFound(_) => "CHARGE_NOT_FOUND",
            WalletError::InvalidAmount => "INVALID_AMOUNT",
            WalletError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            WalletError::DatabaseError(_) | WalletError::Store(_) => "DATABASE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            WalletError::WalletNotFound(_)
            | WalletError::DisbursementNotFound(_)
            | WalletError::ChargeNotFound(_) => 404,
            WalletError::InvalidAmount => 400,
            WalletError::InsufficientBalance { .. } => 422,
            WalletError::DatabaseError(_) | WalletError::Store(_) => 500,
        }
    }
}

impl From<sqlx::Error> for WalletError {
    fn from(e: sqlx::Error) -> Self {
        WalletError::DatabaseError(e.to_string())
    }
}

impl From<DisbursementError> for WalletError {
    fn from(e: DisbursementError) -> Self {
        WalletError::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let err = WalletError::InsufficientBalance {
            required: 30,
            available: 10,
        };
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
        assert_eq!(err.http_status(), 422);
        assert!(err.to_string().contains("required 30"));

        assert_eq!(WalletError::WalletNotFound("x".into()).http_status(), 404);
        assert_eq!(WalletError::InvalidAmount.http_status(), 400);
    }
}
