//! Partner wallet ledger and charge reconciliation
//!
//! Each partner holds a prepaid wallet. Disbursement fees are debited from it
//! once the gateway has confirmed the payout; every balance mutation leaves a
//! ledger row.

pub mod db;
pub mod error;
pub mod fee;
pub mod reconciler;
pub mod repository;
pub mod types;

pub use db::PgWalletRepository;
pub use error::WalletError;
pub use fee::calculate_charge;
pub use reconciler::{ChargeReconciler, ReconcileReport};
pub use repository::{ChargeSettlement, InMemoryWalletRepository, WalletRepository};
pub use types::{
    ChargeConfig, ChargeOutcome, ChargeStatus, ChargeTransaction, ChargeType, WalletAccount,
    WalletTransaction, WalletTransactionType,
};
