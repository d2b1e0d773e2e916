//! Payout Engine - Disbursement Lifecycle & Wallet Reconciliation
//!
//! Sends mobile-money payouts through an asynchronous gateway, correlates the
//! gateway's webhooks back to the originating disbursement, retries transient
//! failures with exponential backoff and charges partner wallets exactly once
//! per successful payout.
//!
//! # Modules
//!
//! - [`disbursement`] - Records, state machine, submission coordinator
//! - [`provider`] - Gateway client and partner credentials
//! - [`callback`] - Webhook parsing, dedup and correlation
//! - [`retry`] - Backoff policy and the retry scheduler
//! - [`wallet`] - Partner wallets, fees and charge reconciliation
//! - [`settlement`] - Settled-disbursement events feeding the charge worker
//! - [`gateway`] - HTTP API

pub mod audit;
pub mod config;
pub mod db;
pub mod logging;

pub mod callback;
pub mod disbursement;
pub mod provider;
pub mod retry;
pub mod settlement;
pub mod wallet;

pub mod gateway;

// Convenient re-exports at crate root
pub use callback::CallbackCorrelator;
pub use disbursement::{
    DisbursementCoordinator, DisbursementId, DisbursementRecord, DisbursementStatus,
};
pub use retry::{RetryPolicy, RetryScheduler};
pub use wallet::ChargeReconciler;
