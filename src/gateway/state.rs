use std::sync::Arc;

use crate::callback::CallbackCorrelator;
use crate::disbursement::DisbursementCoordinator;
use crate::retry::RetryScheduler;
use crate::wallet::ChargeReconciler;

/// Gateway application state (shared)
#[derive(Clone)]
pub struct AppState {
    /// Submission path and disbursement reads
    pub coordinator: Arc<DisbursementCoordinator>,
    /// Webhook handling
    pub correlator: Arc<CallbackCorrelator>,
    /// Operator-triggered retries
    pub scheduler: Arc<RetryScheduler>,
    /// Wallet reads, adjustments and charge configuration
    pub reconciler: Arc<ChargeReconciler>,
}

impl AppState {
    pub fn new(
        coordinator: Arc<DisbursementCoordinator>,
        correlator: Arc<CallbackCorrelator>,
        scheduler: Arc<RetryScheduler>,
        reconciler: Arc<ChargeReconciler>,
    ) -> Self {
        Self {
            coordinator,
            correlator,
            scheduler,
            reconciler,
        }
    }
}
