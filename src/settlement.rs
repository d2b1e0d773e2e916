//! Settlement Event Channel
//!
//! The correlator publishes a "disbursement settled" event after a successful
//! transition to `success` or to a terminal `failed`. The charge worker drains
//! the channel and hands success events to the charge reconciler.
//!
//! Publishing never blocks the webhook: when the channel is full the event is
//! dropped with a warning. The event is only a fast path. The move to `success`
//! already marked the disbursement as awaiting its charge, and the reconciler
//! sweep charges every marked disbursement the worker did not resolve (dropped
//! event, charge error, or a restart with events still queued).

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::disbursement::{DisbursementId, DisbursementStatus, MinorUnits};
use crate::wallet::{ChargeOutcome, ChargeReconciler};

// ============================================================================
// Settlement Event
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementEvent {
    pub disbursement_id: DisbursementId,
    pub partner_id: String,
    pub amount: MinorUnits,
    /// `Success` or a terminal `Failed`
    pub status: DisbursementStatus,
}

// ============================================================================
// Settlement Channel
// ============================================================================

/// Sender side (used by the callback correlator)
#[derive(Clone)]
pub struct SettlementSender {
    tx: mpsc::Sender<SettlementEvent>,
}

impl SettlementSender {
    /// Publish without waiting. Returns `false` if the event was dropped.
    pub fn publish(&self, event: SettlementEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    disbursement_id = %event.disbursement_id,
                    "Settlement channel full, charge left for reconciler sweep"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                error!(
                    disbursement_id = %event.disbursement_id,
                    "Settlement channel closed"
                );
                false
            }
        }
    }
}

/// Receiver side (used by the charge worker)
pub struct SettlementReceiver {
    rx: mpsc::Receiver<SettlementEvent>,
}

impl SettlementReceiver {
    /// Try to receive an event (non-blocking)
    pub fn try_recv(&mut self) -> Option<SettlementEvent> {
        self.rx.try_recv().ok()
    }

    /// Receive an event (waits until available or closed)
    pub async fn recv(&mut self) -> Option<SettlementEvent> {
        self.rx.recv().await
    }
}

/// Create a new settlement channel pair
pub fn settlement_channel(buffer: usize) -> (SettlementSender, SettlementReceiver) {
    let (tx, rx) = mpsc::channel(buffer);
    (SettlementSender { tx }, SettlementReceiver { rx })
}

// ============================================================================
// Charge Worker
// ============================================================================

/// Applies partner charges for settled disbursements
pub struct ChargeWorker {
    receiver: SettlementReceiver,
    reconciler: Arc<ChargeReconciler>,
}

impl ChargeWorker {
    pub fn new(receiver: SettlementReceiver, reconciler: Arc<ChargeReconciler>) -> Self {
        Self {
            receiver,
            reconciler,
        }
    }

    /// Run until every sender is dropped
    pub async fn run(mut self) {
        info!("Starting charge worker");
        while let Some(event) = self.receiver.recv().await {
            self.handle(event).await;
        }
        info!("Settlement channel closed, charge worker stopped");
    }

    /// Process events already queued. Returns how many were handled.
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.receiver.try_recv() {
            self.handle(event).await;
            handled += 1;
        }
        handled
    }

    async fn handle(&self, event: SettlementEvent) {
        if event.status != DisbursementStatus::Success {
            info!(
                disbursement_id = %event.disbursement_id,
                partner_id = %event.partner_id,
                status = %event.status,
                "Disbursement settled without payout, nothing to charge"
            );
            return;
        }

        match self
            .reconciler
            .charge_settled(&event.partner_id, event.disbursement_id)
            .await
        {
            Ok(Some(outcome)) => match &outcome {
                ChargeOutcome::Completed { .. } | ChargeOutcome::AlreadyCompleted { .. } => {
                    debug!(
                        disbursement_id = %event.disbursement_id,
                        outcome = ?outcome,
                        "Charge applied"
                    );
                }
                other => {
                    warn!(
                        disbursement_id = %event.disbursement_id,
                        outcome = ?other,
                        "Charge not completed"
                    );
                }
            },
            Ok(None) => debug!(
                partner_id = %event.partner_id,
                "No active disbursement charge configured"
            ),
            Err(e) => error!(
                disbursement_id = %event.disbursement_id,
                error = %e,
                "Failed to apply charge, left for reconciler sweep"
            ),
        }
    }
}
