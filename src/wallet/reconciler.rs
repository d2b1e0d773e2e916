//! Charge Reconciler
//!
//! Applies partner fees for disbursements against the prepaid wallet.
//!
//! A charge is completed only once the disbursement is `success`. Until then
//! it stays `pending` with a deferral reason; a disbursement that finishes
//! `failed` is not billable and its pending charge is closed as failed.
//! At most one charge per `(partner, disbursement, charge type)` completes.
//!
//! Every move to `success` marks the disbursement as awaiting its charge in
//! the same write. The mark is cleared only once the charge resolves, so a
//! lost settlement event is recovered by [`ChargeReconciler::reconcile_pending`].

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::WalletError;
use super::fee::calculate_charge;
use super::repository::{ChargeSettlement, WalletRepository};
use super::types::{
    AWAITING_SETTLEMENT_REASON, ChargeConfig, ChargeOutcome, ChargeStatus, ChargeTransaction,
    ChargeType, DISBURSEMENT_FAILED_REASON, WalletAccount, WalletTransaction,
    WalletTransactionType,
};
use crate::audit::{AuditEvent, AuditSink};
use crate::disbursement::types::DEFAULT_CURRENCY;
use crate::disbursement::{
    DisbursementId, DisbursementRecord, DisbursementRepository, DisbursementStatus, MinorUnits,
};

/// Summary of one pending-charge sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub completed: usize,
    pub failed: usize,
    pub deferred: usize,
    /// `success` disbursements charged from their awaiting mark
    pub backfilled: usize,
}

impl ReconcileReport {
    fn count(&mut self, outcome: &ChargeOutcome) {
        match outcome {
            ChargeOutcome::Completed { .. } | ChargeOutcome::AlreadyCompleted { .. } => {
                self.completed += 1
            }
            ChargeOutcome::Failed { .. } | ChargeOutcome::NotBillable { .. } => self.failed += 1,
            ChargeOutcome::Deferred { .. } => self.deferred += 1,
        }
    }
}

pub struct ChargeReconciler {
    wallets: Arc<dyn WalletRepository>,
    disbursements: Arc<dyn DisbursementRepository>,
    audit: Arc<dyn AuditSink>,
}

impl ChargeReconciler {
    pub fn new(
        wallets: Arc<dyn WalletRepository>,
        disbursements: Arc<dyn DisbursementRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            wallets,
            disbursements,
            audit,
        }
    }

    pub fn wallets(&self) -> &Arc<dyn WalletRepository> {
        &self.wallets
    }

    /// Charge the partner's active disbursement fee. `None` when no fee is configured.
    pub async fn charge_for_disbursement(
        &self,
        partner_id: &str,
        disbursement_id: DisbursementId,
    ) -> Result<Option<ChargeOutcome>, WalletError> {
        let Some(config) = self
            .wallets
            .active_charge_config(partner_id, &ChargeType::Disbursement)
            .await?
        else {
            return Ok(None);
        };
        self.apply_charge(partner_id, disbursement_id, &config)
            .await
            .map(Some)
    }

    /// Charge a settled disbursement and clear its awaiting mark.
    ///
    /// On error the mark stays and the next sweep tries again.
    pub async fn charge_settled(
        &self,
        partner_id: &str,
        disbursement_id: DisbursementId,
    ) -> Result<Option<ChargeOutcome>, WalletError> {
        let outcome = self
            .charge_for_disbursement(partner_id, disbursement_id)
            .await?;
        if !matches!(outcome, Some(ChargeOutcome::Deferred { .. })) {
            self.disbursements
                .clear_awaiting_charge(disbursement_id)
                .await?;
        }
        Ok(outcome)
    }

    /// Apply `config` for one disbursement, gated on its status
    pub async fn apply_charge(
        &self,
        partner_id: &str,
        disbursement_id: DisbursementId,
        config: &ChargeConfig,
    ) -> Result<ChargeOutcome, WalletError> {
        let existing = self
            .wallets
            .find_open_charge(partner_id, disbursement_id, &config.charge_type)
            .await?;
        if let Some(charge) = &existing
            && charge.status == ChargeStatus::Completed
        {
            debug!(
                disbursement_id = %disbursement_id,
                charge_id = %charge.id,
                "Charge already completed"
            );
            return Ok(ChargeOutcome::AlreadyCompleted {
                charge_id: charge.id.clone(),
            });
        }

        let disbursement = self
            .disbursements
            .get(disbursement_id)
            .await?
            .filter(|d| d.partner_id == partner_id)
            .ok_or_else(|| WalletError::DisbursementNotFound(disbursement_id.to_string()))?;

        self.resolve(existing, &disbursement, config).await
    }

    async fn resolve(
        &self,
        existing: Option<ChargeTransaction>,
        disbursement: &DisbursementRecord,
        config: &ChargeConfig,
    ) -> Result<ChargeOutcome, WalletError> {
        if disbursement.status == DisbursementStatus::Success {
            let charge = match existing {
                Some(charge) => charge,
                None => self.open_charge(disbursement, config, None).await?,
            };
            return self.settle(charge).await;
        }

        if disbursement.is_finished() {
            if let Some(charge) = existing
                && self
                    .wallets
                    .fail_charge(&charge.id, DISBURSEMENT_FAILED_REASON)
                    .await?
            {
                info!(
                    disbursement_id = %disbursement.id,
                    charge_id = %charge.id,
                    "Pending charge closed, disbursement failed"
                );
            }
            return Ok(ChargeOutcome::NotBillable {
                status: disbursement.status,
            });
        }

        let reason = format!("{} ({})", AWAITING_SETTLEMENT_REASON, disbursement.status);
        let charge = match existing {
            Some(charge) => {
                self.wallets.defer_charge(&charge.id, &reason).await?;
                charge
            }
            None => self.open_charge(disbursement, config, Some(reason)).await?,
        };
        warn!(
            disbursement_id = %disbursement.id,
            charge_id = %charge.id,
            status = %disbursement.status,
            "Charge deferred until disbursement settles"
        );
        Ok(ChargeOutcome::Deferred {
            charge_id: charge.id,
            status: disbursement.status,
        })
    }

    async fn open_charge(
        &self,
        disbursement: &DisbursementRecord,
        config: &ChargeConfig,
        reason: Option<String>,
    ) -> Result<ChargeTransaction, WalletError> {
        let wallet = self
            .wallets
            .get_wallet(&disbursement.partner_id)
            .await?
            .ok_or_else(|| WalletError::WalletNotFound(disbursement.partner_id.clone()))?;
        let amount = calculate_charge(config, disbursement.amount);
        let charge = ChargeTransaction::pending(&wallet, config, disbursement.id, amount, reason);
        self.wallets.insert_pending_charge(&charge).await
    }

    async fn settle(&self, charge: ChargeTransaction) -> Result<ChargeOutcome, WalletError> {
        match self.wallets.settle_charge(&charge.id).await? {
            ChargeSettlement::Completed(done) => {
                let balance_after = done.wallet_balance_after.unwrap_or_default();
                info!(
                    disbursement_id = %done.related_transaction_id,
                    partner_id = %done.partner_id,
                    charge_id = %done.id,
                    amount = done.amount,
                    balance_after,
                    "Charge completed"
                );
                self.audit.record(
                    AuditEvent::new("charge.completed", done.id.clone())
                        .partner(&done.partner_id)
                        .detail(json!({
                            "disbursement_id": done.related_transaction_id,
                            "amount": done.amount,
                            "balance_before": done.wallet_balance_before,
                            "balance_after": done.wallet_balance_after,
                        })),
                );
                Ok(ChargeOutcome::Completed {
                    charge_id: done.id,
                    amount: done.amount,
                    balance_after,
                })
            }
            ChargeSettlement::Insufficient(failed) => {
                let reason = failed.reason.clone().unwrap_or_default();
                warn!(
                    disbursement_id = %failed.related_transaction_id,
                    partner_id = %failed.partner_id,
                    charge_id = %failed.id,
                    amount = failed.amount,
                    balance = ?failed.wallet_balance_before,
                    operator_action = true,
                    "Charge failed: insufficient wallet balance"
                );
                self.audit.record(
                    AuditEvent::new("charge.failed", failed.id.clone())
                        .partner(&failed.partner_id)
                        .detail(json!({
                            "disbursement_id": failed.related_transaction_id,
                            "amount": failed.amount,
                            "reason": reason,
                        })),
                );
                Ok(ChargeOutcome::Failed {
                    charge_id: failed.id,
                    reason,
                })
            }
            ChargeSettlement::NotPending(current) => match current.status {
                ChargeStatus::Completed => Ok(ChargeOutcome::AlreadyCompleted {
                    charge_id: current.id,
                }),
                _ => Ok(ChargeOutcome::Failed {
                    charge_id: current.id,
                    reason: current.reason.unwrap_or_default(),
                }),
            },
        }
    }

    /// Re-evaluate pending charges against their disbursements
    pub async fn reconcile_pending(&self, limit: usize) -> Result<ReconcileReport, WalletError> {
        let pending = self.wallets.list_pending_charges(limit).await?;
        let mut report = ReconcileReport {
            scanned: pending.len(),
            ..Default::default()
        };

        for charge in pending {
            let Some(config) = self
                .wallets
                .get_charge_config(&charge.charge_config_id)
                .await?
            else {
                warn!(
                    charge_id = %charge.id,
                    charge_config_id = %charge.charge_config_id,
                    "Pending charge references unknown config, skipped"
                );
                continue;
            };
            let Some(disbursement) = self
                .disbursements
                .get(charge.related_transaction_id)
                .await?
            else {
                warn!(
                    charge_id = %charge.id,
                    disbursement_id = %charge.related_transaction_id,
                    "Pending charge references unknown disbursement, skipped"
                );
                continue;
            };

            let outcome = self.resolve(Some(charge), &disbursement, &config).await?;
            if disbursement.awaiting_charge && !matches!(outcome, ChargeOutcome::Deferred { .. }) {
                self.disbursements
                    .clear_awaiting_charge(disbursement.id)
                    .await?;
            }
            report.count(&outcome);
        }

        self.backfill_settled(limit, &mut report).await?;

        if report.scanned > 0 || report.backfilled > 0 {
            info!(
                scanned = report.scanned,
                completed = report.completed,
                failed = report.failed,
                deferred = report.deferred,
                backfilled = report.backfilled,
                "Pending charge sweep finished"
            );
        }
        Ok(report)
    }

    /// Charge `success` disbursements whose settlement event never reached a worker
    async fn backfill_settled(
        &self,
        limit: usize,
        report: &mut ReconcileReport,
    ) -> Result<(), WalletError> {
        let awaiting = self.disbursements.find_awaiting_charge(limit).await?;
        for disbursement in awaiting {
            match self
                .charge_settled(&disbursement.partner_id, disbursement.id)
                .await
            {
                Ok(outcome) => {
                    info!(
                        disbursement_id = %disbursement.id,
                        partner_id = %disbursement.partner_id,
                        outcome = ?outcome,
                        "Charge backfilled for settled disbursement"
                    );
                    report.backfilled += 1;
                    if let Some(outcome) = &outcome {
                        report.count(outcome);
                    }
                }
                Err(e) => warn!(
                    disbursement_id = %disbursement.id,
                    partner_id = %disbursement.partner_id,
                    error = %e,
                    "Charge backfill failed, kept for next sweep"
                ),
            }
        }
        Ok(())
    }

    pub async fn balance(&self, partner_id: &str) -> Result<WalletAccount, WalletError> {
        self.wallets
            .get_wallet(partner_id)
            .await?
            .ok_or_else(|| WalletError::WalletNotFound(partner_id.to_string()))
    }

    pub async fn transactions(
        &self,
        partner_id: &str,
        limit: usize,
    ) -> Result<Vec<WalletTransaction>, WalletError> {
        self.balance(partner_id).await?;
        self.wallets.list_transactions(partner_id, limit).await
    }

    pub async fn charges(
        &self,
        partner_id: &str,
        disbursement_id: DisbursementId,
    ) -> Result<Vec<ChargeTransaction>, WalletError> {
        self.wallets.list_charges(partner_id, disbursement_id).await
    }

    /// Add funds, opening the wallet on first credit
    pub async fn credit(
        &self,
        partner_id: &str,
        transaction_type: WalletTransactionType,
        amount: MinorUnits,
        reference: &str,
        description: &str,
    ) -> Result<WalletTransaction, WalletError> {
        if !transaction_type.is_credit() {
            return Err(WalletError::InvalidAmount);
        }
        self.wallets
            .create_wallet(&WalletAccount::new(partner_id, DEFAULT_CURRENCY))
            .await?;
        let row = self
            .wallets
            .adjust_balance(partner_id, transaction_type, amount, reference, description)
            .await?;
        self.audit_adjustment(&row);
        Ok(row)
    }

    /// Remove funds; refuses to take the balance below zero
    pub async fn debit(
        &self,
        partner_id: &str,
        amount: MinorUnits,
        reference: &str,
        description: &str,
    ) -> Result<WalletTransaction, WalletError> {
        let row = self
            .wallets
            .adjust_balance(
                partner_id,
                WalletTransactionType::ManualDebit,
                amount,
                reference,
                description,
            )
            .await?;
        self.audit_adjustment(&row);
        Ok(row)
    }

    fn audit_adjustment(&self, row: &WalletTransaction) {
        info!(
            partner_id = %row.partner_id,
            transaction_type = %row.transaction_type,
            amount = row.amount,
            balance_after = row.balance_after,
            "Wallet adjusted"
        );
        self.audit.record(
            AuditEvent::new("wallet.adjusted", row.id.clone())
                .partner(&row.partner_id)
                .detail(json!({
                    "transaction_type": row.transaction_type,
                    "amount": row.amount,
                    "balance_before": row.balance_before,
                    "balance_after": row.balance_after,
                    "reference": row.reference,
                })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::RecordingAuditSink;
    use crate::disbursement::types::{DEFAULT_MAX_RETRIES, NewDisbursement};
    use crate::disbursement::{InMemoryDisbursementRepository, StatusUpdate};
    use crate::wallet::repository::InMemoryWalletRepository;
    use chrono::Utc;
    use rust_decimal::Decimal;

    struct Harness {
        reconciler: ChargeReconciler,
        wallets: Arc<InMemoryWalletRepository>,
        disbursements: Arc<InMemoryDisbursementRepository>,
    }

    async fn harness(balance: MinorUnits) -> Harness {
        let wallets = Arc::new(InMemoryWalletRepository::new());
        let disbursements = Arc::new(InMemoryDisbursementRepository::new());
        let reconciler = ChargeReconciler::new(
            wallets.clone(),
            disbursements.clone(),
            Arc::new(RecordingAuditSink::default()),
        );
        wallets
            .save_charge_config(&ChargeConfig {
                id: "cfg-1".to_string(),
                partner_id: "acme".to_string(),
                charge_type: ChargeType::Disbursement,
                flat_amount: 30,
                percentage: Decimal::ZERO,
                min_amount: 0,
                max_amount: None,
                is_active: true,
            })
            .await
            .unwrap();
        if balance > 0 {
            reconciler
                .credit("acme", WalletTransactionType::TopUp, balance, "T1", "float")
                .await
                .unwrap();
        } else {
            wallets
                .create_wallet(&WalletAccount::new("acme", "KES"))
                .await
                .unwrap();
        }
        Harness {
            reconciler,
            wallets,
            disbursements,
        }
    }

    async fn disbursement(h: &Harness, status: DisbursementStatus) -> DisbursementId {
        let record = DisbursementRecord::new(
            NewDisbursement {
                partner_id: "acme".to_string(),
                client_request_id: ulid::Ulid::new().to_string(),
                amount: 100,
                currency: "KES".to_string(),
                recipient_msisdn: "254712345678".to_string(),
                remarks: String::new(),
                max_retries: DEFAULT_MAX_RETRIES,
            },
            Utc::now(),
        );
        h.disbursements.insert(&record).await.unwrap();
        move_to(h, record.id, status).await;
        record.id
    }

    async fn move_to(h: &Harness, id: DisbursementId, status: DisbursementStatus) {
        let mut current = h.disbursements.get(id).await.unwrap().unwrap().status;
        if current == status {
            return;
        }
        if current == DisbursementStatus::Queued && status == DisbursementStatus::Success {
            h.disbursements
                .transition(
                    id,
                    current,
                    DisbursementStatus::Pending,
                    &StatusUpdate::default(),
                )
                .await
                .unwrap();
            current = DisbursementStatus::Pending;
        }
        assert!(
            h.disbursements
                .transition(id, current, status, &StatusUpdate::default())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_success_is_charged_exactly_once() {
        let h = harness(100).await;
        let id = disbursement(&h, DisbursementStatus::Success).await;

        let first = h.reconciler.apply_charge_default(id).await;
        assert!(matches!(
            first,
            ChargeOutcome::Completed {
                amount: 30,
                balance_after: 70,
                ..
            }
        ));
        let second = h.reconciler.apply_charge_default(id).await;
        assert!(matches!(second, ChargeOutcome::AlreadyCompleted { .. }));

        assert_eq!(h.reconciler.balance("acme").await.unwrap().current_balance, 70);
        let charges = h.reconciler.charges("acme", id).await.unwrap();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].status, ChargeStatus::Completed);
        assert_eq!(charges[0].wallet_balance_before, Some(100));
    }

    #[tokio::test]
    async fn test_unresolved_disbursement_is_deferred_then_completed() {
        let h = harness(100).await;
        let id = disbursement(&h, DisbursementStatus::Accepted).await;

        let outcome = h.reconciler.apply_charge_default(id).await;
        assert!(matches!(
            outcome,
            ChargeOutcome::Deferred {
                status: DisbursementStatus::Accepted,
                ..
            }
        ));
        let charges = h.reconciler.charges("acme", id).await.unwrap();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].status, ChargeStatus::Pending);
        assert!(
            charges[0]
                .reason
                .as_deref()
                .unwrap()
                .starts_with(AWAITING_SETTLEMENT_REASON)
        );
        assert_eq!(h.reconciler.balance("acme").await.unwrap().current_balance, 100);

        move_to(&h, id, DisbursementStatus::Success).await;
        let report = h.reconciler.reconcile_pending(10).await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                scanned: 1,
                completed: 1,
                failed: 0,
                deferred: 0,
                backfilled: 0,
            }
        );
        assert!(!h.disbursements.get(id).await.unwrap().unwrap().awaiting_charge);
        assert_eq!(h.reconciler.balance("acme").await.unwrap().current_balance, 70);
        assert_eq!(h.reconciler.charges("acme", id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_settled_disbursement_without_event_is_backfilled() {
        let h = harness(100).await;
        let id = disbursement(&h, DisbursementStatus::Success).await;
        assert!(h.disbursements.get(id).await.unwrap().unwrap().awaiting_charge);

        let report = h.reconciler.reconcile_pending(10).await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                scanned: 0,
                completed: 1,
                failed: 0,
                deferred: 0,
                backfilled: 1,
            }
        );
        assert_eq!(h.reconciler.balance("acme").await.unwrap().current_balance, 70);
        assert!(!h.disbursements.get(id).await.unwrap().unwrap().awaiting_charge);

        let again = h.reconciler.reconcile_pending(10).await.unwrap();
        assert_eq!(again, ReconcileReport::default());
        assert_eq!(h.reconciler.balance("acme").await.unwrap().current_balance, 70);
    }

    #[tokio::test]
    async fn test_backfill_keeps_mark_until_charge_resolves() {
        let h = harness(100).await;
        h.wallets
            .save_charge_config(&ChargeConfig {
                id: "cfg-beta".to_string(),
                partner_id: "beta".to_string(),
                charge_type: ChargeType::Disbursement,
                flat_amount: 5,
                percentage: Decimal::ZERO,
                min_amount: 0,
                max_amount: None,
                is_active: true,
            })
            .await
            .unwrap();
        let record = DisbursementRecord::new(
            NewDisbursement {
                partner_id: "beta".to_string(),
                client_request_id: "beta-1".to_string(),
                amount: 100,
                currency: "KES".to_string(),
                recipient_msisdn: "254712345678".to_string(),
                remarks: String::new(),
                max_retries: DEFAULT_MAX_RETRIES,
            },
            Utc::now(),
        );
        h.disbursements.insert(&record).await.unwrap();
        move_to(&h, record.id, DisbursementStatus::Success).await;

        // Fee configured, wallet not opened yet
        let err = h
            .reconciler
            .charge_settled("beta", record.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "WALLET_NOT_FOUND");
        let report = h.reconciler.reconcile_pending(10).await.unwrap();
        assert_eq!(report.backfilled, 0);
        assert!(
            h.disbursements
                .get(record.id)
                .await
                .unwrap()
                .unwrap()
                .awaiting_charge
        );

        h.reconciler
            .credit("beta", WalletTransactionType::TopUp, 50, "T-beta", "")
            .await
            .unwrap();
        let report = h.reconciler.reconcile_pending(10).await.unwrap();
        assert_eq!(report.backfilled, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(h.reconciler.balance("beta").await.unwrap().current_balance, 45);
        assert!(
            !h.disbursements
                .get(record.id)
                .await
                .unwrap()
                .unwrap()
                .awaiting_charge
        );
    }

    #[tokio::test]
    async fn test_failed_disbursement_is_not_billable() {
        let h = harness(100).await;
        let id = disbursement(&h, DisbursementStatus::Accepted).await;
        h.reconciler.apply_charge_default(id).await;

        // Terminal failure: no retry scheduled
        move_to(&h, id, DisbursementStatus::Failed).await;
        let outcome = h.reconciler.apply_charge_default(id).await;
        assert_eq!(
            outcome,
            ChargeOutcome::NotBillable {
                status: DisbursementStatus::Failed
            }
        );
        let charges = h.reconciler.charges("acme", id).await.unwrap();
        assert_eq!(charges[0].status, ChargeStatus::Failed);
        assert_eq!(
            charges[0].reason.as_deref(),
            Some(DISBURSEMENT_FAILED_REASON)
        );
        assert_eq!(h.reconciler.balance("acme").await.unwrap().current_balance, 100);
    }

    #[tokio::test]
    async fn test_insufficient_balance_fails_charge_only() {
        let h = harness(10).await;
        let id = disbursement(&h, DisbursementStatus::Success).await;

        let outcome = h.reconciler.apply_charge_default(id).await;
        match outcome {
            ChargeOutcome::Failed { reason, .. } => assert_eq!(reason, "insufficient balance"),
            other => panic!("expected failed, got {:?}", other),
        }
        assert_eq!(h.reconciler.balance("acme").await.unwrap().current_balance, 10);
        let record = h.disbursements.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, DisbursementStatus::Success);

        // After a top-up the charge can be attempted again
        h.reconciler
            .credit("acme", WalletTransactionType::TopUp, 100, "T2", "")
            .await
            .unwrap();
        let retried = h.reconciler.apply_charge_default(id).await;
        assert!(matches!(retried, ChargeOutcome::Completed { .. }));
        assert_eq!(h.reconciler.charges("acme", id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_charges_complete_once() {
        let h = Arc::new(harness(1_000).await);
        let id = disbursement(&h, DisbursementStatus::Success).await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let h = h.clone();
            tasks.push(tokio::spawn(
                async move { h.reconciler.apply_charge_default(id).await },
            ));
        }
        let mut completed = 0;
        for task in tasks {
            if matches!(task.await.unwrap(), ChargeOutcome::Completed { .. }) {
                completed += 1;
            }
        }
        assert_eq!(completed, 1);
        assert_eq!(
            h.reconciler.balance("acme").await.unwrap().current_balance,
            970
        );
    }

    #[tokio::test]
    async fn test_no_config_means_no_charge() {
        let h = harness(100).await;
        let id = disbursement(&h, DisbursementStatus::Success).await;
        assert!(
            h.reconciler
                .charge_for_disbursement("other", id)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            h.reconciler
                .charge_for_disbursement("acme", id)
                .await
                .unwrap()
                .is_some()
        );
        assert!(h.wallets.list_pending_charges(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manual_adjustments() {
        let h = harness(0).await;
        h.reconciler
            .credit("acme", WalletTransactionType::ManualCredit, 50, "ADJ-1", "goodwill")
            .await
            .unwrap();
        let err = h.reconciler.debit("acme", 60, "ADJ-2", "").await.unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
        h.reconciler.debit("acme", 20, "ADJ-3", "").await.unwrap();

        let ledger = h.reconciler.transactions("acme", 10).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[0].transaction_type, WalletTransactionType::ManualDebit);
        assert_eq!(ledger[0].balance_after, 30);
        assert!(h.reconciler.transactions("ghost", 10).await.is_err());
        assert!(
            h.reconciler
                .credit("acme", WalletTransactionType::Charge, 5, "X", "")
                .await
                .is_err()
        );
    }

    impl ChargeReconciler {
        async fn apply_charge_default(&self, id: DisbursementId) -> ChargeOutcome {
            self.charge_for_disbursement("acme", id)
                .await
                .unwrap()
                .unwrap()
        }
    }
}
