//! Callback Correlator
//!
//! Matches gateway notifications to disbursements and advances their state.
//!
//! 1. Store the raw notification (idempotent on its dedup key)
//! 2. Find the disbursement: conversation id, then originator conversation id,
//!    then the `Occasion` token, retrying the lookup a bounded number of times
//! 3. Apply the result with a CAS on the status that was read
//! 4. Publish a settlement event on success or terminal failure
//! 5. Mark the stored notification processed
//!
//! A notification stored but not processed (store error during lookup, lost
//! CAS races, a crash) is replayed by the retry job.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::payload::{CallbackRecord, CallbackResult, CallbackType, parse_callback};
use super::repository::{CallbackError, CallbackRepository, StoreOutcome};
use crate::audit::{AuditEvent, AuditSink};
use crate::config::CorrelationConfig;
use crate::disbursement::types::parse_idempotency_key;
use crate::disbursement::{
    AttemptMatch, AttemptOutcome, DisbursementId, DisbursementRepository, DisbursementStatus,
    StatusUpdate,
};
use crate::retry::policy::RetryPolicy;
use crate::settlement::{SettlementEvent, SettlementSender};

/// Re-reads after a lost CAS before giving up
const MAX_CAS_ATTEMPTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoredReason {
    /// Disbursement already terminal
    DuplicateSettlement,
    /// Same notification seen before and already reflected
    DuplicateDelivery,
    /// Failure for an attempt that has since been superseded by a retry
    StaleAttempt,
    /// Success for a disbursement that already failed for good
    TerminalFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CorrelationOutcome {
    /// The notification moved the disbursement to `status`
    Settled {
        disbursement_id: DisbursementId,
        status: DisbursementStatus,
    },
    /// No disbursement matched; the notification is kept for reconciliation
    Unmatched,
    Ignored {
        disbursement_id: DisbursementId,
        reason: IgnoredReason,
    },
}

enum Step {
    Done(CorrelationOutcome),
    /// CAS lost or record still queued; re-read and try again
    Reread,
}

pub struct CallbackCorrelator {
    callbacks: Arc<dyn CallbackRepository>,
    disbursements: Arc<dyn DisbursementRepository>,
    policy: Arc<RetryPolicy>,
    settlements: SettlementSender,
    audit: Arc<dyn AuditSink>,
    config: CorrelationConfig,
}

impl CallbackCorrelator {
    pub fn new(
        callbacks: Arc<dyn CallbackRepository>,
        disbursements: Arc<dyn DisbursementRepository>,
        policy: Arc<RetryPolicy>,
        settlements: SettlementSender,
        audit: Arc<dyn AuditSink>,
        config: CorrelationConfig,
    ) -> Self {
        Self {
            callbacks,
            disbursements,
            policy,
            settlements,
            audit,
            config,
        }
    }

    /// Handle one raw notification body.
    ///
    /// Any error after the notification was stored is reported as
    /// [`CallbackError::Contended`] or [`CallbackError::NotApplied`]; the row
    /// stays unprocessed and [`Self::replay_unprocessed`] picks it up.
    pub async fn handle(
        &self,
        callback_type: CallbackType,
        raw: Value,
    ) -> Result<CorrelationOutcome, CallbackError> {
        let (record, result) = parse_callback(callback_type, raw, Utc::now());

        let duplicate = self.callbacks.store(&record).await? == StoreOutcome::Duplicate;
        if duplicate {
            debug!(dedup_key = %record.dedup_key, "Callback redelivered");
        }

        self.process(&record, &result, duplicate).await
    }

    /// Re-run correlation for stored notifications that were never processed.
    /// Returns how many were processed in this pass.
    pub async fn replay_unprocessed(
        &self,
        received_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, CallbackError> {
        let stored = self
            .callbacks
            .list_unprocessed(received_before, limit)
            .await?;
        let mut processed = 0;
        for record in stored {
            let (_, result) = parse_callback(
                record.callback_type,
                record.raw_payload.clone(),
                record.received_at,
            );
            match self.process(&record, &result, true).await {
                Ok(outcome) => {
                    info!(
                        dedup_key = %record.dedup_key,
                        outcome = ?outcome,
                        "Stored callback replayed"
                    );
                    processed += 1;
                }
                Err(e) => warn!(
                    dedup_key = %record.dedup_key,
                    error = %e,
                    "Stored callback replay failed, kept for next run"
                ),
            }
        }
        Ok(processed)
    }

    async fn process(
        &self,
        record: &CallbackRecord,
        result: &CallbackResult,
        duplicate: bool,
    ) -> Result<CorrelationOutcome, CallbackError> {
        let outcome = match self.correlate(record, result, duplicate).await {
            Ok(outcome) => outcome,
            Err(CallbackError::Contended(id)) => return Err(CallbackError::Contended(id)),
            Err(e) => {
                return Err(CallbackError::NotApplied {
                    dedup_key: record.dedup_key.clone(),
                    reason: e.to_string(),
                });
            }
        };

        // Applying twice is harmless, so a failed mark only costs a replay
        if let Err(e) = self.callbacks.mark_processed(&record.dedup_key).await {
            warn!(dedup_key = %record.dedup_key, error = %e, "Failed to mark callback processed");
        }
        Ok(outcome)
    }

    async fn correlate(
        &self,
        record: &CallbackRecord,
        result: &CallbackResult,
        duplicate: bool,
    ) -> Result<CorrelationOutcome, CallbackError> {
        if record.callback_type == CallbackType::Result && result.result_code.is_none() {
            warn!(
                dedup_key = %record.dedup_key,
                "Result callback without result code, stored for reconciliation"
            );
            return Ok(CorrelationOutcome::Unmatched);
        }

        let Some(mut matched) = self.lookup(record).await? else {
            warn!(
                conversation_id = ?record.conversation_id,
                originator_conversation_id = ?record.originator_conversation_id,
                occasion = ?record.occasion,
                "Callback matched no disbursement, stored for reconciliation"
            );
            self.audit.record(
                AuditEvent::new("callback.unmatched", record.dedup_key.clone())
                    .detail(json!({"result_code": record.result_code})),
            );
            return Ok(CorrelationOutcome::Unmatched);
        };

        for _ in 0..MAX_CAS_ATTEMPTS {
            match self.apply(&matched, record, result, duplicate).await? {
                Step::Done(outcome) => return Ok(outcome),
                Step::Reread => {
                    let id = matched.record.id;
                    matched.record = self.disbursements.get(id).await?.ok_or_else(|| {
                        CallbackError::Store(format!("Disbursement {} vanished", id))
                    })?;
                }
            }
        }

        Err(CallbackError::Contended(matched.record.id.to_string()))
    }

    async fn lookup(&self, record: &CallbackRecord) -> Result<Option<AttemptMatch>, CallbackError> {
        let attempts = self.config.lookup_attempts.max(1);
        for i in 0..attempts {
            if let Some(found) = self.lookup_once(record).await? {
                return Ok(Some(found));
            }
            if i + 1 < attempts {
                debug!(attempt = i + 1, "Callback lookup miss, retrying");
                tokio::time::sleep(Duration::from_millis(self.config.lookup_delay_ms)).await;
            }
        }
        Ok(None)
    }

    async fn lookup_once(
        &self,
        record: &CallbackRecord,
    ) -> Result<Option<AttemptMatch>, CallbackError> {
        if let Some(cid) = &record.conversation_id
            && let Some(found) = self.disbursements.find_by_conversation_id(cid).await?
        {
            return Ok(Some(found));
        }

        if let Some(oid) = &record.originator_conversation_id {
            if let Some(found) = self
                .disbursements
                .find_by_originator_conversation_id(oid)
                .await?
            {
                return Ok(Some(found));
            }
            // Our own idempotency key echoed back
            if let Some((id, attempt)) = parse_idempotency_key(oid)
                && let Some(found) = self.disbursements.get(id).await?
                && attempt <= found.retry_count
            {
                return Ok(Some(AttemptMatch {
                    record: found,
                    attempt,
                }));
            }
        }

        if let Some(occasion) = &record.occasion
            && let Ok(id) = occasion.parse::<DisbursementId>()
            && let Some(found) = self.disbursements.get(id).await?
        {
            let attempt = found.retry_count;
            return Ok(Some(AttemptMatch {
                record: found,
                attempt,
            }));
        }

        Ok(None)
    }

    async fn apply(
        &self,
        matched: &AttemptMatch,
        callback: &CallbackRecord,
        result: &CallbackResult,
        duplicate: bool,
    ) -> Result<Step, CallbackError> {
        let current = &matched.record;
        let id = current.id;

        if current.status.is_success() {
            debug!(disbursement_id = %id, "Disbursement already settled, callback ignored");
            return Ok(Step::Done(CorrelationOutcome::Ignored {
                disbursement_id: id,
                reason: IgnoredReason::DuplicateSettlement,
            }));
        }

        // Callback overtook the synchronous acknowledgement
        if current.status == DisbursementStatus::Queued {
            let accepted = AttemptOutcome {
                conversation_id: callback.conversation_id.clone(),
                originator_conversation_id: callback.originator_conversation_id.clone(),
                response_code: Some("0".to_string()),
                response_description: Some("Accepted (inferred from callback)".to_string()),
                error_details: None,
            };
            self.disbursements
                .mark_accepted(id, DisbursementStatus::Queued, &accepted, None)
                .await?;
            return Ok(Step::Reread);
        }

        let is_success = callback.callback_type == CallbackType::Result && result.is_success();

        // A final failure stays final. Only the in-flight last attempt may still succeed.
        if is_success
            && current.status == DisbursementStatus::Failed
            && (current.next_retry_at.is_none()
                || (current.retries_exhausted() && matched.attempt < current.retry_count))
        {
            self.attach(matched, callback).await?;
            warn!(
                disbursement_id = %id,
                partner_id = %current.partner_id,
                attempt = matched.attempt,
                retry_count = current.retry_count,
                result_code = ?current.result_code,
                receipt = ?result.transaction_receipt,
                operator_action = true,
                "Success reported for terminally failed disbursement, left for operator"
            );
            self.audit.record(
                AuditEvent::new("callback.late_success", id.to_string())
                    .partner(&current.partner_id)
                    .detail(json!({
                        "attempt": matched.attempt,
                        "dedup_key": callback.dedup_key,
                        "receipt": result.transaction_receipt,
                    })),
            );
            return Ok(Step::Done(CorrelationOutcome::Ignored {
                disbursement_id: id,
                reason: IgnoredReason::TerminalFailure,
            }));
        }
        if !is_success {
            if matched.attempt < current.retry_count {
                self.attach(matched, callback).await?;
                debug!(
                    disbursement_id = %id,
                    attempt = matched.attempt,
                    current_attempt = current.retry_count,
                    "Failure for superseded attempt ignored"
                );
                return Ok(Step::Done(CorrelationOutcome::Ignored {
                    disbursement_id: id,
                    reason: IgnoredReason::StaleAttempt,
                }));
            }
            if current.is_finished() {
                debug!(disbursement_id = %id, "Disbursement already terminal, callback ignored");
                return Ok(Step::Done(CorrelationOutcome::Ignored {
                    disbursement_id: id,
                    reason: IgnoredReason::DuplicateSettlement,
                }));
            }
        }

        let now = Utc::now();
        let (new_status, update) = match callback.callback_type {
            CallbackType::Result if is_success => (
                DisbursementStatus::Success,
                StatusUpdate {
                    result_code: result.result_code.clone(),
                    result_description: result.result_description.clone(),
                    transaction_receipt: result
                        .transaction_receipt
                        .clone()
                        .or_else(|| callback.transaction_id.clone()),
                    next_retry_at: None,
                    retry_reason: None,
                },
            ),
            CallbackType::Result => {
                let code = result.result_code.clone().unwrap_or_default();
                if duplicate
                    && current.status == DisbursementStatus::Failed
                    && current.result_code.as_deref() == Some(code.as_str())
                {
                    return Ok(Step::Done(CorrelationOutcome::Ignored {
                        disbursement_id: id,
                        reason: IgnoredReason::DuplicateDelivery,
                    }));
                }
                (
                    DisbursementStatus::Failed,
                    StatusUpdate {
                        next_retry_at: self.policy.schedule(
                            DisbursementStatus::Failed,
                            current.retry_count,
                            current.max_retries,
                            Some(&code),
                            now,
                        ),
                        retry_reason: Some(code.clone()),
                        result_code: Some(code),
                        result_description: result.result_description.clone(),
                        transaction_receipt: None,
                    },
                )
            }
            CallbackType::Timeout => {
                if duplicate && current.status == DisbursementStatus::Pending {
                    return Ok(Step::Done(CorrelationOutcome::Ignored {
                        disbursement_id: id,
                        reason: IgnoredReason::DuplicateDelivery,
                    }));
                }
                let code = "QUEUE_TIMEOUT".to_string();
                (
                    DisbursementStatus::Pending,
                    StatusUpdate {
                        next_retry_at: self.policy.schedule(
                            DisbursementStatus::Pending,
                            current.retry_count,
                            current.max_retries,
                            Some(&code),
                            now,
                        ),
                        retry_reason: Some(code.clone()),
                        result_code: Some(code),
                        result_description: result
                            .result_description
                            .clone()
                            .or_else(|| Some("Request queue timeout".to_string())),
                        transaction_receipt: None,
                    },
                )
            }
        };

        if !current.status.can_transition_to(new_status) {
            return Ok(Step::Done(CorrelationOutcome::Ignored {
                disbursement_id: id,
                reason: IgnoredReason::DuplicateSettlement,
            }));
        }

        let applied = self
            .disbursements
            .transition(id, current.status, new_status, &update)
            .await?;
        if !applied {
            debug!(disbursement_id = %id, "Lost CAS on callback, re-reading");
            return Ok(Step::Reread);
        }

        self.attach(matched, callback).await?;

        let terminal = new_status == DisbursementStatus::Success
            || (new_status == DisbursementStatus::Failed && update.next_retry_at.is_none());
        if terminal {
            self.settlements.publish(SettlementEvent {
                disbursement_id: id,
                partner_id: current.partner_id.clone(),
                amount: current.amount,
                status: new_status,
            });
            self.audit.record(
                AuditEvent::new("disbursement.settled", id.to_string())
                    .partner(&current.partner_id)
                    .detail(json!({
                        "status": new_status,
                        "result_code": update.result_code,
                        "attempt": matched.attempt,
                        "receipt": update.transaction_receipt,
                    })),
            );
        }

        if new_status == DisbursementStatus::Failed && update.next_retry_at.is_none() {
            warn!(
                disbursement_id = %id,
                partner_id = %current.partner_id,
                result_code = ?update.result_code,
                retry_count = current.retry_count,
                operator_action = true,
                "Disbursement failed terminally"
            );
        } else {
            info!(
                disbursement_id = %id,
                attempt = matched.attempt,
                status = %new_status,
                result_code = ?update.result_code,
                "Callback applied"
            );
        }

        Ok(Step::Done(CorrelationOutcome::Settled {
            disbursement_id: id,
            status: new_status,
        }))
    }

    /// Record the callback's outcome on the retry log entry of its attempt
    async fn attach(
        &self,
        matched: &AttemptMatch,
        callback: &CallbackRecord,
    ) -> Result<(), CallbackError> {
        if matched.attempt == 0 {
            return Ok(());
        }
        let outcome = AttemptOutcome {
            conversation_id: callback.conversation_id.clone(),
            originator_conversation_id: callback.originator_conversation_id.clone(),
            response_code: callback.result_code.clone(),
            response_description: callback.result_description.clone(),
            error_details: Some(json!({
                "source": "callback",
                "callback_type": callback.callback_type,
                "dedup_key": callback.dedup_key,
            })),
        };
        self.disbursements
            .attach_attempt_outcome(matched.record.id, matched.attempt, &outcome)
            .await?;
        Ok(())
    }
}
