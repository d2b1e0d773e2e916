//! Disbursement Coordinator
//!
//! Submission path and the shared "dispatch one attempt" step used by both
//! the initial submission and the retry scheduler.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::DisbursementError;
use super::repository::DisbursementRepository;
use super::state::DisbursementStatus;
use super::types::{
    AttemptOutcome, DEFAULT_CURRENCY, DisbursementId, DisbursementRecord, InsertOutcome,
    MinorUnits, NewDisbursement, RetryLogEntry, StatusUpdate, idempotency_key,
};
use crate::audit::{AuditEvent, AuditSink};
use crate::provider::{
    CredentialProvider, PartnerCredentials, PayoutInstruction, PayoutProvider, ProviderError,
    normalize_msisdn,
};
use crate::retry::policy::RetryPolicy;

/// Submission input, before validation
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub partner_id: String,
    pub client_request_id: String,
    pub amount: MinorUnits,
    pub msisdn: String,
    pub currency: Option<String>,
    pub remarks: Option<String>,
}

/// What `submit` did
#[derive(Debug, Clone)]
pub struct SubmitResult {
    pub record: DisbursementRecord,
    /// `false` when the client request id was already known
    pub created: bool,
    /// Synchronous gateway error of this call, if any
    pub gateway_error: Option<ProviderError>,
}

/// Result of one gateway attempt after it was persisted
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub attempt: u32,
    pub status: DisbursementStatus,
    pub error: Option<ProviderError>,
    /// `false` when a concurrent writer moved the record first
    pub applied: bool,
}

pub struct DisbursementCoordinator {
    repo: Arc<dyn DisbursementRepository>,
    provider: Arc<dyn PayoutProvider>,
    credentials: Arc<dyn CredentialProvider>,
    policy: Arc<RetryPolicy>,
    audit: Arc<dyn AuditSink>,
    max_retries: u32,
}

impl DisbursementCoordinator {
    pub fn new(
        repo: Arc<dyn DisbursementRepository>,
        provider: Arc<dyn PayoutProvider>,
        credentials: Arc<dyn CredentialProvider>,
        policy: Arc<RetryPolicy>,
        audit: Arc<dyn AuditSink>,
        max_retries: u32,
    ) -> Self {
        Self {
            repo,
            provider,
            credentials,
            policy,
            audit,
            max_retries,
        }
    }

    pub fn repo(&self) -> &Arc<dyn DisbursementRepository> {
        &self.repo
    }

    pub fn policy(&self) -> &Arc<RetryPolicy> {
        &self.policy
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.credentials
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    /// Submit a new payout.
    ///
    /// Idempotent on `(partner_id, client_request_id)`: a repeat returns the
    /// stored record without calling the gateway again. The record is
    /// persisted before the gateway is called.
    pub async fn submit(&self, req: SubmitRequest) -> Result<SubmitResult, DisbursementError> {
        if req.amount <= 0 {
            return Err(DisbursementError::InvalidAmount);
        }
        let msisdn = normalize_msisdn(&req.msisdn)
            .ok_or_else(|| DisbursementError::InvalidMsisdn(req.msisdn.clone()))?;
        let currency = req
            .currency
            .as_deref()
            .map(|c| c.trim().to_uppercase())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        if currency != DEFAULT_CURRENCY {
            return Err(DisbursementError::UnsupportedCurrency(currency));
        }

        if let Some(existing) = self
            .repo
            .find_by_client_request(&req.partner_id, &req.client_request_id)
            .await?
        {
            debug!(
                disbursement_id = %existing.id,
                client_request_id = %req.client_request_id,
                "Duplicate client_request_id found"
            );
            return Ok(SubmitResult {
                record: existing,
                created: false,
                gateway_error: None,
            });
        }

        let credentials = self.credentials.get_credentials(&req.partner_id).await?;

        let record = DisbursementRecord::new(
            NewDisbursement {
                partner_id: req.partner_id,
                client_request_id: req.client_request_id,
                amount: req.amount,
                currency,
                recipient_msisdn: msisdn,
                remarks: req.remarks.unwrap_or_default(),
                max_retries: self.max_retries,
            },
            Utc::now(),
        );

        if let InsertOutcome::Existing(existing) = self.repo.insert(&record).await? {
            return Ok(SubmitResult {
                record: existing,
                created: false,
                gateway_error: None,
            });
        }

        info!(
            disbursement_id = %record.id,
            partner_id = %record.partner_id,
            amount = record.amount,
            "Disbursement created"
        );
        self.audit.record(
            AuditEvent::new("disbursement.submitted", record.id.to_string())
                .partner(&record.partner_id)
                .detail(json!({
                    "amount": record.amount,
                    "client_request_id": record.client_request_id,
                })),
        );

        let dispatch = self
            .dispatch_attempt(&record, DisbursementStatus::Queued, 0, &credentials)
            .await?;

        let stored = self
            .repo
            .get(record.id)
            .await?
            .ok_or_else(|| DisbursementError::NotFound(record.id.to_string()))?;

        Ok(SubmitResult {
            record: stored,
            created: true,
            gateway_error: dispatch.error,
        })
    }

    pub async fn get(&self, id: DisbursementId) -> Result<DisbursementRecord, DisbursementError> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| DisbursementError::NotFound(id.to_string()))
    }

    pub async fn retry_history(
        &self,
        id: DisbursementId,
    ) -> Result<Vec<RetryLogEntry>, DisbursementError> {
        self.get(id).await?;
        self.repo.list_retry_log(id).await
    }

    /// Call the gateway for `attempt` and persist the answer.
    ///
    /// `expected` is the status the record holds right now; every write is a
    /// CAS from it. Attempt outcomes for retries are also attached to their
    /// log entry.
    pub async fn dispatch_attempt(
        &self,
        record: &DisbursementRecord,
        expected: DisbursementStatus,
        attempt: u32,
        credentials: &PartnerCredentials,
    ) -> Result<Dispatch, DisbursementError> {
        let instruction = PayoutInstruction {
            idempotency_key: idempotency_key(record.id, attempt),
            amount: record.amount,
            msisdn: record.recipient_msisdn.clone(),
            remarks: record.remarks.clone(),
            occasion: record.id.to_string(),
        };

        let result = self.provider.submit(credentials, &instruction).await;
        let now = Utc::now();

        if attempt > 0 {
            let outcome = match &result {
                Ok(ack) => AttemptOutcome::from_ack(ack),
                Err(e) => AttemptOutcome::from_error(e),
            };
            self.repo
                .attach_attempt_outcome(record.id, attempt, &outcome)
                .await?;
        }

        match result {
            Ok(ack) => {
                // Callback deadline; past it the scheduler treats the attempt as pending
                let deadline = self.policy.next_retry_at(attempt, now);
                let applied = self
                    .repo
                    .mark_accepted(
                        record.id,
                        expected,
                        &AttemptOutcome::from_ack(&ack),
                        Some(deadline),
                    )
                    .await?;
                if !applied {
                    warn!(
                        disbursement_id = %record.id,
                        attempt,
                        "Acceptance superseded by concurrent update"
                    );
                }
                Ok(Dispatch {
                    attempt,
                    status: DisbursementStatus::Accepted,
                    error: None,
                    applied,
                })
            }
            Err(err) => {
                let status = if err.is_timeout() {
                    DisbursementStatus::Pending
                } else {
                    DisbursementStatus::Failed
                };
                let code = err.code();
                let next_retry_at = match &err {
                    ProviderError::Permanent { .. } => None,
                    ProviderError::Transient { .. } => self.policy.schedule(
                        status,
                        attempt,
                        record.max_retries,
                        Some(&code),
                        now,
                    ),
                };
                let update = StatusUpdate {
                    result_code: Some(code.clone()),
                    result_description: Some(err.description()),
                    transaction_receipt: None,
                    next_retry_at,
                    retry_reason: Some(code.clone()),
                };
                let applied = self
                    .repo
                    .transition(record.id, expected, status, &update)
                    .await?;

                if !applied {
                    warn!(
                        disbursement_id = %record.id,
                        attempt,
                        "Gateway error outcome superseded by concurrent update"
                    );
                } else if next_retry_at.is_none() && status == DisbursementStatus::Failed {
                    let action = if err.is_transient() {
                        "disbursement.retry_exhausted"
                    } else {
                        "disbursement.rejected"
                    };
                    warn!(
                        disbursement_id = %record.id,
                        partner_id = %record.partner_id,
                        result_code = %code,
                        attempt,
                        operator_action = true,
                        "Disbursement failed terminally: {}",
                        err
                    );
                    self.audit.record(
                        AuditEvent::new(action, record.id.to_string())
                            .partner(&record.partner_id)
                            .detail(json!({"result_code": code, "attempt": attempt})),
                    );
                } else {
                    info!(
                        disbursement_id = %record.id,
                        status = %status,
                        result_code = %code,
                        next_retry_at = ?next_retry_at,
                        "Gateway attempt not accepted"
                    );
                }

                Ok(Dispatch {
                    attempt,
                    status,
                    error: Some(err),
                    applied,
                })
            }
        }
    }
}
