//! Retry Scheduler
//!
//! Periodic batch job that re-dispatches failed and pending disbursements.
//!
//! One run:
//! 0. Stored callbacks that were never processed are replayed
//! 1. Accepted records past their callback deadline become `pending`
//! 2. Due candidates are selected (`next_retry_at` ascending, then `created_at`)
//! 3. Each candidate is re-read, claimed with a CAS on `(status, retry_count)`
//!    and dispatched with a fresh idempotency key
//! 4. Pending charges are swept so deferred fees resolve, and `success`
//!    records still awaiting their charge are charged

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::audit::AuditEvent;
use crate::callback::CallbackCorrelator;
use crate::config::RetryConfig;
use crate::disbursement::{
    DisbursementCoordinator, DisbursementError, DisbursementId, DisbursementRecord,
    DisbursementStatus, Dispatch, RetryLogEntry, StatusUpdate,
};
use crate::wallet::ChargeReconciler;

/// Result code written when an accepted attempt never got its callback
pub const CALLBACK_TIMEOUT_CODE: &str = "CALLBACK_TIMEOUT";

/// Outcome of one retry candidate
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RetryItemReport {
    #[schema(example = "01JA2X5V6Q8ZP3T4N7K9M1B0CD")]
    pub disbursement_id: String,
    /// Gateway accepted the new attempt
    pub success: bool,
    /// Status after the attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "accepted")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_attempt: Option<u32>,
    /// Error classification, e.g. `TRANSIENT_GATEWAY_ERROR` or `NOT_RETRYABLE`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one retry run
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct BatchReport {
    pub success_count: usize,
    pub failure_count: usize,
    pub processed: Vec<RetryItemReport>,
}

impl BatchReport {
    fn push(&mut self, item: RetryItemReport) {
        if item.success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.processed.push(item);
    }
}

pub struct RetryScheduler {
    coordinator: Arc<DisbursementCoordinator>,
    reconciler: Option<Arc<ChargeReconciler>>,
    correlator: Option<Arc<CallbackCorrelator>>,
    config: RetryConfig,
}

impl RetryScheduler {
    pub fn new(coordinator: Arc<DisbursementCoordinator>, config: RetryConfig) -> Self {
        Self {
            coordinator,
            reconciler: None,
            correlator: None,
            config,
        }
    }

    /// Replay unprocessed callbacks at the start of every run
    pub fn with_correlator(mut self, correlator: Arc<CallbackCorrelator>) -> Self {
        self.correlator = Some(correlator);
        self
    }

    /// Sweep pending charges at the end of every run
    pub fn with_reconciler(mut self, reconciler: Arc<ChargeReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run one batch. A run with nothing due is a cheap no-op.
    pub async fn run_batch(&self) -> Result<BatchReport, DisbursementError> {
        self.run_batch_at(Utc::now()).await
    }

    /// Run one batch as of `now`
    pub async fn run_batch_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<BatchReport, DisbursementError> {
        self.replay_callbacks(now).await;
        let expired = self.expire_overdue_callbacks(now).await?;

        let due = self
            .coordinator
            .repo()
            .find_due_for_retry(now, self.config.batch_size)
            .await?;

        let mut report = BatchReport::default();
        if due.is_empty() {
            debug!("No disbursements due for retry");
        } else {
            info!(
                count = due.len(),
                expired_callbacks = expired,
                "Found disbursements due for retry"
            );
        }

        let pause = Duration::from_millis(self.config.inter_retry_delay_ms);
        for (i, record) in due.iter().enumerate() {
            if i > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            let result = self.retry_one(record.id).await;
            report.push(item_report(record.id, result));
        }

        if !report.processed.is_empty() {
            info!(
                success_count = report.success_count,
                failure_count = report.failure_count,
                "Retry batch finished"
            );
        }

        if let Some(reconciler) = &self.reconciler {
            match reconciler.reconcile_pending(self.config.batch_size).await {
                Ok(sweep) if sweep.scanned > 0 || sweep.backfilled > 0 => info!(
                    scanned = sweep.scanned,
                    completed = sweep.completed,
                    failed = sweep.failed,
                    deferred = sweep.deferred,
                    backfilled = sweep.backfilled,
                    "Pending charges swept"
                ),
                Ok(_) => {}
                Err(e) => error!(error = %e, "Pending charge sweep failed"),
            }
        }

        Ok(report)
    }

    /// Operator retry of a single disbursement.
    ///
    /// An unknown id is an error; every other failure is reported per item.
    pub async fn run_single(&self, id: DisbursementId) -> Result<BatchReport, DisbursementError> {
        self.coordinator.get(id).await?;
        let mut report = BatchReport::default();
        report.push(item_report(id, self.retry_one(id).await));
        Ok(report)
    }

    /// Claim and dispatch the next attempt for one disbursement.
    ///
    /// The record is re-read first so a concurrent callback that settled it
    /// wins. The claim is a CAS on `(status, retry_count)`; losing it yields
    /// [`DisbursementError::Conflict`].
    pub async fn retry_one(&self, id: DisbursementId) -> Result<Dispatch, DisbursementError> {
        let record = self.coordinator.get(id).await?;
        let policy = self.coordinator.policy();

        if !record.status.is_retry_candidate()
            || !policy.should_retry(
                record.status,
                record.retry_count,
                record.max_retries,
                record.result_code.as_deref(),
            )
        {
            debug!(
                disbursement_id = %id,
                status = %record.status,
                retry_count = record.retry_count,
                result_code = ?record.result_code,
                "Disbursement not eligible for retry"
            );
            return Err(DisbursementError::NotRetryable(id.to_string()));
        }

        let credentials = self
            .coordinator
            .credentials()
            .get_credentials(&record.partner_id)
            .await?;

        let now = Utc::now();
        let attempt = record.retry_count + 1;
        let entry = RetryLogEntry::new(id, attempt, retry_reason(&record), now);
        // Lease: if this process dies mid-dispatch the record is picked up again later
        let lease_until = policy.next_retry_at(attempt, now);

        let claimed = self
            .coordinator
            .repo()
            .begin_retry(
                id,
                record.status,
                record.retry_count,
                &entry,
                Some(lease_until),
            )
            .await?;
        if !claimed {
            warn!(disbursement_id = %id, attempt, "Retry claim lost to concurrent update");
            return Err(DisbursementError::Conflict(id.to_string()));
        }

        info!(
            disbursement_id = %id,
            partner_id = %record.partner_id,
            retry_attempt = attempt,
            reason = %entry.reason,
            idempotency_key = %entry.idempotency_key,
            "Dispatching retry"
        );
        self.coordinator.audit().record(
            AuditEvent::new("disbursement.retried", id.to_string())
                .partner(&record.partner_id)
                .detail(json!({"retry_attempt": attempt, "reason": entry.reason})),
        );

        self.coordinator
            .dispatch_attempt(&record, record.status, attempt, &credentials)
            .await
    }

    /// Callbacks left unprocessed settle their records before retries are picked
    async fn replay_callbacks(&self, now: DateTime<Utc>) {
        let Some(correlator) = &self.correlator else {
            return;
        };
        let received_before =
            now - chrono::Duration::seconds(self.config.callback_replay_after_secs);
        match correlator
            .replay_unprocessed(received_before, self.config.batch_size)
            .await
        {
            Ok(0) => {}
            Ok(replayed) => info!(replayed, "Stored callbacks replayed"),
            Err(e) => error!(error = %e, "Callback replay failed"),
        }
    }

    /// Accepted records whose callback never came are treated as pending
    async fn expire_overdue_callbacks(&self, now: DateTime<Utc>) -> Result<usize, DisbursementError> {
        let overdue = self
            .coordinator
            .repo()
            .find_overdue_accepted(now, self.config.batch_size)
            .await?;

        let mut expired = 0;
        for record in overdue {
            let exhausted = record.retries_exhausted();
            let update = StatusUpdate {
                result_code: Some(CALLBACK_TIMEOUT_CODE.to_string()),
                result_description: Some("No result callback before deadline".to_string()),
                transaction_receipt: None,
                next_retry_at: (!exhausted).then_some(now),
                retry_reason: Some(CALLBACK_TIMEOUT_CODE.to_string()),
            };
            let applied = self
                .coordinator
                .repo()
                .transition(
                    record.id,
                    DisbursementStatus::Accepted,
                    DisbursementStatus::Pending,
                    &update,
                )
                .await?;
            if !applied {
                continue;
            }
            expired += 1;
            if exhausted {
                warn!(
                    disbursement_id = %record.id,
                    partner_id = %record.partner_id,
                    retry_count = record.retry_count,
                    operator_action = true,
                    "No callback for last permitted attempt, outcome unknown"
                );
            } else {
                debug!(disbursement_id = %record.id, "Callback deadline passed");
            }
        }
        Ok(expired)
    }
}

fn retry_reason(record: &DisbursementRecord) -> String {
    record
        .retry_reason
        .clone()
        .or_else(|| record.result_code.clone())
        .unwrap_or_else(|| record.status.as_str().to_string())
}

fn item_report(id: DisbursementId, result: Result<Dispatch, DisbursementError>) -> RetryItemReport {
    match result {
        Ok(dispatch) => RetryItemReport {
            disbursement_id: id.to_string(),
            success: dispatch.applied && dispatch.error.is_none(),
            status: Some(dispatch.status.to_string()),
            retry_attempt: Some(dispatch.attempt),
            classification: dispatch
                .error
                .as_ref()
                .map(|e| e.classification().to_string()),
            error: dispatch.error.map(|e| e.to_string()),
        },
        Err(e) => {
            if !matches!(e, DisbursementError::NotRetryable(_)) {
                error!(disbursement_id = %id, error = %e, "Retry failed");
            }
            RetryItemReport {
                disbursement_id: id.to_string(),
                success: false,
                status: None,
                retry_attempt: None,
                classification: Some(e.code().to_string()),
                error: Some(e.to_string()),
            }
        }
    }
}

/// Background loop around [`RetryScheduler::run_batch`]
pub struct RetryWorker {
    scheduler: Arc<RetryScheduler>,
    scan_interval: Duration,
}

impl RetryWorker {
    pub fn new(scheduler: Arc<RetryScheduler>) -> Self {
        let scan_interval = Duration::from_secs(scheduler.config().scan_interval_secs);
        Self {
            scheduler,
            scan_interval,
        }
    }

    /// Run forever, one batch per interval
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.scan_interval.as_secs(),
            batch_size = self.scheduler.config().batch_size,
            "Starting retry worker"
        );

        loop {
            if let Err(e) = self.scheduler.run_batch().await {
                error!(error = %e, "Retry batch failed");
            }
            tokio::time::sleep(self.scan_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::RecordingAuditSink;
    use crate::disbursement::types::DEFAULT_MAX_RETRIES;
    use crate::disbursement::{InMemoryDisbursementRepository, SubmitRequest};
    use crate::provider::mock::test_credentials;
    use crate::provider::{MockProvider, ProviderError, StaticCredentialProvider, TransientKind};
    use crate::retry::policy::RetryPolicy;
    use chrono::Duration as ChronoDuration;

    struct Harness {
        scheduler: Arc<RetryScheduler>,
        coordinator: Arc<DisbursementCoordinator>,
        provider: Arc<MockProvider>,
        audit: Arc<RecordingAuditSink>,
    }

    fn harness() -> Harness {
        let config = RetryConfig {
            inter_retry_delay_ms: 0,
            ..Default::default()
        };
        let provider = Arc::new(MockProvider::new());
        let audit = Arc::new(RecordingAuditSink::default());
        let coordinator = Arc::new(DisbursementCoordinator::new(
            Arc::new(InMemoryDisbursementRepository::new()),
            provider.clone(),
            Arc::new(StaticCredentialProvider::new(vec![test_credentials("acme")])),
            Arc::new(RetryPolicy::from_config(&config)),
            audit.clone(),
            DEFAULT_MAX_RETRIES,
        ));
        Harness {
            scheduler: Arc::new(RetryScheduler::new(coordinator.clone(), config)),
            coordinator,
            provider,
            audit,
        }
    }

    async fn submit(h: &Harness, req: &str) -> DisbursementRecord {
        h.coordinator
            .submit(SubmitRequest {
                partner_id: "acme".to_string(),
                client_request_id: req.to_string(),
                amount: 500,
                msisdn: "0712345678".to_string(),
                currency: None,
                remarks: None,
            })
            .await
            .unwrap()
            .record
    }

    fn http_503() -> ProviderError {
        ProviderError::transient(TransientKind::Http(503), "service unavailable")
    }

    #[tokio::test]
    async fn test_empty_run_is_noop() {
        let h = harness();
        let report = h.scheduler.run_batch().await.unwrap();
        assert_eq!(report.success_count, 0);
        assert_eq!(report.failure_count, 0);
        assert!(report.processed.is_empty());
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_callback_is_retried_with_fresh_key() {
        let h = harness();
        let record = submit(&h, "req-1").await;
        assert_eq!(record.status, DisbursementStatus::Accepted);

        // Nothing due before the callback deadline
        let report = h.scheduler.run_batch().await.unwrap();
        assert!(report.processed.is_empty());

        let later = Utc::now() + ChronoDuration::hours(1);
        let report = h.scheduler.run_batch_at(later).await.unwrap();
        assert_eq!(report.success_count, 1);
        assert_eq!(report.processed[0].status.as_deref(), Some("accepted"));

        let stored = h.coordinator.get(record.id).await.unwrap();
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.status, DisbursementStatus::Accepted);
        assert_eq!(stored.retry_reason.as_deref(), Some(CALLBACK_TIMEOUT_CODE));

        let log = h.coordinator.retry_history(record.id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].retry_attempt, 1);
        assert_eq!(log[0].idempotency_key, format!("{}-1", record.id));
        assert!(log[0].conversation_id.is_some());

        let keys: Vec<String> = h
            .provider
            .calls()
            .into_iter()
            .map(|c| c.idempotency_key)
            .collect();
        assert_eq!(
            keys,
            vec![format!("{}-0", record.id), format!("{}-1", record.id)]
        );
        assert!(h.audit.actions().contains(&"disbursement.retried"));
    }

    #[tokio::test]
    async fn test_transient_failures_until_exhausted() {
        let h = harness();
        for _ in 0..=DEFAULT_MAX_RETRIES {
            h.provider.push_response(Err(http_503()));
        }
        let record = submit(&h, "req-1").await;
        assert_eq!(record.status, DisbursementStatus::Failed);
        assert!(record.next_retry_at.is_some());

        let mut at = Utc::now();
        for attempt in 1..=DEFAULT_MAX_RETRIES {
            at += ChronoDuration::days(1);
            let report = h.scheduler.run_batch_at(at).await.unwrap();
            assert_eq!(report.failure_count, 1, "attempt {}", attempt);
            assert_eq!(
                report.processed[0].classification.as_deref(),
                Some("TRANSIENT_GATEWAY_ERROR")
            );
        }

        let stored = h.coordinator.get(record.id).await.unwrap();
        assert_eq!(stored.retry_count, DEFAULT_MAX_RETRIES);
        assert_eq!(stored.status, DisbursementStatus::Failed);
        assert!(stored.next_retry_at.is_none());
        assert!(stored.is_finished());
        assert!(h.audit.actions().contains(&"disbursement.retry_exhausted"));

        // Nothing left to do, however late
        let report = h
            .scheduler
            .run_batch_at(at + ChronoDuration::days(30))
            .await
            .unwrap();
        assert!(report.processed.is_empty());
        assert_eq!(h.provider.call_count(), DEFAULT_MAX_RETRIES as usize + 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_never_retried() {
        let h = harness();
        h.provider.push_response(Err(ProviderError::Permanent {
            code: "2040".to_string(),
            description: "Unsupported customer".to_string(),
        }));
        let record = submit(&h, "req-1").await;
        assert_eq!(record.status, DisbursementStatus::Failed);

        let report = h
            .scheduler
            .run_batch_at(Utc::now() + ChronoDuration::days(30))
            .await
            .unwrap();
        assert!(report.processed.is_empty());

        let report = h.scheduler.run_single(record.id).await.unwrap();
        assert_eq!(report.failure_count, 1);
        assert_eq!(
            report.processed[0].classification.as_deref(),
            Some("NOT_RETRYABLE")
        );
        assert_eq!(h.coordinator.get(record.id).await.unwrap().retry_count, 0);
        assert_eq!(h.provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_run_single_unknown_id() {
        let h = harness();
        let err = h.scheduler.run_single(DisbursementId::new()).await.unwrap_err();
        assert!(matches!(err, DisbursementError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_run_single_ignores_schedule() {
        let h = harness();
        h.provider.push_response(Err(http_503()));
        let record = submit(&h, "req-1").await;
        assert!(record.next_retry_at.unwrap() > Utc::now());

        let report = h.scheduler.run_single(record.id).await.unwrap();
        assert_eq!(report.success_count, 1);
        assert_eq!(h.coordinator.get(record.id).await.unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn test_timeout_leaves_pending() {
        let h = harness();
        h.provider.push_response(Err(http_503()));
        let record = submit(&h, "req-1").await;

        h.provider
            .push_response(Err(ProviderError::transient(TransientKind::Timeout, "t")));
        let report = h.scheduler.run_single(record.id).await.unwrap();
        assert_eq!(report.failure_count, 1);
        assert_eq!(report.processed[0].status.as_deref(), Some("pending"));

        let stored = h.coordinator.get(record.id).await.unwrap();
        assert_eq!(stored.status, DisbursementStatus::Pending);
        assert!(stored.next_retry_at.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_retries_claim_once() {
        let h = harness();
        h.provider.push_response(Err(http_503()));
        let record = submit(&h, "req-1").await;

        let a = {
            let scheduler = h.scheduler.clone();
            tokio::spawn(async move { scheduler.retry_one(record.id).await })
        };
        let b = {
            let scheduler = h.scheduler.clone();
            tokio::spawn(async move { scheduler.retry_one(record.id).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

        let stored = h.coordinator.get(record.id).await.unwrap();
        assert_eq!(stored.retry_count, 1);
        let retry_calls = h
            .provider
            .calls()
            .iter()
            .filter(|c| c.idempotency_key == format!("{}-1", record.id))
            .count();
        assert_eq!(retry_calls, 1);
    }

    #[tokio::test]
    async fn test_overdue_last_attempt_is_parked() {
        let h = harness();
        let record = submit(&h, "req-1").await;
        let mut at = Utc::now();
        for _ in 0..DEFAULT_MAX_RETRIES {
            at += ChronoDuration::days(1);
            h.scheduler.run_batch_at(at).await.unwrap();
        }
        let stored = h.coordinator.get(record.id).await.unwrap();
        assert_eq!(stored.retry_count, DEFAULT_MAX_RETRIES);
        assert_eq!(stored.status, DisbursementStatus::Accepted);

        let report = h
            .scheduler
            .run_batch_at(at + ChronoDuration::days(1))
            .await
            .unwrap();
        assert!(report.processed.is_empty());

        let stored = h.coordinator.get(record.id).await.unwrap();
        assert_eq!(stored.status, DisbursementStatus::Pending);
        assert!(stored.next_retry_at.is_none());
        assert_eq!(stored.result_code.as_deref(), Some(CALLBACK_TIMEOUT_CODE));
    }

    #[tokio::test]
    async fn test_unprocessed_callback_is_replayed_before_retries() {
        use crate::callback::{
            CallbackError, CallbackRepository, CallbackType, InMemoryCallbackRepository,
        };
        use crate::config::CorrelationConfig;
        use crate::disbursement::repository::flaky::FlakyDisbursementRepository;
        use crate::settlement::settlement_channel;

        let config = RetryConfig {
            inter_retry_delay_ms: 0,
            ..Default::default()
        };
        let disbursements = Arc::new(FlakyDisbursementRepository::new());
        let callbacks = Arc::new(InMemoryCallbackRepository::new());
        let provider = Arc::new(MockProvider::new());
        let audit = Arc::new(RecordingAuditSink::default());
        let policy = Arc::new(RetryPolicy::from_config(&config));
        let coordinator = Arc::new(DisbursementCoordinator::new(
            disbursements.clone(),
            provider.clone(),
            Arc::new(StaticCredentialProvider::new(vec![test_credentials("acme")])),
            policy.clone(),
            audit.clone(),
            DEFAULT_MAX_RETRIES,
        ));
        let (tx, mut rx) = settlement_channel(4);
        let correlator = Arc::new(CallbackCorrelator::new(
            callbacks.clone(),
            disbursements.clone(),
            policy,
            tx,
            audit,
            CorrelationConfig {
                lookup_attempts: 1,
                lookup_delay_ms: 1,
            },
        ));
        let scheduler =
            RetryScheduler::new(coordinator.clone(), config).with_correlator(correlator.clone());

        provider.push_ack("AG_1");
        let record = coordinator
            .submit(SubmitRequest {
                partner_id: "acme".to_string(),
                client_request_id: "req-replay".to_string(),
                amount: 500,
                msisdn: "0712345678".to_string(),
                currency: None,
                remarks: None,
            })
            .await
            .unwrap()
            .record;

        disbursements.fail_lookups(true);
        let err = correlator
            .handle(
                CallbackType::Result,
                json!({"Result": {
                    "ResultCode": 0,
                    "ConversationID": "AG_1",
                    "TransactionID": "NLJREPLAY",
                }}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CallbackError::NotApplied { .. }));
        disbursements.fail_lookups(false);

        // Too recent to replay
        scheduler.run_batch().await.unwrap();
        assert_eq!(
            coordinator.get(record.id).await.unwrap().status,
            DisbursementStatus::Accepted
        );

        // Past the callback deadline as well: the stored success wins over a retry
        let report = scheduler
            .run_batch_at(Utc::now() + ChronoDuration::hours(1))
            .await
            .unwrap();
        assert!(report.processed.is_empty());

        let settled = coordinator.get(record.id).await.unwrap();
        assert_eq!(settled.status, DisbursementStatus::Success);
        assert_eq!(settled.transaction_receipt.as_deref(), Some("NLJREPLAY"));
        assert_eq!(provider.call_count(), 1);
        assert_eq!(
            rx.try_recv().map(|e| e.status),
            Some(DisbursementStatus::Success)
        );
        assert!(
            callbacks
                .list_unprocessed(Utc::now() + ChronoDuration::hours(2), 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_report_counts() {
        let mut report = BatchReport::default();
        report.push(item_report(
            DisbursementId::new(),
            Err(DisbursementError::Conflict("x".into())),
        ));
        report.push(item_report(
            DisbursementId::new(),
            Ok(Dispatch {
                attempt: 1,
                status: DisbursementStatus::Accepted,
                error: None,
                applied: true,
            }),
        ));
        assert_eq!((report.success_count, report.failure_count), (1, 1));
        assert_eq!(
            report.processed[0].classification.as_deref(),
            Some("CONCURRENT_UPDATE")
        );
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["processed"][1].get("error").is_none());
    }
}
