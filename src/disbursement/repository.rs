//! Disbursement store interface and in-memory implementation
//!
//! Every mutation is a compare-and-set on the expected status. A `false`
//! return means another writer got there first; the caller re-reads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::error::DisbursementError;
use super::state::DisbursementStatus;
use super::types::{
    AttemptMatch, AttemptOutcome, DisbursementId, DisbursementRecord, InsertOutcome,
    RetryLogEntry, StatusUpdate,
};

#[async_trait]
pub trait DisbursementRepository: Send + Sync {
    /// Insert a new record, idempotent on `(partner_id, client_request_id)`
    async fn insert(&self, record: &DisbursementRecord)
    -> Result<InsertOutcome, DisbursementError>;

    async fn get(&self, id: DisbursementId)
    -> Result<Option<DisbursementRecord>, DisbursementError>;

    async fn find_by_client_request(
        &self,
        partner_id: &str,
        client_request_id: &str,
    ) -> Result<Option<DisbursementRecord>, DisbursementError>;

    /// Match on a conversation id from any attempt
    async fn find_by_conversation_id(
        &self,
        conversation_id: &str,
    ) -> Result<Option<AttemptMatch>, DisbursementError>;

    /// Match on an originator conversation id from any attempt
    async fn find_by_originator_conversation_id(
        &self,
        originator_conversation_id: &str,
    ) -> Result<Option<AttemptMatch>, DisbursementError>;

    /// CAS `expected -> Accepted`. Conversation ids are only written when unset
    /// and present in `accepted`.
    async fn mark_accepted(
        &self,
        id: DisbursementId,
        expected: DisbursementStatus,
        accepted: &AttemptOutcome,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DisbursementError>;

    /// CAS `expected -> new` with the accompanying field changes
    async fn transition(
        &self,
        id: DisbursementId,
        expected: DisbursementStatus,
        new: DisbursementStatus,
        update: &StatusUpdate,
    ) -> Result<bool, DisbursementError>;

    /// Claim the next retry attempt.
    ///
    /// CAS on both status and `retry_count`; increments `retry_count`, sets
    /// `retry_reason` and `next_retry_at = lease_until`, and appends `entry`,
    /// all atomically. Refuses once `retry_count` has reached `max_retries`.
    async fn begin_retry(
        &self,
        id: DisbursementId,
        expected: DisbursementStatus,
        expected_retry_count: u32,
        entry: &RetryLogEntry,
        lease_until: Option<DateTime<Utc>>,
    ) -> Result<bool, DisbursementError>;

    /// Attach the outcome of one attempt to its log entry
    async fn attach_attempt_outcome(
        &self,
        id: DisbursementId,
        attempt: u32,
        outcome: &AttemptOutcome,
    ) -> Result<bool, DisbursementError>;

    async fn list_retry_log(&self, id: DisbursementId)
    -> Result<Vec<RetryLogEntry>, DisbursementError>;

    /// `status IN (failed, pending) AND retry_count < max_retries AND next_retry_at <= now`,
    /// oldest schedule first, then oldest record
    async fn find_due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DisbursementRecord>, DisbursementError>;

    /// Accepted records whose callback deadline passed
    async fn find_overdue_accepted(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DisbursementRecord>, DisbursementError>;

    /// `success` records whose partner charge has not been resolved, oldest first
    async fn find_awaiting_charge(
        &self,
        limit: usize,
    ) -> Result<Vec<DisbursementRecord>, DisbursementError>;

    async fn clear_awaiting_charge(&self, id: DisbursementId) -> Result<bool, DisbursementError>;

    async fn health_check(&self) -> Result<(), DisbursementError>;
}

pub(crate) fn check_transition(
    id: DisbursementId,
    expected: DisbursementStatus,
    new: DisbursementStatus,
) -> Result<(), DisbursementError> {
    if expected.can_transition_to(new) {
        Ok(())
    } else {
        Err(DisbursementError::SystemError(format!(
            "Invalid transition {} -> {} for {}",
            expected, new, id
        )))
    }
}

#[derive(Default)]
struct Inner {
    records: HashMap<DisbursementId, DisbursementRecord>,
    client_requests: HashMap<(String, String), DisbursementId>,
    retry_log: HashMap<DisbursementId, Vec<RetryLogEntry>>,
}

/// In-memory store for tests and database-less runs
#[derive(Default)]
pub struct InMemoryDisbursementRepository {
    inner: Mutex<Inner>,
}

impl InMemoryDisbursementRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retry log first, so ids first set by a retry report that retry's attempt
    fn find_attempt<L, R>(inner: &Inner, matches_log: L, matches_record: R) -> Option<AttemptMatch>
    where
        L: Fn(&RetryLogEntry) -> bool,
        R: Fn(&DisbursementRecord) -> bool,
    {
        let from_log = inner
            .retry_log
            .values()
            .flatten()
            .filter(|e| matches_log(e))
            .max_by_key(|e| e.retry_attempt);
        if let Some(entry) = from_log {
            return inner
                .records
                .get(&entry.disbursement_id)
                .map(|record| AttemptMatch {
                    record: record.clone(),
                    attempt: entry.retry_attempt,
                });
        }

        inner
            .records
            .values()
            .find(|r| matches_record(r))
            .map(|record| AttemptMatch {
                record: record.clone(),
                attempt: 0,
            })
    }
}

#[async_trait]
impl DisbursementRepository for InMemoryDisbursementRepository {
    async fn insert(
        &self,
        record: &DisbursementRecord,
    ) -> Result<InsertOutcome, DisbursementError> {
        let mut inner = self.inner.lock().await;
        let key = (
            record.partner_id.clone(),
            record.client_request_id.clone(),
        );
        if let Some(existing_id) = inner.client_requests.get(&key)
            && let Some(existing) = inner.records.get(existing_id)
        {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        inner.client_requests.insert(key, record.id);
        inner.records.insert(record.id, record.clone());
        Ok(InsertOutcome::Created)
    }

    async fn get(
        &self,
        id: DisbursementId,
    ) -> Result<Option<DisbursementRecord>, DisbursementError> {
        Ok(self.inner.lock().await.records.get(&id).cloned())
    }

    async fn find_by_client_request(
        &self,
        partner_id: &str,
        client_request_id: &str,
    ) -> Result<Option<DisbursementRecord>, DisbursementError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .client_requests
            .get(&(partner_id.to_string(), client_request_id.to_string()))
            .and_then(|id| inner.records.get(id))
            .cloned())
    }

    async fn find_by_conversation_id(
        &self,
        conversation_id: &str,
    ) -> Result<Option<AttemptMatch>, DisbursementError> {
        let inner = self.inner.lock().await;
        Ok(Self::find_attempt(
            &inner,
            |e| e.conversation_id.as_deref() == Some(conversation_id),
            |r| r.conversation_id.as_deref() == Some(conversation_id),
        ))
    }

    async fn find_by_originator_conversation_id(
        &self,
        originator_conversation_id: &str,
    ) -> Result<Option<AttemptMatch>, DisbursementError> {
        let inner = self.inner.lock().await;
        Ok(Self::find_attempt(
            &inner,
            |e| e.originator_conversation_id.as_deref() == Some(originator_conversation_id),
            |r| r.originator_conversation_id.as_deref() == Some(originator_conversation_id),
        ))
    }

    async fn mark_accepted(
        &self,
        id: DisbursementId,
        expected: DisbursementStatus,
        accepted: &AttemptOutcome,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DisbursementError> {
        check_transition(id, expected, DisbursementStatus::Accepted)?;
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.records.get_mut(&id) else {
            return Ok(false);
        };
        if record.status != expected {
            return Ok(false);
        }
        record.status = DisbursementStatus::Accepted;
        if record.conversation_id.is_none() {
            record.conversation_id.clone_from(&accepted.conversation_id);
        }
        if record.originator_conversation_id.is_none() {
            record
                .originator_conversation_id
                .clone_from(&accepted.originator_conversation_id);
        }
        if accepted.response_code.is_some() {
            record.result_code.clone_from(&accepted.response_code);
            record
                .result_description
                .clone_from(&accepted.response_description);
        }
        record.next_retry_at = next_retry_at;
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn transition(
        &self,
        id: DisbursementId,
        expected: DisbursementStatus,
        new: DisbursementStatus,
        update: &StatusUpdate,
    ) -> Result<bool, DisbursementError> {
        check_transition(id, expected, new)?;
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.records.get_mut(&id) else {
            return Ok(false);
        };
        if record.status != expected {
            return Ok(false);
        }
        record.status = new;
        record.awaiting_charge |= new == DisbursementStatus::Success;
        if update.result_code.is_some() {
            record.result_code.clone_from(&update.result_code);
            record.result_description.clone_from(&update.result_description);
        }
        if record.transaction_receipt.is_none() {
            record.transaction_receipt.clone_from(&update.transaction_receipt);
        }
        record.next_retry_at = update.next_retry_at;
        if update.retry_reason.is_some() {
            record.retry_reason.clone_from(&update.retry_reason);
        }
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn begin_retry(
        &self,
        id: DisbursementId,
        expected: DisbursementStatus,
        expected_retry_count: u32,
        entry: &RetryLogEntry,
        lease_until: Option<DateTime<Utc>>,
    ) -> Result<bool, DisbursementError> {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.records.get_mut(&id) else {
            return Ok(false);
        };
        if record.status != expected
            || record.retry_count != expected_retry_count
            || record.retry_count >= record.max_retries
        {
            return Ok(false);
        }
        record.retry_count += 1;
        record.retry_reason = Some(entry.reason.clone());
        record.next_retry_at = lease_until;
        record.updated_at = Utc::now();
        inner.retry_log.entry(id).or_default().push(entry.clone());
        Ok(true)
    }

    async fn attach_attempt_outcome(
        &self,
        id: DisbursementId,
        attempt: u32,
        outcome: &AttemptOutcome,
    ) -> Result<bool, DisbursementError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .retry_log
            .get_mut(&id)
            .and_then(|log| log.iter_mut().find(|e| e.retry_attempt == attempt));
        match entry {
            Some(entry) => {
                entry.attach(outcome);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_retry_log(
        &self,
        id: DisbursementId,
    ) -> Result<Vec<RetryLogEntry>, DisbursementError> {
        let inner = self.inner.lock().await;
        let mut log = inner.retry_log.get(&id).cloned().unwrap_or_default();
        log.sort_by_key(|e| e.retry_attempt);
        Ok(log)
    }

    async fn find_due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DisbursementRecord>, DisbursementError> {
        let inner = self.inner.lock().await;
        let mut due: Vec<DisbursementRecord> = inner
            .records
            .values()
            .filter(|r| {
                r.status.is_retry_candidate()
                    && r.retry_count < r.max_retries
                    && r.next_retry_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|r| (r.next_retry_at, r.created_at, r.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn find_overdue_accepted(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DisbursementRecord>, DisbursementError> {
        let inner = self.inner.lock().await;
        let mut overdue: Vec<DisbursementRecord> = inner
            .records
            .values()
            .filter(|r| {
                r.status == DisbursementStatus::Accepted
                    && r.next_retry_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        overdue.sort_by_key(|r| (r.next_retry_at, r.created_at, r.id));
        overdue.truncate(limit);
        Ok(overdue)
    }

    async fn find_awaiting_charge(
        &self,
        limit: usize,
    ) -> Result<Vec<DisbursementRecord>, DisbursementError> {
        let inner = self.inner.lock().await;
        let mut awaiting: Vec<DisbursementRecord> = inner
            .records
            .values()
            .filter(|r| r.awaiting_charge && r.status == DisbursementStatus::Success)
            .cloned()
            .collect();
        awaiting.sort_by_key(|r| (r.updated_at, r.id));
        awaiting.truncate(limit);
        Ok(awaiting)
    }

    async fn clear_awaiting_charge(&self, id: DisbursementId) -> Result<bool, DisbursementError> {
        let mut inner = self.inner.lock().await;
        match inner.records.get_mut(&id) {
            Some(record) if record.awaiting_charge => {
                record.awaiting_charge = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn health_check(&self) -> Result<(), DisbursementError> {
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::disbursement::types::{DEFAULT_MAX_RETRIES, NewDisbursement};
    use crate::provider::Acknowledgement;
    use chrono::Duration;

    fn record(client_request_id: &str) -> DisbursementRecord {
        DisbursementRecord::new(
            NewDisbursement {
                partner_id: "acme".to_string(),
                client_request_id: client_request_id.to_string(),
                amount: 100,
                currency: "KES".to_string(),
                recipient_msisdn: "254712345678".to_string(),
                remarks: "salary".to_string(),
                max_retries: DEFAULT_MAX_RETRIES,
            },
            Utc::now(),
        )
    }

    fn ack(cid: &str) -> AttemptOutcome {
        AttemptOutcome::from_ack(&Acknowledgement {
            conversation_id: cid.to_string(),
            originator_conversation_id: format!("orig-{}", cid),
            response_code: "0".to_string(),
            response_description: "Accepted".to_string(),
        })
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_on_client_request() {
        let repo = InMemoryDisbursementRepository::new();
        let first = record("req-1");
        assert_eq!(repo.insert(&first).await.unwrap(), InsertOutcome::Created);

        let second = record("req-1");
        match repo.insert(&second).await.unwrap() {
            InsertOutcome::Existing(existing) => assert_eq!(existing.id, first.id),
            other => panic!("expected existing, got {:?}", other),
        }
        assert!(repo.get(second.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_accepted_sets_conversation_id_once() {
        let repo = InMemoryDisbursementRepository::new();
        let r = record("req-1");
        repo.insert(&r).await.unwrap();

        assert!(
            repo.mark_accepted(r.id, DisbursementStatus::Queued, &ack("C1"), None)
                .await
                .unwrap()
        );
        // Stale CAS loses
        assert!(
            !repo
                .mark_accepted(r.id, DisbursementStatus::Queued, &ack("C2"), None)
                .await
                .unwrap()
        );

        repo.transition(
            r.id,
            DisbursementStatus::Accepted,
            DisbursementStatus::Failed,
            &StatusUpdate::default(),
        )
        .await
        .unwrap();
        repo.mark_accepted(r.id, DisbursementStatus::Failed, &ack("C3"), None)
            .await
            .unwrap();

        let stored = repo.get(r.id).await.unwrap().unwrap();
        assert_eq!(stored.conversation_id.as_deref(), Some("C1"));
        assert_eq!(stored.status, DisbursementStatus::Accepted);
    }

    #[tokio::test]
    async fn test_transition_rejects_illegal_edge() {
        let repo = InMemoryDisbursementRepository::new();
        let r = record("req-1");
        repo.insert(&r).await.unwrap();
        let err = repo
            .transition(
                r.id,
                DisbursementStatus::Success,
                DisbursementStatus::Failed,
                &StatusUpdate::default(),
            )
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_begin_retry_cas_and_bound() {
        let repo = InMemoryDisbursementRepository::new();
        let mut r = record("req-1");
        r.max_retries = 1;
        repo.insert(&r).await.unwrap();
        repo.transition(
            r.id,
            DisbursementStatus::Queued,
            DisbursementStatus::Failed,
            &StatusUpdate::default(),
        )
        .await
        .unwrap();

        let entry = RetryLogEntry::new(r.id, 1, "HTTP_503", Utc::now());
        assert!(
            repo.begin_retry(r.id, DisbursementStatus::Failed, 0, &entry, None)
                .await
                .unwrap()
        );
        // Same expected retry_count loses the race
        assert!(
            !repo
                .begin_retry(r.id, DisbursementStatus::Failed, 0, &entry, None)
                .await
                .unwrap()
        );
        // Bound reached
        let entry2 = RetryLogEntry::new(r.id, 2, "HTTP_503", Utc::now());
        assert!(
            !repo
                .begin_retry(r.id, DisbursementStatus::Failed, 1, &entry2, None)
                .await
                .unwrap()
        );

        let stored = repo.get(r.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 1);
        assert_eq!(repo.list_retry_log(r.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_find_by_conversation_id_reports_attempt() {
        let repo = InMemoryDisbursementRepository::new();
        let r = record("req-1");
        repo.insert(&r).await.unwrap();
        repo.mark_accepted(r.id, DisbursementStatus::Queued, &ack("C0"), None)
            .await
            .unwrap();
        repo.transition(
            r.id,
            DisbursementStatus::Accepted,
            DisbursementStatus::Pending,
            &StatusUpdate::default(),
        )
        .await
        .unwrap();

        let entry = RetryLogEntry::new(r.id, 1, "CALLBACK_TIMEOUT", Utc::now());
        repo.begin_retry(r.id, DisbursementStatus::Pending, 0, &entry, None)
            .await
            .unwrap();
        repo.attach_attempt_outcome(r.id, 1, &ack("C1"))
            .await
            .unwrap();

        let m0 = repo.find_by_conversation_id("C0").await.unwrap().unwrap();
        assert_eq!((m0.record.id, m0.attempt), (r.id, 0));
        let m1 = repo.find_by_conversation_id("C1").await.unwrap().unwrap();
        assert_eq!((m1.record.id, m1.attempt), (r.id, 1));
        let o1 = repo
            .find_by_originator_conversation_id("orig-C1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(o1.attempt, 1);
        assert!(repo.find_by_conversation_id("C9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_due_for_retry_selection_and_order() {
        let repo = InMemoryDisbursementRepository::new();
        let now = Utc::now();

        let mut later = record("later");
        later.status = DisbursementStatus::Failed;
        later.next_retry_at = Some(now - Duration::minutes(1));
        let mut earlier = record("earlier");
        earlier.status = DisbursementStatus::Pending;
        earlier.next_retry_at = Some(now - Duration::minutes(10));
        let mut not_due = record("not-due");
        not_due.status = DisbursementStatus::Failed;
        not_due.next_retry_at = Some(now + Duration::minutes(10));
        let mut exhausted = record("exhausted");
        exhausted.status = DisbursementStatus::Failed;
        exhausted.retry_count = exhausted.max_retries;
        exhausted.next_retry_at = Some(now - Duration::minutes(30));
        let mut permanent = record("permanent");
        permanent.status = DisbursementStatus::Failed;
        let mut accepted = record("accepted");
        accepted.status = DisbursementStatus::Accepted;
        accepted.next_retry_at = Some(now - Duration::minutes(30));

        for r in [&later, &earlier, &not_due, &exhausted, &permanent, &accepted] {
            repo.insert(r).await.unwrap();
        }

        let due = repo.find_due_for_retry(now, 10).await.unwrap();
        let ids: Vec<_> = due.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![earlier.id, later.id]);

        assert_eq!(repo.find_due_for_retry(now, 1).await.unwrap().len(), 1);

        let overdue = repo.find_overdue_accepted(now, 10).await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, accepted.id);
    }
}
