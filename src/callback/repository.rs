//! Callback store
//!
//! Notifications are appended once per dedup key and marked processed once
//! correlation finished. Unprocessed rows are replayed by the retry job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

use super::payload::CallbackRecord;

#[derive(Error, Debug, Clone)]
pub enum CallbackError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Disbursement store error: {0}")]
    Store(String),

    #[error("Concurrent updates on disbursement {0} did not settle")]
    Contended(String),

    /// Stored, then correlation failed; replayed later
    #[error("Callback {dedup_key} stored but not applied: {reason}")]
    NotApplied { dedup_key: String, reason: String },
}

impl CallbackError {
    pub fn code(&self) -> &'static str {
        match self {
            CallbackError::DatabaseError(_) | CallbackError::Store(_) => "DATABASE_ERROR",
            CallbackError::Contended(_) => "CONCURRENT_UPDATE",
            CallbackError::NotApplied { .. } => "CALLBACK_NOT_APPLIED",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            CallbackError::DatabaseError(_) | CallbackError::Store(_) => 500,
            CallbackError::Contended(_) => 409,
            CallbackError::NotApplied { .. } => 503,
        }
    }

    /// The notification is durably stored even though this error occurred
    pub fn is_stored(&self) -> bool {
        matches!(
            self,
            CallbackError::Contended(_) | CallbackError::NotApplied { .. }
        )
    }
}

impl From<sqlx::Error> for CallbackError {
    fn from(e: sqlx::Error) -> Self {
        CallbackError::DatabaseError(e.to_string())
    }
}

impl From<crate::disbursement::DisbursementError> for CallbackError {
    fn from(e: crate::disbursement::DisbursementError) -> Self {
        CallbackError::Store(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    /// Same dedup key already stored
    Duplicate,
}

#[async_trait]
pub trait CallbackRepository: Send + Sync {
    /// Idempotent append keyed on `dedup_key`
    async fn store(&self, record: &CallbackRecord) -> Result<StoreOutcome, CallbackError>;

    async fn list_by_conversation_id(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<CallbackRecord>, CallbackError>;

    /// Returns `false` when already marked
    async fn mark_processed(&self, dedup_key: &str) -> Result<bool, CallbackError>;

    /// Stored but never processed, received at or before `received_before`, oldest first
    async fn list_unprocessed(
        &self,
        received_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CallbackRecord>, CallbackError>;
}

#[derive(Default)]
pub struct InMemoryCallbackRepository {
    records: DashMap<String, CallbackRecord>,
    processed: DashMap<String, DateTime<Utc>>,
}

impl InMemoryCallbackRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CallbackRepository for InMemoryCallbackRepository {
    async fn store(&self, record: &CallbackRecord) -> Result<StoreOutcome, CallbackError> {
        match self.records.entry(record.dedup_key.clone()) {
            Entry::Occupied(_) => Ok(StoreOutcome::Duplicate),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(StoreOutcome::Inserted)
            }
        }
    }

    async fn list_by_conversation_id(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<CallbackRecord>, CallbackError> {
        let mut found: Vec<CallbackRecord> = self
            .records
            .iter()
            .filter(|r| r.conversation_id.as_deref() == Some(conversation_id))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by_key(|r| r.received_at);
        Ok(found)
    }

    async fn mark_processed(&self, dedup_key: &str) -> Result<bool, CallbackError> {
        match self.processed.entry(dedup_key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                Ok(true)
            }
        }
    }

    async fn list_unprocessed(
        &self,
        received_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CallbackRecord>, CallbackError> {
        let mut found: Vec<CallbackRecord> = self
            .records
            .iter()
            .filter(|r| r.received_at <= received_before && !self.processed.contains_key(r.key()))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.dedup_key.cmp(&b.dedup_key))
        });
        found.truncate(limit);
        Ok(found)
    }
}
