//! Disbursement core types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::state::DisbursementStatus;
use crate::provider::{Acknowledgement, ProviderError};

/// Amounts in the smallest unit the gateway settles in
pub type MinorUnits = i64;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_CURRENCY: &str = "KES";

/// Disbursement ID - ULID based, sortable by creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisbursementId(ulid::Ulid);

impl DisbursementId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for DisbursementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DisbursementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DisbursementId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

impl Serialize for DisbursementId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DisbursementId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Gateway idempotency key for one attempt.
///
/// Attempt 0 is the original submission, attempt `n` the n-th retry.
pub fn idempotency_key(id: DisbursementId, attempt: u32) -> String {
    format!("{}-{}", id, attempt)
}

/// Inverse of [`idempotency_key`]
pub fn parse_idempotency_key(key: &str) -> Option<(DisbursementId, u32)> {
    let (id, attempt) = key.trim().rsplit_once('-')?;
    Some((id.parse().ok()?, attempt.parse().ok()?))
}

/// Validated submission
#[derive(Debug, Clone)]
pub struct NewDisbursement {
    pub partner_id: String,
    pub client_request_id: String,
    pub amount: MinorUnits,
    pub currency: String,
    /// Already normalised
    pub recipient_msisdn: String,
    pub remarks: String,
    pub max_retries: u32,
}

/// One disbursement, identity stable across retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisbursementRecord {
    pub id: DisbursementId,
    pub partner_id: String,
    pub client_request_id: String,
    pub amount: MinorUnits,
    pub currency: String,
    pub recipient_msisdn: String,
    pub remarks: String,
    /// Set at most once, by the first accepted attempt
    pub conversation_id: Option<String>,
    pub originator_conversation_id: Option<String>,
    pub transaction_receipt: Option<String>,
    pub status: DisbursementStatus,
    pub result_code: Option<String>,
    pub result_description: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub retry_reason: Option<String>,
    /// Set with the move to `success`, cleared once the partner charge is resolved
    pub awaiting_charge: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DisbursementRecord {
    pub fn new(request: NewDisbursement, now: DateTime<Utc>) -> Self {
        Self {
            id: DisbursementId::new(),
            partner_id: request.partner_id,
            client_request_id: request.client_request_id,
            amount: request.amount,
            currency: request.currency,
            recipient_msisdn: request.recipient_msisdn,
            remarks: request.remarks,
            conversation_id: None,
            originator_conversation_id: None,
            transaction_receipt: None,
            status: DisbursementStatus::Queued,
            result_code: None,
            result_description: None,
            retry_count: 0,
            max_retries: request.max_retries,
            next_retry_at: None,
            retry_reason: None,
            awaiting_charge: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// No automatic progress will ever happen again
    pub fn is_finished(&self) -> bool {
        match self.status {
            DisbursementStatus::Success => true,
            DisbursementStatus::Failed => {
                self.next_retry_at.is_none() || self.retry_count >= self.max_retries
            }
            _ => false,
        }
    }

    #[inline]
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Key of the attempt currently in flight
    pub fn current_idempotency_key(&self) -> String {
        idempotency_key(self.id, self.retry_count)
    }
}

/// Append-only record of one retry attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryLogEntry {
    pub disbursement_id: DisbursementId,
    /// 1-based
    pub retry_attempt: u32,
    pub reason: String,
    pub idempotency_key: String,
    pub conversation_id: Option<String>,
    pub originator_conversation_id: Option<String>,
    pub response_code: Option<String>,
    pub response_description: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl RetryLogEntry {
    pub fn new(
        disbursement_id: DisbursementId,
        retry_attempt: u32,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            disbursement_id,
            retry_attempt,
            reason: reason.into(),
            idempotency_key: idempotency_key(disbursement_id, retry_attempt),
            conversation_id: None,
            originator_conversation_id: None,
            response_code: None,
            response_description: None,
            error_details: None,
            created_at: now,
        }
    }

    /// Apply an outcome; fields already set are kept
    pub fn attach(&mut self, outcome: &AttemptOutcome) {
        fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(value);
            }
        }
        fill(&mut self.conversation_id, &outcome.conversation_id);
        fill(
            &mut self.originator_conversation_id,
            &outcome.originator_conversation_id,
        );
        if outcome.response_code.is_some() {
            self.response_code.clone_from(&outcome.response_code);
            self.response_description
                .clone_from(&outcome.response_description);
        }
        if outcome.error_details.is_some() {
            self.error_details.clone_from(&outcome.error_details);
        }
    }
}

/// What one attempt produced: a synchronous answer or a later callback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub conversation_id: Option<String>,
    pub originator_conversation_id: Option<String>,
    pub response_code: Option<String>,
    pub response_description: Option<String>,
    pub error_details: Option<serde_json::Value>,
}

impl AttemptOutcome {
    pub fn from_ack(ack: &Acknowledgement) -> Self {
        Self {
            conversation_id: Some(ack.conversation_id.clone()).filter(|s| !s.is_empty()),
            originator_conversation_id: Some(ack.originator_conversation_id.clone())
                .filter(|s| !s.is_empty()),
            response_code: Some(ack.response_code.clone()),
            response_description: Some(ack.response_description.clone()),
            error_details: None,
        }
    }

    pub fn from_error(err: &ProviderError) -> Self {
        Self {
            response_code: Some(err.code()),
            response_description: Some(err.description()),
            error_details: Some(serde_json::json!({
                "classification": err.classification(),
                "message": err.to_string(),
            })),
            ..Default::default()
        }
    }
}

/// Fields written together with a status compare-and-set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub result_code: Option<String>,
    pub result_description: Option<String>,
    /// Only written when currently unset
    pub transaction_receipt: Option<String>,
    /// Always written; `None` clears the schedule
    pub next_retry_at: Option<DateTime<Utc>>,
    pub retry_reason: Option<String>,
}

/// A disbursement located by one of its correlation identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptMatch {
    pub record: DisbursementRecord,
    /// Attempt the identifier belongs to (0 = original submission)
    pub attempt: u32,
}

/// Result of inserting a new disbursement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    /// Same `(partner_id, client_request_id)` already stored
    Existing(DisbursementRecord),
}
