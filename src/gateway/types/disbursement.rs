//! Disbursement request and response DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::disbursement::{DisbursementRecord, MinorUnits, RetryLogEntry, SubmitRequest};

/// Body of `POST /disbursements`
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SubmitDisbursementRequest {
    #[validate(length(min = 1, max = 64))]
    #[schema(example = "acme")]
    pub partner_id: String,
    /// Client idempotency key, unique per partner
    #[validate(length(min = 1, max = 128))]
    #[schema(example = "payroll-2026-10-0001")]
    pub client_request_id: String,
    /// Whole currency units
    #[validate(range(min = 1))]
    #[schema(example = 1500)]
    pub amount: MinorUnits,
    #[validate(length(min = 9, max = 16))]
    #[schema(example = "0712345678")]
    pub msisdn: String,
    #[validate(length(equal = 3))]
    #[schema(example = "KES")]
    pub currency: Option<String>,
    #[validate(length(max = 100))]
    pub remarks: Option<String>,
}

impl From<SubmitDisbursementRequest> for SubmitRequest {
    fn from(req: SubmitDisbursementRequest) -> Self {
        SubmitRequest {
            partner_id: req.partner_id,
            client_request_id: req.client_request_id,
            amount: req.amount,
            msisdn: req.msisdn,
            currency: req.currency,
            remarks: req.remarks,
        }
    }
}

/// Response of `POST /disbursements`
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitDisbursementResponse {
    #[schema(example = "01JA2X5V6Q8ZP3T4N7K9M1B0CD")]
    pub disbursement_id: String,
    #[schema(example = "accepted")]
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// `false` when the client request id was seen before
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
    /// Classification of a synchronous gateway error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_classification: Option<String>,
}

/// Disbursement as exposed over HTTP
#[derive(Debug, Serialize, ToSchema)]
pub struct DisbursementView {
    pub disbursement_id: String,
    pub partner_id: String,
    pub client_request_id: String,
    pub amount: MinorUnits,
    pub currency: String,
    pub recipient_msisdn: String,
    #[schema(example = "success")]
    pub status: String,
    pub conversation_id: Option<String>,
    pub originator_conversation_id: Option<String>,
    pub transaction_receipt: Option<String>,
    pub result_code: Option<String>,
    pub result_description: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DisbursementRecord> for DisbursementView {
    fn from(r: DisbursementRecord) -> Self {
        Self {
            disbursement_id: r.id.to_string(),
            partner_id: r.partner_id,
            client_request_id: r.client_request_id,
            amount: r.amount,
            currency: r.currency,
            recipient_msisdn: r.recipient_msisdn,
            status: r.status.to_string(),
            conversation_id: r.conversation_id,
            originator_conversation_id: r.originator_conversation_id,
            transaction_receipt: r.transaction_receipt,
            result_code: r.result_code,
            result_description: r.result_description,
            retry_count: r.retry_count,
            max_retries: r.max_retries,
            next_retry_at: r.next_retry_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// One retry attempt
#[derive(Debug, Serialize, ToSchema)]
pub struct RetryLogView {
    pub retry_attempt: u32,
    #[schema(example = "CALLBACK_TIMEOUT")]
    pub reason: String,
    pub idempotency_key: String,
    pub conversation_id: Option<String>,
    pub originator_conversation_id: Option<String>,
    pub response_code: Option<String>,
    pub response_description: Option<String>,
    #[schema(value_type = Object)]
    pub error_details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl From<RetryLogEntry> for RetryLogView {
    fn from(e: RetryLogEntry) -> Self {
        Self {
            retry_attempt: e.retry_attempt,
            reason: e.reason,
            idempotency_key: e.idempotency_key,
            conversation_id: e.conversation_id,
            originator_conversation_id: e.originator_conversation_id,
            response_code: e.response_code,
            response_description: e.response_description,
            error_details: e.error_details,
            created_at: e.created_at,
        }
    }
}

/// Body of `POST /disbursements/retry`; empty for a full batch
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct RetryRequest {
    #[serde(default)]
    pub disbursement_id: Option<String>,
}
