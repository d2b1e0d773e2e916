//! Gateway callback payload extraction
//!
//! The gateway posts a `Result` envelope whose interesting fields live in a
//! loosely typed `[{Key, Value}]` list. Extraction never fails: unknown keys
//! are ignored, malformed values are dropped, and even a body that is not
//! JSON at all still yields a [`CallbackRecord`] so the raw notification is
//! kept.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::disbursement::MinorUnits;
use crate::provider::http::scalar_to_string;

/// Gateway result code for a completed payout
pub const SUCCESS_RESULT_CODE: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackType {
    /// Final payout result
    Result,
    /// Gateway could not process the request before its queue timeout
    Timeout,
}

impl CallbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackType::Result => "result",
            CallbackType::Timeout => "timeout",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "result" => Some(CallbackType::Result),
            "timeout" => Some(CallbackType::Timeout),
            _ => None,
        }
    }
}

impl fmt::Display for CallbackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One stored gateway notification. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallbackRecord {
    pub dedup_key: String,
    pub callback_type: CallbackType,
    pub conversation_id: Option<String>,
    pub originator_conversation_id: Option<String>,
    pub transaction_id: Option<String>,
    pub receipt_number: Option<String>,
    pub amount: Option<MinorUnits>,
    pub result_code: Option<String>,
    pub result_description: Option<String>,
    /// Business correlation token (`Occasion` reference item)
    pub occasion: Option<String>,
    pub raw_payload: Value,
    pub received_at: DateTime<Utc>,
}

/// Typed view of the `ResultParameters` list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackResult {
    pub result_code: Option<String>,
    pub result_description: Option<String>,
    pub transaction_receipt: Option<String>,
    pub transaction_amount: Option<MinorUnits>,
    pub receiver_party_public_name: Option<String>,
    pub completed_at: Option<String>,
    pub utility_account_balance: Option<Decimal>,
    pub working_account_balance: Option<Decimal>,
    pub charges_paid_account_balance: Option<Decimal>,
    pub recipient_is_registered: Option<bool>,
}

impl CallbackResult {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.result_code.as_deref() == Some(SUCCESS_RESULT_CODE)
    }

    /// Extract known keys from a `{Key: Value}` parameter map
    pub fn from_parameters(params: &HashMap<String, Value>) -> Self {
        let text = |key: &str| {
            params
                .get(key)
                .and_then(scalar_to_string)
                .filter(|s| !s.is_empty())
        };
        let decimal = |key: &str| {
            let raw = text(key)?;
            match Decimal::from_str(&raw) {
                Ok(d) => Some(d),
                Err(_) => {
                    debug!(key, value = %raw, "Ignoring non-numeric callback parameter");
                    None
                }
            }
        };

        Self {
            result_code: None,
            result_description: None,
            transaction_receipt: text("TransactionReceipt"),
            transaction_amount: decimal("TransactionAmount").and_then(to_minor_units),
            receiver_party_public_name: text("ReceiverPartyPublicName"),
            completed_at: text("TransactionCompletedDateTime"),
            utility_account_balance: decimal("B2CUtilityAccountAvailableFunds"),
            working_account_balance: decimal("B2CWorkingAccountAvailableFunds"),
            charges_paid_account_balance: decimal("B2CChargesPaidAccountAvailableFunds"),
            recipient_is_registered: text("B2CRecipientIsRegisteredCustomer").and_then(|v| {
                match v.to_ascii_uppercase().as_str() {
                    "Y" | "YES" | "TRUE" => Some(true),
                    "N" | "NO" | "FALSE" => Some(false),
                    _ => None,
                }
            }),
        }
    }
}

fn to_minor_units(amount: Decimal) -> Option<MinorUnits> {
    amount
        .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// `[{Key, Value}]` or a single `{Key, Value}` object into a map
fn key_value_list(value: Option<&Value>) -> HashMap<String, Value> {
    let items: Vec<&Value> = match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(item @ Value::Object(_)) => vec![item],
        _ => Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|item| {
            let key = item.get("Key").and_then(Value::as_str)?;
            Some((key.to_string(), item.get("Value").cloned().unwrap_or(Value::Null)))
        })
        .collect()
}

fn field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(scalar_to_string)
        .filter(|s| !s.is_empty())
}

/// Build the dedup key: `{type}:{id}:{result_code}`
fn dedup_key(
    callback_type: CallbackType,
    conversation_id: Option<&str>,
    fallback_id: Option<&str>,
    result_code: Option<&str>,
) -> String {
    match conversation_id.or(fallback_id) {
        Some(id) => format!(
            "{}:{}:{}",
            callback_type,
            id,
            result_code.unwrap_or("none")
        ),
        // Nothing to dedup on
        None => format!("{}:{}", callback_type, uuid::Uuid::new_v4()),
    }
}

/// Extract a callback record and its typed result from a raw body
pub fn parse_callback(
    callback_type: CallbackType,
    raw: Value,
    received_at: DateTime<Utc>,
) -> (CallbackRecord, CallbackResult) {
    let empty = Map::new();
    let envelope = raw
        .get("Result")
        .and_then(Value::as_object)
        .or_else(|| raw.as_object())
        .unwrap_or(&empty);

    let conversation_id = field(envelope, "ConversationID");
    let originator_conversation_id = field(envelope, "OriginatorConversationID");
    let transaction_id = field(envelope, "TransactionID");
    let result_code = field(envelope, "ResultCode");
    let result_description = field(envelope, "ResultDesc");

    let params = key_value_list(
        envelope
            .get("ResultParameters")
            .and_then(|p| p.get("ResultParameter")),
    );
    let references = key_value_list(
        envelope
            .get("ReferenceData")
            .and_then(|r| r.get("ReferenceItem")),
    );
    let occasion = references
        .get("Occasion")
        .and_then(scalar_to_string)
        .filter(|s| !s.is_empty());

    let mut result = CallbackResult::from_parameters(&params);
    result.result_code = result_code.clone();
    result.result_description = result_description.clone();
    if result.transaction_receipt.is_none() && result.is_success() {
        result.transaction_receipt = transaction_id.clone();
    }

    let record = CallbackRecord {
        dedup_key: dedup_key(
            callback_type,
            conversation_id.as_deref(),
            originator_conversation_id
                .as_deref()
                .or(transaction_id.as_deref()),
            result_code.as_deref(),
        ),
        callback_type,
        conversation_id,
        originator_conversation_id,
        transaction_id,
        receipt_number: result.transaction_receipt.clone(),
        amount: result.transaction_amount,
        result_code,
        result_description,
        occasion,
        raw_payload: raw,
        received_at,
    };

    (record, result)
}
