//! Wallet ledger types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::disbursement::{DisbursementId, DisbursementStatus, MinorUnits};

/// Reason recorded on a charge that could not be paid from the wallet
pub const INSUFFICIENT_BALANCE_REASON: &str = "insufficient balance";
/// Reason recorded on a pending charge whose disbursement is unresolved
pub const AWAITING_SETTLEMENT_REASON: &str = "awaiting disbursement settlement";
/// Reason recorded on a pending charge whose disbursement failed
pub const DISBURSEMENT_FAILED_REASON: &str = "disbursement failed";

/// One prepaid wallet per partner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletAccount {
    pub id: String,
    pub partner_id: String,
    /// Never negative
    pub current_balance: MinorUnits,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletAccount {
    pub fn new(partner_id: impl Into<String>, currency: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string(),
            partner_id: partner_id.into(),
            current_balance: 0,
            currency: currency.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Billable event kind, stored as text
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChargeType {
    Disbursement,
    Sms,
    Other(String),
}

impl ChargeType {
    pub fn as_str(&self) -> &str {
        match self {
            ChargeType::Disbursement => "disbursement",
            ChargeType::Sms => "sms",
            ChargeType::Other(s) => s.as_str(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "disbursement" => ChargeType::Disbursement,
            "sms" => ChargeType::Sms,
            other => ChargeType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ChargeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ChargeType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ChargeType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ChargeType::parse(&s))
    }
}

/// Partner fee schedule for one charge type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeConfig {
    pub id: String,
    pub partner_id: String,
    pub charge_type: ChargeType,
    #[serde(default)]
    pub flat_amount: MinorUnits,
    /// Percent of the transaction amount (1.5 = 1.5%)
    #[serde(default)]
    pub percentage: Decimal,
    #[serde(default)]
    pub min_amount: MinorUnits,
    #[serde(default)]
    pub max_amount: Option<MinorUnits>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Charge status, stored as SMALLINT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeStatus {
    Pending,
    Completed,
    Failed,
}

impl ChargeStatus {
    pub fn id(&self) -> i16 {
        match self {
            ChargeStatus::Pending => 0,
            ChargeStatus::Completed => 1,
            ChargeStatus::Failed => -1,
        }
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(ChargeStatus::Pending),
            1 => Some(ChargeStatus::Completed),
            -1 => Some(ChargeStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeStatus::Pending => "pending",
            ChargeStatus::Completed => "completed",
            ChargeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One charge per `(partner_id, related_transaction_id, charge_type)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeTransaction {
    pub id: String,
    pub partner_id: String,
    pub wallet_id: String,
    pub charge_config_id: String,
    pub charge_type: ChargeType,
    /// The disbursement being charged for
    pub related_transaction_id: DisbursementId,
    pub amount: MinorUnits,
    pub status: ChargeStatus,
    pub reason: Option<String>,
    pub wallet_balance_before: Option<MinorUnits>,
    pub wallet_balance_after: Option<MinorUnits>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl ChargeTransaction {
    pub fn pending(
        wallet: &WalletAccount,
        config: &ChargeConfig,
        disbursement_id: DisbursementId,
        amount: MinorUnits,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            partner_id: wallet.partner_id.clone(),
            wallet_id: wallet.id.clone(),
            charge_config_id: config.id.clone(),
            charge_type: config.charge_type.clone(),
            related_transaction_id: disbursement_id,
            amount,
            status: ChargeStatus::Pending,
            reason,
            wallet_balance_before: None,
            wallet_balance_after: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletTransactionType {
    Charge,
    ManualCredit,
    ManualDebit,
    TopUp,
}

impl WalletTransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletTransactionType::Charge => "charge",
            WalletTransactionType::ManualCredit => "manual_credit",
            WalletTransactionType::ManualDebit => "manual_debit",
            WalletTransactionType::TopUp => "top_up",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "charge" => Some(WalletTransactionType::Charge),
            "manual_credit" => Some(WalletTransactionType::ManualCredit),
            "manual_debit" => Some(WalletTransactionType::ManualDebit),
            "top_up" => Some(WalletTransactionType::TopUp),
            _ => None,
        }
    }

    /// Whether the mutation adds to the balance
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            WalletTransactionType::ManualCredit | WalletTransactionType::TopUp
        )
    }
}

impl fmt::Display for WalletTransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger row, one per balance mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletTransaction {
    pub id: String,
    pub wallet_id: String,
    pub partner_id: String,
    pub transaction_type: WalletTransactionType,
    /// Always positive; direction follows `transaction_type`
    pub amount: MinorUnits,
    pub balance_before: MinorUnits,
    pub balance_after: MinorUnits,
    pub reference: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    pub fn new(
        wallet: &WalletAccount,
        transaction_type: WalletTransactionType,
        amount: MinorUnits,
        balance_after: MinorUnits,
        reference: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            wallet_id: wallet.id.clone(),
            partner_id: wallet.partner_id.clone(),
            transaction_type,
            amount,
            balance_before: wallet.current_balance,
            balance_after,
            reference: reference.into(),
            description: description.into(),
            created_at: Utc::now(),
        }
    }
}

/// Result of a charge application
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChargeOutcome {
    /// Charge applied by this call
    Completed {
        charge_id: String,
        amount: MinorUnits,
        balance_after: MinorUnits,
    },
    /// A completed charge already exists; nothing applied
    AlreadyCompleted { charge_id: String },
    /// Disbursement not settled yet; charge kept pending
    Deferred {
        charge_id: String,
        status: DisbursementStatus,
    },
    /// Charge recorded failed; the disbursement is untouched
    Failed { charge_id: String, reason: String },
    /// Disbursement did not pay out; no charge is due
    NotBillable { status: DisbursementStatus },
}

impl ChargeOutcome {
    pub fn charge_id(&self) -> Option<&str> {
        match self {
            ChargeOutcome::Completed { charge_id, .. }
            | ChargeOutcome::AlreadyCompleted { charge_id }
            | ChargeOutcome::Deferred { charge_id, .. }
            | ChargeOutcome::Failed { charge_id, .. } => Some(charge_id),
            ChargeOutcome::NotBillable { .. } => None,
        }
    }
}
