//! Wallet request and response DTOs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::disbursement::MinorUnits;
use crate::wallet::{ChargeTransaction, WalletAccount, WalletTransaction};

#[derive(Debug, Serialize, ToSchema)]
pub struct WalletView {
    pub wallet_id: String,
    #[schema(example = "acme")]
    pub partner_id: String,
    #[schema(example = 25000)]
    pub current_balance: MinorUnits,
    #[schema(example = "KES")]
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

impl From<WalletAccount> for WalletView {
    fn from(w: WalletAccount) -> Self {
        Self {
            wallet_id: w.id,
            partner_id: w.partner_id,
            current_balance: w.current_balance,
            currency: w.currency,
            updated_at: w.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WalletTransactionView {
    pub id: String,
    #[schema(example = "charge")]
    pub transaction_type: String,
    pub amount: MinorUnits,
    pub balance_before: MinorUnits,
    pub balance_after: MinorUnits,
    pub reference: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl From<WalletTransaction> for WalletTransactionView {
    fn from(t: WalletTransaction) -> Self {
        Self {
            id: t.id,
            transaction_type: t.transaction_type.to_string(),
            amount: t.amount,
            balance_before: t.balance_before,
            balance_after: t.balance_after,
            reference: t.reference,
            description: t.description,
            created_at: t.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChargeView {
    pub charge_id: String,
    #[schema(example = "disbursement")]
    pub charge_type: String,
    pub amount: MinorUnits,
    #[schema(example = "completed")]
    pub status: String,
    pub reason: Option<String>,
    pub wallet_balance_before: Option<MinorUnits>,
    pub wallet_balance_after: Option<MinorUnits>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<ChargeTransaction> for ChargeView {
    fn from(c: ChargeTransaction) -> Self {
        Self {
            charge_id: c.id,
            charge_type: c.charge_type.as_str().to_string(),
            amount: c.amount,
            status: c.status.as_str().to_string(),
            reason: c.reason,
            wallet_balance_before: c.wallet_balance_before,
            wallet_balance_after: c.wallet_balance_after,
            created_at: c.created_at,
            processed_at: c.processed_at,
        }
    }
}

/// Body of the manual credit / debit endpoints
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct WalletAdjustmentRequest {
    #[validate(range(min = 1))]
    #[schema(example = 10000)]
    pub amount: MinorUnits,
    /// Operator reference, e.g. bank slip number
    #[validate(length(min = 1, max = 128))]
    pub reference: String,
    #[validate(length(max = 255))]
    #[serde(default)]
    pub description: String,
    /// Credit only: book as `top_up` instead of `manual_credit`
    #[serde(default)]
    pub top_up: bool,
}

/// Query of `GET /wallets/{partner_id}/transactions`
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerQuery {
    pub limit: Option<usize>,
}

/// Body of `PUT /wallets/{partner_id}/charge-config`
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ChargeConfigRequest {
    /// Defaults to `disbursement`
    #[serde(default)]
    pub charge_type: Option<String>,
    #[validate(range(min = 0))]
    #[serde(default)]
    pub flat_amount: MinorUnits,
    /// Percent of the transaction amount
    #[serde(default)]
    #[schema(value_type = String, example = "1.5")]
    pub percentage: Decimal,
    #[validate(range(min = 0))]
    #[serde(default)]
    pub min_amount: MinorUnits,
    #[validate(range(min = 0))]
    pub max_amount: Option<MinorUnits>,
}
