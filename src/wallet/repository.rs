//! Wallet store interface and in-memory implementation
//!
//! Balance mutations are serialised per wallet. Each mutation writes its
//! ledger row and, for charges, the charge outcome in the same critical
//! section as the balance change.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::error::WalletError;
use super::types::{
    ChargeConfig, ChargeStatus, ChargeTransaction, ChargeType, INSUFFICIENT_BALANCE_REASON,
    WalletAccount, WalletTransaction, WalletTransactionType,
};
use crate::disbursement::{DisbursementId, MinorUnits};

/// What happened when a pending charge was settled against the wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeSettlement {
    Completed(ChargeTransaction),
    /// Balance too low; the charge is now `failed`
    Insufficient(ChargeTransaction),
    /// Charge was no longer pending (another writer settled it)
    NotPending(ChargeTransaction),
}

#[async_trait]
pub trait WalletRepository: Send + Sync {
    async fn get_wallet(&self, partner_id: &str) -> Result<Option<WalletAccount>, WalletError>;

    /// Create the wallet, or return the existing one for the partner
    async fn create_wallet(&self, wallet: &WalletAccount) -> Result<WalletAccount, WalletError>;

    async fn save_charge_config(&self, config: &ChargeConfig) -> Result<(), WalletError>;

    async fn get_charge_config(&self, id: &str) -> Result<Option<ChargeConfig>, WalletError>;

    async fn active_charge_config(
        &self,
        partner_id: &str,
        charge_type: &ChargeType,
    ) -> Result<Option<ChargeConfig>, WalletError>;

    /// Completed charge for the triple if any, else the pending one
    async fn find_open_charge(
        &self,
        partner_id: &str,
        disbursement_id: DisbursementId,
        charge_type: &ChargeType,
    ) -> Result<Option<ChargeTransaction>, WalletError>;

    /// Insert a pending charge. If a pending or completed charge for the same
    /// triple exists, that row is returned instead.
    async fn insert_pending_charge(
        &self,
        charge: &ChargeTransaction,
    ) -> Result<ChargeTransaction, WalletError>;

    async fn get_charge(&self, id: &str) -> Result<Option<ChargeTransaction>, WalletError>;

    async fn list_charges(
        &self,
        partner_id: &str,
        disbursement_id: DisbursementId,
    ) -> Result<Vec<ChargeTransaction>, WalletError>;

    async fn list_pending_charges(
        &self,
        limit: usize,
    ) -> Result<Vec<ChargeTransaction>, WalletError>;

    /// Update the reason on a still-pending charge
    async fn defer_charge(&self, id: &str, reason: &str) -> Result<bool, WalletError>;

    /// CAS `pending -> failed`
    async fn fail_charge(&self, id: &str, reason: &str) -> Result<bool, WalletError>;

    /// Settle a pending charge under the wallet lock: debit and complete it,
    /// or mark it failed when the balance does not cover it.
    async fn settle_charge(&self, id: &str) -> Result<ChargeSettlement, WalletError>;

    /// Manual balance adjustment. Debits never take the balance below zero.
    async fn adjust_balance(
        &self,
        partner_id: &str,
        transaction_type: WalletTransactionType,
        amount: MinorUnits,
        reference: &str,
        description: &str,
    ) -> Result<WalletTransaction, WalletError>;

    /// Newest first
    async fn list_transactions(
        &self,
        partner_id: &str,
        limit: usize,
    ) -> Result<Vec<WalletTransaction>, WalletError>;

    async fn health_check(&self) -> Result<(), WalletError>;
}

/// Balance after applying `amount` in the direction of `transaction_type`
pub(crate) fn apply_delta(
    balance: MinorUnits,
    transaction_type: WalletTransactionType,
    amount: MinorUnits,
) -> Result<MinorUnits, WalletError> {
    if amount <= 0 {
        return Err(WalletError::InvalidAmount);
    }
    if transaction_type.is_credit() {
        return balance
            .checked_add(amount)
            .ok_or(WalletError::InvalidAmount);
    }
    if balance < amount {
        return Err(WalletError::InsufficientBalance {
            required: amount,
            available: balance,
        });
    }
    Ok(balance - amount)
}

#[derive(Default)]
struct Book {
    charges: Vec<ChargeTransaction>,
    ledger: Vec<WalletTransaction>,
}

/// In-memory store for tests and database-less runs
#[derive(Default)]
pub struct InMemoryWalletRepository {
    /// One async mutex per wallet, keyed by partner
    wallets: DashMap<String, Arc<Mutex<WalletAccount>>>,
    configs: DashMap<String, ChargeConfig>,
    book: Mutex<Book>,
}

impl InMemoryWalletRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn wallet_lock(&self, partner_id: &str) -> Result<Arc<Mutex<WalletAccount>>, WalletError> {
        self.wallets
            .get(partner_id)
            .map(|w| w.value().clone())
            .ok_or_else(|| WalletError::WalletNotFound(partner_id.to_string()))
    }
}

#[async_trait]
impl WalletRepository for InMemoryWalletRepository {
    async fn get_wallet(&self, partner_id: &str) -> Result<Option<WalletAccount>, WalletError> {
        let Some(lock) = self.wallets.get(partner_id).map(|w| w.value().clone()) else {
            return Ok(None);
        };
        let wallet = lock.lock().await;
        Ok(Some(wallet.clone()))
    }

    async fn create_wallet(&self, wallet: &WalletAccount) -> Result<WalletAccount, WalletError> {
        let lock = self
            .wallets
            .entry(wallet.partner_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(wallet.clone())))
            .value()
            .clone();
        let stored = lock.lock().await;
        Ok(stored.clone())
    }

    async fn save_charge_config(&self, config: &ChargeConfig) -> Result<(), WalletError> {
        self.configs.insert(config.id.clone(), config.clone());
        Ok(())
    }

    async fn get_charge_config(&self, id: &str) -> Result<Option<ChargeConfig>, WalletError> {
        Ok(self.configs.get(id).map(|c| c.value().clone()))
    }

    async fn active_charge_config(
        &self,
        partner_id: &str,
        charge_type: &ChargeType,
    ) -> Result<Option<ChargeConfig>, WalletError> {
        let mut found: Vec<ChargeConfig> = self
            .configs
            .iter()
            .filter(|c| c.is_active && c.partner_id == partner_id && &c.charge_type == charge_type)
            .map(|c| c.value().clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found.into_iter().next())
    }

    async fn find_open_charge(
        &self,
        partner_id: &str,
        disbursement_id: DisbursementId,
        charge_type: &ChargeType,
    ) -> Result<Option<ChargeTransaction>, WalletError> {
        let book = self.book.lock().await;
        let matching = |status: ChargeStatus| {
            book.charges.iter().find(|c| {
                c.status == status
                    && c.partner_id == partner_id
                    && c.related_transaction_id == disbursement_id
                    && &c.charge_type == charge_type
            })
        };
        Ok(matching(ChargeStatus::Completed)
            .or_else(|| matching(ChargeStatus::Pending))
            .cloned())
    }

    async fn insert_pending_charge(
        &self,
        charge: &ChargeTransaction,
    ) -> Result<ChargeTransaction, WalletError> {
        let mut book = self.book.lock().await;
        let existing = book.charges.iter().find(|c| {
            c.status != ChargeStatus::Failed
                && c.partner_id == charge.partner_id
                && c.related_transaction_id == charge.related_transaction_id
                && c.charge_type == charge.charge_type
        });
        if let Some(existing) = existing {
            return Ok(existing.clone());
        }
        let mut inserted = charge.clone();
        inserted.status = ChargeStatus::Pending;
        book.charges.push(inserted.clone());
        Ok(inserted)
    }

    async fn get_charge(&self, id: &str) -> Result<Option<ChargeTransaction>, WalletError> {
        let book = self.book.lock().await;
        Ok(book.charges.iter().find(|c| c.id == id).cloned())
    }

    async fn list_charges(
        &self,
        partner_id: &str,
        disbursement_id: DisbursementId,
    ) -> Result<Vec<ChargeTransaction>, WalletError> {
        let book = self.book.lock().await;
        Ok(book
            .charges
            .iter()
            .filter(|c| c.partner_id == partner_id && c.related_transaction_id == disbursement_id)
            .cloned()
            .collect())
    }

    async fn list_pending_charges(
        &self,
        limit: usize,
    ) -> Result<Vec<ChargeTransaction>, WalletError> {
        let book = self.book.lock().await;
        Ok(book
            .charges
            .iter()
            .filter(|c| c.status == ChargeStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn defer_charge(&self, id: &str, reason: &str) -> Result<bool, WalletError> {
        let mut book = self.book.lock().await;
        match book
            .charges
            .iter_mut()
            .find(|c| c.id == id && c.status == ChargeStatus::Pending)
        {
            Some(charge) => {
                charge.reason = Some(reason.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn fail_charge(&self, id: &str, reason: &str) -> Result<bool, WalletError> {
        let mut book = self.book.lock().await;
        match book
            .charges
            .iter_mut()
            .find(|c| c.id == id && c.status == ChargeStatus::Pending)
        {
            Some(charge) => {
                charge.status = ChargeStatus::Failed;
                charge.reason = Some(reason.to_string());
                charge.processed_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn settle_charge(&self, id: &str) -> Result<ChargeSettlement, WalletError> {
        let partner_id = self
            .get_charge(id)
            .await?
            .map(|c| c.partner_id)
            .ok_or_else(|| WalletError::ChargeNotFound(id.to_string()))?;
        let lock = self.wallet_lock(&partner_id)?;
        let mut wallet = lock.lock().await;
        let mut book = self.book.lock().await;

        let index = book
            .charges
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| WalletError::ChargeNotFound(id.to_string()))?;
        if book.charges[index].status != ChargeStatus::Pending {
            return Ok(ChargeSettlement::NotPending(book.charges[index].clone()));
        }

        let amount = book.charges[index].amount;
        let now = Utc::now();
        let before = wallet.current_balance;

        if before < amount {
            let charge = &mut book.charges[index];
            charge.status = ChargeStatus::Failed;
            charge.reason = Some(INSUFFICIENT_BALANCE_REASON.to_string());
            charge.wallet_balance_before = Some(before);
            charge.wallet_balance_after = Some(before);
            charge.processed_at = Some(now);
            return Ok(ChargeSettlement::Insufficient(charge.clone()));
        }

        let after = before - amount;
        let reference = book.charges[index].related_transaction_id.to_string();
        let row = WalletTransaction::new(
            &wallet,
            WalletTransactionType::Charge,
            amount,
            after,
            reference,
            format!("{} charge", book.charges[index].charge_type),
        );
        wallet.current_balance = after;
        wallet.updated_at = now;
        book.ledger.push(row);

        let charge = &mut book.charges[index];
        charge.status = ChargeStatus::Completed;
        charge.reason = None;
        charge.wallet_balance_before = Some(before);
        charge.wallet_balance_after = Some(after);
        charge.processed_at = Some(now);
        Ok(ChargeSettlement::Completed(charge.clone()))
    }

    async fn adjust_balance(
        &self,
        partner_id: &str,
        transaction_type: WalletTransactionType,
        amount: MinorUnits,
        reference: &str,
        description: &str,
    ) -> Result<WalletTransaction, WalletError> {
        let lock = self.wallet_lock(partner_id)?;
        let mut wallet = lock.lock().await;
        let after = apply_delta(wallet.current_balance, transaction_type, amount)?;
        let row = WalletTransaction::new(
            &wallet,
            transaction_type,
            amount,
            after,
            reference,
            description,
        );
        wallet.current_balance = after;
        wallet.updated_at = Utc::now();
        self.book.lock().await.ledger.push(row.clone());
        Ok(row)
    }

    async fn list_transactions(
        &self,
        partner_id: &str,
        limit: usize,
    ) -> Result<Vec<WalletTransaction>, WalletError> {
        let book = self.book.lock().await;
        Ok(book
            .ledger
            .iter()
            .rev()
            .filter(|t| t.partner_id == partner_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<(), WalletError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn config() -> ChargeConfig {
        ChargeConfig {
            id: "cfg-1".to_string(),
            partner_id: "acme".to_string(),
            charge_type: ChargeType::Disbursement,
            flat_amount: 30,
            percentage: Decimal::ZERO,
            min_amount: 0,
            max_amount: None,
            is_active: true,
        }
    }

    async fn funded(repo: &InMemoryWalletRepository, balance: MinorUnits) -> WalletAccount {
        let wallet = repo
            .create_wallet(&WalletAccount::new("acme", "KES"))
            .await
            .unwrap();
        if balance > 0 {
            repo.adjust_balance(
                "acme",
                WalletTransactionType::TopUp,
                balance,
                "TOPUP-1",
                "initial float",
            )
            .await
            .unwrap();
        }
        wallet
    }

    #[test]
    fn test_apply_delta() {
        assert_eq!(
            apply_delta(10, WalletTransactionType::ManualCredit, 5),
            Ok(15)
        );
        assert_eq!(apply_delta(10, WalletTransactionType::ManualDebit, 10), Ok(0));
        assert_eq!(
            apply_delta(10, WalletTransactionType::ManualDebit, 11),
            Err(WalletError::InsufficientBalance {
                required: 11,
                available: 10
            })
        );
        assert_eq!(
            apply_delta(10, WalletTransactionType::TopUp, 0),
            Err(WalletError::InvalidAmount)
        );
    }

    #[tokio::test]
    async fn test_create_wallet_is_idempotent() {
        let repo = InMemoryWalletRepository::new();
        let first = repo
            .create_wallet(&WalletAccount::new("acme", "KES"))
            .await
            .unwrap();
        let second = repo
            .create_wallet(&WalletAccount::new("acme", "KES"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_pending_charge_is_reused() {
        let repo = InMemoryWalletRepository::new();
        let wallet = funded(&repo, 0).await;
        let id = DisbursementId::new();

        let first = repo
            .insert_pending_charge(&ChargeTransaction::pending(&wallet, &config(), id, 30, None))
            .await
            .unwrap();
        let second = repo
            .insert_pending_charge(&ChargeTransaction::pending(&wallet, &config(), id, 30, None))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(repo.list_charges("acme", id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_settle_charge_debits_once() {
        let repo = InMemoryWalletRepository::new();
        let wallet = funded(&repo, 100).await;
        let id = DisbursementId::new();
        let charge = repo
            .insert_pending_charge(&ChargeTransaction::pending(&wallet, &config(), id, 30, None))
            .await
            .unwrap();

        match repo.settle_charge(&charge.id).await.unwrap() {
            ChargeSettlement::Completed(c) => {
                assert_eq!(c.wallet_balance_before, Some(100));
                assert_eq!(c.wallet_balance_after, Some(70));
            }
            other => panic!("expected completed, got {:?}", other),
        }
        assert!(matches!(
            repo.settle_charge(&charge.id).await.unwrap(),
            ChargeSettlement::NotPending(_)
        ));
        assert_eq!(
            repo.get_wallet("acme").await.unwrap().unwrap().current_balance,
            70
        );

        let ledger = repo.list_transactions("acme", 10).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[0].transaction_type, WalletTransactionType::Charge);
        assert_eq!(ledger[0].reference, id.to_string());
    }

    #[tokio::test]
    async fn test_settle_charge_insufficient_balance() {
        let repo = InMemoryWalletRepository::new();
        let wallet = funded(&repo, 10).await;
        let charge = repo
            .insert_pending_charge(&ChargeTransaction::pending(
                &wallet,
                &config(),
                DisbursementId::new(),
                30,
                None,
            ))
            .await
            .unwrap();

        match repo.settle_charge(&charge.id).await.unwrap() {
            ChargeSettlement::Insufficient(c) => {
                assert_eq!(c.status, ChargeStatus::Failed);
                assert_eq!(c.reason.as_deref(), Some(INSUFFICIENT_BALANCE_REASON));
            }
            other => panic!("expected insufficient, got {:?}", other),
        }
        assert_eq!(
            repo.get_wallet("acme").await.unwrap().unwrap().current_balance,
            10
        );
    }

    #[tokio::test]
    async fn test_debit_never_goes_negative() {
        let repo = InMemoryWalletRepository::new();
        funded(&repo, 50).await;
        let err = repo
            .adjust_balance("acme", WalletTransactionType::ManualDebit, 51, "ADJ-1", "")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
        assert!(
            repo.adjust_balance("ghost", WalletTransactionType::TopUp, 1, "X", "")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_active_config_lookup() {
        let repo = InMemoryWalletRepository::new();
        repo.save_charge_config(&config()).await.unwrap();
        let mut inactive = config();
        inactive.id = "cfg-0".to_string();
        inactive.is_active = false;
        repo.save_charge_config(&inactive).await.unwrap();

        let found = repo
            .active_charge_config("acme", &ChargeType::Disbursement)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "cfg-1");
        assert!(
            repo.active_charge_config("acme", &ChargeType::Sms)
                .await
                .unwrap()
                .is_none()
        );
    }
}
