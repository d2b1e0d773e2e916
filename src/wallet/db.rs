//! PostgreSQL wallet store
//!
//! Balance mutations lock the wallet row with `SELECT ... FOR UPDATE` and
//! write the ledger row and charge outcome in the same transaction.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::error::WalletError;
use super::repository::{ChargeSettlement, WalletRepository, apply_delta};
use super::types::{
    ChargeConfig, ChargeStatus, ChargeTransaction, ChargeType, INSUFFICIENT_BALANCE_REASON,
    WalletAccount, WalletTransaction, WalletTransactionType,
};
use crate::db::SafeRow;
use crate::disbursement::{DisbursementId, MinorUnits};

const WALLET_COLUMNS: &str =
    "id, partner_id, current_balance, currency, created_at, updated_at";

const CHARGE_COLUMNS: &str = r#"
    id, partner_id, wallet_id, charge_config_id, charge_type, related_transaction_id,
    amount, status, reason, wallet_balance_before, wallet_balance_after, created_at,
    processed_at
"#;

const CONFIG_COLUMNS: &str =
    "id, partner_id, charge_type, flat_amount, percentage, min_amount, max_amount, is_active";

const LEDGER_COLUMNS: &str = r#"
    id, wallet_id, partner_id, transaction_type, amount, balance_before, balance_after,
    reference, description, created_at
"#;

pub struct PgWalletRepository {
    pool: PgPool,
}

impl PgWalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_wallet(
        tx: &mut Transaction<'_, Postgres>,
        partner_id: &str,
    ) -> Result<WalletAccount, WalletError> {
        let sql = format!(
            "SELECT {} FROM wallets WHERE partner_id = $1 FOR UPDATE",
            WALLET_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(partner_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| WalletError::WalletNotFound(partner_id.to_string()))?;
        row_to_wallet(&row)
    }

    async fn set_balance(
        tx: &mut Transaction<'_, Postgres>,
        wallet_id: &str,
        balance: MinorUnits,
    ) -> Result<(), WalletError> {
        sqlx::query("UPDATE wallets SET current_balance = $2, updated_at = NOW() WHERE id = $1")
            .bind(wallet_id)
            .bind(balance)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn insert_ledger_row(
        tx: &mut Transaction<'_, Postgres>,
        row: &WalletTransaction,
    ) -> Result<(), WalletError> {
        sqlx::query(
            r#"
            INSERT INTO wallet_transactions
                (id, wallet_id, partner_id, transaction_type, amount, balance_before,
                 balance_after, reference, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&row.id)
        .bind(&row.wallet_id)
        .bind(&row.partner_id)
        .bind(row.transaction_type.as_str())
        .bind(row.amount)
        .bind(row.balance_before)
        .bind(row.balance_after)
        .bind(&row.reference)
        .bind(&row.description)
        .bind(row.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn fetch_charge(
        &self,
        filter: &str,
        binds: &[&str],
    ) -> Result<Option<ChargeTransaction>, WalletError> {
        let sql = format!(
            "SELECT {} FROM charge_transactions WHERE {} ORDER BY status DESC LIMIT 1",
            CHARGE_COLUMNS, filter
        );
        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(*value);
        }
        let row = query.fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_charge).transpose()
    }
}

fn row_to_wallet(row: &sqlx::postgres::PgRow) -> Result<WalletAccount, WalletError> {
    Ok(WalletAccount {
        id: row.try_get("id")?,
        partner_id: row.try_get("partner_id")?,
        current_balance: row.try_get("current_balance")?,
        currency: row.try_get("currency")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_config(row: &sqlx::postgres::PgRow) -> Result<ChargeConfig, WalletError> {
    let charge_type: String = row.try_get("charge_type")?;
    Ok(ChargeConfig {
        id: row.try_get("id")?,
        partner_id: row.try_get("partner_id")?,
        charge_type: ChargeType::parse(&charge_type),
        flat_amount: row.try_get("flat_amount")?,
        percentage: row.try_get("percentage")?,
        min_amount: row.try_get("min_amount")?,
        max_amount: row.try_get("max_amount")?,
        is_active: row.try_get("is_active")?,
    })
}

fn row_to_charge(row: &sqlx::postgres::PgRow) -> Result<ChargeTransaction, WalletError> {
    let related: String = row.try_get("related_transaction_id")?;
    let related_transaction_id: DisbursementId = related.parse().map_err(|_| {
        WalletError::DatabaseError(format!("Invalid related_transaction_id: {}", related))
    })?;
    let status_id: i16 = row.try_get("status")?;
    let status = ChargeStatus::from_id(status_id)
        .ok_or_else(|| WalletError::DatabaseError(format!("Invalid charge status: {}", status_id)))?;
    let charge_type: String = row.try_get("charge_type")?;

    Ok(ChargeTransaction {
        id: row.try_get("id")?,
        partner_id: row.try_get("partner_id")?,
        wallet_id: row.try_get("wallet_id")?,
        charge_config_id: row.try_get("charge_config_id")?,
        charge_type: ChargeType::parse(&charge_type),
        related_transaction_id,
        amount: row.try_get("amount")?,
        status,
        reason: row.try_get("reason")?,
        wallet_balance_before: row.try_get("wallet_balance_before")?,
        wallet_balance_after: row.try_get("wallet_balance_after")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

fn row_to_ledger(row: &sqlx::postgres::PgRow) -> Result<WalletTransaction, WalletError> {
    let kind: String = row.try_get("transaction_type")?;
    let transaction_type = WalletTransactionType::from_str_opt(&kind)
        .ok_or_else(|| WalletError::DatabaseError(format!("Invalid transaction_type: {}", kind)))?;
    Ok(WalletTransaction {
        id: row.try_get("id")?,
        wallet_id: row.try_get("wallet_id")?,
        partner_id: row.try_get("partner_id")?,
        transaction_type,
        amount: row.try_get("amount")?,
        balance_before: row.try_get("balance_before")?,
        balance_after: row.try_get("balance_after")?,
        reference: row.try_get("reference")?,
        description: row.try_get_log("description").unwrap_or_default(),
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl WalletRepository for PgWalletRepository {
    async fn get_wallet(&self, partner_id: &str) -> Result<Option<WalletAccount>, WalletError> {
        let sql = format!("SELECT {} FROM wallets WHERE partner_id = $1", WALLET_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(partner_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_wallet).transpose()
    }

    async fn create_wallet(&self, wallet: &WalletAccount) -> Result<WalletAccount, WalletError> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, partner_id, current_balance, currency, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (partner_id) DO NOTHING
            "#,
        )
        .bind(&wallet.id)
        .bind(&wallet.partner_id)
        .bind(wallet.current_balance)
        .bind(&wallet.currency)
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .execute(&self.pool)
        .await?;

        self.get_wallet(&wallet.partner_id)
            .await?
            .ok_or_else(|| WalletError::WalletNotFound(wallet.partner_id.clone()))
    }

    async fn save_charge_config(&self, config: &ChargeConfig) -> Result<(), WalletError> {
        sqlx::query(
            r#"
            INSERT INTO charge_configs
                (id, partner_id, charge_type, flat_amount, percentage, min_amount, max_amount, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                charge_type = EXCLUDED.charge_type,
                flat_amount = EXCLUDED.flat_amount,
                percentage = EXCLUDED.percentage,
                min_amount = EXCLUDED.min_amount,
                max_amount = EXCLUDED.max_amount,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(&config.id)
        .bind(&config.partner_id)
        .bind(config.charge_type.as_str())
        .bind(config.flat_amount)
        .bind(config.percentage)
        .bind(config.min_amount)
        .bind(config.max_amount)
        .bind(config.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_charge_config(&self, id: &str) -> Result<Option<ChargeConfig>, WalletError> {
        let sql = format!("SELECT {} FROM charge_configs WHERE id = $1", CONFIG_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_config).transpose()
    }

    async fn active_charge_config(
        &self,
        partner_id: &str,
        charge_type: &ChargeType,
    ) -> Result<Option<ChargeConfig>, WalletError> {
        let sql = format!(
            r#"
            SELECT {} FROM charge_configs
            WHERE partner_id = $1 AND charge_type = $2 AND is_active
            ORDER BY id ASC
            LIMIT 1
            "#,
            CONFIG_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(partner_id)
            .bind(charge_type.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_config).transpose()
    }

    async fn find_open_charge(
        &self,
        partner_id: &str,
        disbursement_id: DisbursementId,
        charge_type: &ChargeType,
    ) -> Result<Option<ChargeTransaction>, WalletError> {
        let id = disbursement_id.to_string();
        // status DESC puts completed (1) ahead of pending (0)
        self.fetch_charge(
            "partner_id = $1 AND related_transaction_id = $2 AND charge_type = $3 AND status IN (0, 1)",
            &[partner_id, id.as_str(), charge_type.as_str()],
        )
        .await
    }

    async fn insert_pending_charge(
        &self,
        charge: &ChargeTransaction,
    ) -> Result<ChargeTransaction, WalletError> {
        let result = sqlx::query(
            r#"
            INSERT INTO charge_transactions
                (id, partner_id, wallet_id, charge_config_id, charge_type, related_transaction_id,
                 amount, status, reason, created_at)
            SELECT $1, $2, $3, $4, $5, $6, $7, 0, $8, $9
            WHERE NOT EXISTS (
                SELECT 1 FROM charge_transactions
                WHERE partner_id = $2 AND related_transaction_id = $6 AND charge_type = $5
                  AND status IN (0, 1)
            )
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&charge.id)
        .bind(&charge.partner_id)
        .bind(&charge.wallet_id)
        .bind(&charge.charge_config_id)
        .bind(charge.charge_type.as_str())
        .bind(charge.related_transaction_id.to_string())
        .bind(charge.amount)
        .bind(&charge.reason)
        .bind(charge.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(
                disbursement_id = %charge.related_transaction_id,
                "Open charge already exists, reusing it"
            );
        }

        self.find_open_charge(
            &charge.partner_id,
            charge.related_transaction_id,
            &charge.charge_type,
        )
        .await?
        .ok_or_else(|| WalletError::ChargeNotFound(charge.id.clone()))
    }

    async fn get_charge(&self, id: &str) -> Result<Option<ChargeTransaction>, WalletError> {
        self.fetch_charge("id = $1", &[id]).await
    }

    async fn list_charges(
        &self,
        partner_id: &str,
        disbursement_id: DisbursementId,
    ) -> Result<Vec<ChargeTransaction>, WalletError> {
        let sql = format!(
            r#"
            SELECT {} FROM charge_transactions
            WHERE partner_id = $1 AND related_transaction_id = $2
            ORDER BY created_at ASC
            "#,
            CHARGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(partner_id)
            .bind(disbursement_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_charge).collect()
    }

    async fn list_pending_charges(
        &self,
        limit: usize,
    ) -> Result<Vec<ChargeTransaction>, WalletError> {
        let sql = format!(
            r#"
            SELECT {} FROM charge_transactions
            WHERE status = 0
            ORDER BY created_at ASC
            LIMIT $1
            "#,
            CHARGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_charge).collect()
    }

    async fn defer_charge(&self, id: &str, reason: &str) -> Result<bool, WalletError> {
        let result = sqlx::query(
            "UPDATE charge_transactions SET reason = $2 WHERE id = $1 AND status = 0",
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fail_charge(&self, id: &str, reason: &str) -> Result<bool, WalletError> {
        let result = sqlx::query(
            r#"
            UPDATE charge_transactions
            SET status = -1, reason = $2, processed_at = NOW()
            WHERE id = $1 AND status = 0
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn settle_charge(&self, id: &str) -> Result<ChargeSettlement, WalletError> {
        let charge = self
            .get_charge(id)
            .await?
            .ok_or_else(|| WalletError::ChargeNotFound(id.to_string()))?;

        let mut tx = self.pool.begin().await?;
        let wallet = Self::lock_wallet(&mut tx, &charge.partner_id).await?;

        // Re-read under the wallet lock
        let sql = format!(
            "SELECT {} FROM charge_transactions WHERE id = $1 FOR UPDATE",
            CHARGE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let mut charge = row_to_charge(&row)?;
        if charge.status != ChargeStatus::Pending {
            tx.rollback().await?;
            return Ok(ChargeSettlement::NotPending(charge));
        }

        let before = wallet.current_balance;
        if before < charge.amount {
            sqlx::query(
                r#"
                UPDATE charge_transactions
                SET status = -1, reason = $2, wallet_balance_before = $3,
                    wallet_balance_after = $3, processed_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(INSUFFICIENT_BALANCE_REASON)
            .bind(before)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            charge.status = ChargeStatus::Failed;
            charge.reason = Some(INSUFFICIENT_BALANCE_REASON.to_string());
            charge.wallet_balance_before = Some(before);
            charge.wallet_balance_after = Some(before);
            charge.processed_at = Some(chrono::Utc::now());
            return Ok(ChargeSettlement::Insufficient(charge));
        }

        let after = before - charge.amount;
        let ledger = WalletTransaction::new(
            &wallet,
            WalletTransactionType::Charge,
            charge.amount,
            after,
            charge.related_transaction_id.to_string(),
            format!("{} charge", charge.charge_type),
        );
        Self::set_balance(&mut tx, &wallet.id, after).await?;
        Self::insert_ledger_row(&mut tx, &ledger).await?;
        sqlx::query(
            r#"
            UPDATE charge_transactions
            SET status = 1, reason = NULL, wallet_balance_before = $2,
                wallet_balance_after = $3, processed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(before)
        .bind(after)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        charge.status = ChargeStatus::Completed;
        charge.reason = None;
        charge.wallet_balance_before = Some(before);
        charge.wallet_balance_after = Some(after);
        charge.processed_at = Some(ledger.created_at);
        Ok(ChargeSettlement::Completed(charge))
    }

    async fn adjust_balance(
        &self,
        partner_id: &str,
        transaction_type: WalletTransactionType,
        amount: MinorUnits,
        reference: &str,
        description: &str,
    ) -> Result<WalletTransaction, WalletError> {
        let mut tx = self.pool.begin().await?;
        let wallet = Self::lock_wallet(&mut tx, partner_id).await?;
        let after = apply_delta(wallet.current_balance, transaction_type, amount)?;
        let row = WalletTransaction::new(
            &wallet,
            transaction_type,
            amount,
            after,
            reference,
            description,
        );
        Self::set_balance(&mut tx, &wallet.id, after).await?;
        Self::insert_ledger_row(&mut tx, &row).await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn list_transactions(
        &self,
        partner_id: &str,
        limit: usize,
    ) -> Result<Vec<WalletTransaction>, WalletError> {
        let sql = format!(
            r#"
            SELECT {} FROM wallet_transactions
            WHERE partner_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
            LEDGER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(partner_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_ledger).collect()
    }

    async fn health_check(&self) -> Result<(), WalletError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
