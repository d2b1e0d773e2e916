//! PostgreSQL callback store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use super::payload::{CallbackRecord, CallbackType};
use super::repository::{CallbackError, CallbackRepository, StoreOutcome};

const CALLBACK_COLUMNS: &str = r#"
    dedup_key, callback_type, conversation_id, originator_conversation_id,
    transaction_id, receipt_number, amount, result_code, result_description,
    occasion, raw_payload, received_at
"#;

pub struct PgCallbackRepository {
    pool: PgPool,
}

impl PgCallbackRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<CallbackRecord, CallbackError> {
    let callback_type: String = row.try_get("callback_type")?;
    Ok(CallbackRecord {
        dedup_key: row.try_get("dedup_key")?,
        callback_type: CallbackType::from_str_opt(&callback_type).ok_or_else(|| {
            CallbackError::DatabaseError(format!("Invalid callback_type: {}", callback_type))
        })?,
        conversation_id: row.try_get("conversation_id")?,
        originator_conversation_id: row.try_get("originator_conversation_id")?,
        transaction_id: row.try_get("transaction_id")?,
        receipt_number: row.try_get("receipt_number")?,
        amount: row.try_get("amount")?,
        result_code: row.try_get("result_code")?,
        result_description: row.try_get("result_description")?,
        occasion: row.try_get("occasion")?,
        raw_payload: row.try_get("raw_payload")?,
        received_at: row.try_get("received_at")?,
    })
}

#[async_trait]
impl CallbackRepository for PgCallbackRepository {
    async fn store(&self, record: &CallbackRecord) -> Result<StoreOutcome, CallbackError> {
        let result = sqlx::query(
            r#"
            INSERT INTO payout_callbacks
                (dedup_key, callback_type, conversation_id, originator_conversation_id,
                 transaction_id, receipt_number, amount, result_code, result_description,
                 occasion, raw_payload, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (dedup_key) DO NOTHING
            "#,
        )
        .bind(&record.dedup_key)
        .bind(record.callback_type.as_str())
        .bind(&record.conversation_id)
        .bind(&record.originator_conversation_id)
        .bind(&record.transaction_id)
        .bind(&record.receipt_number)
        .bind(record.amount)
        .bind(&record.result_code)
        .bind(&record.result_description)
        .bind(&record.occasion)
        .bind(&record.raw_payload)
        .bind(record.received_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(StoreOutcome::Inserted)
        } else {
            Ok(StoreOutcome::Duplicate)
        }
    }

    async fn list_by_conversation_id(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<CallbackRecord>, CallbackError> {
        let sql = format!(
            "SELECT {} FROM payout_callbacks WHERE conversation_id = $1 ORDER BY received_at ASC",
            CALLBACK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(conversation_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn mark_processed(&self, dedup_key: &str) -> Result<bool, CallbackError> {
        let result = sqlx::query(
            r#"
            UPDATE payout_callbacks SET processed_at = NOW()
            WHERE dedup_key = $1 AND processed_at IS NULL
            "#,
        )
        .bind(dedup_key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_unprocessed(
        &self,
        received_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CallbackRecord>, CallbackError> {
        let sql = format!(
            r#"
            SELECT {} FROM payout_callbacks
            WHERE processed_at IS NULL AND received_at <= $1
            ORDER BY received_at ASC, id ASC
            LIMIT $2
            "#,
            CALLBACK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(received_before)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_record).collect()
    }
}
