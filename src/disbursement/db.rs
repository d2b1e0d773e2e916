//! Disbursement Database Layer
//!
//! PostgreSQL persistence for the disbursement state machine.
//! All state updates use atomic CAS (Compare-And-Swap) operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use super::error::DisbursementError;
use super::repository::{DisbursementRepository, check_transition};
use super::state::DisbursementStatus;
use super::types::{
    AttemptMatch, AttemptOutcome, DisbursementId, DisbursementRecord, InsertOutcome,
    RetryLogEntry, StatusUpdate,
};

const RECORD_COLUMNS: &str = r#"
    id, partner_id, client_request_id, amount, currency, recipient_msisdn, remarks,
    conversation_id, originator_conversation_id, transaction_receipt, status,
    result_code, result_description, retry_count, max_retries, next_retry_at,
    retry_reason, awaiting_charge, created_at, updated_at
"#;

const LOG_COLUMNS: &str = r#"
    disbursement_id, retry_attempt, reason, idempotency_key, conversation_id,
    originator_conversation_id, response_code, response_description, error_details,
    created_at
"#;

/// Disbursement database operations
pub struct PgDisbursementRepository {
    pool: PgPool,
}

impl PgDisbursementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_record(
        &self,
        filter: &str,
        value: &str,
    ) -> Result<Option<DisbursementRecord>, DisbursementError> {
        let sql = format!(
            "SELECT {} FROM disbursements WHERE {} = $1",
            RECORD_COLUMNS, filter
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    /// Retry log first, then the disbursement row itself (attempt 0)
    async fn find_attempt(
        &self,
        column: &'static str,
        value: &str,
    ) -> Result<Option<AttemptMatch>, DisbursementError> {
        let sql = format!(
            r#"
            SELECT disbursement_id, retry_attempt FROM disbursement_retry_log
            WHERE {} = $1
            ORDER BY retry_attempt DESC
            LIMIT 1
            "#,
            column
        );
        let logged = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = logged {
            let id: String = row.try_get("disbursement_id")?;
            let attempt: i32 = row.try_get("retry_attempt")?;
            let record = self.fetch_record("id", &id).await?;
            return Ok(record.map(|record| AttemptMatch {
                record,
                attempt: attempt as u32,
            }));
        }

        let record = self.fetch_record(column, value).await?;
        Ok(record.map(|record| AttemptMatch { record, attempt: 0 }))
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<DisbursementRecord, DisbursementError> {
    let id_str: String = row.try_get("id")?;
    let id: DisbursementId = id_str
        .parse()
        .map_err(|_| DisbursementError::SystemError(format!("Invalid id format: {}", id_str)))?;

    let status_id: i16 = row.try_get("status")?;
    let status = DisbursementStatus::from_id(status_id).ok_or_else(|| {
        DisbursementError::SystemError(format!("Invalid status ID: {}", status_id))
    })?;

    Ok(DisbursementRecord {
        id,
        partner_id: row.try_get("partner_id")?,
        client_request_id: row.try_get("client_request_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        recipient_msisdn: row.try_get("recipient_msisdn")?,
        remarks: row.try_get("remarks")?,
        conversation_id: row.try_get("conversation_id")?,
        originator_conversation_id: row.try_get("originator_conversation_id")?,
        transaction_receipt: row.try_get("transaction_receipt")?,
        status,
        result_code: row.try_get("result_code")?,
        result_description: row.try_get("result_description")?,
        retry_count: row.try_get::<i32, _>("retry_count")? as u32,
        max_retries: row.try_get::<i32, _>("max_retries")? as u32,
        next_retry_at: row.try_get("next_retry_at")?,
        retry_reason: row.try_get("retry_reason")?,
        awaiting_charge: row.try_get("awaiting_charge")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_log_entry(row: &sqlx::postgres::PgRow) -> Result<RetryLogEntry, DisbursementError> {
    let id_str: String = row.try_get("disbursement_id")?;
    let disbursement_id: DisbursementId = id_str
        .parse()
        .map_err(|_| DisbursementError::SystemError(format!("Invalid id format: {}", id_str)))?;

    Ok(RetryLogEntry {
        disbursement_id,
        retry_attempt: row.try_get::<i32, _>("retry_attempt")? as u32,
        reason: row.try_get("reason")?,
        idempotency_key: row.try_get("idempotency_key")?,
        conversation_id: row.try_get("conversation_id")?,
        originator_conversation_id: row.try_get("originator_conversation_id")?,
        response_code: row.try_get("response_code")?,
        response_description: row.try_get("response_description")?,
        error_details: row.try_get("error_details")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl DisbursementRepository for PgDisbursementRepository {
    async fn insert(
        &self,
        record: &DisbursementRecord,
    ) -> Result<InsertOutcome, DisbursementError> {
        let result = sqlx::query(
            r#"
            INSERT INTO disbursements
                (id, partner_id, client_request_id, amount, currency, recipient_msisdn,
                 remarks, status, retry_count, max_retries, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9, $10, $10)
            ON CONFLICT (partner_id, client_request_id) DO NOTHING
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.partner_id)
        .bind(&record.client_request_id)
        .bind(record.amount)
        .bind(&record.currency)
        .bind(&record.recipient_msisdn)
        .bind(&record.remarks)
        .bind(record.status.id())
        .bind(record.max_retries as i32)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(InsertOutcome::Created);
        }

        let existing = self
            .find_by_client_request(&record.partner_id, &record.client_request_id)
            .await?
            .ok_or_else(|| {
                DisbursementError::SystemError(format!(
                    "Insert conflict without existing row for {}",
                    record.client_request_id
                ))
            })?;
        tracing::info!(
            disbursement_id = %existing.id,
            client_request_id = %record.client_request_id,
            "Disbursement with client_request_id already exists - returning existing record"
        );
        Ok(InsertOutcome::Existing(existing))
    }

    async fn get(
        &self,
        id: DisbursementId,
    ) -> Result<Option<DisbursementRecord>, DisbursementError> {
        self.fetch_record("id", &id.to_string()).await
    }

    async fn find_by_client_request(
        &self,
        partner_id: &str,
        client_request_id: &str,
    ) -> Result<Option<DisbursementRecord>, DisbursementError> {
        let sql = format!(
            "SELECT {} FROM disbursements WHERE partner_id = $1 AND client_request_id = $2",
            RECORD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(partner_id)
            .bind(client_request_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn find_by_conversation_id(
        &self,
        conversation_id: &str,
    ) -> Result<Option<AttemptMatch>, DisbursementError> {
        self.find_attempt("conversation_id", conversation_id).await
    }

    async fn find_by_originator_conversation_id(
        &self,
        originator_conversation_id: &str,
    ) -> Result<Option<AttemptMatch>, DisbursementError> {
        self.find_attempt("originator_conversation_id", originator_conversation_id)
            .await
    }

    async fn mark_accepted(
        &self,
        id: DisbursementId,
        expected: DisbursementStatus,
        accepted: &AttemptOutcome,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<bool, DisbursementError> {
        check_transition(id, expected, DisbursementStatus::Accepted)?;
        let result = sqlx::query(
            r#"
            UPDATE disbursements
            SET status = $1,
                conversation_id = COALESCE(conversation_id, $2),
                originator_conversation_id = COALESCE(originator_conversation_id, $3),
                result_code = COALESCE($4, result_code),
                result_description = CASE WHEN $4 IS NULL THEN result_description ELSE $5 END,
                next_retry_at = $6,
                updated_at = NOW()
            WHERE id = $7 AND status = $8
            "#,
        )
        .bind(DisbursementStatus::Accepted.id())
        .bind(&accepted.conversation_id)
        .bind(&accepted.originator_conversation_id)
        .bind(&accepted.response_code)
        .bind(&accepted.response_description)
        .bind(next_retry_at)
        .bind(id.to_string())
        .bind(expected.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn transition(
        &self,
        id: DisbursementId,
        expected: DisbursementStatus,
        new: DisbursementStatus,
        update: &StatusUpdate,
    ) -> Result<bool, DisbursementError> {
        check_transition(id, expected, new)?;
        let result = sqlx::query(
            r#"
            UPDATE disbursements
            SET status = $1,
                result_code = COALESCE($2, result_code),
                result_description = CASE WHEN $2 IS NULL THEN result_description ELSE $3 END,
                transaction_receipt = COALESCE(transaction_receipt, $4),
                next_retry_at = $5,
                retry_reason = COALESCE($6, retry_reason),
                awaiting_charge = awaiting_charge OR $9,
                updated_at = NOW()
            WHERE id = $7 AND status = $8
            "#,
        )
        .bind(new.id())
        .bind(&update.result_code)
        .bind(&update.result_description)
        .bind(&update.transaction_receipt)
        .bind(update.next_retry_at)
        .bind(&update.retry_reason)
        .bind(id.to_string())
        .bind(expected.id())
        .bind(new == DisbursementStatus::Success)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn begin_retry(
        &self,
        id: DisbursementId,
        expected: DisbursementStatus,
        expected_retry_count: u32,
        entry: &RetryLogEntry,
        lease_until: Option<DateTime<Utc>>,
    ) -> Result<bool, DisbursementError> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE disbursements
            SET retry_count = retry_count + 1,
                retry_reason = $1,
                next_retry_at = $2,
                updated_at = NOW()
            WHERE id = $3 AND status = $4 AND retry_count = $5 AND retry_count < max_retries
            "#,
        )
        .bind(&entry.reason)
        .bind(lease_until)
        .bind(id.to_string())
        .bind(expected.id())
        .bind(expected_retry_count as i32)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO disbursement_retry_log
                (disbursement_id, retry_attempt, reason, idempotency_key, conversation_id,
                 originator_conversation_id, response_code, response_description,
                 error_details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(id.to_string())
        .bind(entry.retry_attempt as i32)
        .bind(&entry.reason)
        .bind(&entry.idempotency_key)
        .bind(&entry.conversation_id)
        .bind(&entry.originator_conversation_id)
        .bind(&entry.response_code)
        .bind(&entry.response_description)
        .bind(&entry.error_details)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn attach_attempt_outcome(
        &self,
        id: DisbursementId,
        attempt: u32,
        outcome: &AttemptOutcome,
    ) -> Result<bool, DisbursementError> {
        let result = sqlx::query(
            r#"
            UPDATE disbursement_retry_log
            SET conversation_id = COALESCE(conversation_id, $1),
                originator_conversation_id = COALESCE(originator_conversation_id, $2),
                response_code = COALESCE($3, response_code),
                response_description = CASE WHEN $3 IS NULL THEN response_description ELSE $4 END,
                error_details = COALESCE($5, error_details)
            WHERE disbursement_id = $6 AND retry_attempt = $7
            "#,
        )
        .bind(&outcome.conversation_id)
        .bind(&outcome.originator_conversation_id)
        .bind(&outcome.response_code)
        .bind(&outcome.response_description)
        .bind(&outcome.error_details)
        .bind(id.to_string())
        .bind(attempt as i32)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_retry_log(
        &self,
        id: DisbursementId,
    ) -> Result<Vec<RetryLogEntry>, DisbursementError> {
        let sql = format!(
            "SELECT {} FROM disbursement_retry_log WHERE disbursement_id = $1 ORDER BY retry_attempt ASC",
            LOG_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_log_entry).collect()
    }

    async fn find_due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DisbursementRecord>, DisbursementError> {
        let sql = format!(
            r#"
            SELECT {} FROM disbursements
            WHERE status IN ($1, $2)
              AND retry_count < max_retries
              AND next_retry_at <= $3
            ORDER BY next_retry_at ASC, created_at ASC
            LIMIT $4
            "#,
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(DisbursementStatus::Failed.id())
            .bind(DisbursementStatus::Pending.id())
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn find_overdue_accepted(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DisbursementRecord>, DisbursementError> {
        let sql = format!(
            r#"
            SELECT {} FROM disbursements
            WHERE status = $1 AND next_retry_at <= $2
            ORDER BY next_retry_at ASC, created_at ASC
            LIMIT $3
            "#,
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(DisbursementStatus::Accepted.id())
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn find_awaiting_charge(
        &self,
        limit: usize,
    ) -> Result<Vec<DisbursementRecord>, DisbursementError> {
        let sql = format!(
            r#"
            SELECT {} FROM disbursements
            WHERE awaiting_charge AND status = $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(DisbursementStatus::Success.id())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn clear_awaiting_charge(&self, id: DisbursementId) -> Result<bool, DisbursementError> {
        let result = sqlx::query(
            "UPDATE disbursements SET awaiting_charge = FALSE WHERE id = $1 AND awaiting_charge",
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn health_check(&self) -> Result<(), DisbursementError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
