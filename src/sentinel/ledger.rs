//! Deposit Ledger
//!
//! Persisted deposit records keyed by transaction hash. Every write is a
//! single-key atomic operation; terminal records (CREDITED, FAILED) are
//! never modified by these writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use num_bigint::BigUint;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::error::StoreError;
use super::types::{DepositRecord, DepositStatus, UserId};

#[async_trait]
pub trait DepositLedger: Send + Sync {
    /// Insert a first sighting. Returns `false` if the hash is already known.
    async fn insert_new(&self, record: &DepositRecord) -> Result<bool, StoreError>;

    async fn get(&self, tx_hash: &str) -> Result<Option<DepositRecord>, StoreError>;

    /// Record confirmation progress on an open deposit.
    ///
    /// Confirmations only grow, and status never moves backwards among the
    /// open states. Returns `false` if the record is terminal or missing.
    async fn record_progress(
        &self,
        tx_hash: &str,
        confirmations: u64,
        status: DepositStatus,
    ) -> Result<bool, StoreError>;

    /// Open -> CREDITED. Returns `false` if the record is terminal or missing.
    async fn mark_credited(
        &self,
        tx_hash: &str,
        confirmations: u64,
        settled_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Open -> FAILED. Returns `false` if the record is terminal or missing.
    async fn mark_failed(&self, tx_hash: &str, settled_at: DateTime<Utc>)
    -> Result<bool, StoreError>;

    /// All non-terminal records, oldest inclusion height first
    async fn find_open(&self) -> Result<Vec<DepositRecord>, StoreError>;

    /// A user's deposits, newest first
    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<DepositRecord>, StoreError>;
}

/// Ordering of the open states; status writes never decrease it
fn open_rank(status: DepositStatus) -> u8 {
    match status {
        DepositStatus::Pending => 0,
        DepositStatus::Confirming => 1,
        DepositStatus::Confirmed => 2,
        DepositStatus::Credited | DepositStatus::Failed => 3,
    }
}

// ============================================================================
// In-memory ledger
// ============================================================================

/// DashMap-backed ledger. Each operation holds only its key's shard lock.
#[derive(Default)]
pub struct MemoryDepositLedger {
    records: DashMap<String, DepositRecord>,
}

impl MemoryDepositLedger {
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
impl DepositLedger for MemoryDepositLedger {
    async fn insert_new(&self, record: &DepositRecord) -> Result<bool, StoreError> {
        match self.records.entry(record.tx_hash.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, tx_hash: &str) -> Result<Option<DepositRecord>, StoreError> {
        Ok(self.records.get(tx_hash).map(|r| r.clone()))
    }

    async fn record_progress(
        &self,
        tx_hash: &str,
        confirmations: u64,
        status: DepositStatus,
    ) -> Result<bool, StoreError> {
        let Some(mut record) = self.records.get_mut(tx_hash) else {
            return Ok(false);
        };
        if record.status.is_terminal() || status.is_terminal() {
            return Ok(false);
        }

        record.confirmations = record.confirmations.max(confirmations);
        if open_rank(status) > open_rank(record.status) {
            record.status = status;
        }
        Ok(true)
    }

    async fn mark_credited(
        &self,
        tx_hash: &str,
        confirmations: u64,
        settled_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(mut record) = self.records.get_mut(tx_hash) else {
            return Ok(false);
        };
        if record.status.is_terminal() {
            return Ok(false);
        }

        record.confirmations = record.confirmations.max(confirmations);
        record.status = DepositStatus::Credited;
        record.settled_at = Some(settled_at);
        Ok(true)
    }

    async fn mark_failed(
        &self,
        tx_hash: &str,
        settled_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(mut record) = self.records.get_mut(tx_hash) else {
            return Ok(false);
        };
        if record.status.is_terminal() {
            return Ok(false);
        }

        record.status = DepositStatus::Failed;
        record.settled_at = Some(settled_at);
        Ok(true)
    }

    async fn find_open(&self) -> Result<Vec<DepositRecord>, StoreError> {
        let mut open: Vec<DepositRecord> = self
            .records
            .iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.clone())
            .collect();
        open.sort_by(|a, b| {
            a.block_height
                .cmp(&b.block_height)
                .then_with(|| a.tx_hash.cmp(&b.tx_hash))
        });
        Ok(open)
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<DepositRecord>, StoreError> {
        let mut records: Vec<DepositRecord> = self
            .records
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

// ============================================================================
// PostgreSQL ledger
// ============================================================================

const SELECT_COLUMNS: &str = r#"tx_hash, to_address, user_id, amount::TEXT AS amount, token_address,
       chain_id, block_height, confirmations, status, created_at, settled_at"#;

pub struct PgDepositLedger {
    pool: PgPool,
}

impl PgDepositLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &PgRow) -> Result<DepositRecord, StoreError> {
    let tx_hash: String = row.try_get("tx_hash")?;

    let amount_text: String = row.try_get("amount")?;
    let amount = amount_text
        .parse::<BigUint>()
        .map_err(|e| StoreError::Corrupt(format!("{}: amount {}: {}", tx_hash, amount_text, e)))?;

    let status_text: String = row.try_get("status")?;
    let status = status_text
        .parse::<DepositStatus>()
        .map_err(|e| StoreError::Corrupt(format!("{}: {}", tx_hash, e)))?;

    let block_height: i64 = row.try_get("block_height")?;
    let confirmations: i64 = row.try_get("confirmations")?;

    Ok(DepositRecord {
        to_address: row.try_get("to_address")?,
        user_id: row.try_get("user_id")?,
        amount,
        token_address: row.try_get("token_address")?,
        chain_id: row.try_get("chain_id")?,
        block_height: block_height as u64,
        confirmations: confirmations.max(0) as u64,
        status,
        created_at: row.try_get("created_at")?,
        settled_at: row.try_get("settled_at")?,
        tx_hash,
    })
}

#[async_trait]
impl DepositLedger for PgDepositLedger {
    async fn insert_new(&self, record: &DepositRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO deposit_records
               (tx_hash, to_address, user_id, amount, token_address, chain_id,
                block_height, confirmations, status, created_at)
               VALUES ($1, $2, $3, $4::NUMERIC, $5, $6, $7, $8, $9, $10)
               ON CONFLICT (tx_hash) DO NOTHING"#,
        )
        .bind(&record.tx_hash)
        .bind(&record.to_address)
        .bind(record.user_id)
        .bind(record.amount.to_string())
        .bind(&record.token_address)
        .bind(&record.chain_id)
        .bind(record.block_height as i64)
        .bind(record.confirmations as i64)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, tx_hash: &str) -> Result<Option<DepositRecord>, StoreError> {
        let sql = format!("SELECT {} FROM deposit_records WHERE tx_hash = $1", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(tx_hash)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn record_progress(
        &self,
        tx_hash: &str,
        confirmations: u64,
        status: DepositStatus,
    ) -> Result<bool, StoreError> {
        if status.is_terminal() {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"UPDATE deposit_records
               SET confirmations = GREATEST(confirmations, $2),
                   status = CASE
                       WHEN status = 'CONFIRMED' THEN status
                       WHEN status = 'CONFIRMING' AND $3 = 'PENDING' THEN status
                       ELSE $3
                   END
               WHERE tx_hash = $1
                 AND status IN ('PENDING', 'CONFIRMING', 'CONFIRMED')"#,
        )
        .bind(tx_hash)
        .bind(confirmations as i64)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_credited(
        &self,
        tx_hash: &str,
        confirmations: u64,
        settled_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"UPDATE deposit_records
               SET status = 'CREDITED',
                   confirmations = GREATEST(confirmations, $2),
                   settled_at = $3
               WHERE tx_hash = $1
                 AND status IN ('PENDING', 'CONFIRMING', 'CONFIRMED')"#,
        )
        .bind(tx_hash)
        .bind(confirmations as i64)
        .bind(settled_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(
        &self,
        tx_hash: &str,
        settled_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"UPDATE deposit_records
               SET status = 'FAILED', settled_at = $2
               WHERE tx_hash = $1
                 AND status IN ('PENDING', 'CONFIRMING', 'CONFIRMED')"#,
        )
        .bind(tx_hash)
        .bind(settled_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_open(&self) -> Result<Vec<DepositRecord>, StoreError> {
        let sql = format!(
            r#"SELECT {} FROM deposit_records
               WHERE status IN ('PENDING', 'CONFIRMING', 'CONFIRMED')
               ORDER BY block_height ASC, tx_hash ASC"#,
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<DepositRecord>, StoreError> {
        let sql = format!(
            r#"SELECT {} FROM deposit_records
               WHERE user_id = $1
               ORDER BY created_at DESC"#,
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_record).collect()
    }
}
