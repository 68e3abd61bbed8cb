//! Credit Sink
//!
//! The balance-ledger side of a settled deposit. The pipeline calls
//! `credit` at most once per idempotency claim, but a stale claim replayed
//! after a crash repeats the call for the same `(tx_hash, block_height)`.
//! Sinks must treat a repeated key as already applied.

use async_trait::async_trait;
use num_bigint::BigUint;
use sqlx::PgPool;
use tracing::{info, warn};

use super::error::CreditError;
use super::types::{DepositRecord, NATIVE_ASSET, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditRequest {
    pub user_id: UserId,
    pub amount: BigUint,
    pub token_address: Option<String>,
    pub tx_hash: String,
    pub block_height: u64,
}

impl CreditRequest {
    pub fn from_record(record: &DepositRecord) -> Self {
        Self {
            user_id: record.user_id,
            amount: record.amount.clone(),
            token_address: record.token_address.clone(),
            tx_hash: record.tx_hash.clone(),
            block_height: record.block_height,
        }
    }

    pub fn asset(&self) -> &str {
        self.token_address.as_deref().unwrap_or(NATIVE_ASSET)
    }
}

#[async_trait]
pub trait CreditSink: Send + Sync {
    /// Apply the credit. Idempotent on `(tx_hash, block_height)`.
    async fn credit(&self, request: &CreditRequest) -> Result<(), CreditError>;
}

/// Upserts the user's per-asset balance in `deposit_balances`, gated by a
/// `deposit_credits` row inserted in the same transaction
pub struct PgBalanceCreditSink {
    pool: PgPool,
}

impl PgBalanceCreditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditSink for PgBalanceCreditSink {
    async fn credit(&self, request: &CreditRequest) -> Result<(), CreditError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"INSERT INTO deposit_credits
                   (tx_hash, block_height, user_id, asset, amount, credited_at)
               VALUES ($1, $2, $3, $4, $5::NUMERIC, NOW())
               ON CONFLICT (tx_hash, block_height) DO NOTHING"#,
        )
        .bind(&request.tx_hash)
        .bind(request.block_height as i64)
        .bind(request.user_id)
        .bind(request.asset())
        .bind(request.amount.to_string())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            warn!(
                tx_hash = %request.tx_hash,
                height = request.block_height,
                "Credit already applied, skipping balance update"
            );
            return Ok(());
        }

        sqlx::query(
            r#"INSERT INTO deposit_balances (user_id, asset, amount, updated_at)
               VALUES ($1, $2, $3::NUMERIC, NOW())
               ON CONFLICT (user_id, asset)
               DO UPDATE SET amount = deposit_balances.amount + EXCLUDED.amount,
                             updated_at = NOW()"#,
        )
        .bind(request.user_id)
        .bind(request.asset())
        .bind(request.amount.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            user_id = request.user_id,
            asset = request.asset(),
            amount = %request.amount,
            tx_hash = %request.tx_hash,
            "Balance credited"
        );
        Ok(())
    }
}

/// Logs credits without applying them. Development only.
#[derive(Default)]
pub struct LogCreditSink;

#[async_trait]
impl CreditSink for LogCreditSink {
    async fn credit(&self, request: &CreditRequest) -> Result<(), CreditError> {
        info!(
            user_id = request.user_id,
            asset = request.asset(),
            amount = %request.amount,
            tx_hash = %request.tx_hash,
            "Credit (log only)"
        );
        Ok(())
    }
}

/// Counting sink for tests
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    pub struct CountingCreditSink {
        calls: AtomicUsize,
        credited: Mutex<Vec<CreditRequest>>,
        should_fail: AtomicBool,
        /// Hashes whose credit is rejected
        reject: Mutex<Vec<String>>,
        delay: Mutex<Option<Duration>>,
        /// Skip a repeated `(tx_hash, block_height)` like a real ledger
        dedupe: AtomicBool,
    }

    impl CountingCreditSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_fail(&self, fail: bool) {
            self.should_fail.store(fail, Ordering::SeqCst);
        }

        pub fn reject_tx(&self, tx_hash: &str) {
            self.reject.lock().unwrap().push(tx_hash.to_string());
        }

        /// Hold each credit call open, widening race windows
        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }

        pub fn set_dedupe(&self, dedupe: bool) {
            self.dedupe.store(dedupe, Ordering::SeqCst);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn credits_for(&self, tx_hash: &str) -> usize {
            self.credited
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.tx_hash == tx_hash)
                .count()
        }

        pub fn credited(&self) -> Vec<CreditRequest> {
            self.credited.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CreditSink for CountingCreditSink {
        async fn credit(&self, request: &CreditRequest) -> Result<(), CreditError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if self.should_fail.load(Ordering::SeqCst) {
                return Err(CreditError::Unavailable("mock sink down".to_string()));
            }
            if self.reject.lock().unwrap().contains(&request.tx_hash) {
                return Err(CreditError::Rejected(request.tx_hash.clone()));
            }

            let mut credited = self.credited.lock().unwrap();
            let seen = credited
                .iter()
                .any(|r| r.tx_hash == request.tx_hash && r.block_height == request.block_height);
            if !(self.dedupe.load(Ordering::SeqCst) && seen) {
                credited.push(request.clone());
            }
            Ok(())
        }
    }
}
