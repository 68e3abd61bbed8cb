//! Confirmation advancement and idempotency-gated crediting
//!
//! Shared by the confirmation processor and the reconciler so both paths
//! apply exactly the same transitions:
//!
//! ```text
//! PENDING -(conf > 0)-> CONFIRMING -(conf >= required)-> claim -> credit -> applied -> CREDITED
//! ```
//!
//! The idempotency claim is inserted *before* the credit. Whoever wins the
//! unique insert owns the credit; everyone else backs off.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::credit::{CreditRequest, CreditSink};
use super::error::SentinelError;
use super::idempotency::IdempotencyStore;
use super::ledger::DepositLedger;
use super::types::{DepositRecord, DepositStatus, IdempotencyKey};

/// What a settle attempt did to one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// This call applied the credit
    Credited,
    /// Key was already applied; the status cache was repaired to CREDITED
    Healed,
    /// Record was already CREDITED or FAILED
    Terminal,
    /// Another path holds a live claim on the key
    InFlight,
    /// Below threshold; progress written with this status
    Progressed(DepositStatus),
    /// Settling failed and the record was marked FAILED
    Failed,
    /// No such record in the ledger
    Missing,
}

pub struct Settler {
    ledger: Arc<dyn DepositLedger>,
    idempotency: Arc<dyn IdempotencyStore>,
    sink: Arc<dyn CreditSink>,
    required_confirmations: u64,
    claim_timeout: chrono::Duration,
}

impl Settler {
    pub fn new(
        ledger: Arc<dyn DepositLedger>,
        idempotency: Arc<dyn IdempotencyStore>,
        sink: Arc<dyn CreditSink>,
        required_confirmations: u64,
        claim_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            idempotency,
            sink,
            required_confirmations,
            claim_timeout: chrono::Duration::from_std(claim_timeout)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    pub fn required_confirmations(&self) -> u64 {
        self.required_confirmations
    }

    /// Settle one record, degrading it to FAILED on any non-transient error.
    ///
    /// Transient (chain) errors are returned untouched so the record stays
    /// open for the next pass. An error after the credit was recorded as
    /// applied heals the record to CREDITED instead of failing it.
    pub async fn settle_or_fail(
        &self,
        record: &DepositRecord,
        observed_confirmations: u64,
    ) -> Result<SettleOutcome, SentinelError> {
        match self.settle(record, observed_confirmations).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                error!(
                    tx_hash = %record.tx_hash,
                    height = record.block_height,
                    error = %e,
                    "Settlement failed"
                );
                self.fail_unless_applied(record).await
            }
        }
    }

    /// Advance one record to `observed_confirmations`, crediting it if it has
    /// reached the threshold and this call wins the idempotency claim.
    pub async fn settle(
        &self,
        record: &DepositRecord,
        observed_confirmations: u64,
    ) -> Result<SettleOutcome, SentinelError> {
        // The queued or swept copy may be stale
        let Some(record) = self.ledger.get(&record.tx_hash).await? else {
            warn!(tx_hash = %record.tx_hash, "Deposit record vanished before settlement");
            return Ok(SettleOutcome::Missing);
        };
        if record.status.is_terminal() {
            return Ok(SettleOutcome::Terminal);
        }

        let key = record.idempotency_key();
        let confirmations = record.confirmations.max(observed_confirmations);

        if let Some(existing) = self.idempotency.get(&key).await? {
            if let Some(applied_at) = existing.applied_at {
                return self.heal(&record, confirmations, applied_at).await;
            }
            return self.replay_if_stale(&record, &key, confirmations).await;
        }

        if confirmations < self.required_confirmations {
            let status =
                DepositStatus::from_confirmations(confirmations, self.required_confirmations);
            self.ledger
                .record_progress(&record.tx_hash, confirmations, status)
                .await?;
            debug!(
                tx_hash = %record.tx_hash,
                confirmations,
                required = self.required_confirmations,
                status = %status,
                "Deposit progressed"
            );
            return Ok(SettleOutcome::Progressed(status));
        }

        if !self.idempotency.try_claim(&key, Utc::now()).await? {
            // Lost the race. If the winner already finished, sync the cache.
            return match self.idempotency.get(&key).await?.and_then(|k| k.applied_at) {
                Some(applied_at) => self.heal(&record, confirmations, applied_at).await,
                None => {
                    debug!(key = %key, "Idempotency key claimed by another path");
                    Ok(SettleOutcome::InFlight)
                }
            };
        }

        self.apply_credit(&record, &key, confirmations).await
    }

    /// Credit under an owned claim, then record it applied, then update the
    /// status cache.
    async fn apply_credit(
        &self,
        record: &DepositRecord,
        key: &IdempotencyKey,
        confirmations: u64,
    ) -> Result<SettleOutcome, SentinelError> {
        self.sink.credit(&CreditRequest::from_record(record)).await?;

        let now = Utc::now();
        self.idempotency.mark_applied(key, now).await?;
        self.ledger
            .mark_credited(&record.tx_hash, confirmations, now)
            .await?;

        info!(
            tx_hash = %record.tx_hash,
            user_id = record.user_id,
            asset = record.asset(),
            amount = %record.amount,
            confirmations,
            "Deposit credited"
        );
        Ok(SettleOutcome::Credited)
    }

    /// A claim exists but was never marked applied. Younger than the claim
    /// timeout it is someone else's in-flight credit; older, exactly one
    /// caller takes it over and replays the credit.
    async fn replay_if_stale(
        &self,
        record: &DepositRecord,
        key: &IdempotencyKey,
        confirmations: u64,
    ) -> Result<SettleOutcome, SentinelError> {
        let now = Utc::now();
        let Some(stale_before) = now.checked_sub_signed(self.claim_timeout) else {
            return Ok(SettleOutcome::InFlight);
        };

        if !self.idempotency.reclaim_stale(key, stale_before, now).await? {
            return Ok(SettleOutcome::InFlight);
        }

        warn!(key = %key, "Replaying credit for stale unapplied claim");
        self.apply_credit(record, key, confirmations).await
    }

    async fn heal(
        &self,
        record: &DepositRecord,
        confirmations: u64,
        applied_at: DateTime<Utc>,
    ) -> Result<SettleOutcome, SentinelError> {
        if self
            .ledger
            .mark_credited(&record.tx_hash, confirmations, applied_at)
            .await?
        {
            warn!(
                tx_hash = %record.tx_hash,
                status = %record.status,
                "Status healed to CREDITED from applied idempotency key"
            );
            return Ok(SettleOutcome::Healed);
        }
        Ok(SettleOutcome::Terminal)
    }

    async fn fail_unless_applied(
        &self,
        record: &DepositRecord,
    ) -> Result<SettleOutcome, SentinelError> {
        let key = record.idempotency_key();
        if let Some(existing) = self.idempotency.get(&key).await?
            && let Some(applied_at) = existing.applied_at
        {
            return self
                .heal(record, record.confirmations, applied_at)
                .await;
        }

        if self.ledger.mark_failed(&record.tx_hash, Utc::now()).await? {
            warn!(tx_hash = %record.tx_hash, "Deposit marked FAILED");
            return Ok(SettleOutcome::Failed);
        }
        Ok(SettleOutcome::Terminal)
    }
}
