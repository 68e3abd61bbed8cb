//! Confirmation Processor
//!
//! Single consumer of the ingestion queue. Each dequeued record is settled
//! against the current chain height; a failure on one record never stops
//! the loop.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::chain::ChainClient;
use super::confirmation::{SettleOutcome, Settler};
use super::error::SentinelError;
use super::queue::{Dequeued, IngestionReceiver};
use super::shutdown::ShutdownSignal;
use super::types::DepositRecord;

/// Result of one bounded wait on the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorStep {
    Settled(SettleOutcome),
    /// Transient failure; the record is left for the reconciler
    Deferred,
    Idle,
    Closed,
}

pub struct ConfirmationProcessor {
    chain: Arc<dyn ChainClient>,
    settler: Arc<Settler>,
    receiver: IngestionReceiver,
    poll_timeout: Duration,
}

impl ConfirmationProcessor {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        settler: Arc<Settler>,
        receiver: IngestionReceiver,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            chain,
            settler,
            receiver,
            poll_timeout,
        }
    }

    /// Drain the queue until shutdown is requested or the producer is gone
    pub async fn run(mut self, shutdown: Arc<ShutdownSignal>) {
        info!(
            poll_timeout_ms = self.poll_timeout.as_millis() as u64,
            "Starting confirmation processor"
        );

        while !shutdown.is_shutdown_requested() {
            if self.process_next().await == ProcessorStep::Closed {
                info!("Ingestion queue closed");
                break;
            }
        }

        info!(
            remaining = self.receiver.len(),
            "Confirmation processor stopped"
        );
    }

    /// Wait up to the poll timeout for one record and settle it
    pub async fn process_next(&mut self) -> ProcessorStep {
        match self.receiver.recv_timeout(self.poll_timeout).await {
            Dequeued::Record(record) => match self.handle(&record).await {
                Ok(outcome) => ProcessorStep::Settled(outcome),
                Err(_) => ProcessorStep::Deferred,
            },
            Dequeued::Idle => ProcessorStep::Idle,
            Dequeued::Closed => ProcessorStep::Closed,
        }
    }

    /// Settle one record at its current confirmation depth.
    ///
    /// Only transient chain errors come back as `Err`; everything else has
    /// already been folded into the record's state.
    pub async fn handle(&self, record: &DepositRecord) -> Result<SettleOutcome, SentinelError> {
        let observed = match self
            .chain
            .confirmations_of(&record.tx_hash, record.block_height)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    tx_hash = %record.tx_hash,
                    error = %e,
                    "Confirmations unavailable, leaving deposit for reconciler"
                );
                return Err(e.into());
            }
        };

        let outcome = self.settler.settle_or_fail(record, observed).await;
        match &outcome {
            Ok(o) => debug!(tx_hash = %record.tx_hash, outcome = ?o, "Processed deposit"),
            Err(e) => warn!(tx_hash = %record.tx_hash, error = %e, "Deposit left open"),
        }
        outcome
    }
}
