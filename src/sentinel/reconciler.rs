//! Reconciler
//!
//! Background sweep over every open deposit in the ledger. The ingestion
//! queue is volatile; this sweep is what guarantees that an enqueued but
//! unsettled deposit is still settled after a restart.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::chain::ChainClient;
use super::confirmation::{SettleOutcome, Settler};
use super::error::SentinelError;
use super::ledger::DepositLedger;
use super::shutdown::ShutdownSignal;
use super::types::confirmations_at;

/// Counters for one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub visited: usize,
    pub credited: usize,
    pub failed: usize,
    /// Confirmation progress written below threshold
    pub advanced: usize,
    pub unchanged: usize,
}

pub struct Reconciler {
    chain: Arc<dyn ChainClient>,
    ledger: Arc<dyn DepositLedger>,
    settler: Arc<Settler>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        ledger: Arc<dyn DepositLedger>,
        settler: Arc<Settler>,
        interval: Duration,
    ) -> Self {
        Self {
            chain,
            ledger,
            settler,
            interval,
        }
    }

    /// Sweep, then sleep, until shutdown
    pub async fn run(self, shutdown: Arc<ShutdownSignal>) {
        info!(
            interval_secs = self.interval.as_secs(),
            required_confirmations = self.settler.required_confirmations(),
            "Starting reconciler"
        );

        while !shutdown.is_shutdown_requested() {
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Reconcile sweep failed");
            }
            if !shutdown.sleep_or_shutdown(self.interval).await {
                break;
            }
        }

        info!("Reconciler stopped");
    }

    /// Settle every open record once against a single height reading
    pub async fn sweep_once(&self) -> Result<ReconcileReport, SentinelError> {
        let current_height = self.chain.current_height().await?;
        let open = self.ledger.find_open().await?;

        let mut report = ReconcileReport::default();
        if open.is_empty() {
            debug!("No open deposits");
            return Ok(report);
        }

        for record in &open {
            report.visited += 1;
            let observed = confirmations_at(current_height, record.block_height);
            match self.settler.settle_or_fail(record, observed).await {
                Ok(SettleOutcome::Credited) | Ok(SettleOutcome::Healed) => report.credited += 1,
                Ok(SettleOutcome::Failed) => report.failed += 1,
                Ok(SettleOutcome::Progressed(status)) if status != record.status => {
                    report.advanced += 1
                }
                Ok(_) => report.unchanged += 1,
                Err(e) => {
                    warn!(tx_hash = %record.tx_hash, error = %e, "Deposit left open");
                    report.unchanged += 1;
                }
            }
        }

        if report.credited > 0 || report.failed > 0 {
            info!(
                height = current_height,
                visited = report.visited,
                credited = report.credited,
                failed = report.failed,
                "Reconcile sweep settled deposits"
            );
        }

        Ok(report)
    }
}
