//! Scan Loop - block scanning driver
//!
//! Walks the chain forward from a cursor, turns watched transfers into
//! deposit records, and hands new records to the confirmation processor.
//! The cursor only moves after a whole range was scanned, so a failed tick
//! is retried from the same height.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::chain::ChainClient;
use super::cursor::CursorStore;
use super::error::{ScannerError, SentinelError};
use super::ledger::DepositLedger;
use super::queue::IngestionSender;
use super::registry::AddressRegistry;
use super::scanner::scan;
use super::shutdown::ShutdownSignal;
use super::types::{DepositEvent, DepositRecord, DepositStatus, Watchlist, confirmations_at};

/// Counters for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub blocks_scanned: u64,
    pub new_deposits: usize,
    pub updated_deposits: usize,
}

enum Ingested {
    New,
    Updated,
    Skipped,
}

/// Pick the first height to scan.
///
/// An explicit start block wins, then the persisted cursor, then the chain
/// head at startup (only blocks mined after startup are scanned).
pub async fn resolve_next_height(
    chain: &dyn ChainClient,
    cursor_store: Option<&dyn CursorStore>,
    start_block: Option<u64>,
) -> Result<u64, SentinelError> {
    if let Some(start) = start_block {
        info!(start_block = start, "Scanning from configured start block");
        return Ok(start);
    }

    if let Some(store) = cursor_store
        && let Some(last) = store.load(chain.chain_id()).await?
    {
        info!(last_scanned_height = last, "Resuming from persisted cursor");
        return Ok(last.saturating_add(1));
    }

    let head = chain.current_height().await?;
    info!(height = head, "No cursor, scanning from chain head");
    Ok(head.saturating_add(1))
}

pub struct ScanLoop {
    chain: Arc<dyn ChainClient>,
    registry: Arc<dyn AddressRegistry>,
    ledger: Arc<dyn DepositLedger>,
    cursor_store: Option<Arc<dyn CursorStore>>,
    sender: IngestionSender,
    required_confirmations: u64,
    interval: Duration,
    /// First height not yet scanned
    next_height: u64,
}

impl ScanLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        registry: Arc<dyn AddressRegistry>,
        ledger: Arc<dyn DepositLedger>,
        cursor_store: Option<Arc<dyn CursorStore>>,
        sender: IngestionSender,
        required_confirmations: u64,
        interval: Duration,
        next_height: u64,
    ) -> Self {
        Self {
            chain,
            registry,
            ledger,
            cursor_store,
            sender,
            required_confirmations,
            interval,
            next_height,
        }
    }

    /// Highest height fully scanned, if any
    pub fn last_scanned_height(&self) -> Option<u64> {
        self.next_height.checked_sub(1)
    }

    pub async fn run(mut self, shutdown: Arc<ShutdownSignal>) {
        info!(
            chain_id = self.chain.chain_id(),
            next_height = self.next_height,
            interval_ms = self.interval.as_millis() as u64,
            "Starting scan loop"
        );

        while !shutdown.is_shutdown_requested() {
            match self.tick().await {
                Ok(report) if report.new_deposits > 0 || report.updated_deposits > 0 => {
                    info!(
                        blocks = report.blocks_scanned,
                        new = report.new_deposits,
                        updated = report.updated_deposits,
                        last_scanned_height = self.last_scanned_height(),
                        "Scan tick"
                    );
                }
                Ok(report) => debug!(blocks = report.blocks_scanned, "Scan tick"),
                Err(e) => warn!(
                    next_height = self.next_height,
                    error = %e,
                    "Scan tick failed, retrying next tick"
                ),
            }

            if !shutdown.sleep_or_shutdown(self.interval).await {
                break;
            }
        }

        info!(
            last_scanned_height = self.last_scanned_height(),
            "Scan loop stopped"
        );
    }

    /// Scan every height from the cursor up to the current head.
    ///
    /// Any error leaves the cursor where it was; records written before the
    /// error are deduplicated when the range is scanned again.
    pub async fn tick(&mut self) -> Result<TickReport, SentinelError> {
        let current = self.chain.current_height().await?;
        let mut report = TickReport::default();

        if current < self.next_height {
            return Ok(report);
        }

        let watchlist = self.registry.active_watched_addresses().await?;
        if watchlist.is_empty() {
            debug!(
                from = self.next_height,
                to = current,
                "Watchlist empty, skipping range"
            );
        } else {
            for height in self.next_height..=current {
                let block = self
                    .chain
                    .get_block(height)
                    .await?
                    .ok_or(ScannerError::BlockNotFound(height))?;

                for event in scan(&block, &watchlist) {
                    match self.ingest(&event, &watchlist, current).await? {
                        Ingested::New => report.new_deposits += 1,
                        Ingested::Updated => report.updated_deposits += 1,
                        Ingested::Skipped => {}
                    }
                }
                report.blocks_scanned += 1;
            }
        }

        self.commit(current).await?;
        Ok(report)
    }

    async fn ingest(
        &self,
        event: &DepositEvent,
        watchlist: &Watchlist,
        current_height: u64,
    ) -> Result<Ingested, SentinelError> {
        if let Some(existing) = self.ledger.get(&event.tx_hash).await? {
            if existing.status.is_terminal() {
                return Ok(Ingested::Skipped);
            }

            let confirmations = confirmations_at(current_height, existing.block_height);
            let status =
                DepositStatus::from_confirmations(confirmations, self.required_confirmations);
            self.ledger
                .record_progress(&existing.tx_hash, confirmations, status)
                .await?;
            debug!(
                tx_hash = %existing.tx_hash,
                confirmations,
                status = %status,
                "Re-sighted deposit"
            );
            return Ok(Ingested::Updated);
        }

        let Some(user_id) = watchlist.owner_of(&event.to_address) else {
            warn!(
                tx_hash = %event.tx_hash,
                address = %event.to_address,
                "Recipient no longer watched, skipping deposit"
            );
            return Ok(Ingested::Skipped);
        };

        let record = DepositRecord::from_event(event, user_id, self.chain.chain_id());
        if !self.ledger.insert_new(&record).await? {
            return Ok(Ingested::Skipped);
        }

        info!(
            tx_hash = %record.tx_hash,
            user_id,
            asset = record.asset(),
            amount = %record.amount,
            height = record.block_height,
            "Detected deposit"
        );

        if !self.sender.enqueue(record) {
            warn!(tx_hash = %event.tx_hash, "Processor gone, deposit left for reconciler");
        }
        Ok(Ingested::New)
    }

    async fn commit(&mut self, scanned_to: u64) -> Result<(), SentinelError> {
        if let Some(store) = &self.cursor_store {
            store.save(self.chain.chain_id(), scanned_to).await?;
        }
        self.next_height = scanned_to + 1;
        Ok(())
    }
}
