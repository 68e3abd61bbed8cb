//! Ingestion Queue
//!
//! In-memory, unbounded, single-producer/single-consumer hand-off from the
//! scan loop to the confirmation processor. Contents do not survive a
//! restart; the reconciler covers anything lost.

use std::time::Duration;
use tokio::sync::mpsc;

use super::types::DepositRecord;

/// Result of a bounded wait on the queue
#[derive(Debug)]
pub enum Dequeued {
    Record(DepositRecord),
    /// Timed out with nothing to do
    Idle,
    /// Producer dropped and the queue is drained
    Closed,
}

#[derive(Clone)]
pub struct IngestionSender {
    tx: mpsc::UnboundedSender<DepositRecord>,
}

impl IngestionSender {
    /// Returns `false` if the consumer is gone
    pub fn enqueue(&self, record: DepositRecord) -> bool {
        self.tx.send(record).is_ok()
    }
}

pub struct IngestionReceiver {
    rx: mpsc::UnboundedReceiver<DepositRecord>,
}

impl IngestionReceiver {
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Dequeued {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(record)) => Dequeued::Record(record),
            Ok(None) => Dequeued::Closed,
            Err(_) => Dequeued::Idle,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn ingestion_queue() -> (IngestionSender, IngestionReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (IngestionSender { tx }, IngestionReceiver { rx })
}
