//! End-to-end scenarios across scan loop, processor, reconciler and stores

use num_bigint::BigUint;
use std::sync::Arc;
use std::time::Duration;

use super::chain::mock::MockChain;
use super::confirmation::{SettleOutcome, Settler};
use super::config::SentinelConfig;
use super::credit::mock::CountingCreditSink;
use super::cursor::{CursorStore, MemoryCursorStore};
use super::idempotency::{IdempotencyStore, MemoryIdempotencyStore};
use super::ledger::{DepositLedger, MemoryDepositLedger};
use super::processor::{ConfirmationProcessor, ProcessorStep};
use super::queue::ingestion_queue;
use super::reconciler::Reconciler;
use super::registry::StaticAddressRegistry;
use super::service::{DepositSentinel, SentinelDeps};
use super::types::{ChainTransaction, DepositStatus, WatchedAddress};
use super::worker::ScanLoop;

const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const USDT: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";
const REQUIRED: u64 = 12;

/// Durable state that survives a simulated restart
struct Stores {
    chain: Arc<MockChain>,
    registry: Arc<StaticAddressRegistry>,
    ledger: Arc<MemoryDepositLedger>,
    idempotency: Arc<MemoryIdempotencyStore>,
    cursor: Arc<MemoryCursorStore>,
    sink: Arc<CountingCreditSink>,
}

impl Stores {
    fn new(head: u64) -> Self {
        Self {
            chain: Arc::new(MockChain::new(head)),
            registry: Arc::new(StaticAddressRegistry::new(vec![
                WatchedAddress {
                    address: ALICE.to_string(),
                    user_id: 1,
                },
                WatchedAddress {
                    address: BOB.to_string(),
                    user_id: 2,
                },
            ])),
            ledger: Arc::new(MemoryDepositLedger::new()),
            idempotency: Arc::new(MemoryIdempotencyStore::new()),
            cursor: Arc::new(MemoryCursorStore::new()),
            sink: Arc::new(CountingCreditSink::new()),
        }
    }

    fn settler(&self, claim_timeout: Duration) -> Arc<Settler> {
        Arc::new(Settler::new(
            self.ledger.clone(),
            self.idempotency.clone(),
            self.sink.clone(),
            REQUIRED,
            claim_timeout,
        ))
    }

    /// One process lifetime's in-memory workers
    fn workers(&self, next_height: u64) -> Workers {
        let settler = self.settler(Duration::from_secs(300));
        let (tx, rx) = ingestion_queue();
        Workers {
            scan_loop: ScanLoop::new(
                self.chain.clone(),
                self.registry.clone(),
                self.ledger.clone(),
                Some(self.cursor.clone() as Arc<dyn CursorStore>),
                tx,
                REQUIRED,
                Duration::from_millis(10),
                next_height,
            ),
            processor: ConfirmationProcessor::new(
                self.chain.clone(),
                settler.clone(),
                rx,
                Duration::from_millis(10),
            ),
            reconciler: Reconciler::new(
                self.chain.clone(),
                self.ledger.clone(),
                settler,
                Duration::from_millis(10),
            ),
        }
    }

    async fn status_of(&self, tx_hash: &str) -> DepositStatus {
        self.ledger.get(tx_hash).await.unwrap().unwrap().status
    }
}

struct Workers {
    scan_loop: ScanLoop,
    processor: ConfirmationProcessor,
    reconciler: Reconciler,
}

impl Workers {
    async fn drain(&mut self) -> Vec<ProcessorStep> {
        let mut steps = Vec::new();
        loop {
            match self.processor.process_next().await {
                ProcessorStep::Idle | ProcessorStep::Closed => return steps,
                step => steps.push(step),
            }
        }
    }
}

fn native_tx(hash: &str, to: &str, value: u64, height: u64) -> ChainTransaction {
    ChainTransaction {
        hash: hash.to_string(),
        to: Some(to.to_string()),
        value: BigUint::from(value),
        input: "0x".to_string(),
        block_height: height,
    }
}

fn token_tx(hash: &str, recipient: &str, amount: u64, height: u64) -> ChainTransaction {
    let input = format!(
        "0xa9059cbb{:0>64}{:064x}",
        recipient.trim_start_matches("0x"),
        amount
    );
    ChainTransaction {
        hash: hash.to_string(),
        to: Some(USDT.to_string()),
        value: BigUint::ZERO,
        input,
        block_height: height,
    }
}

#[tokio::test]
async fn test_deposit_confirms_then_credits_once_under_contention() {
    let stores = Stores::new(100);
    stores.chain.add_transaction(native_tx("0xd1", ALICE, 5_000, 95));
    let mut workers = stores.workers(95);

    // Head 100: first observation, 5 confirmations
    workers.scan_loop.tick().await.unwrap();
    assert_eq!(
        workers.drain().await,
        vec![ProcessorStep::Settled(SettleOutcome::Progressed(
            DepositStatus::Confirming
        ))]
    );
    let stored = stores.ledger.get("0xd1").await.unwrap().unwrap();
    assert_eq!(stored.confirmations, 5);
    assert_eq!(stored.status, DepositStatus::Confirming);

    // Head 107: processor and reconciler both see 12 confirmations at once
    stores.chain.set_height(107);
    stores.sink.set_delay(Duration::from_millis(25));
    let (processed, swept) = tokio::join!(
        workers.processor.handle(&stored),
        workers.reconciler.sweep_once()
    );
    processed.unwrap();
    swept.unwrap();

    assert_eq!(stores.sink.calls(), 1);
    assert_eq!(stores.sink.credits_for("0xd1"), 1);
    assert_eq!(stores.status_of("0xd1").await, DepositStatus::Credited);

    let credited = stores.sink.credited();
    assert_eq!(credited[0].user_id, 1);
    assert_eq!(credited[0].amount, BigUint::from(5_000u32));
    assert_eq!(credited[0].token_address, None);
}

#[tokio::test]
async fn test_restart_loses_queue_but_not_deposits() {
    let stores = Stores::new(110);
    stores.chain.add_transaction(native_tx("0xd1", ALICE, 1, 95));
    stores.chain.add_transaction(token_tx("0xd2", BOB, 42, 100));

    // First lifetime: scan and enqueue, then crash before processing
    {
        let mut workers = stores.workers(90);
        let report = workers.scan_loop.tick().await.unwrap();
        assert_eq!(report.new_deposits, 2);
    }
    assert_eq!(stores.sink.calls(), 0);

    // Second lifetime resumes from the persisted cursor with an empty queue
    let resumed = stores.cursor.load("testnet").await.unwrap().unwrap() + 1;
    assert_eq!(resumed, 111);
    let mut workers = stores.workers(resumed);
    assert!(workers.drain().await.is_empty());

    let report = workers.reconciler.sweep_once().await.unwrap();
    assert_eq!(report.visited, 2);
    assert_eq!(report.credited, 1);
    assert_eq!(stores.status_of("0xd1").await, DepositStatus::Credited);
    assert_eq!(stores.status_of("0xd2").await, DepositStatus::Confirming);

    stores.chain.set_height(120);
    workers.reconciler.sweep_once().await.unwrap();

    // Third lifetime rescans everything; nothing is credited again
    let mut workers = stores.workers(90);
    workers.scan_loop.tick().await.unwrap();
    workers.drain().await;
    workers.reconciler.sweep_once().await.unwrap();

    assert_eq!(stores.sink.credits_for("0xd1"), 1);
    assert_eq!(stores.sink.credits_for("0xd2"), 1);
    assert_eq!(stores.sink.calls(), 2);

    let token = stores
        .sink
        .credited()
        .into_iter()
        .find(|c| c.tx_hash == "0xd2")
        .unwrap();
    assert_eq!(token.user_id, 2);
    assert_eq!(token.amount, BigUint::from(42u32));
    assert_eq!(token.token_address.as_deref(), Some(USDT));
}

#[tokio::test]
async fn test_confirmations_and_status_progress_monotonically() {
    let stores = Stores::new(95);
    stores.chain.add_transaction(native_tx("0xd1", ALICE, 1, 95));
    let mut workers = stores.workers(95);
    workers.scan_loop.tick().await.unwrap();
    workers.drain().await;

    let mut last_confirmations = 0;
    for head in 95..=112 {
        stores.chain.set_height(head);
        workers.reconciler.sweep_once().await.unwrap();

        let stored = stores.ledger.get("0xd1").await.unwrap().unwrap();
        assert!(stored.confirmations >= last_confirmations);
        last_confirmations = stored.confirmations;

        let expected = match head - 95 {
            0 => DepositStatus::Pending,
            c if c < REQUIRED => DepositStatus::Confirming,
            _ => DepositStatus::Credited,
        };
        assert_eq!(stored.status, expected, "head {}", head);
    }

    assert_eq!(last_confirmations, REQUIRED);
    assert_eq!(stores.sink.calls(), 1);
}

#[tokio::test]
async fn test_rescan_after_partial_failure_does_not_duplicate() {
    let stores = Stores::new(100);
    stores.chain.add_transaction(native_tx("0xd1", ALICE, 1, 95));
    stores.chain.add_transaction(native_tx("0xd2", BOB, 1, 99));
    stores.chain.fail_block(99, true);
    let mut workers = stores.workers(95);

    assert!(workers.scan_loop.tick().await.is_err());
    assert_eq!(stores.ledger.len(), 1);
    assert_eq!(stores.cursor.load("testnet").await.unwrap(), None);

    stores.chain.fail_block(99, false);
    let report = workers.scan_loop.tick().await.unwrap();
    assert_eq!(report.new_deposits, 1);
    assert_eq!(report.updated_deposits, 1);
    assert_eq!(stores.ledger.len(), 2);

    // 0xd1 was enqueued once only
    let steps = workers.drain().await;
    assert_eq!(steps.len(), 2);
}

#[tokio::test]
async fn test_credit_failure_fails_record_and_processing_continues() {
    let stores = Stores::new(120);
    stores.chain.add_transaction(native_tx("0xd1", ALICE, 1, 95));
    stores.chain.add_transaction(native_tx("0xd2", BOB, 1, 96));
    stores.sink.reject_tx("0xd1");
    let mut workers = stores.workers(95);

    workers.scan_loop.tick().await.unwrap();
    let steps = workers.drain().await;
    assert_eq!(
        steps,
        vec![
            ProcessorStep::Settled(SettleOutcome::Failed),
            ProcessorStep::Settled(SettleOutcome::Credited),
        ]
    );
    assert_eq!(stores.status_of("0xd1").await, DepositStatus::Failed);
    assert_eq!(stores.status_of("0xd2").await, DepositStatus::Credited);

    // Not retried by the reconciler
    let report = workers.reconciler.sweep_once().await.unwrap();
    assert_eq!(report.visited, 0);
    assert_eq!(stores.sink.calls(), 2);
}

#[tokio::test]
async fn test_interrupted_credit_is_replayed_after_claim_timeout() {
    let stores = Stores::new(120);
    stores.chain.add_transaction(native_tx("0xd1", ALICE, 1, 95));
    let mut workers = stores.workers(95);
    workers.scan_loop.tick().await.unwrap();

    // Crash between claim and credit
    let record = stores.ledger.get("0xd1").await.unwrap().unwrap();
    stores
        .idempotency
        .try_claim(&record.idempotency_key(), chrono::Utc::now())
        .await
        .unwrap();

    // Fresh claim: treated as in flight elsewhere
    assert_eq!(
        workers.drain().await,
        vec![ProcessorStep::Settled(SettleOutcome::InFlight)]
    );
    assert_eq!(stores.sink.calls(), 0);

    // Short claim timeout: both contenders race, one replays
    tokio::time::sleep(Duration::from_millis(30)).await;
    let fast = stores.settler(Duration::from_millis(10));
    let other = stores.settler(Duration::from_millis(10));
    stores.sink.set_delay(Duration::from_millis(20));
    let (a, b) = tokio::join!(fast.settle(&record, 25), other.settle(&record, 25));

    let outcomes = [a.unwrap(), b.unwrap()];
    assert!(outcomes.contains(&SettleOutcome::Credited));
    assert_eq!(stores.sink.calls(), 1);
    assert_eq!(stores.status_of("0xd1").await, DepositStatus::Credited);
}

#[tokio::test]
async fn test_service_credits_end_to_end() {
    let stores = Stores::new(100);
    stores.chain.add_transaction(native_tx("0xd1", ALICE, 9, 95));

    let mut config = SentinelConfig::with_rpc_url("http://unused");
    config.chain_id = "testnet".to_string();
    config.start_block = Some(95);
    config.scan_interval_ms = 10;
    config.reconcile_interval_ms = 10;
    config.queue_poll_timeout_ms = 10;

    let deps = SentinelDeps {
        chain: stores.chain.clone(),
        registry: stores.registry.clone(),
        ledger: stores.ledger.clone(),
        idempotency: stores.idempotency.clone(),
        sink: stores.sink.clone(),
        cursor_store: Some(stores.cursor.clone()),
    };
    let handle = DepositSentinel::start(&config, deps).await.unwrap();

    wait_for_status(&stores, "0xd1", DepositStatus::Confirming).await;
    stores.chain.set_height(107);
    wait_for_status(&stores, "0xd1", DepositStatus::Credited).await;

    handle.shutdown().await;
    assert_eq!(stores.sink.calls(), 1);
    assert!(stores.cursor.load("testnet").await.unwrap().unwrap() >= 100);
}

async fn wait_for_status(stores: &Stores, tx_hash: &str, status: DepositStatus) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(Some(record)) = stores.ledger.get(tx_hash).await
                && record.status == status
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "{} never reached {}", tx_hash, status);
}
