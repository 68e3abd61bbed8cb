//! Sentinel Service Module
//!
//! Detects deposits to custodial addresses on an EVM chain and credits each
//! one exactly once:
//! - Scan loop walks new blocks and records watched transfers
//! - Confirmation processor settles newly detected deposits
//! - Reconciler re-walks every open deposit, covering queue loss on restart
//! - Idempotency store is the single authority on "already credited"

pub mod chain;
pub mod config;
pub mod confirmation;
pub mod credit;
pub mod cursor;
pub mod error;
pub mod eth;
pub mod idempotency;
pub mod ledger;
pub mod processor;
pub mod queue;
pub mod reconciler;
pub mod registry;
pub mod scanner;
pub mod service;
pub mod shutdown;
pub mod types;
pub mod worker;

#[cfg(test)]
mod integration_tests;

// Re-exports for convenience
pub use chain::ChainClient;
pub use config::{EthRpcConfig, SentinelConfig};
pub use confirmation::{SettleOutcome, Settler};
pub use credit::{CreditRequest, CreditSink, LogCreditSink, PgBalanceCreditSink};
pub use cursor::{CursorStore, MemoryCursorStore, PgCursorStore};
pub use error::{CreditError, ScannerError, SentinelError, StoreError};
pub use eth::EthRpcClient;
pub use idempotency::{IdempotencyStore, MemoryIdempotencyStore, PgIdempotencyStore};
pub use ledger::{DepositLedger, MemoryDepositLedger, PgDepositLedger};
pub use processor::ConfirmationProcessor;
pub use reconciler::{ReconcileReport, Reconciler};
pub use registry::{AddressRegistry, PgAddressRegistry, StaticAddressRegistry};
pub use service::{DepositSentinel, SentinelDeps, SentinelHandle};
pub use shutdown::ShutdownSignal;
pub use types::{DepositEvent, DepositRecord, DepositStatus, IdempotencyKey, UserId};
pub use worker::{ScanLoop, TickReport};
