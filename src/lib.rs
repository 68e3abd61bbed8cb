//! Deposit Sentinel - custodial EVM deposit detection and crediting
//!
//! Scans new blocks for native and token transfers into custodial addresses,
//! tracks confirmation depth, and credits each deposit exactly once.
//!
//! # Modules
//!
//! - [`sentinel`] - Scan loop, confirmation processor, reconciler and stores
//! - [`db`] - PostgreSQL pool and schema bootstrap
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod db;
pub mod logging;
pub mod sentinel;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use sentinel::{
    DepositRecord, DepositSentinel, DepositStatus, SentinelConfig, SentinelDeps, SentinelError,
    SentinelHandle,
};
