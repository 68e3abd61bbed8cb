use serde::Deserialize;
use std::time::Duration;

use super::error::SentinelError;
use super::types::{UserId, WatchedAddress};

/// Deposit sentinel configuration (the `sentinel:` section of the app config)
#[derive(Debug, Deserialize, Clone)]
pub struct SentinelConfig {
    #[serde(default = "default_chain_id")]
    pub chain_id: String,
    pub rpc: EthRpcConfig,
    /// Crediting threshold
    #[serde(default = "default_required_confirmations")]
    pub required_confirmations: u64,
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
    /// First height to scan. Absent: resume from the persisted cursor, or
    /// start at the chain head.
    #[serde(default)]
    pub start_block: Option<u64>,
    /// Bounded wait of the confirmation processor between shutdown checks
    #[serde(default = "default_queue_poll_timeout_ms")]
    pub queue_poll_timeout_ms: u64,
    #[serde(default = "default_shutdown_join_timeout_ms")]
    pub shutdown_join_timeout_ms: u64,
    /// Age after which an unapplied idempotency claim may be replayed
    #[serde(default = "default_claim_timeout_ms")]
    pub claim_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub persist_cursor: bool,
    /// Static watchlist, used when no database is configured
    #[serde(default)]
    pub watched: Vec<WatchedAddressConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EthRpcConfig {
    pub url: String,
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchedAddressConfig {
    pub address: String,
    pub user_id: UserId,
}

fn default_chain_id() -> String {
    "mainnet".to_string()
}

fn default_required_confirmations() -> u64 {
    12
}

fn default_scan_interval_ms() -> u64 {
    5_000
}

fn default_reconcile_interval_ms() -> u64 {
    30_000
}

fn default_queue_poll_timeout_ms() -> u64 {
    1_000
}

fn default_shutdown_join_timeout_ms() -> u64 {
    5_000
}

fn default_claim_timeout_ms() -> u64 {
    300_000
}

fn default_rpc_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

impl SentinelConfig {
    /// Config with every optional field at its default
    pub fn with_rpc_url(url: &str) -> Self {
        Self {
            chain_id: default_chain_id(),
            rpc: EthRpcConfig {
                url: url.to_string(),
                timeout_ms: default_rpc_timeout_ms(),
            },
            required_confirmations: default_required_confirmations(),
            scan_interval_ms: default_scan_interval_ms(),
            reconcile_interval_ms: default_reconcile_interval_ms(),
            start_block: None,
            queue_poll_timeout_ms: default_queue_poll_timeout_ms(),
            shutdown_join_timeout_ms: default_shutdown_join_timeout_ms(),
            claim_timeout_ms: default_claim_timeout_ms(),
            persist_cursor: true,
            watched: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), SentinelError> {
        if self.required_confirmations == 0 {
            return Err(SentinelError::Config(
                "required_confirmations must be at least 1".to_string(),
            ));
        }
        if self.scan_interval_ms == 0 || self.reconcile_interval_ms == 0 {
            return Err(SentinelError::Config(
                "scan and reconcile intervals must be non-zero".to_string(),
            ));
        }
        if self.chain_id.trim().is_empty() {
            return Err(SentinelError::Config("chain_id must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn queue_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_poll_timeout_ms)
    }

    pub fn shutdown_join_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_join_timeout_ms)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_millis(self.claim_timeout_ms)
    }

    pub fn static_watchlist(&self) -> Vec<WatchedAddress> {
        self.watched
            .iter()
            .map(|w| WatchedAddress {
                address: w.address.to_lowercase(),
                user_id: w.user_id,
            })
            .collect()
    }
}
