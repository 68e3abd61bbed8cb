//! Deposit pipeline data model
//!
//! Status strings and the `{tx_hash}_{height}` key format are what the
//! PostgreSQL tables store, so they are part of the persisted layout.

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub type UserId = i64;

/// Asset label used for native-value deposits in logs and balance rows
pub const NATIVE_ASSET: &str = "native";

/// Deposit lifecycle states
///
/// ```text
/// PENDING → CONFIRMING → (CONFIRMED) → CREDITED
///     ↓          ↓             ↓
///   FAILED     FAILED        FAILED
/// ```
///
/// CONFIRMED is only written by the scan loop when it re-sights a deposit
/// that already has enough confirmations but has not been settled yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepositStatus {
    Pending,
    Confirming,
    Confirmed,
    Credited,
    Failed,
}

impl DepositStatus {
    /// Statuses the reconciler sweeps
    pub const OPEN: [DepositStatus; 3] = [
        DepositStatus::Pending,
        DepositStatus::Confirming,
        DepositStatus::Confirmed,
    ];

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, DepositStatus::Credited | DepositStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Pending => "PENDING",
            DepositStatus::Confirming => "CONFIRMING",
            DepositStatus::Confirmed => "CONFIRMED",
            DepositStatus::Credited => "CREDITED",
            DepositStatus::Failed => "FAILED",
        }
    }

    /// Status implied by a confirmation count, without settling.
    pub fn from_confirmations(confirmations: u64, required: u64) -> Self {
        if confirmations >= required {
            DepositStatus::Confirmed
        } else if confirmations > 0 {
            DepositStatus::Confirming
        } else {
            DepositStatus::Pending
        }
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepositStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(DepositStatus::Pending),
            "CONFIRMING" => Ok(DepositStatus::Confirming),
            "CONFIRMED" => Ok(DepositStatus::Confirmed),
            "CREDITED" => Ok(DepositStatus::Credited),
            "FAILED" => Ok(DepositStatus::Failed),
            other => Err(format!("unknown deposit status: {}", other)),
        }
    }
}

/// Blocks mined on top of the inclusion block. Never negative.
#[inline]
pub fn confirmations_at(current_height: u64, included_height: u64) -> u64 {
    current_height.saturating_sub(included_height)
}

/// A transaction as returned by the chain client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: String,
    /// Direct recipient; `None` for contract creation
    pub to: Option<String>,
    /// Native value in the smallest denomination
    pub value: BigUint,
    /// Raw calldata as hex, usually `0x`-prefixed
    pub input: String,
    pub block_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBlock {
    pub height: u64,
    pub hash: String,
    pub transactions: Vec<ChainTransaction>,
}

/// Candidate deposit emitted by the block scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositEvent {
    pub tx_hash: String,
    /// Lowercase watched address that receives the funds
    pub to_address: String,
    pub amount: BigUint,
    /// Token contract; `None` for native value
    pub token_address: Option<String>,
    pub block_height: u64,
}

/// Externally owned view of a custodial address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedAddress {
    pub address: String,
    pub user_id: UserId,
}

/// Lowercase address -> owning user, for one scan tick
#[derive(Debug, Clone, Default)]
pub struct Watchlist {
    owners: HashMap<String, UserId>,
}

impl Watchlist {
    pub fn new<I>(addresses: I) -> Self
    where
        I: IntoIterator<Item = WatchedAddress>,
    {
        let owners = addresses
            .into_iter()
            .map(|w| (w.address.to_lowercase(), w.user_id))
            .collect();
        Self { owners }
    }

    /// Case-insensitive membership check
    pub fn contains(&self, address: &str) -> bool {
        self.owners.contains_key(&address.to_lowercase())
    }

    pub fn owner_of(&self, address: &str) -> Option<UserId> {
        self.owners.get(&address.to_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// One row of the deposit ledger, keyed by `tx_hash`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositRecord {
    pub tx_hash: String,
    pub to_address: String,
    pub user_id: UserId,
    pub amount: BigUint,
    pub token_address: Option<String>,
    pub chain_id: String,
    pub block_height: u64,
    pub confirmations: u64,
    pub status: DepositStatus,
    pub created_at: DateTime<Utc>,
    /// Set only on CREDITED / FAILED
    pub settled_at: Option<DateTime<Utc>>,
}

impl DepositRecord {
    /// New PENDING record for a first sighting
    pub fn from_event(event: &DepositEvent, user_id: UserId, chain_id: &str) -> Self {
        Self {
            tx_hash: event.tx_hash.clone(),
            to_address: event.to_address.clone(),
            user_id,
            amount: event.amount.clone(),
            token_address: event.token_address.clone(),
            chain_id: chain_id.to_string(),
            block_height: event.block_height,
            confirmations: 0,
            status: DepositStatus::Pending,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::new(&self.tx_hash, self.block_height)
    }

    pub fn asset(&self) -> &str {
        self.token_address.as_deref().unwrap_or(NATIVE_ASSET)
    }
}

/// Composite (tx_hash, inclusion height) key of a settled credit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdempotencyKey {
    pub tx_hash: String,
    pub block_height: u64,
}

impl IdempotencyKey {
    pub fn new(tx_hash: &str, block_height: u64) -> Self {
        Self {
            tx_hash: tx_hash.to_string(),
            block_height,
        }
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.tx_hash, self.block_height)
    }
}

/// Durable "credit authorised" marker.
///
/// `applied_at == None` means the credit was claimed but its application was
/// never confirmed (the replay state).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub claimed_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}
