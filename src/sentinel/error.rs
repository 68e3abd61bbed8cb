use thiserror::Error;

/// Chain access failures. All of these are transient from the pipeline's
/// point of view: the caller logs them and retries on the next tick.
#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    #[error("Block not found at height {0}")]
    BlockNotFound(u64),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Persistence failures (deposit ledger, idempotency store, cursor store)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Idempotency key not found: {0}")]
    KeyNotFound(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum CreditError {
    #[error("Credit rejected: {0}")]
    Rejected(String),

    #[error("Credit backend unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("Scanner error: {0}")]
    Scanner(#[from] ScannerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Credit error: {0}")]
    Credit(#[from] CreditError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SentinelError {
    /// Chain access failures are retried on the next tick rather than
    /// failing the record being processed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SentinelError::Scanner(_))
    }
}
