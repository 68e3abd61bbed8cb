//! Deposit Sentinel
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌───────────┐   ┌────────────┐
//! │ Scan loop  │──▶│  Ingest   │──▶│ Processor │──▶│ CreditSink │
//! │ (cursor)   │   │  queue    │   │           │   │            │
//! └─────┬──────┘   └───────────┘   └─────┬─────┘   └────────────┘
//!       │                                │  ▲
//!       ▼                                ▼  │
//! ┌────────────┐                   ┌──────────────┐
//! │  Deposit   │◀──── Reconciler ──│ Idempotency  │
//! │  ledger    │                   │    store     │
//! └────────────┘                   └──────────────┘
//! ```
//!
//! Usage: `deposit-sentinel [--env dev] [--config path]`

use anyhow::{Context, Result};
use std::sync::Arc;

use deposit_sentinel::config::AppConfig;
use deposit_sentinel::db::Database;
use deposit_sentinel::sentinel::{
    DepositSentinel, EthRpcClient, LogCreditSink, MemoryDepositLedger, MemoryIdempotencyStore,
    PgAddressRegistry, PgBalanceCreditSink, PgCursorStore, PgDepositLedger, PgIdempotencyStore,
    SentinelDeps, StaticAddressRegistry,
};

fn get_arg(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn get_env() -> String {
    get_arg(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn load_config() -> Result<AppConfig> {
    let config = match get_arg(&["--config", "-c"]) {
        Some(path) => AppConfig::from_file(&path),
        None => AppConfig::load(&get_env()),
    };
    Ok(config?)
}

async fn build_deps(config: &AppConfig) -> Result<SentinelDeps> {
    let sentinel = &config.sentinel;
    let chain = Arc::new(
        EthRpcClient::new(&sentinel.chain_id, &sentinel.rpc).context("Failed to build RPC client")?,
    );

    let Some(url) = &config.postgres_url else {
        tracing::warn!(
            watched = sentinel.watched.len(),
            "No postgres_url configured, using in-memory stores (state is lost on exit)"
        );
        return Ok(SentinelDeps {
            chain,
            registry: Arc::new(StaticAddressRegistry::new(sentinel.static_watchlist())),
            ledger: Arc::new(MemoryDepositLedger::new()),
            idempotency: Arc::new(MemoryIdempotencyStore::new()),
            sink: Arc::new(LogCreditSink),
            cursor_store: None,
        });
    };

    let db = Database::connect(url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    db.init_schema()
        .await
        .context("Failed to initialize deposit schema")?;
    let pool = db.pool().clone();

    Ok(SentinelDeps {
        chain,
        registry: Arc::new(PgAddressRegistry::new(pool.clone(), &sentinel.chain_id)),
        ledger: Arc::new(PgDepositLedger::new(pool.clone())),
        idempotency: Arc::new(PgIdempotencyStore::new(pool.clone())),
        sink: Arc::new(PgBalanceCreditSink::new(pool.clone())),
        cursor_store: Some(Arc::new(PgCursorStore::new(pool))),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let app_config = load_config()?;
    let _log_guard = deposit_sentinel::logging::init_logging(&app_config);

    tracing::info!(
        env = %get_env(),
        chain_id = %app_config.sentinel.chain_id,
        "Starting deposit sentinel"
    );

    let deps = build_deps(&app_config).await?;
    let handle = DepositSentinel::start(&app_config.sentinel, deps)
        .await
        .context("Failed to start deposit sentinel")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Ctrl-C received");

    handle.shutdown().await;
    tracing::info!("Deposit sentinel stopped");
    Ok(())
}
