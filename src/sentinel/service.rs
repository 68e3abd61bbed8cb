//! Deposit Sentinel service
//!
//! Wires the scan loop, confirmation processor and reconciler together and
//! owns their lifecycle.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::chain::ChainClient;
use super::config::SentinelConfig;
use super::confirmation::Settler;
use super::credit::CreditSink;
use super::cursor::CursorStore;
use super::error::SentinelError;
use super::idempotency::IdempotencyStore;
use super::ledger::DepositLedger;
use super::processor::ConfirmationProcessor;
use super::queue::ingestion_queue;
use super::reconciler::Reconciler;
use super::registry::AddressRegistry;
use super::shutdown::ShutdownSignal;
use super::worker::{ScanLoop, resolve_next_height};

/// Collaborators the pipeline runs against
#[derive(Clone)]
pub struct SentinelDeps {
    pub chain: Arc<dyn ChainClient>,
    pub registry: Arc<dyn AddressRegistry>,
    pub ledger: Arc<dyn DepositLedger>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub sink: Arc<dyn CreditSink>,
    pub cursor_store: Option<Arc<dyn CursorStore>>,
}

pub struct DepositSentinel;

impl DepositSentinel {
    /// Resolve the starting cursor and spawn the three workers
    pub async fn start(
        config: &SentinelConfig,
        deps: SentinelDeps,
    ) -> Result<SentinelHandle, SentinelError> {
        config.validate()?;

        let cursor_store = if config.persist_cursor {
            deps.cursor_store.clone()
        } else {
            None
        };

        let next_height = resolve_next_height(
            deps.chain.as_ref(),
            cursor_store.as_deref(),
            config.start_block,
        )
        .await?;

        let settler = Arc::new(Settler::new(
            deps.ledger.clone(),
            deps.idempotency.clone(),
            deps.sink.clone(),
            config.required_confirmations,
            config.claim_timeout(),
        ));
        let (sender, receiver) = ingestion_queue();
        let shutdown = Arc::new(ShutdownSignal::new());

        let scan_loop = ScanLoop::new(
            deps.chain.clone(),
            deps.registry.clone(),
            deps.ledger.clone(),
            cursor_store,
            sender,
            config.required_confirmations,
            config.scan_interval(),
            next_height,
        );
        let processor = ConfirmationProcessor::new(
            deps.chain.clone(),
            settler.clone(),
            receiver,
            config.queue_poll_timeout(),
        );
        let reconciler = Reconciler::new(
            deps.chain.clone(),
            deps.ledger.clone(),
            settler,
            config.reconcile_interval(),
        );

        let tasks = vec![
            ("scan_loop", tokio::spawn(scan_loop.run(shutdown.clone()))),
            ("processor", tokio::spawn(processor.run(shutdown.clone()))),
            ("reconciler", tokio::spawn(reconciler.run(shutdown.clone()))),
        ];

        info!(
            chain_id = deps.chain.chain_id(),
            next_height,
            required_confirmations = config.required_confirmations,
            "Deposit sentinel started"
        );

        Ok(SentinelHandle {
            shutdown,
            tasks,
            join_timeout: config.shutdown_join_timeout(),
        })
    }
}

pub struct SentinelHandle {
    shutdown: Arc<ShutdownSignal>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    join_timeout: Duration,
}

impl SentinelHandle {
    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        self.shutdown.clone()
    }

    /// Signal every worker and wait for each one, up to the join timeout.
    /// A worker still running after that is aborted.
    pub async fn shutdown(self) {
        info!("Shutting down deposit sentinel");
        self.shutdown.request_shutdown();

        for (name, mut handle) in self.tasks {
            match tokio::time::timeout(self.join_timeout, &mut handle).await {
                Ok(Ok(())) => info!(worker = name, "Worker stopped"),
                Ok(Err(e)) => error!(worker = name, error = %e, "Worker panicked"),
                Err(_) => {
                    warn!(
                        worker = name,
                        timeout_ms = self.join_timeout.as_millis() as u64,
                        "Worker did not stop in time, aborting"
                    );
                    handle.abort();
                }
            }
        }
    }
}
