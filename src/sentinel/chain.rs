use async_trait::async_trait;

use super::error::ScannerError;
use super::types::{ChainBlock, confirmations_at};

/// Read-only access to the chain
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain identifier (e.g. "mainnet", "sepolia")
    fn chain_id(&self) -> &str;

    /// Latest block height known to the node
    async fn current_height(&self) -> Result<u64, ScannerError>;

    /// Fetch a block with full transactions; `Ok(None)` if the node does not
    /// have it
    async fn get_block(&self, height: u64) -> Result<Option<ChainBlock>, ScannerError>;

    /// Blocks mined on top of `included_height`
    async fn confirmations_of(
        &self,
        _tx_hash: &str,
        included_height: u64,
    ) -> Result<u64, ScannerError> {
        let current = self.current_height().await?;
        Ok(confirmations_at(current, included_height))
    }
}
