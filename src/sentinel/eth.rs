//! ETH JSON-RPC client
//!
//! Talks to any Ethereum-compatible node (Geth, Erigon, Anvil) over HTTP.
//! Hex quantities are decoded here so the rest of the pipeline only sees
//! typed values.

use super::chain::ChainClient;
use super::config::EthRpcConfig;
use super::error::ScannerError;
use super::types::{ChainBlock, ChainTransaction};
use async_trait::async_trait;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct EthRpcClient {
    chain_id: String,
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Block as returned by `eth_getBlockByNumber(.., true)`
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    number: String,
    hash: Option<String>,
    #[serde(default)]
    transactions: Vec<RpcTransaction>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    hash: String,
    to: Option<String>,
    #[serde(default)]
    value: String,
    #[serde(default)]
    input: String,
    block_number: Option<String>,
}

impl EthRpcClient {
    pub fn new(chain_id: &str, config: &EthRpcConfig) -> Result<Self, ScannerError> {
        info!(chain_id, url = %config.url, "Initializing ETH RPC client");

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| {
                ScannerError::RpcConnection(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            chain_id: chain_id.to_string(),
            url: config.url.clone(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    /// JSON-RPC call where a `null` result is meaningful
    async fn rpc_call_optional<T, R>(
        &self,
        method: &'static str,
        params: T,
    ) -> Result<Option<R>, ScannerError>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ScannerError::RpcConnection(format!("HTTP request failed: {}", e)))?;

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| ScannerError::RpcConnection(format!("Failed to parse response: {}", e)))?;

        if let Some(error) = rpc_response.error {
            return Err(ScannerError::RpcConnection(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        Ok(rpc_response.result)
    }

    async fn rpc_call<T, R>(&self, method: &'static str, params: T) -> Result<R, ScannerError>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        self.rpc_call_optional(method, params)
            .await?
            .ok_or_else(|| ScannerError::RpcConnection(format!("No result for {}", method)))
    }
}

#[async_trait]
impl ChainClient for EthRpcClient {
    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    async fn current_height(&self) -> Result<u64, ScannerError> {
        let result: String = self.rpc_call("eth_blockNumber", Vec::<String>::new()).await?;
        parse_quantity(&result)
    }

    async fn get_block(&self, height: u64) -> Result<Option<ChainBlock>, ScannerError> {
        let height_hex = format!("0x{:x}", height);
        let block: Option<RpcBlock> = self
            .rpc_call_optional("eth_getBlockByNumber", (height_hex, true))
            .await?;

        let Some(block) = block else {
            debug!(height, "Block not available on node");
            return Ok(None);
        };

        convert_block(block, height).map(Some)
    }
}

fn convert_block(block: RpcBlock, requested: u64) -> Result<ChainBlock, ScannerError> {
    let height = parse_quantity(&block.number)?;
    if height != requested {
        return Err(ScannerError::Parse(format!(
            "Node returned block {} for height {}",
            height, requested
        )));
    }

    let transactions = block
        .transactions
        .into_iter()
        .map(|tx| {
            let value = match parse_big_quantity(&tx.value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(tx_hash = %tx.hash, error = %e, "Unreadable tx value, treating as zero");
                    BigUint::ZERO
                }
            };
            let block_height = tx
                .block_number
                .as_deref()
                .and_then(|n| parse_quantity(n).ok())
                .unwrap_or(height);

            ChainTransaction {
                hash: tx.hash.to_lowercase(),
                to: tx.to,
                value,
                input: tx.input,
                block_height,
            }
        })
        .collect();

    Ok(ChainBlock {
        height,
        hash: block.hash.unwrap_or_default(),
        transactions,
    })
}

/// Decode a `0x`-prefixed hex quantity into u64
pub fn parse_quantity(s: &str) -> Result<u64, ScannerError> {
    let digits = s.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ScannerError::Parse(format!("Invalid quantity {}: {}", s, e)))
}

/// Decode a `0x`-prefixed hex quantity of arbitrary width (wei values)
pub fn parse_big_quantity(s: &str) -> Result<BigUint, ScannerError> {
    let digits = s.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(BigUint::ZERO);
    }
    BigUint::parse_bytes(digits.as_bytes(), 16)
        .ok_or_else(|| ScannerError::Parse(format!("Invalid quantity {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_config() -> EthRpcConfig {
        EthRpcConfig {
            url: "http://127.0.0.1:8545".to_string(),
            timeout_ms: 1_000,
        }
    }

    #[test]
    fn test_client_creation() {
        let client = EthRpcClient::new("anvil", &rpc_config()).unwrap();
        assert_eq!(client.chain_id(), "anvil");
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert_eq!(parse_quantity("0x10d4f").unwrap(), 68943);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_parse_big_quantity_beyond_u128() {
        let max = format!("0x{}", "f".repeat(64));
        let parsed = parse_big_quantity(&max).unwrap();
        assert_eq!(parsed.bits(), 256);
        assert_eq!(
            parse_big_quantity("0xde0b6b3a7640000").unwrap(),
            BigUint::from(1_000_000_000_000_000_000u64)
        );
    }

    #[test]
    fn test_convert_block_from_rpc_json() {
        let json = r#"{
            "number": "0x5f",
            "hash": "0xfeed",
            "transactions": [
                {
                    "hash": "0xAB",
                    "to": "0x2222222222222222222222222222222222222222",
                    "value": "0xde0b6b3a7640000",
                    "input": "0x",
                    "blockNumber": "0x5f"
                },
                {
                    "hash": "0xcd",
                    "to": null,
                    "value": "0x0",
                    "input": "0x6080"
                }
            ]
        }"#;

        let block: RpcBlock = serde_json::from_str(json).unwrap();
        let block = convert_block(block, 95).unwrap();

        assert_eq!(block.height, 95);
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.transactions[0].hash, "0xab");
        assert_eq!(
            block.transactions[0].value,
            BigUint::from(1_000_000_000_000_000_000u64)
        );
        assert_eq!(block.transactions[1].to, None);
        assert_eq!(block.transactions[1].block_height, 95);
    }

    #[test]
    fn test_convert_block_rejects_wrong_height() {
        let block: RpcBlock =
            serde_json::from_str(r#"{"number": "0x60", "hash": "0x1", "transactions": []}"#)
                .unwrap();
        assert!(convert_block(block, 95).is_err());
    }
}
