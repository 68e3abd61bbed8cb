//! Block Scanner
//!
//! Maps a fetched block plus the current watchlist to candidate deposit
//! events. Pure: no I/O, no logging, never fails. Unreachable data sources
//! are the caller's problem.

use num_bigint::BigUint;

use super::types::{ChainBlock, ChainTransaction, DepositEvent, Watchlist};

/// `transfer(address,uint256)` selector
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// selector + address word + amount word
pub const TRANSFER_CALL_LEN: usize = 4 + 32 + 32;

/// Outcome of inspecting a transaction's calldata
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Calldata {
    /// Not a token transfer (empty input or another method)
    Plain,
    /// Well-formed `transfer(address,uint256)`
    Transfer { recipient: String, amount: BigUint },
    /// Non-hex, or carries the selector but is too short to decode
    Malformed,
}

/// Decode calldata as an ERC-20 `transfer` call.
///
/// Recipient is the low 20 bytes of the first word, lowercase `0x` hex.
/// Amount is the big-endian second word. Bytes past the second word are
/// ignored.
pub fn decode_calldata(input: &str) -> Calldata {
    let hex_body = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);

    let Ok(bytes) = hex::decode(hex_body) else {
        return Calldata::Malformed;
    };

    if bytes.len() < TRANSFER_SELECTOR.len() || bytes[..4] != TRANSFER_SELECTOR {
        return Calldata::Plain;
    }

    if bytes.len() < TRANSFER_CALL_LEN {
        return Calldata::Malformed;
    }

    let recipient = format!("0x{}", hex::encode(&bytes[16..36]));
    let amount = BigUint::from_bytes_be(&bytes[36..68]);

    Calldata::Transfer { recipient, amount }
}

/// Scan one block for deposits into watched addresses.
pub fn scan(block: &ChainBlock, watchlist: &Watchlist) -> Vec<DepositEvent> {
    if watchlist.is_empty() {
        return Vec::new();
    }

    block
        .transactions
        .iter()
        .filter_map(|tx| scan_transaction(tx, watchlist))
        .collect()
}

fn scan_transaction(tx: &ChainTransaction, watchlist: &Watchlist) -> Option<DepositEvent> {
    let to = tx.to.as_deref()?.to_lowercase();

    match decode_calldata(&tx.input) {
        Calldata::Malformed => None,
        Calldata::Transfer { recipient, amount }
            if watchlist.contains(&recipient) && amount > BigUint::ZERO =>
        {
            Some(DepositEvent {
                tx_hash: tx.hash.clone(),
                to_address: recipient,
                amount,
                token_address: Some(to),
                block_height: tx.block_height,
            })
        }
        _ if tx.value > BigUint::ZERO && watchlist.contains(&to) => Some(DepositEvent {
            tx_hash: tx.hash.clone(),
            to_address: to,
            amount: tx.value.clone(),
            token_address: None,
            block_height: tx.block_height,
        }),
        _ => None,
    }
}
