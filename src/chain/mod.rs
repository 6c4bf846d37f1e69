/// Ethereum-compatible chain access for the audit trail.
///
/// The `ChainBackend` trait is the seam between the contract-level
/// `ChainClient` and the node it talks to. Two backends exist:
/// - `SimulatedChain`: in-process contract emulation, mined instantly
/// - `RpcBackend`: a remote node over JSON-RPC with local signing
///
/// Which one is used is an explicit configuration choice (`ChainMode`).
pub mod client;
pub mod contract;
pub mod deployment;
pub mod rpc;
pub mod simulated;

use alloy::primitives::{Address, Bytes, LogData, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AnchorError, Result};

pub use client::ChainClient;

/// How the chain client reaches a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ChainMode {
    /// In-process simulated chain with a funded default account.
    Simulated,
    /// Remote JSON-RPC endpoint.
    Remote,
}

/// A log entry from a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptLog {
    /// Contract that emitted the log.
    pub address: Address,
    pub data: LogData,
}

/// Confirmation of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    /// False when the transaction reverted.
    pub success: bool,
    pub logs: Vec<ReceiptLog>,
}

#[async_trait]
pub trait ChainBackend: Send + Sync {
    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    /// Account transactions are sent from.
    fn sender(&self) -> Address;

    /// Whether this backend can submit transactions.
    fn can_sign(&self) -> bool;

    /// Execute a read-only call and return the raw return data.
    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes>;

    /// Sign and submit a transaction. Returns the transaction hash without
    /// waiting for it to be mined.
    async fn send_transaction(&self, to: Address, calldata: Bytes, gas_limit: u64) -> Result<B256>;

    /// Receipt for a transaction, `None` while it is pending or unknown.
    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>>;

    /// Latest block number.
    async fn block_number(&self) -> Result<u64>;
}

/// `0x`-prefixed lowercase hex of a 32-byte value.
pub fn hex32(value: &B256) -> String {
    format!("0x{}", hex::encode(value.as_slice()))
}

/// Parse a `0x`-prefixed or bare 32-byte hex value.
pub fn parse_b256(s: &str) -> Result<B256> {
    s.trim()
        .parse::<B256>()
        .map_err(|e| AnchorError::InvalidHash(format!("{s}: {e}")))
}

/// Parse an account address, checksummed or not.
pub fn parse_address(s: &str) -> Result<Address> {
    let trimmed = s.trim();
    trimmed
        .parse::<Address>()
        .map_err(|e| AnchorError::InvalidAddress(format!("{trimmed}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex32_roundtrip() {
        let value = B256::repeat_byte(0xab);
        let text = hex32(&value);
        assert_eq!(text.len(), 66);
        assert_eq!(parse_b256(&text).unwrap(), value);
        assert_eq!(parse_b256(text.trim_start_matches("0x")).unwrap(), value);
    }

    #[test]
    fn test_parse_address_accepts_any_case() {
        let lower = parse_address("0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266").unwrap();
        let checksummed = parse_address("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").unwrap();
        assert_eq!(lower, checksummed);
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("not an address").is_err());
    }
}
