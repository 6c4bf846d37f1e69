/// Remote chain access over raw Ethereum JSON-RPC.
///
/// Transactions are legacy (EIP-155) transactions signed locally with the
/// configured private key and submitted with `eth_sendRawTransaction`.
/// Without a key the backend can still serve view calls and receipts.
use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, Bytes, LogData, TxKind, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::{parse_address, parse_b256, ChainBackend, ReceiptLog, TxReceipt};
use crate::error::{AnchorError, Result};

/// Local development node.
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// Configuration for the JSON-RPC backend.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// JSON-RPC endpoint (e.g., a local node, Infura, Alchemy).
    pub rpc_url: String,
    /// Private key (hex, with or without 0x prefix) used for signing.
    pub private_key_hex: Option<String>,
    /// Chain ID for EIP-155 signing. Queried from the node when absent.
    pub chain_id: Option<u64>,
}

pub struct RpcBackend {
    config: RpcConfig,
    client: Client,
    signer: Option<PrivateKeySigner>,
    chain_id: OnceCell<u64>,
}

/// Simplified JSON-RPC response.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
    #[serde(default)]
    logs: Vec<RpcLog>,
}

#[derive(Debug, Deserialize)]
struct RpcLog {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
    data: String,
}

/// Parse a hex quantity such as `0x1a`.
fn parse_quantity(s: &str) -> Result<u64> {
    let digits = s.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| AnchorError::RpcResponse(format!("invalid quantity {s}: {e}")))
}

fn parse_hex_bytes(s: &str) -> Result<Bytes> {
    let digits = s.trim_start_matches("0x");
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| AnchorError::RpcResponse(format!("invalid hex data: {e}")))
}

impl RpcReceipt {
    fn into_receipt(self) -> Result<Option<TxReceipt>> {
        // Nodes may return a receipt object for a pending transaction.
        let Some(block) = self.block_number else {
            return Ok(None);
        };

        let logs = self
            .logs
            .into_iter()
            .map(|log| {
                let topics = log
                    .topics
                    .iter()
                    .map(|t| parse_b256(t))
                    .collect::<Result<Vec<_>>>()?;
                Ok(ReceiptLog {
                    address: parse_address(&log.address)?,
                    data: LogData::new_unchecked(topics, parse_hex_bytes(&log.data)?),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(TxReceipt {
            tx_hash: parse_b256(&self.transaction_hash)?,
            block_number: parse_quantity(&block)?,
            // Pre-Byzantium receipts carry no status field.
            success: self.status.as_deref().map_or(true, |s| s == "0x1"),
            logs,
        }))
    }
}

impl RpcBackend {
    pub fn new(config: RpcConfig) -> Result<Self> {
        let signer = match config.private_key_hex.as_deref() {
            Some(key) if !key.trim().is_empty() => Some(
                key.trim()
                    .parse::<PrivateKeySigner>()
                    .map_err(|e| AnchorError::Config(format!("invalid private key: {e}")))?,
            ),
            _ => None,
        };

        let chain_id = OnceCell::new_with(config.chain_id);

        Ok(Self {
            config,
            client: Client::new(),
            signer,
            chain_id,
        })
    }

    /// Send a JSON-RPC request; a `null` result is returned as `None`.
    async fn rpc_request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp: JsonRpcResponse<T> = self
            .client
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnchorError::Rpc(format!("{method}: {e}")))?
            .json()
            .await
            .map_err(|e| AnchorError::Serialization(format!("{method} response parse error: {e}")))?;

        if let Some(err) = resp.error {
            return Err(AnchorError::RpcResponse(format!("{method}: {}", err.message)));
        }

        Ok(resp.result)
    }

    async fn rpc_call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        self.rpc_request(method, params)
            .await?
            .ok_or_else(|| AnchorError::RpcResponse(format!("{method}: empty result")))
    }

    async fn chain_id(&self) -> Result<u64> {
        self.chain_id
            .get_or_try_init(|| async {
                let id: String = self.rpc_call("eth_chainId", serde_json::json!([])).await?;
                parse_quantity(&id)
            })
            .await
            .copied()
    }
}

#[async_trait]
impl ChainBackend for RpcBackend {
    fn name(&self) -> &str {
        "json-rpc"
    }

    fn sender(&self) -> Address {
        self.signer.as_ref().map_or(Address::ZERO, |s| s.address())
    }

    fn can_sign(&self) -> bool {
        self.signer.is_some()
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes> {
        let mut tx = serde_json::json!({
            "to": format!("{to:?}"),
            "data": format!("0x{}", hex::encode(&calldata)),
        });
        if let Some(signer) = &self.signer {
            tx["from"] = serde_json::json!(format!("{:?}", signer.address()));
        }

        let out: String = self
            .rpc_call("eth_call", serde_json::json!([tx, "latest"]))
            .await
            .map_err(|e| match e {
                AnchorError::RpcResponse(msg) => AnchorError::Contract(msg),
                other => other,
            })?;
        parse_hex_bytes(&out)
    }

    async fn send_transaction(&self, to: Address, calldata: Bytes, gas_limit: u64) -> Result<B256> {
        let signer = self.signer.as_ref().ok_or(AnchorError::NoSigner)?;
        let from_address = signer.address();

        let nonce_hex: String = self
            .rpc_call(
                "eth_getTransactionCount",
                serde_json::json!([format!("{from_address:?}"), "pending"]),
            )
            .await?;
        let nonce = parse_quantity(&nonce_hex)?;

        let gas_price_hex: String = self.rpc_call("eth_gasPrice", serde_json::json!([])).await?;
        let gas_price = u128::from_str_radix(gas_price_hex.trim_start_matches("0x"), 16)
            .map_err(|e| AnchorError::RpcResponse(format!("invalid gas price: {e}")))?;

        let tx = TxLegacy {
            chain_id: Some(self.chain_id().await?),
            nonce,
            gas_price,
            gas_limit,
            to: TxKind::Call(to),
            value: U256::ZERO,
            input: calldata,
        };

        let sig_hash = tx.signature_hash();
        let sig = signer
            .sign_hash(&sig_hash)
            .await
            .map_err(|e| AnchorError::Signing(e.to_string()))?;

        let signed = TxEnvelope::Legacy(tx.into_signed(sig));

        let mut raw_tx = Vec::new();
        signed.encode_2718(&mut raw_tx);
        let raw_hex = format!("0x{}", hex::encode(&raw_tx));

        let tx_hash: String = self
            .rpc_call("eth_sendRawTransaction", serde_json::json!([raw_hex]))
            .await?;

        parse_b256(&tx_hash)
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>> {
        let receipt: Option<RpcReceipt> = self
            .rpc_request(
                "eth_getTransactionReceipt",
                serde_json::json!([super::hex32(&tx_hash)]),
            )
            .await?;

        match receipt {
            Some(r) => r.into_receipt(),
            None => Ok(None),
        }
    }

    async fn block_number(&self) -> Result<u64> {
        let block: String = self.rpc_call("eth_blockNumber", serde_json::json!([])).await?;
        parse_quantity(&block)
    }
}
