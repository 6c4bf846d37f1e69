/// Contract-level client for the `AuditLog` contract.
///
/// Every operation is best-effort: transport failures, reverts and decode
/// errors are logged and degrade to `None`, `false` or an empty string.
/// Nothing is retried.
///
/// A client built from an unusable configuration is *disconnected*: it
/// holds no backend and every operation returns the degraded value.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256};
use alloy::sol_types::{SolCall, SolEvent, SolValue};
use tracing::{debug, error, info, warn};

use super::contract::{
    AuditLog, ACCESS_CONTROL_GAS, STORE_HASH_GAS, STORE_RECORD_GAS, STORE_RECORD_WITH_ID_GAS,
};
use super::deployment;
use super::rpc::{RpcBackend, RpcConfig, DEFAULT_RPC_URL};
use super::simulated::SimulatedChain;
use super::{hex32, parse_b256, ChainBackend, ChainMode, TxReceipt};
use crate::audit::hashing::ContentHash;
use crate::config::ChainSettings;
use crate::error::{AnchorError, Result};

/// Interval between receipt polls while waiting for a transaction.
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

struct Connection {
    backend: Arc<dyn ChainBackend>,
    contract: Address,
}

pub struct ChainClient {
    mode: ChainMode,
    connection: Option<Connection>,
}

impl ChainClient {
    /// Client over an explicit backend and contract address.
    pub fn new(mode: ChainMode, backend: Arc<dyn ChainBackend>, contract: Address) -> Self {
        Self {
            mode,
            connection: Some(Connection { backend, contract }),
        }
    }

    /// A client that performs no chain calls.
    pub fn disconnected(mode: ChainMode) -> Self {
        Self {
            mode,
            connection: None,
        }
    }

    /// Connect according to `settings`. Configuration problems are logged
    /// and produce a disconnected client.
    pub fn connect(settings: &ChainSettings) -> Self {
        match Self::try_connect(settings) {
            Ok(client) => client,
            Err(e) => {
                error!(mode = ?settings.mode, error = %e, "Chain client unavailable");
                Self::disconnected(settings.mode)
            }
        }
    }

    fn try_connect(settings: &ChainSettings) -> Result<Self> {
        match settings.mode {
            ChainMode::Simulated => {
                let chain = SimulatedChain::with_default_account();
                let contract = chain.contract_address();
                info!(
                    contract = %contract,
                    account = %chain.sender(),
                    "Using in-process simulated chain"
                );
                Ok(Self::new(ChainMode::Simulated, Arc::new(chain), contract))
            }
            ChainMode::Remote => {
                let rpc_url = match (&settings.rpc_url, settings.production) {
                    (Some(url), _) => url.clone(),
                    (None, false) => {
                        warn!(rpc_url = DEFAULT_RPC_URL, "No RPC URL configured, using local default");
                        DEFAULT_RPC_URL.to_string()
                    }
                    (None, true) => {
                        return Err(AnchorError::Config(
                            "BLOCKCHAIN_RPC_URL is required in production".into(),
                        ))
                    }
                };

                let candidates = deployment::candidate_paths(settings.deployment_file.as_deref());
                let contract = resolve_contract(settings.contract_address, &candidates)?;

                let backend = RpcBackend::new(RpcConfig {
                    rpc_url: rpc_url.clone(),
                    private_key_hex: settings.private_key.clone(),
                    chain_id: settings.chain_id,
                })?;
                if backend.can_sign() {
                    info!(
                        rpc_url = %rpc_url,
                        contract = %contract,
                        account = %backend.sender(),
                        "Using remote chain"
                    );
                } else {
                    warn!(
                        rpc_url = %rpc_url,
                        contract = %contract,
                        "No private key configured, chain client is read-only"
                    );
                }
                Ok(Self::new(ChainMode::Remote, Arc::new(backend), contract))
            }
        }
    }

    pub fn mode(&self) -> ChainMode {
        self.mode
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn can_sign(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.backend.can_sign())
    }

    pub fn contract_address(&self) -> Option<Address> {
        self.connection.as_ref().map(|c| c.contract)
    }

    fn connection(&self, op: &str) -> Option<&Connection> {
        if self.connection.is_none() {
            debug!(op, "Chain client not connected");
        }
        self.connection.as_ref()
    }

    /// Submit a transaction, returning its hash.
    async fn transact(&self, op: &str, calldata: Vec<u8>, gas_limit: u64) -> Option<B256> {
        let conn = self.connection(op)?;
        if !conn.backend.can_sign() {
            debug!(op, "No signing account, transaction not sent");
            return None;
        }

        match conn
            .backend
            .send_transaction(conn.contract, Bytes::from(calldata), gas_limit)
            .await
        {
            Ok(tx) => {
                info!(op, backend = conn.backend.name(), tx = %hex32(&tx), "Transaction submitted");
                Some(tx)
            }
            Err(e) => {
                warn!(op, backend = conn.backend.name(), error = %e, "Transaction failed");
                None
            }
        }
    }

    /// Execute a view call, returning the raw return data.
    async fn view(&self, op: &str, calldata: Vec<u8>) -> Option<Bytes> {
        let conn = self.connection(op)?;
        match conn.backend.call(conn.contract, Bytes::from(calldata)).await {
            Ok(out) => Some(out),
            Err(e) => {
                warn!(op, backend = conn.backend.name(), error = %e, "Contract call failed");
                None
            }
        }
    }

    async fn view_bool(&self, op: &str, calldata: Vec<u8>) -> bool {
        let Some(out) = self.view(op, calldata).await else {
            return false;
        };
        bool::abi_decode(&out).unwrap_or_else(|e| {
            warn!(op, error = %e, "Return data decode failed");
            false
        })
    }

    /// Anchor a content hash. Returns the transaction reference without
    /// waiting for confirmation.
    pub async fn send_hash(&self, hash: &ContentHash) -> Option<String> {
        let call = AuditLog::storeHashCall {
            recordHash: B256::from(*hash.as_bytes()),
        };
        self.transact("storeHash", call.abi_encode(), STORE_HASH_GAS)
            .await
            .map(|tx| hex32(&tx))
    }

    /// Store an off-chain reference (e.g. a CID) on chain.
    pub async fn send_record_reference(&self, data: &str) -> Option<String> {
        let call = AuditLog::storeRecordCall { data: data.into() };
        self.transact("storeRecord", call.abi_encode(), STORE_RECORD_GAS)
            .await
            .map(|tx| hex32(&tx))
    }

    /// Store an off-chain reference and, when `wait` is set, wait up to
    /// `timeout` for the receipt and extract the `RecordStored` id.
    pub async fn send_record_reference_and_get_id(
        &self,
        data: &str,
        wait: bool,
        timeout: Duration,
    ) -> (Option<String>, Option<String>) {
        let call = AuditLog::storeRecordCall { data: data.into() };
        let Some(tx) = self
            .transact("storeRecord", call.abi_encode(), STORE_RECORD_WITH_ID_GAS)
            .await
        else {
            return (None, None);
        };
        let tx_ref = hex32(&tx);

        if !wait {
            return (Some(tx_ref), None);
        }
        let Some(conn) = self.connection.as_ref() else {
            return (Some(tx_ref), None);
        };

        let receipt = match tokio::time::timeout(timeout, wait_for_receipt(conn, tx)).await {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                warn!(tx = %tx_ref, error = %e, "Receipt lookup failed");
                return (Some(tx_ref), None);
            }
            Err(_) => {
                warn!(tx = %tx_ref, timeout_secs = timeout.as_secs(), "Timed out waiting for receipt");
                return (Some(tx_ref), None);
            }
        };

        let record_id = receipt
            .logs
            .iter()
            .filter(|log| log.address == conn.contract)
            .find_map(|log| AuditLog::RecordStored::decode_log_data(&log.data).ok())
            .map(|event| hex32(&event.recordId));

        if record_id.is_none() {
            warn!(tx = %tx_ref, success = receipt.success, "No RecordStored event in receipt");
        }
        (Some(tx_ref), record_id)
    }

    /// Whether `hash` has been anchored.
    pub async fn check_hash(&self, hash: &ContentHash) -> bool {
        let call = AuditLog::checkHashCall {
            recordHash: B256::from(*hash.as_bytes()),
        };
        self.view_bool("checkHash", call.abi_encode()).await
    }

    /// Fetch a stored reference by its `0x`-prefixed or bare bytes32 id.
    /// Returns an empty string when missing or on failure.
    pub async fn get_record_by_id(&self, record_id: &str) -> String {
        let id = match parse_b256(record_id) {
            Ok(id) => id,
            Err(e) => {
                warn!(record_id, error = %e, "Invalid record id");
                return String::new();
            }
        };
        let call = AuditLog::getRecordCall { id };
        let Some(out) = self.view("getRecord", call.abi_encode()).await else {
            return String::new();
        };
        String::abi_decode(&out).unwrap_or_default()
    }

    pub async fn get_owner(&self) -> Option<Address> {
        let out = self.view("owner", AuditLog::ownerCall {}.abi_encode()).await?;
        Address::abi_decode(&out)
            .map_err(|e| warn!(error = %e, "Owner decode failed"))
            .ok()
    }

    pub async fn add_authorized(&self, account: Address) -> Option<String> {
        let call = AuditLog::addAuthorizedCall { account };
        self.transact("addAuthorized", call.abi_encode(), ACCESS_CONTROL_GAS)
            .await
            .map(|tx| hex32(&tx))
    }

    pub async fn remove_authorized(&self, account: Address) -> Option<String> {
        let call = AuditLog::removeAuthorizedCall { account };
        self.transact("removeAuthorized", call.abi_encode(), ACCESS_CONTROL_GAS)
            .await
            .map(|tx| hex32(&tx))
    }

    pub async fn is_authorized(&self, account: Address) -> bool {
        let call = AuditLog::isAuthorizedCall { account };
        self.view_bool("isAuthorized", call.abi_encode()).await
    }

    pub async fn give_consent(&self, patient: Address, consent_type: &str) -> Option<String> {
        let call = AuditLog::giveConsentCall {
            patient,
            consentType: consent_type.into(),
        };
        self.transact("giveConsent", call.abi_encode(), ACCESS_CONTROL_GAS)
            .await
            .map(|tx| hex32(&tx))
    }

    pub async fn revoke_consent(&self, patient: Address, consent_type: &str) -> Option<String> {
        let call = AuditLog::revokeConsentCall {
            patient,
            consentType: consent_type.into(),
        };
        self.transact("revokeConsent", call.abi_encode(), ACCESS_CONTROL_GAS)
            .await
            .map(|tx| hex32(&tx))
    }

    pub async fn has_consent(&self, patient: Address, consent_type: &str) -> bool {
        let call = AuditLog::hasConsentCall {
            patient,
            consentType: consent_type.into(),
        };
        self.view_bool("hasConsent", call.abi_encode()).await
    }

    /// Number of blocks including and after the one that mined `tx_ref`.
    /// `None` if the transaction is unknown, pending or failed.
    pub async fn confirmations(&self, tx_ref: &str) -> Option<u64> {
        let conn = self.connection("confirmations")?;
        let tx = parse_b256(tx_ref).ok()?;

        let receipt = match conn.backend.receipt(tx).await {
            Ok(Some(r)) if r.success => r,
            Ok(_) => return None,
            Err(e) => {
                warn!(tx = %tx_ref, error = %e, "Receipt lookup failed");
                return None;
            }
        };
        let head = conn
            .backend
            .block_number()
            .await
            .map_err(|e| warn!(error = %e, "Block number lookup failed"))
            .ok()?;
        Some(head.saturating_sub(receipt.block_number) + 1)
    }
}

async fn wait_for_receipt(conn: &Connection, tx: B256) -> Result<TxReceipt> {
    loop {
        if let Some(receipt) = conn.backend.receipt(tx).await? {
            return Ok(receipt);
        }
        tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
    }
}

/// Contract address from the explicit override, else from the first
/// existing deployment pointer among `candidates`.
fn resolve_contract(configured: Option<Address>, candidates: &[PathBuf]) -> Result<Address> {
    if let Some(addr) = configured {
        return Ok(addr);
    }
    let path = deployment::find_deployment_file(candidates)
        .ok_or_else(|| AnchorError::Config("no deployed contract address file found".into()))?;
    debug!(path = %path.display(), "Loading contract address");
    deployment::read_contract_address(&path)
}
