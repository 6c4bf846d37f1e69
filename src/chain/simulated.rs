/// In-process simulated chain running the `AuditLog` contract.
///
/// Every transaction is mined into its own block immediately, so receipts
/// are available as soon as `send_transaction` returns. Contract state
/// follows the deployed contract's access rules:
/// - the owner is authorized at deployment and alone manages the list
/// - hash/record storage and consent changes require an authorized sender
///
/// A reverted transaction still gets a hash and a failed receipt, as on a
/// real chain. A reverted view call returns an error.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy::primitives::{keccak256, Address, Bytes, B256};
use alloy::sol_types::{SolEvent, SolInterface, SolValue};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::contract::AuditLog::{self, AuditLogCalls};
use super::{ChainBackend, ReceiptLog, TxReceipt};
use crate::error::{AnchorError, Result};

/// First well-known development account, used as the default signer.
pub const DEFAULT_DEV_ACCOUNT: Address = Address::new([
    0xf3, 0x9f, 0xd6, 0xe5, 0x1a, 0xad, 0x88, 0xf6, 0xf4, 0xce, 0x6a, 0xb8, 0x82, 0x72, 0x79, 0xcf,
    0xff, 0xb9, 0x22, 0x66,
]);

#[derive(Debug, Default)]
struct Ledger {
    block_number: u64,
    tx_count: u64,
    hashes: HashSet<B256>,
    records: HashMap<B256, String>,
    record_count: u64,
    authorized: HashSet<Address>,
    consents: HashSet<(Address, String)>,
    receipts: HashMap<B256, TxReceipt>,
}

/// Simulated chain handle. Clones made with `impersonate` share state.
#[derive(Clone)]
pub struct SimulatedChain {
    contract: Address,
    owner: Address,
    sender: Address,
    ledger: Arc<Mutex<Ledger>>,
}

impl SimulatedChain {
    /// Deploy a fresh contract owned by `owner`.
    pub fn new(owner: Address) -> Self {
        let mut ledger = Ledger::default();
        ledger.authorized.insert(owner);
        // Deployment occupies the first block and the owner's first nonce.
        ledger.block_number = 1;
        ledger.tx_count = 1;

        Self {
            contract: owner.create(0),
            owner,
            sender: owner,
            ledger: Arc::new(Mutex::new(ledger)),
        }
    }

    pub fn with_default_account() -> Self {
        Self::new(DEFAULT_DEV_ACCOUNT)
    }

    /// Address of the deployed `AuditLog` contract.
    pub fn contract_address(&self) -> Address {
        self.contract
    }

    /// A handle that sends transactions from `account` against the same state.
    pub fn impersonate(&self, account: Address) -> Self {
        Self {
            sender: account,
            ..self.clone()
        }
    }

    fn ensure_contract(&self, to: Address) -> Result<()> {
        if to != self.contract {
            return Err(AnchorError::Contract(format!("no contract deployed at {to}")));
        }
        Ok(())
    }
}

fn revert(reason: &str) -> AnchorError {
    AnchorError::Contract(format!("execution reverted: {reason}"))
}

impl Ledger {
    /// Execute a state-changing call. Returns the logs it emitted.
    fn execute(
        &mut self,
        contract: Address,
        owner: Address,
        sender: Address,
        call: AuditLogCalls,
    ) -> Result<Vec<ReceiptLog>> {
        let authorized = self.authorized.contains(&sender);
        match call {
            AuditLogCalls::storeHash(c) => {
                if !authorized {
                    return Err(revert("not authorized"));
                }
                self.hashes.insert(c.recordHash);
                Ok(Vec::new())
            }
            AuditLogCalls::storeRecord(c) => {
                if !authorized {
                    return Err(revert("not authorized"));
                }
                self.record_count += 1;
                let mut preimage = c.data.as_bytes().to_vec();
                preimage.extend_from_slice(sender.as_slice());
                preimage.extend_from_slice(&self.record_count.to_be_bytes());
                let record_id = keccak256(&preimage);
                self.records.insert(record_id, c.data);

                let event = AuditLog::RecordStored { recordId: record_id };
                Ok(vec![ReceiptLog {
                    address: contract,
                    data: event.encode_log_data(),
                }])
            }
            AuditLogCalls::addAuthorized(c) => {
                if sender != owner {
                    return Err(revert("only owner"));
                }
                self.authorized.insert(c.account);
                Ok(Vec::new())
            }
            AuditLogCalls::removeAuthorized(c) => {
                if sender != owner {
                    return Err(revert("only owner"));
                }
                self.authorized.remove(&c.account);
                Ok(Vec::new())
            }
            AuditLogCalls::giveConsent(c) => {
                if !authorized {
                    return Err(revert("not authorized"));
                }
                self.consents.insert((c.patient, c.consentType));
                Ok(Vec::new())
            }
            AuditLogCalls::revokeConsent(c) => {
                if !authorized {
                    return Err(revert("not authorized"));
                }
                self.consents.remove(&(c.patient, c.consentType));
                Ok(Vec::new())
            }
            _ => Err(revert("view function sent as transaction")),
        }
    }

    /// Execute a view call and ABI-encode its return value.
    fn view(&self, owner: Address, call: AuditLogCalls) -> Result<Vec<u8>> {
        let out = match call {
            AuditLogCalls::getRecord(c) => self
                .records
                .get(&c.id)
                .cloned()
                .unwrap_or_default()
                .abi_encode(),
            AuditLogCalls::checkHash(c) => self.hashes.contains(&c.recordHash).abi_encode(),
            AuditLogCalls::owner(_) => owner.abi_encode(),
            AuditLogCalls::isAuthorized(c) => self.authorized.contains(&c.account).abi_encode(),
            AuditLogCalls::hasConsent(c) => self
                .consents
                .contains(&(c.patient, c.consentType))
                .abi_encode(),
            _ => return Err(revert("state-changing function called as view")),
        };
        Ok(out)
    }
}

#[async_trait]
impl ChainBackend for SimulatedChain {
    fn name(&self) -> &str {
        "simulated"
    }

    fn sender(&self) -> Address {
        self.sender
    }

    fn can_sign(&self) -> bool {
        true
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes> {
        self.ensure_contract(to)?;
        let call = AuditLogCalls::abi_decode(&calldata)
            .map_err(|e| AnchorError::Contract(format!("calldata decode failed: {e}")))?;
        let ledger = self.ledger.lock().await;
        ledger.view(self.owner, call).map(Bytes::from)
    }

    async fn send_transaction(&self, to: Address, calldata: Bytes, _gas_limit: u64) -> Result<B256> {
        self.ensure_contract(to)?;
        let call = AuditLogCalls::abi_decode(&calldata)
            .map_err(|e| AnchorError::Contract(format!("calldata decode failed: {e}")))?;

        let mut ledger = self.ledger.lock().await;
        ledger.tx_count += 1;
        let mut preimage = self.sender.to_vec();
        preimage.extend_from_slice(&ledger.tx_count.to_be_bytes());
        preimage.extend_from_slice(&calldata);
        let tx_hash = keccak256(&preimage);

        let outcome = ledger.execute(self.contract, self.owner, self.sender, call);
        ledger.block_number += 1;
        let block_number = ledger.block_number;

        let receipt = match outcome {
            Ok(logs) => TxReceipt {
                tx_hash,
                block_number,
                success: true,
                logs,
            },
            Err(e) => {
                debug!(tx = %tx_hash, error = %e, "Simulated transaction reverted");
                TxReceipt {
                    tx_hash,
                    block_number,
                    success: false,
                    logs: Vec::new(),
                }
            }
        };
        ledger.receipts.insert(tx_hash, receipt);

        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>> {
        Ok(self.ledger.lock().await.receipts.get(&tx_hash).cloned())
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.ledger.lock().await.block_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::sol_types::SolCall;

    #[tokio::test]
    async fn test_store_and_check_hash() {
        let chain = SimulatedChain::with_default_account();
        let to = chain.contract_address();
        let hash = B256::repeat_byte(7);

        let check = AuditLog::checkHashCall { recordHash: hash }.abi_encode();
        let before = chain.call(to, check.clone().into()).await.unwrap();
        assert!(!bool::abi_decode(&before).unwrap());

        let store = AuditLog::storeHashCall { recordHash: hash }.abi_encode();
        let tx = chain.send_transaction(to, store.into(), 200_000).await.unwrap();
        let receipt = chain.receipt(tx).await.unwrap().unwrap();
        assert!(receipt.success);

        let after = chain.call(to, check.into()).await.unwrap();
        assert!(bool::abi_decode(&after).unwrap());
    }

    #[tokio::test]
    async fn test_unauthorized_sender_reverts() {
        let chain = SimulatedChain::with_default_account();
        let stranger = chain.impersonate(Address::repeat_byte(0x42));
        let store = AuditLog::storeHashCall {
            recordHash: B256::repeat_byte(1),
        }
        .abi_encode();

        let tx = stranger
            .send_transaction(chain.contract_address(), store.into(), 200_000)
            .await
            .unwrap();
        let receipt = chain.receipt(tx).await.unwrap().unwrap();
        assert!(!receipt.success);
    }

    #[tokio::test]
    async fn test_store_record_emits_event() {
        let chain = SimulatedChain::with_default_account();
        let store = AuditLog::storeRecordCall {
            data: "bafy-cid".into(),
        }
        .abi_encode();
        let tx = chain
            .send_transaction(chain.contract_address(), store.into(), 300_000)
            .await
            .unwrap();

        let receipt = chain.receipt(tx).await.unwrap().unwrap();
        assert_eq!(receipt.logs.len(), 1);
        let event = AuditLog::RecordStored::decode_log_data(&receipt.logs[0].data).unwrap();

        let get = AuditLog::getRecordCall { id: event.recordId }.abi_encode();
        let out = chain.call(chain.contract_address(), get.into()).await.unwrap();
        assert_eq!(String::abi_decode(&out).unwrap(), "bafy-cid");
    }

    #[tokio::test]
    async fn test_blocks_advance_per_transaction() {
        let chain = SimulatedChain::with_default_account();
        let start = chain.block_number().await.unwrap();
        let store = AuditLog::storeHashCall {
            recordHash: B256::ZERO,
        }
        .abi_encode();
        chain
            .send_transaction(chain.contract_address(), store.into(), 200_000)
            .await
            .unwrap();
        assert_eq!(chain.block_number().await.unwrap(), start + 1);
    }

    #[tokio::test]
    async fn test_wrong_contract_address() {
        let chain = SimulatedChain::with_default_account();
        let check = AuditLog::ownerCall {}.abi_encode();
        assert!(chain.call(Address::ZERO, check.into()).await.is_err());
    }
}
