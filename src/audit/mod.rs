/// Hash anchoring service for medical records.
///
/// Turns a domain record mutation into a tamper-evident audit row:
///
/// ```text
/// record ──▶ content hash ──┬──▶ AuditLog.storeHash (best-effort)
///                           └──▶ audit row (+ tx reference if sent)
/// ```
///
/// The chain is never on the critical path. If it is unreachable the audit
/// row is still written with no transaction reference, and the caller's
/// primary write is unaffected.
pub mod hashing;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use self::hashing::{compute_content_hash, ContentHash, DEFAULT_EXCLUDED_FIELDS};
use self::store::AuditStore;
use crate::chain::ChainClient;
use crate::error::{AnchorError, Result};
use crate::state::models::{AuditRecord, NewAuditRecord};

/// A host-application record that can be anchored.
pub trait DomainRecord {
    /// Type name stored on the audit row (e.g. "Patient").
    fn record_type(&self) -> &str;

    fn object_id(&self) -> i64;

    /// Field name to value. Identity and anchor columns may be included;
    /// they are excluded from the hash.
    fn fields(&self) -> Map<String, Value>;

    /// Update the denormalized anchor columns.
    fn set_anchor(&mut self, content_hash: &str, tx_ref: Option<&str>);
}

/// A record described entirely by its field map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericRecord {
    pub record_type: String,
    pub object_id: i64,
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub last_content_hash: Option<String>,
    #[serde(default)]
    pub last_chain_tx_reference: Option<String>,
}

impl GenericRecord {
    pub fn new(record_type: impl Into<String>, object_id: i64, fields: Map<String, Value>) -> Self {
        Self {
            record_type: record_type.into(),
            object_id,
            fields,
            last_content_hash: None,
            last_chain_tx_reference: None,
        }
    }
}

impl DomainRecord for GenericRecord {
    fn record_type(&self) -> &str {
        &self.record_type
    }

    fn object_id(&self) -> i64 {
        self.object_id
    }

    fn fields(&self) -> Map<String, Value> {
        self.fields.clone()
    }

    fn set_anchor(&mut self, content_hash: &str, tx_ref: Option<&str>) {
        self.last_content_hash = Some(content_hash.to_string());
        self.last_chain_tx_reference = tx_ref.map(str::to_string);
    }
}

/// Result of anchoring one record.
#[derive(Debug, Clone, Serialize)]
pub struct AnchorOutcome {
    pub record_hash: ContentHash,
    pub tx_hash: Option<String>,
    pub audit: AuditRecord,
}

/// Result of checking an audit row against the chain.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub id: i64,
    pub record_hash: String,
    pub tx_hash: Option<String>,
    pub on_chain: bool,
    pub confirmations: Option<u64>,
}

/// Result of storing an off-chain reference.
#[derive(Debug, Clone, Serialize)]
pub struct StoredReference {
    pub tx_hash: Option<String>,
    pub record_id: Option<String>,
}

pub struct AnchorService {
    chain: Arc<ChainClient>,
    store: Arc<dyn AuditStore>,
    excluded_fields: Vec<String>,
    read_only: bool,
    receipt_timeout: Duration,
}

impl AnchorService {
    pub fn new(chain: Arc<ChainClient>, store: Arc<dyn AuditStore>) -> Self {
        Self {
            chain,
            store,
            excluded_fields: DEFAULT_EXCLUDED_FIELDS.iter().map(|s| s.to_string()).collect(),
            read_only: false,
            receipt_timeout: Duration::from_secs(120),
        }
    }

    /// Refuse `resend` requests.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    /// Exclude additional field names from content hashes, on top of the
    /// identity and anchor columns.
    pub fn exclude_fields(mut self, fields: impl IntoIterator<Item = String>) -> Self {
        for field in fields {
            if !self.excluded_fields.contains(&field) {
                self.excluded_fields.push(field);
            }
        }
        self
    }

    pub fn chain(&self) -> &ChainClient {
        &self.chain
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn compute_hash<R: DomainRecord + ?Sized>(&self, record: &R) -> ContentHash {
        let excluded: Vec<&str> = self.excluded_fields.iter().map(String::as_str).collect();
        compute_content_hash(&record.fields(), &excluded)
    }

    /// Persist an audit row. No chain interaction.
    pub async fn record_audit(
        &self,
        record_type: &str,
        object_id: i64,
        hash: &ContentHash,
        reference: Option<&str>,
        tx_ref: Option<&str>,
    ) -> Result<AuditRecord> {
        self.store
            .insert(NewAuditRecord {
                record_type: record_type.to_string(),
                object_id,
                content_hash: hash.to_hex(),
                off_chain_reference: reference.map(str::to_string),
                chain_tx_reference: tx_ref.map(str::to_string),
            })
            .await
    }

    /// Hash a record, try to anchor it, and write exactly one audit row.
    ///
    /// Chain failures are absorbed (`tx_hash` is `None`); only a failure to
    /// write the audit row is returned. The denormalized anchor columns are
    /// updated on `record` and persisted best-effort.
    pub async fn anchor_and_record<R: DomainRecord + ?Sized>(
        &self,
        record: &mut R,
    ) -> Result<AnchorOutcome> {
        let hash = self.compute_hash(record);
        let tx_hash = self.chain.send_hash(&hash).await;

        let audit = self
            .record_audit(
                record.record_type(),
                record.object_id(),
                &hash,
                None,
                tx_hash.as_deref(),
            )
            .await?;

        info!(
            record_type = record.record_type(),
            object_id = record.object_id(),
            hash = %hash,
            anchored = tx_hash.is_some(),
            "Audit record written"
        );

        let hash_hex = hash.to_hex();
        record.set_anchor(&hash_hex, tx_hash.as_deref());
        if let Err(e) = self
            .store
            .save_record_anchor(
                record.record_type(),
                record.object_id(),
                &hash_hex,
                tx_hash.as_deref(),
            )
            .await
        {
            warn!(
                record_type = record.record_type(),
                object_id = record.object_id(),
                error = %e,
                "Failed to write anchor columns"
            );
        }

        Ok(AnchorOutcome {
            record_hash: hash,
            tx_hash,
            audit,
        })
    }

    pub async fn list(&self) -> Result<Vec<AuditRecord>> {
        self.store.list().await
    }

    pub async fn get(&self, id: i64) -> Result<AuditRecord> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AnchorError::NotFound(format!("audit record {id}")))
    }

    /// Check an audit row's hash against the chain.
    pub async fn verify(&self, id: i64) -> Result<Verification> {
        let audit = self.get(id).await?;
        let on_chain = match audit.content_hash.parse::<ContentHash>() {
            Ok(hash) => self.chain.check_hash(&hash).await,
            Err(e) => {
                warn!(id, error = %e, "Stored content hash is malformed");
                false
            }
        };
        let confirmations = match &audit.chain_tx_reference {
            Some(tx) => self.chain.confirmations(tx).await,
            None => None,
        };

        Ok(Verification {
            id: audit.id,
            record_hash: audit.content_hash,
            tx_hash: audit.chain_tx_reference,
            on_chain,
            confirmations,
        })
    }

    /// Submit an audit row's hash again and store the new transaction.
    pub async fn resend(&self, id: i64) -> Result<String> {
        if self.read_only {
            return Err(AnchorError::ReadOnly);
        }
        let audit = self.get(id).await?;
        if !self.chain.is_connected() {
            return Err(AnchorError::ChainUnavailable);
        }
        let hash: ContentHash = audit.content_hash.parse()?;

        let tx = self.chain.send_hash(&hash).await.ok_or_else(|| {
            AnchorError::NotSent("no private key configured or submission failed".into())
        })?;
        self.store.set_chain_tx_reference(id, &tx).await?;

        info!(id, tx = %tx, "Audit hash resent");
        Ok(tx)
    }

    /// Anchor an off-chain reference for an audit row and store it.
    ///
    /// Checked in order: the row exists, `cid` is non-blank, the chain is
    /// connected.
    pub async fn store_reference(&self, id: i64, cid: &str) -> Result<StoredReference> {
        self.get(id).await?;
        let cid = cid.trim();
        if cid.is_empty() {
            return Err(AnchorError::MissingField("cid".into()));
        }
        if !self.chain.is_connected() {
            return Err(AnchorError::ChainUnavailable);
        }

        let (tx_hash, record_id) = self
            .chain
            .send_record_reference_and_get_id(cid, true, self.receipt_timeout)
            .await;

        if let Some(tx) = &tx_hash {
            self.store
                .set_off_chain_reference(id, cid, Some(tx))
                .await?;
            info!(id, tx = %tx, record_id = ?record_id, "Off-chain reference anchored");
        }

        Ok(StoredReference { tx_hash, record_id })
    }
}
