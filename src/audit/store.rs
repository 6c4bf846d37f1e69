/// Persistence seam for audit rows.
///
/// `PgAuditStore` (in `state::repository`) backs production deployments;
/// `MemoryAuditStore` keeps rows in process for development and tests.
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::state::models::{AuditRecord, NewAuditRecord};

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert(&self, record: NewAuditRecord) -> Result<AuditRecord>;

    async fn get(&self, id: i64) -> Result<Option<AuditRecord>>;

    /// All rows, newest first.
    async fn list(&self) -> Result<Vec<AuditRecord>>;

    async fn set_chain_tx_reference(&self, id: i64, tx_ref: &str) -> Result<()>;

    async fn set_off_chain_reference(
        &self,
        id: i64,
        reference: &str,
        tx_ref: Option<&str>,
    ) -> Result<()>;

    /// Write the denormalized anchor columns back to the domain record.
    async fn save_record_anchor(
        &self,
        record_type: &str,
        object_id: i64,
        content_hash: &str,
        tx_ref: Option<&str>,
    ) -> Result<()>;
}

#[derive(Default)]
struct MemoryState {
    rows: Vec<AuditRecord>,
    anchors: HashMap<(String, i64), (String, Option<String>)>,
}

/// In-memory audit store.
#[derive(Default)]
pub struct MemoryAuditStore {
    state: RwLock<MemoryState>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Denormalized anchor columns last written for a domain record.
    pub async fn record_anchor(
        &self,
        record_type: &str,
        object_id: i64,
    ) -> Option<(String, Option<String>)> {
        self.state
            .read()
            .await
            .anchors
            .get(&(record_type.to_string(), object_id))
            .cloned()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn insert(&self, record: NewAuditRecord) -> Result<AuditRecord> {
        let mut state = self.state.write().await;
        let row = AuditRecord {
            id: state.rows.len() as i64 + 1,
            record_type: record.record_type,
            object_id: record.object_id,
            content_hash: record.content_hash,
            off_chain_reference: record.off_chain_reference,
            chain_tx_reference: record.chain_tx_reference,
            created_at: Utc::now(),
        };
        state.rows.push(row.clone());
        Ok(row)
    }

    async fn get(&self, id: i64) -> Result<Option<AuditRecord>> {
        Ok(self
            .state
            .read()
            .await
            .rows
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<AuditRecord>> {
        let mut rows = self.state.read().await.rows.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn set_chain_tx_reference(&self, id: i64, tx_ref: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(row) = state.rows.iter_mut().find(|r| r.id == id) {
            row.chain_tx_reference = Some(tx_ref.to_string());
        }
        Ok(())
    }

    async fn set_off_chain_reference(
        &self,
        id: i64,
        reference: &str,
        tx_ref: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(row) = state.rows.iter_mut().find(|r| r.id == id) {
            row.off_chain_reference = Some(reference.to_string());
            if let Some(tx) = tx_ref {
                row.chain_tx_reference = Some(tx.to_string());
            }
        }
        Ok(())
    }

    async fn save_record_anchor(
        &self,
        record_type: &str,
        object_id: i64,
        content_hash: &str,
        tx_ref: Option<&str>,
    ) -> Result<()> {
        self.state.write().await.anchors.insert(
            (record_type.to_string(), object_id),
            (content_hash.to_string(), tx_ref.map(str::to_string)),
        );
        Ok(())
    }
}
