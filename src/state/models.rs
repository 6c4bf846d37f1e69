/// Database models for the audit trail.
///
/// These structs map directly to PostgreSQL tables and are used
/// for both reading and writing via sqlx.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One anchored mutation of a domain record.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    /// Domain record type (e.g., "Patient", "Diagnosis", "LabResult").
    pub record_type: String,
    /// Primary key of the domain record.
    pub object_id: i64,
    /// 0x-prefixed SHA-256 content hash.
    pub content_hash: String,
    /// Off-chain content identifier (e.g., an IPFS CID).
    pub off_chain_reference: Option<String>,
    /// Hash of the latest anchoring transaction.
    pub chain_tx_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when inserting an audit row.
#[derive(Debug, Clone)]
pub struct NewAuditRecord {
    pub record_type: String,
    pub object_id: i64,
    pub content_hash: String,
    pub off_chain_reference: Option<String>,
    pub chain_tx_reference: Option<String>,
}
