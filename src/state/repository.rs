/// Repository layer: typed database queries for the audit trail.
///
/// All queries use sqlx runtime-checked queries (not compile-time checked)
/// to avoid requiring a live database during development builds.
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::debug;

use super::models::*;
use super::Database;
use crate::audit::store::AuditStore;
use crate::error::{AnchorError, Result};

fn db_err(e: sqlx::Error) -> AnchorError {
    AnchorError::Database(e.to_string())
}

/// Host-owned tables that carry the denormalized anchor columns.
pub const ANCHOR_TABLES: &[&str] = &["patients", "diagnoses", "lab_results"];

/// Host table holding the denormalized anchor columns for a record type.
fn anchor_table(record_type: &str) -> Option<&'static str> {
    match record_type {
        "Patient" => Some("patients"),
        "Diagnosis" => Some("diagnoses"),
        "LabResult" | "LabResults" => Some("lab_results"),
        _ => None,
    }
}

// ── Audit Records ──

pub async fn create_audit_record(pool: &PgPool, record: &NewAuditRecord) -> Result<AuditRecord> {
    sqlx::query_as::<_, AuditRecord>(
        r#"
        INSERT INTO audit_records
        (record_type, object_id, content_hash, off_chain_reference, chain_tx_reference, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(&record.record_type)
    .bind(record.object_id)
    .bind(&record.content_hash)
    .bind(&record.off_chain_reference)
    .bind(&record.chain_tx_reference)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .map_err(db_err)
}

pub async fn get_audit_record(pool: &PgPool, id: i64) -> Result<Option<AuditRecord>> {
    sqlx::query_as::<_, AuditRecord>("SELECT * FROM audit_records WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(db_err)
}

pub async fn list_audit_records(pool: &PgPool) -> Result<Vec<AuditRecord>> {
    sqlx::query_as::<_, AuditRecord>(
        "SELECT * FROM audit_records ORDER BY created_at DESC, id DESC",
    )
    .fetch_all(pool)
    .await
    .map_err(db_err)
}

pub async fn update_chain_tx_reference(pool: &PgPool, id: i64, tx_ref: &str) -> Result<()> {
    sqlx::query("UPDATE audit_records SET chain_tx_reference = $2 WHERE id = $1")
        .bind(id)
        .bind(tx_ref)
        .execute(pool)
        .await
        .map_err(db_err)?;

    Ok(())
}

pub async fn update_off_chain_reference(
    pool: &PgPool,
    id: i64,
    reference: &str,
    tx_ref: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE audit_records
        SET off_chain_reference = $2, chain_tx_reference = COALESCE($3, chain_tx_reference)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(reference)
    .bind(tx_ref)
    .execute(pool)
    .await
    .map_err(db_err)?;

    Ok(())
}

// ── Domain Record Anchor Columns ──

fn anchor_column_statements(table: &str) -> [String; 2] {
    [
        format!("ALTER TABLE {table} ADD COLUMN IF NOT EXISTS last_content_hash TEXT"),
        format!("ALTER TABLE {table} ADD COLUMN IF NOT EXISTS last_chain_tx_reference TEXT"),
    ]
}

/// Add the anchor columns to every host table that exists. Returns the
/// tables that do not exist yet; their write-backs fail until the next
/// startup after the host creates them.
pub async fn ensure_anchor_columns(pool: &PgPool) -> Result<Vec<&'static str>> {
    let mut missing = Vec::new();
    for &table in ANCHOR_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name::text = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await
        .map_err(db_err)?;
        if !exists {
            missing.push(table);
            continue;
        }
        for sql in anchor_column_statements(table) {
            sqlx::query(&sql).execute(pool).await.map_err(db_err)?;
        }
        debug!(table, "Anchor columns present");
    }
    Ok(missing)
}

pub async fn update_record_anchor(
    pool: &PgPool,
    record_type: &str,
    object_id: i64,
    content_hash: &str,
    tx_ref: Option<&str>,
) -> Result<()> {
    let Some(table) = anchor_table(record_type) else {
        debug!(record_type, "No anchor columns for record type");
        return Ok(());
    };

    // Table name comes from the fixed mapping above, never from input.
    let sql = format!(
        "UPDATE {table} SET last_content_hash = $2, last_chain_tx_reference = $3 WHERE id = $1"
    );
    sqlx::query(&sql)
        .bind(object_id)
        .bind(content_hash)
        .bind(tx_ref)
        .execute(pool)
        .await
        .map_err(db_err)?;

    Ok(())
}

/// `AuditStore` over PostgreSQL.
#[derive(Clone)]
pub struct PgAuditStore {
    db: Database,
}

impl PgAuditStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn insert(&self, record: NewAuditRecord) -> Result<AuditRecord> {
        create_audit_record(self.db.pool(), &record).await
    }

    async fn get(&self, id: i64) -> Result<Option<AuditRecord>> {
        get_audit_record(self.db.pool(), id).await
    }

    async fn list(&self) -> Result<Vec<AuditRecord>> {
        list_audit_records(self.db.pool()).await
    }

    async fn set_chain_tx_reference(&self, id: i64, tx_ref: &str) -> Result<()> {
        update_chain_tx_reference(self.db.pool(), id, tx_ref).await
    }

    async fn set_off_chain_reference(
        &self,
        id: i64,
        reference: &str,
        tx_ref: Option<&str>,
    ) -> Result<()> {
        update_off_chain_reference(self.db.pool(), id, reference, tx_ref).await
    }

    async fn save_record_anchor(
        &self,
        record_type: &str,
        object_id: i64,
        content_hash: &str,
        tx_ref: Option<&str>,
    ) -> Result<()> {
        update_record_anchor(self.db.pool(), record_type, object_id, content_hash, tx_ref).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_table_whitelist() {
        assert_eq!(anchor_table("Patient"), Some("patients"));
        assert_eq!(anchor_table("Diagnosis"), Some("diagnoses"));
        assert_eq!(anchor_table("LabResult"), Some("lab_results"));
        assert_eq!(anchor_table("Sale"), None);
        assert_eq!(anchor_table("patients; DROP TABLE x"), None);
    }

    #[test]
    fn test_anchor_tables_cover_mapping() {
        for record_type in ["Patient", "Diagnosis", "LabResult", "LabResults"] {
            let table = anchor_table(record_type).unwrap();
            assert!(ANCHOR_TABLES.contains(&table));
        }
    }

    #[test]
    fn test_anchor_column_statements() {
        let [hash, tx] = anchor_column_statements("patients");
        assert_eq!(
            hash,
            "ALTER TABLE patients ADD COLUMN IF NOT EXISTS last_content_hash TEXT"
        );
        assert!(tx.ends_with("last_chain_tx_reference TEXT"));
    }
}
