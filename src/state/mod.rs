/// Database state layer for the audit trail.
///
/// Manages PostgreSQL connections and the audit row repository.
pub mod models;
pub mod repository;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::{AnchorError, Result};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| AnchorError::Database(format!("connect failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AnchorError::Database(format!("Migration failed: {e}")))
    }

    /// Add anchor columns to the host tables present now. Returns the host
    /// tables that are still missing.
    pub async fn ensure_anchor_columns(&self) -> Result<Vec<&'static str>> {
        repository::ensure_anchor_columns(&self.pool).await
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
