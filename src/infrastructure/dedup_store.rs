//! Durable record of every listing ever accepted
//!
//! Backed by the `products` table with a UNIQUE constraint on `url`. The
//! store is append-only: rows are never updated or deleted, which is what
//! makes repeated runs against the same store page idempotent.

use std::path::{Path, PathBuf};

use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info};

use crate::infrastructure::database_connection::DatabaseConnection;

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("Dedup store at {path:?} is unavailable: {reason}")]
    Unavailable { path: PathBuf, reason: String },

    #[error("Dedup store query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Result of `DedupStore::record`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    /// The url was already present; nothing was written.
    Conflict,
}

/// Shared by all in-flight listing tasks; the pool serializes writers.
#[derive(Clone)]
pub struct DedupStore {
    pool: SqlitePool,
}

impl DedupStore {
    /// Open the store at `db_path`, creating the file and schema if needed.
    pub async fn open(db_path: &Path) -> Result<Self, DedupError> {
        let connection = DatabaseConnection::new(db_path).await?;
        connection.migrate().await?;
        Ok(Self::new(connection.pool().clone()))
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Whether this exact `(url, title)` pair was accepted before.
    pub async fn exists(&self, url: &str, title: &str) -> Result<bool, DedupError> {
        let found: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM products WHERE url = ? AND title = ?)",
        )
        .bind(url)
        .bind(title)
        .fetch_one(&self.pool)
        .await?;
        Ok(found != 0)
    }

    /// Record an accepted listing. A url that is already stored yields
    /// `Conflict` and leaves the existing row untouched.
    pub async fn record(&self, url: &str, title: &str) -> Result<RecordOutcome, DedupError> {
        let result = sqlx::query(
            r#"
            INSERT INTO products (url, title)
            VALUES (?, ?)
            ON CONFLICT(url) DO NOTHING
            "#,
        )
        .bind(url)
        .bind(title)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            info!("Product already recorded, skipping: {}", url);
            Ok(RecordOutcome::Conflict)
        } else {
            debug!("Recorded product: {}", url);
            Ok(RecordOutcome::Inserted)
        }
    }

    pub async fn count(&self) -> Result<i64, DedupError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
