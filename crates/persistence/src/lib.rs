//! Persistence layer for Node Monitor
//!
//! SQLite storage for the raw rows the aggregation engine consumes:
//! nodes, ping results, daily reward metrics, provider daily totals and
//! XDR/ICP conversion rates.

pub mod repository;
pub mod schema;

pub use sqlx::sqlite::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Connection settings applied once the schema exists
const PRAGMAS: &[&str] = &[
    // readers keep going while a batch of pings is written
    "PRAGMA journal_mode=WAL",
    "PRAGMA synchronous=NORMAL",
    // 16 MB (negative = KiB); window scans over ping_results touch many pages
    "PRAGMA cache_size=-16000",
];

/// SQLite-backed store shared by the server handlers and CLI commands
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database file at `path`
    pub async fn new(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbError::Connection(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let db = Self::open(&format!("sqlite:{}?mode=rwc", path.display()), 5).await?;
        info!(path = %path.display(), "database ready");
        Ok(db)
    }

    /// Private in-memory database on a single connection (tests)
    pub async fn in_memory() -> DbResult<Self> {
        Self::open("sqlite::memory:", 1).await
    }

    async fn open(url: &str, max_connections: u32) -> DbResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.create_schema().await?;
        db.apply_pragmas().await?;
        Ok(db)
    }

    /// Run every statement of the schema; all of them are idempotent
    async fn create_schema(&self) -> DbResult<()> {
        let statements = schema::CREATE_TABLES
            .split(';')
            .map(|chunk| {
                chunk
                    .lines()
                    .filter(|line| !line.trim_start().starts_with("--"))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|sql| !sql.trim().is_empty());

        let mut count = 0usize;
        for sql in statements {
            sqlx::query(sql.trim())
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Schema(format!("{e}: {}", sql.trim())))?;
            count += 1;
        }
        debug!(statements = count, "schema ensured");
        Ok(())
    }

    async fn apply_pragmas(&self) -> DbResult<()> {
        for pragma in PRAGMAS {
            sqlx::query(pragma)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Connection(format!("{pragma} failed: {e}")))?;
        }
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_creates_tables() {
        let db = Database::in_memory().await.unwrap();
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        let names: Vec<String> = tables.into_iter().map(|(n,)| n).collect();

        for expected in [
            "node_provider_daily_summary",
            "node_reward_metrics",
            "nodes",
            "ping_results",
            "xdr_icp_conversion_rates",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing table {expected}");
        }
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        db.create_schema().await.unwrap();

        let cols: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM pragma_table_info('ping_results')")
                .fetch_all(db.pool())
                .await
                .unwrap();
        assert!(cols.iter().any(|(name,)| name == "probe_name"));
    }
}
