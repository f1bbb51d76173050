//! Gateway to the relational store.
//!
//! Owns the connection pool, the idempotent schema bootstrap, the
//! transactional session factory and the durable sync checkpoint. All
//! SQL in the indexer is parameterized; this module is also the raw
//! query channel for bulk reads and maintenance statements.

pub mod models;
pub mod schema;

use crate::config::Config;
use crate::resilience::TransientError;
use models::StoredBlockRef;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use thiserror::Error;

/// Key of the sync checkpoint row in `indexer_state`.
pub const LAST_INDEXED_BLOCK_KEY: &str = "last_indexed_block";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt indexer state for key '{key}': {value}")]
    CorruptState { key: &'static str, value: String },
}

impl TransientError for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(err) => match err {
                sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(db) => {
                    // serialization failure and deadlock detected
                    matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
                }
                _ => false,
            },
            StoreError::CorruptState { .. } => false,
        }
    }
}

pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect to the database. Fatal at startup when the store is
    /// unreachable.
    pub async fn connect(config: &Config) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_pool_size)
            .acquire_timeout(Duration::from_secs(config.database_pool_timeout))
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Raw access for callers composing their own statements.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Open a transactional session. Committing is explicit; dropping
    /// the returned transaction rolls back, so every early return and
    /// error path releases cleanly.
    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, StoreError> {
        Ok(self.pool.begin().await?)
    }

    /// Create all tables if absent. Safe to run on every startup.
    pub async fn create_tables(&self) -> Result<(), StoreError> {
        for statement in schema::CREATE_TABLES {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Database schema ready");
        Ok(())
    }

    /// Drop and recreate the whole schema. Administrative path only.
    pub async fn reset(&self) -> Result<(), StoreError> {
        warn!("Resetting database: dropping all indexed data");
        for statement in schema::DROP_TABLES {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        self.create_tables().await
    }

    /// Highest contiguously indexed block number, 0 when the store has
    /// never been written.
    pub async fn get_last_indexed_block(&self) -> Result<i64, StoreError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM indexer_state WHERE key = $1")
                .bind(LAST_INDEXED_BLOCK_KEY)
                .fetch_optional(&self.pool)
                .await?;

        match value {
            Some(raw) => raw.parse().map_err(|_| StoreError::CorruptState {
                key: LAST_INDEXED_BLOCK_KEY,
                value: raw,
            }),
            None => Ok(0),
        }
    }

    /// Advance (or rewind, on reorg) the checkpoint. Runs in its own
    /// implicit transaction and is idempotent.
    pub async fn set_last_indexed_block(&self, block_number: i64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO indexer_state (key, value, updated_at) \
             VALUES ($1, $2, NOW()) \
             ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = NOW()",
        )
        .bind(LAST_INDEXED_BLOCK_KEY)
        .bind(block_number.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn block_count(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM blocks")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn block_exists(&self, block_hash: &str) -> Result<bool, StoreError> {
        let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM blocks WHERE block_hash = $1")
            .bind(block_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Stored hash at a height, if any. Used by main-chain verification.
    pub async fn block_hash_at(&self, block_number: i64) -> Result<Option<String>, StoreError> {
        Ok(
            sqlx::query_scalar("SELECT block_hash FROM blocks WHERE block_number = $1")
                .bind(block_number)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Block references over an inclusive range, ordered by height.
    pub async fn blocks_in_range(
        &self,
        start: i64,
        end: i64,
    ) -> Result<Vec<StoredBlockRef>, StoreError> {
        Ok(sqlx::query_as(
            "SELECT block_number, block_hash, parent_hash FROM blocks \
             WHERE block_number BETWEEN $1 AND $2 ORDER BY block_number",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Lightweight connectivity probe for the health surface.
    pub async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_transient() {
        let err = StoreError::Database(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());
    }

    #[test]
    fn test_row_not_found_is_not_transient() {
        let err = StoreError::Database(sqlx::Error::RowNotFound);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_corrupt_state_is_not_transient() {
        let err = StoreError::CorruptState {
            key: LAST_INDEXED_BLOCK_KEY,
            value: "not-a-number".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn test_schema_covers_all_tables() {
        let ddl = schema::CREATE_TABLES.join("\n");
        for table in [
            "blocks",
            "deployments",
            "transfers",
            "validators",
            "validator_bonds",
            "block_validators",
            "balance_states",
            "epoch_transitions",
            "network_stats",
            "indexer_state",
            "reorgs",
        ] {
            assert!(
                ddl.contains(&format!("CREATE TABLE IF NOT EXISTS {}", table)),
                "missing table {}",
                table
            );
        }
        // every created table has a matching drop for the reset path
        assert_eq!(
            schema::DROP_TABLES.len(),
            11,
            "drop list out of sync with create list"
        );
    }
}
