//! Row types read back from the store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// Minimal block reference used by reorg detection and main-chain
/// verification.
#[derive(Debug, Clone, FromRow)]
pub struct StoredBlockRef {
    pub block_number: i64,
    pub block_hash: String,
    pub parent_hash: String,
}

/// One handled reorganization, as recorded in the `reorgs` audit table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ReorgRecord {
    pub id: i64,
    pub fork_point: i64,
    pub depth: i64,
    pub orphaned_blocks: serde_json::Value,
    pub affected_deployments: i64,
    pub affected_transfers: i64,
    pub detected_at: DateTime<Utc>,
    pub handled_at: DateTime<Utc>,
}

/// A stored block whose parent hash does not resolve to a stored block.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OrphanedParentRef {
    pub block_number: i64,
    pub block_hash: String,
    pub parent_hash: String,
}
