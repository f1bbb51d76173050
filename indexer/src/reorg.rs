//! Chain reorganization detection and rollback.
//!
//! A monitor task periodically compares a window of stored blocks with
//! the canonical chain. On divergence, everything from the fork point
//! up is deleted leaves-first in one transaction, the checkpoint is
//! rewound to just below the fork, and an audit row is recorded; the
//! next sync tick re-ingests the canonical blocks through the normal
//! path.

use crate::node::{NodeClient, NodeError};
use crate::resilience::{ResilienceError, ResilientExecutor};
use crate::store::models::{OrphanedParentRef, ReorgRecord, StoredBlockRef};
use crate::store::{Store, StoreError};
use asi_common::chain::BlockSummary;
use asi_common::utils::abbreviate;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::interval;

#[derive(Debug, Error)]
pub enum ReorgError {
    #[error(transparent)]
    Store(#[from] ResilienceError<StoreError>),

    #[error(transparent)]
    Node(#[from] ResilienceError<NodeError>),
}

/// Details of a detected reorganization.
#[derive(Debug, Clone, Serialize)]
pub struct ReorgDetection {
    /// Lowest block number where local and canonical hashes diverge.
    pub fork_point: i64,
    /// Local hashes no longer on the canonical chain, ascending.
    pub orphaned_blocks: Vec<String>,
    pub affected_deployments: i64,
    pub affected_transfers: i64,
    pub depth: i64,
    pub detected_at: DateTime<Utc>,
}

/// Read-only integrity audit over a stored range.
#[derive(Debug, Clone, Serialize)]
pub struct ChainIntegrityReport {
    pub start_block: i64,
    pub end_block: i64,
    pub valid: bool,
    pub missing_blocks: Vec<i64>,
    pub orphaned_parent_refs: Vec<OrphanedParentRef>,
    pub checked_at: DateTime<Utc>,
}

/// The verification window `[from, to]` for a detection pass, or None
/// when there is nothing old enough to check.
pub fn check_window(
    latest_local: i64,
    last_verified: i64,
    max_reorg_depth: i64,
    confirmation_depth: i64,
) -> Option<(i64, i64)> {
    if latest_local < confirmation_depth {
        return None;
    }
    let from = last_verified.max(latest_local - max_reorg_depth);
    let to = latest_local - confirmation_depth;
    if from >= to {
        return None;
    }
    Some((from, to))
}

/// First height in `[from, to]` where a stored hash disagrees with the
/// canonical one. Heights missing on either side are skipped.
pub fn find_fork_point(
    local: &[StoredBlockRef],
    canonical: &[BlockSummary],
    from: i64,
    to: i64,
) -> Option<i64> {
    let local_hashes: HashMap<i64, &str> = local
        .iter()
        .map(|block| (block.block_number, block.block_hash.as_str()))
        .collect();
    let canonical_hashes: HashMap<i64, &str> = canonical
        .iter()
        .filter_map(|block| {
            block
                .block_hash
                .as_deref()
                .map(|hash| (block.block_number, hash))
        })
        .collect();

    for number in from..=to {
        let (Some(local_hash), Some(canonical_hash)) =
            (local_hashes.get(&number), canonical_hashes.get(&number))
        else {
            continue;
        };
        if local_hash != canonical_hash {
            return Some(number);
        }
    }
    None
}

pub struct ReorgHandler {
    store: Arc<Store>,
    node: Arc<NodeClient>,
    node_executor: Arc<ResilientExecutor>,
    db_executor: Arc<ResilientExecutor>,
    max_reorg_depth: i64,
    confirmation_depth: i64,
    check_interval: Duration,
    last_verified_block: AtomicI64,
}

impl ReorgHandler {
    pub fn new(
        store: Arc<Store>,
        node: Arc<NodeClient>,
        node_executor: Arc<ResilientExecutor>,
        db_executor: Arc<ResilientExecutor>,
        max_reorg_depth: i64,
        confirmation_depth: i64,
        check_interval: Duration,
    ) -> Self {
        Self {
            store,
            node,
            node_executor,
            db_executor,
            max_reorg_depth,
            confirmation_depth,
            check_interval,
            last_verified_block: AtomicI64::new(0),
        }
    }

    /// Monitor loop; runs until shutdown is signaled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting reorg monitoring (max depth {}, confirmation depth {}, every {:?})",
            self.max_reorg_depth, self.confirmation_depth, self.check_interval
        );

        let mut ticker = interval(self.check_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.check_for_reorgs().await {
                        error!("Reorg check failed: {}", err);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("Reorg monitor shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// One detection pass. Returns the handled reorg, if any.
    pub async fn check_for_reorgs(&self) -> Result<Option<ReorgDetection>, ReorgError> {
        let latest_local = self
            .db_executor
            .execute(|| self.store.get_last_indexed_block())
            .await?;
        let last_verified = self.last_verified_block.load(Ordering::Acquire);

        let Some((check_from, check_to)) = check_window(
            latest_local,
            last_verified,
            self.max_reorg_depth,
            self.confirmation_depth,
        ) else {
            return Ok(None);
        };

        debug!(
            "Checking for reorgs in [{}, {}] (local head {})",
            check_from, check_to, latest_local
        );

        let canonical = self
            .node_executor
            .execute(|| self.node.blocks_by_height(check_from, check_to))
            .await?;
        let local = self
            .db_executor
            .execute(|| self.store.blocks_in_range(check_from, check_to))
            .await?;

        let Some(fork_point) = find_fork_point(&local, &canonical, check_from, check_to) else {
            // whole window matches; no need to re-check it next pass
            self.last_verified_block.store(check_to, Ordering::Release);
            return Ok(None);
        };

        // divergence at the very bottom of a depth-capped window may
        // extend past what we are allowed to rewrite
        if fork_point == check_from && check_from == latest_local - self.max_reorg_depth {
            error!(
                "Divergence at block {} reaches max reorg depth {}; \
                 not rolling back, operator intervention required",
                fork_point, self.max_reorg_depth
            );
            return Ok(None);
        }

        let orphaned_blocks: Vec<String> = local
            .iter()
            .filter(|block| block.block_number >= fork_point)
            .map(|block| block.block_hash.clone())
            .collect();

        let (affected_deployments, affected_transfers) = self.count_affected(fork_point).await?;

        let detection = ReorgDetection {
            fork_point,
            depth: check_to - fork_point + 1,
            orphaned_blocks,
            affected_deployments,
            affected_transfers,
            detected_at: Utc::now(),
        };

        warn!(
            "Blockchain reorganization detected: fork at {}, depth {}, {} orphaned blocks",
            detection.fork_point,
            detection.depth,
            detection.orphaned_blocks.len()
        );

        self.handle_reorg(&detection).await?;
        metrics::counter!("asi_indexer_reorgs_handled_total").increment(1);

        Ok(Some(detection))
    }

    async fn count_affected(&self, fork_point: i64) -> Result<(i64, i64), ReorgError> {
        let deployments = self
            .db_executor
            .execute(|| async {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM deployments WHERE block_number >= $1",
                )
                .bind(fork_point)
                .fetch_one(self.store.pool())
                .await
                .map_err(StoreError::from)
            })
            .await?;
        let transfers = self
            .db_executor
            .execute(|| async {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM transfers WHERE block_number >= $1",
                )
                .bind(fork_point)
                .fetch_one(self.store.pool())
                .await
                .map_err(StoreError::from)
            })
            .await?;
        Ok((deployments, transfers))
    }

    /// Roll back everything from the fork point, rewind the checkpoint
    /// and record the audit row.
    async fn handle_reorg(&self, detection: &ReorgDetection) -> Result<(), ReorgError> {
        info!(
            "Handling reorganization: rolling back to block {}",
            detection.fork_point - 1
        );

        self.db_executor
            .execute(|| self.rollback_from(detection.fork_point))
            .await?;
        self.db_executor
            .execute(|| self.store.set_last_indexed_block(detection.fork_point - 1))
            .await?;
        self.db_executor
            .execute(|| self.record_reorg(detection))
            .await?;

        info!(
            "Reorganization handled: {} blocks orphaned, checkpoint at {}",
            detection.orphaned_blocks.len(),
            detection.fork_point - 1
        );
        Ok(())
    }

    /// Delete orphaned rows leaves-first so foreign keys hold at every
    /// point, then the blocks themselves. One atomic unit.
    async fn rollback_from(&self, fork_point: i64) -> Result<(), StoreError> {
        let mut tx = self.store.begin().await?;

        sqlx::query("DELETE FROM balance_states WHERE block_number >= $1")
            .bind(fork_point)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM transfers WHERE block_number >= $1")
            .bind(fork_point)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM deployments WHERE block_number >= $1")
            .bind(fork_point)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM validator_bonds WHERE block_number >= $1")
            .bind(fork_point)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM block_validators WHERE block_hash IN \
                 (SELECT block_hash FROM blocks WHERE block_number >= $1)",
        )
        .bind(fork_point)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM blocks WHERE block_number >= $1")
            .bind(fork_point)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn record_reorg(&self, detection: &ReorgDetection) -> Result<(), StoreError> {
        let orphaned = serde_json::to_value(&detection.orphaned_blocks)
            .unwrap_or(serde_json::Value::Null);
        sqlx::query(
            "INSERT INTO reorgs (fork_point, depth, orphaned_blocks, affected_deployments, \
                 affected_transfers, detected_at, handled_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(detection.fork_point)
        .bind(detection.depth)
        .bind(orphaned)
        .bind(detection.affected_deployments)
        .bind(detection.affected_transfers)
        .bind(detection.detected_at)
        .bind(Utc::now())
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    /// Recent handled reorganizations, newest first.
    pub async fn reorg_history(&self, limit: i64) -> Result<Vec<ReorgRecord>, StoreError> {
        Ok(sqlx::query_as(
            "SELECT id, fork_point, depth, orphaned_blocks, affected_deployments, \
                 affected_transfers, detected_at, handled_at \
             FROM reorgs ORDER BY detected_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.store.pool())
        .await?)
    }

    /// Read-only audit: missing heights and unresolvable parent links
    /// over a stored range. Never mutates.
    pub async fn validate_chain_integrity(
        &self,
        start_block: i64,
        end_block: i64,
    ) -> Result<ChainIntegrityReport, StoreError> {
        let missing_blocks: Vec<i64> = sqlx::query_scalar(
            "SELECT expected FROM generate_series($1::bigint, $2::bigint) AS expected \
             EXCEPT \
             SELECT block_number FROM blocks WHERE block_number BETWEEN $1 AND $2 \
             ORDER BY 1",
        )
        .bind(start_block)
        .bind(end_block)
        .fetch_all(self.store.pool())
        .await?;

        let orphaned_parent_refs: Vec<OrphanedParentRef> = sqlx::query_as(
            "SELECT b.block_number, b.block_hash, b.parent_hash \
             FROM blocks b \
             LEFT JOIN blocks parent ON b.parent_hash = parent.block_hash \
             WHERE b.block_number BETWEEN $1 AND $2 \
               AND b.block_number > 0 \
               AND parent.block_hash IS NULL \
             ORDER BY b.block_number",
        )
        .bind(start_block)
        .bind(end_block)
        .fetch_all(self.store.pool())
        .await?;

        if !missing_blocks.is_empty() || !orphaned_parent_refs.is_empty() {
            warn!(
                "Chain integrity issues in [{}, {}]: {} missing blocks, {} dangling parents (first: {})",
                start_block,
                end_block,
                missing_blocks.len(),
                orphaned_parent_refs.len(),
                orphaned_parent_refs
                    .first()
                    .map(|r| abbreviate(&r.parent_hash))
                    .unwrap_or_default(),
            );
        }

        Ok(ChainIntegrityReport {
            start_block,
            end_block,
            valid: missing_blocks.is_empty() && orphaned_parent_refs.is_empty(),
            missing_blocks,
            orphaned_parent_refs,
            checked_at: Utc::now(),
        })
    }
}
