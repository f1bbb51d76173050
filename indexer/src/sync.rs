//! The main synchronization loop.
//!
//! Each tick discovers the finalized head, fetches a batch window of
//! block summaries, processes each block through the block processor
//! and advances the checkpoint over the contiguous prefix of
//! successes. The four auxiliary loops (validator refresh, epoch
//! transitions, network stats, main-chain verification) share the same
//! tick, gated by block-count intervals.

use crate::config::{
    Config, DEFAULT_EPOCH_LENGTH, DEFAULT_QUARANTINE_LENGTH, EPOCH_CHECK_BLOCK_INTERVAL,
    INTER_BLOCK_DELAY_MILLIS, MAIN_CHAIN_VERIFY_BLOCK_INTERVAL, MAIN_CHAIN_VERIFY_DEPTH,
    NETWORK_STATS_BLOCK_INTERVAL, STATUS_LOG_TICK_INTERVAL,
};
use crate::node::{NodeClient, NodeError};
use crate::processor::{BlockProcessor, ProcessError};
use crate::reorg::ReorgHandler;
use crate::resilience::{ResilienceError, ResilientExecutor};
use crate::store::{Store, StoreError};
use asi_common::chain::ValidatorStatus;
use asi_common::time::{get_current_time_in_seconds, TimestampSeconds};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::time::sleep;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] ResilienceError<StoreError>),

    #[error(transparent)]
    Node(#[from] ResilienceError<NodeError>),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Shared view of the indexer's progress for the monitoring surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexerStatus {
    pub running: bool,
    pub last_indexed_block: i64,
    pub head_block: i64,
    pub sync_cycles: u64,
    pub blocks_indexed: u64,
    pub transfers_extracted: u64,
    pub started_at_unix: Option<TimestampSeconds>,
    pub last_tick_at: Option<DateTime<Utc>>,
}

pub type SharedStatus = Arc<RwLock<IndexerStatus>>;

/// The `[start, end]` window of blocks to fetch this tick, or None
/// when the store is already caught up with the head.
pub fn batch_window(
    last_indexed: i64,
    head: i64,
    store_empty: bool,
    start_from_block: i64,
    batch_size: u32,
) -> Option<(i64, i64)> {
    if last_indexed >= head {
        return None;
    }
    let start = if store_empty && start_from_block == 0 {
        0
    } else {
        last_indexed + 1
    };
    let end = (start + batch_size as i64 - 1).min(head);
    Some((start, end))
}

/// Epoch `[start, end]` bounds derived from the node's countdown.
pub fn epoch_bounds(current_block: i64, epoch_length: i64, blocks_until_next: i64) -> (i64, i64) {
    let start = current_block - (epoch_length - blocks_until_next);
    (start, start + epoch_length - 1)
}

/// Block-count gate shared by the auxiliary loops: runs when at least
/// `interval` blocks passed since the last run, then moves the mark.
fn should_run(gate: &AtomicI64, current_block: i64, interval: i64) -> bool {
    let last = gate.load(Ordering::Acquire);
    if current_block - last < interval {
        return false;
    }
    gate.store(current_block, Ordering::Release);
    true
}

pub struct SyncEngine {
    store: Arc<Store>,
    node: Arc<NodeClient>,
    processor: Arc<BlockProcessor>,
    reorg: Arc<ReorgHandler>,
    node_executor: Arc<ResilientExecutor>,
    db_executor: Arc<ResilientExecutor>,
    status: SharedStatus,
    sync_interval: Duration,
    batch_size: u32,
    start_from_block: i64,
    last_epoch_check_block: AtomicI64,
    last_stats_check_block: AtomicI64,
    last_chain_verify_block: AtomicI64,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        store: Arc<Store>,
        node: Arc<NodeClient>,
        processor: Arc<BlockProcessor>,
        reorg: Arc<ReorgHandler>,
        node_executor: Arc<ResilientExecutor>,
        db_executor: Arc<ResilientExecutor>,
        status: SharedStatus,
    ) -> Self {
        Self {
            store,
            node,
            processor,
            reorg,
            node_executor,
            db_executor,
            status,
            sync_interval: Duration::from_secs(config.sync_interval),
            batch_size: config.batch_size,
            start_from_block: config.start_from_block,
            last_epoch_check_block: AtomicI64::new(0),
            last_stats_check_block: AtomicI64::new(0),
            last_chain_verify_block: AtomicI64::new(0),
        }
    }

    /// Main loop; runs until shutdown is signaled. Per-tick errors are
    /// logged and swallowed so the loop always continues.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting continuous sync loop (every {:?}, batch size {})",
            self.sync_interval, self.batch_size
        );
        {
            let mut status = self.status.write().await;
            status.running = true;
            status.started_at_unix = Some(get_current_time_in_seconds());
        }

        let mut cycles: u64 = 0;
        loop {
            self.tick().await;

            cycles += 1;
            {
                let mut status = self.status.write().await;
                status.sync_cycles = cycles;
                status.last_tick_at = Some(Utc::now());
            }
            if cycles % STATUS_LOG_TICK_INTERVAL == 0 {
                let status = self.status.read().await;
                info!(
                    "Indexer status: block {}/{} after {} cycles, {} transfers extracted",
                    status.last_indexed_block,
                    status.head_block,
                    cycles,
                    status.transfers_extracted
                );
            }

            tokio::select! {
                _ = sleep(self.sync_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.status.write().await.running = false;
        info!("Sync loop stopped");
    }

    /// One tick: block sync plus the gated auxiliary loops, each
    /// failing independently.
    pub async fn tick(&self) {
        if let Err(err) = self.sync_blocks().await {
            error!("Sync cycle failed: {}", err);
        }
        if let Err(err) = self.refresh_validators().await {
            error!("Validator state refresh failed: {}", err);
        }
        if let Err(err) = self.check_epoch_transition().await {
            error!("Epoch transition check failed: {}", err);
        }
        if let Err(err) = self.update_network_stats().await {
            error!("Network stats update failed: {}", err);
        }
        if let Err(err) = self.verify_main_chain().await {
            error!("Main chain verification failed: {}", err);
        }
    }

    async fn sync_blocks(&self) -> Result<(), SyncError> {
        let last_indexed = self
            .db_executor
            .execute(|| self.store.get_last_indexed_block())
            .await?;
        let head = self.node_executor.execute(|| self.node.head()).await?;

        {
            let mut status = self.status.write().await;
            status.last_indexed_block = last_indexed;
            status.head_block = head.block_number;
        }
        metrics::gauge!("asi_indexer_head_block").set(head.block_number as f64);
        metrics::gauge!("asi_indexer_last_indexed_block").set(last_indexed as f64);

        let store_empty = self
            .db_executor
            .execute(|| self.store.block_count())
            .await?
            == 0;

        let Some((start, end)) = batch_window(
            last_indexed,
            head.block_number,
            store_empty,
            self.start_from_block,
            self.batch_size,
        ) else {
            debug!("Already up to date at block {}", last_indexed);
            return Ok(());
        };

        info!(
            "Syncing blocks {} to {} ({} behind head {})",
            start,
            end,
            head.block_number - last_indexed,
            head.block_number
        );

        let summaries = self
            .node_executor
            .execute(|| self.node.blocks_by_height(start, end))
            .await?;

        let mut processed: usize = 0;
        for summary in &summaries {
            let Some(block_hash) = summary.block_hash.as_deref() else {
                // the checkpoint only covers a contiguous prefix, so a
                // hole stops the batch here
                warn!(
                    "Block summary {} missing hash, stopping batch",
                    summary.block_number
                );
                break;
            };

            match self.fetch_and_process(block_hash).await {
                Ok((deployments, transfers)) => {
                    processed += 1;
                    let mut status = self.status.write().await;
                    status.blocks_indexed += 1;
                    status.transfers_extracted += transfers as u64;
                    drop(status);
                    trace!(
                        "Processed block {} ({} deployments)",
                        summary.block_number,
                        deployments
                    );
                }
                Err(err) => {
                    error!(
                        "Failed to process block {}: {}, stopping batch",
                        summary.block_number, err
                    );
                    break;
                }
            }

            // spacing between fetches keeps the CLI responsive
            sleep(Duration::from_millis(INTER_BLOCK_DELAY_MILLIS)).await;
        }

        if processed > 0 {
            let checkpoint = start + processed as i64 - 1;
            self.db_executor
                .execute(|| self.store.set_last_indexed_block(checkpoint))
                .await?;
            self.status.write().await.last_indexed_block = checkpoint;
            info!(
                "Sync cycle complete: checkpoint {} ({} blocks processed, {} remaining)",
                checkpoint,
                processed,
                head.block_number - checkpoint
            );
        }

        Ok(())
    }

    async fn fetch_and_process(&self, block_hash: &str) -> Result<(usize, usize), SyncError> {
        let detail = self
            .node_executor
            .execute(|| self.node.block_details(block_hash))
            .await?;
        let outcome = self.processor.process_block(&detail).await?;
        Ok((outcome.deployments, outcome.transfers))
    }

    /// Upsert validator rows from the current bonds and active set.
    /// Runs every tick.
    async fn refresh_validators(&self) -> Result<(), SyncError> {
        let bonds = self.node_executor.execute(|| self.node.bonds()).await?;
        if bonds.is_empty() {
            return Ok(());
        }

        let active = match self
            .node_executor
            .execute(|| self.node.active_validators())
            .await
        {
            Ok(validators) => validators,
            Err(err) => {
                debug!("Active validator set unavailable: {}", err);
                Vec::new()
            }
        };
        let active_set: HashSet<&str> = active.iter().map(|v| v.validator.as_str()).collect();

        let current_block = self
            .db_executor
            .execute(|| self.store.get_last_indexed_block())
            .await?;

        self.db_executor
            .execute(|| async {
                for bond in &bonds {
                    let status = if active_set.contains(bond.validator.as_str()) {
                        ValidatorStatus::Active
                    } else {
                        ValidatorStatus::Bonded
                    };
                    sqlx::query(
                        "INSERT INTO validators (public_key, name, total_stake, \
                             first_seen_block, last_seen_block, status) \
                         VALUES ($1, $1, $2, $3, $3, $4) \
                         ON CONFLICT (public_key) DO UPDATE SET \
                             total_stake = GREATEST(validators.total_stake, EXCLUDED.total_stake), \
                             last_seen_block = EXCLUDED.last_seen_block, \
                             status = EXCLUDED.status, \
                             updated_at = NOW()",
                    )
                    .bind(&bond.validator)
                    .bind(bond.stake)
                    .bind(current_block)
                    .bind(status.as_ref())
                    .execute(self.store.pool())
                    .await
                    .map_err(StoreError::from)?;
                }
                Ok::<(), StoreError>(())
            })
            .await?;

        debug!(
            "Validator states refreshed: {} bonded, {} active",
            bonds.len(),
            active.len()
        );
        Ok(())
    }

    /// Record the current epoch once per epoch, checked every 100
    /// blocks.
    async fn check_epoch_transition(&self) -> Result<(), SyncError> {
        let current_block = self
            .db_executor
            .execute(|| self.store.get_last_indexed_block())
            .await?;
        if !should_run(
            &self.last_epoch_check_block,
            current_block,
            EPOCH_CHECK_BLOCK_INTERVAL,
        ) {
            return Ok(());
        }

        let info = self
            .node_executor
            .execute(|| self.node.epoch_info())
            .await?;
        let Some(epoch_number) = info.current_epoch else {
            return Ok(());
        };
        let Some(blocks_until_next) = info.blocks_until_next_epoch else {
            return Ok(());
        };
        let epoch_length = info.epoch_length.unwrap_or(DEFAULT_EPOCH_LENGTH);
        let quarantine_length = info.quarantine_length.unwrap_or(DEFAULT_QUARANTINE_LENGTH);

        let already_recorded = self
            .db_executor
            .execute(|| async {
                sqlx::query_scalar::<_, i32>(
                    "SELECT 1 FROM epoch_transitions WHERE epoch_number = $1",
                )
                .bind(epoch_number)
                .fetch_optional(self.store.pool())
                .await
                .map_err(StoreError::from)
            })
            .await?
            .is_some();
        if already_recorded {
            return Ok(());
        }

        let (start_block, end_block) = epoch_bounds(current_block, epoch_length, blocks_until_next);
        let active_count = self
            .node_executor
            .execute(|| self.node.active_validators())
            .await
            .map(|validators| validators.len() as i32)
            .unwrap_or(0);

        self.db_executor
            .execute(|| async {
                sqlx::query(
                    "INSERT INTO epoch_transitions (epoch_number, start_block, end_block, \
                         active_validators, quarantine_length) \
                     VALUES ($1, $2, $3, $4, $5) \
                     ON CONFLICT (epoch_number) DO NOTHING",
                )
                .bind(epoch_number)
                .bind(start_block)
                .bind(end_block)
                .bind(active_count)
                .bind(quarantine_length)
                .execute(self.store.pool())
                .await
                .map_err(StoreError::from)?;
                Ok::<(), StoreError>(())
            })
            .await?;

        info!(
            "Recorded epoch transition {}: blocks {} to {}, {} active validators",
            epoch_number, start_block, end_block, active_count
        );
        Ok(())
    }

    /// Snapshot network consensus every 50 blocks.
    async fn update_network_stats(&self) -> Result<(), SyncError> {
        let current_block = self
            .db_executor
            .execute(|| self.store.get_last_indexed_block())
            .await?;
        if !should_run(
            &self.last_stats_check_block,
            current_block,
            NETWORK_STATS_BLOCK_INTERVAL,
        ) {
            return Ok(());
        }

        let consensus = self
            .node_executor
            .execute(|| self.node.network_consensus())
            .await?;

        self.db_executor
            .execute(|| async {
                sqlx::query(
                    "INSERT INTO network_stats (block_number, total_validators, \
                         active_validators, validators_in_quarantine, \
                         consensus_participation, consensus_status) \
                     VALUES ($1, $2, $3, $4, CAST($5 AS numeric(5, 2)), $6)",
                )
                .bind(consensus.current_block.unwrap_or(current_block))
                .bind(consensus.total_bonded_validators.unwrap_or(0))
                .bind(consensus.active_validators.unwrap_or(0))
                .bind(consensus.validators_in_quarantine.unwrap_or(0))
                .bind(consensus.participation_rate.unwrap_or(0.0))
                .bind(consensus.status.as_ref())
                .execute(self.store.pool())
                .await
                .map_err(StoreError::from)?;
                Ok::<(), StoreError>(())
            })
            .await?;

        info!(
            "Network stats recorded at block {}: {} participation, status {}",
            current_block,
            consensus
                .participation_rate
                .map(|rate| format!("{:.1}%", rate))
                .unwrap_or_else(|| "?".into()),
            consensus.status
        );
        Ok(())
    }

    /// Compare the last main-chain blocks against stored rows every
    /// 500 blocks; a mismatch is handed to the reorg handler.
    async fn verify_main_chain(&self) -> Result<(), SyncError> {
        let current_block = self
            .db_executor
            .execute(|| self.store.get_last_indexed_block())
            .await?;
        if !should_run(
            &self.last_chain_verify_block,
            current_block,
            MAIN_CHAIN_VERIFY_BLOCK_INTERVAL,
        ) {
            return Ok(());
        }

        let chain = self
            .node_executor
            .execute(|| self.node.main_chain(MAIN_CHAIN_VERIFY_DEPTH))
            .await?;

        let mut mismatched = 0usize;
        for block in &chain {
            let Some(canonical_hash) = block.block_hash.as_deref() else {
                continue;
            };
            let stored = self
                .db_executor
                .execute(|| self.store.block_hash_at(block.block_number))
                .await?;
            match stored {
                Some(stored_hash) if stored_hash == canonical_hash => {}
                Some(stored_hash) => {
                    warn!(
                        "Main chain mismatch at block {}: stored {}, canonical {}",
                        block.block_number,
                        asi_common::utils::abbreviate(&stored_hash),
                        asi_common::utils::abbreviate(canonical_hash)
                    );
                    mismatched += 1;
                }
                None => {
                    trace!("Main chain block {} not yet indexed", block.block_number);
                }
            }
        }

        if mismatched > 0 {
            // delegate to the reorg handler rather than patching here
            match self.reorg.check_for_reorgs().await {
                Ok(Some(detection)) => info!(
                    "Main chain verification triggered reorg handling at fork {}",
                    detection.fork_point
                ),
                Ok(None) => warn!(
                    "Main chain mismatches ({}) without a resolvable fork point",
                    mismatched
                ),
                Err(err) => error!("Delegated reorg check failed: {}", err),
            }
        } else {
            info!(
                "Main chain verification complete: {} blocks checked",
                chain.len()
            );
        }
        Ok(())
    }
}
