//! Per-block write path.
//!
//! Given a full block payload the processor writes the block, its
//! validator bonds, deployments and derived transfers in one
//! transaction, idempotent on the block hash. Genesis ingestion
//! additionally synthesizes allocation and bond deployments, transfers
//! and the initial balance states. The block-validator junction rows
//! are inserted after the main commit in a separate session so the hot
//! transaction stays small.

use crate::extractor::{extract_transfers, ExtractedTransfer};
use crate::node::{NodeClient, NodeError};
use crate::resilience::{ResilienceError, ResilientExecutor};
use crate::store::{Store, StoreError};
use asi_common::chain::{
    BlockDetail, BlockInfo, DeployData, DeploymentStatus, DeploymentType, Justification,
    TransferStatus,
};
use asi_common::config::{GENESIS_SOURCE_ADDRESS, POS_VAULT_ADDRESS};
use asi_common::utils::{abbreviate, format_token, is_asi_address};
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

lazy_static! {
    // genesis wallet allocations: initVault!("address", amount)
    static ref RE_INIT_VAULT: Regex =
        Regex::new(r#"initVault!\s*\(\s*"([^"]+)"\s*,\s*(\d+)\s*\)"#).unwrap();
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("block payload missing required fields")]
    IncompletePayload,

    #[error(transparent)]
    Store(#[from] ResilienceError<StoreError>),
}

/// Outcome of a successful [`BlockProcessor::process_block`] call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOutcome {
    /// False when the block was already indexed and nothing was written.
    pub inserted: bool,
    pub deployments: usize,
    pub transfers: usize,
}

/// Classify a deployment by its term. Rules are ordered, first hit wins.
pub fn classify_deployment(term: &str) -> DeploymentType {
    if term.contains("ASIVault") && term.contains("transfer") {
        DeploymentType::AsiTransfer
    } else if term.contains("validator") || term.contains("bond") {
        DeploymentType::ValidatorOperation
    } else if term.contains("finalizer") {
        DeploymentType::FinalizerContract
    } else if term.contains("registry") && term.contains("lookup") {
        DeploymentType::RegistryLookup
    } else if term.contains("auction") {
        DeploymentType::AuctionContract
    } else {
        DeploymentType::SmartContract
    }
}

/// Overlay the fields the `get-deploy` payload knows better. Missing
/// enrichment fields keep the base values.
pub fn merge_enrichment(deploy: &mut DeployData, enriched: &DeployData, status: Option<&str>) {
    if enriched.sig_algorithm.is_some() {
        deploy.sig_algorithm = enriched.sig_algorithm.clone();
    }
    if enriched.seq_num.is_some() {
        deploy.seq_num = enriched.seq_num;
    }
    if enriched.shard_id.is_some() {
        deploy.shard_id = enriched.shard_id.clone();
    }
    if enriched.timestamp.is_some() {
        deploy.timestamp = enriched.timestamp;
    }
    if enriched.cost.is_some() {
        deploy.cost = enriched.cost;
    }
    if let Some(status) = status {
        deploy.status = Some(status.to_string());
    }
}

/// A deployment with everything derived before the write transaction
/// opens: classification, error fields and extracted transfers.
#[derive(Debug, Clone)]
pub struct PreparedDeployment {
    pub data: DeployData,
    pub deployment_type: DeploymentType,
    pub errored: bool,
    pub error_message: Option<String>,
    pub transfers: Vec<ExtractedTransfer>,
}

pub fn prepare_deployment(
    mut data: DeployData,
    block_timestamp: i64,
    extract: bool,
) -> PreparedDeployment {
    // empty error strings are noise from the node, not failures
    let error_message = data
        .system_deploy_error
        .take()
        .filter(|message| !message.is_empty());
    let errored = data.errored || error_message.is_some();

    let deployment_type = classify_deployment(&data.term);
    let transfers = if extract {
        extract_transfers(&data.term, &data.deployer, errored)
    } else {
        Vec::new()
    };

    if data.timestamp.is_none() {
        data.timestamp = Some(block_timestamp as u64);
    }

    PreparedDeployment {
        data,
        deployment_type,
        errored,
        error_message,
        transfers,
    }
}

/// Genesis allocations and bonds, derived once from the genesis block
/// payload and cached for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct GenesisData {
    /// `(address, amount_dust)` wallet allocations.
    pub allocations: Vec<(String, i64)>,
    /// `(validator_key, stake_dust)` validator bonds.
    pub bonds: Vec<(String, i64)>,
}

/// Allocations come from `initVault!` calls in the genesis deploys,
/// bonds from the genesis bonds map.
pub fn derive_genesis_data(detail: &BlockDetail) -> GenesisData {
    let mut allocations = Vec::new();
    for deploy in &detail.deploys {
        for caps in RE_INIT_VAULT.captures_iter(&deploy.term) {
            let address = caps[1].to_string();
            if !is_asi_address(&address) {
                continue;
            }
            if let Ok(amount) = caps[2].parse::<i64>() {
                if amount > 0 {
                    allocations.push((address, amount));
                }
            }
        }
    }

    let bonds = detail
        .block_info
        .bonds
        .iter()
        .filter(|bond| bond.stake > 0)
        .map(|bond| (bond.validator.clone(), bond.stake))
        .collect();

    GenesisData { allocations, bonds }
}

pub struct BlockProcessor {
    store: Arc<Store>,
    node: Arc<NodeClient>,
    node_executor: Arc<ResilientExecutor>,
    db_executor: Arc<ResilientExecutor>,
    enable_transfer_extraction: bool,
    enrich_delay: Duration,
    genesis_cache: OnceLock<GenesisData>,
}

impl BlockProcessor {
    pub fn new(
        store: Arc<Store>,
        node: Arc<NodeClient>,
        node_executor: Arc<ResilientExecutor>,
        db_executor: Arc<ResilientExecutor>,
        enable_transfer_extraction: bool,
        enrich_delay: Duration,
    ) -> Self {
        Self {
            store,
            node,
            node_executor,
            db_executor,
            enable_transfer_extraction,
            enrich_delay,
            genesis_cache: OnceLock::new(),
        }
    }

    /// Index one block. Re-processing an already stored block is a
    /// no-op, making overlapping batches and restarts safe.
    pub async fn process_block(&self, detail: &BlockDetail) -> Result<ProcessOutcome, ProcessError> {
        let info = &detail.block_info;
        if info.block_hash.is_empty() {
            return Err(ProcessError::IncompletePayload);
        }

        let exists = self
            .db_executor
            .execute(|| self.store.block_exists(&info.block_hash))
            .await?;
        if exists {
            debug!("Block {} already indexed, skipping", info.block_number);
            return Ok(ProcessOutcome::default());
        }

        // enrichment happens before the transaction opens so no session
        // is ever held across CLI I/O
        let mut prepared = Vec::with_capacity(detail.deploys.len());
        for deploy in &detail.deploys {
            let mut deploy = deploy.clone();
            self.enrich_deployment(&mut deploy).await;
            prepared.push(prepare_deployment(
                deploy,
                info.timestamp as i64,
                self.enable_transfer_extraction,
            ));
        }

        let genesis = if info.block_number == 0 {
            Some(
                self.genesis_cache
                    .get_or_init(|| derive_genesis_data(detail))
                    .clone(),
            )
        } else {
            None
        };

        self.db_executor
            .execute(|| self.write_block(info, &prepared, genesis.as_ref()))
            .await?;

        // junction rows go through a fresh session after the commit;
        // ON CONFLICT DO NOTHING keeps duplicates harmless
        if !info.justifications.is_empty() {
            if let Err(err) = self
                .insert_block_validators(&info.block_hash, &info.justifications)
                .await
            {
                warn!(
                    "Failed to insert block validators for {}: {}",
                    abbreviate(&info.block_hash),
                    err
                );
            }
        }

        let transfers: usize = prepared.iter().map(|p| p.transfers.len()).sum();
        let genesis_transfers = genesis
            .as_ref()
            .map(|g| g.allocations.len() + g.bonds.len())
            .unwrap_or(0);

        metrics::counter!("asi_indexer_blocks_indexed_total").increment(1);
        metrics::counter!("asi_indexer_transfers_extracted_total")
            .increment((transfers + genesis_transfers) as u64);

        if info.block_number == 0 {
            info!(
                "Genesis block indexed: {} deployments, {} allocations, {} bonds",
                prepared.len(),
                genesis.as_ref().map(|g| g.allocations.len()).unwrap_or(0),
                genesis.as_ref().map(|g| g.bonds.len()).unwrap_or(0),
            );
        } else {
            info!(
                "Block {} indexed: {} deployments, {} transfers",
                info.block_number,
                prepared.len(),
                transfers
            );
        }

        Ok(ProcessOutcome {
            inserted: true,
            deployments: prepared.len(),
            transfers: transfers + genesis_transfers,
        })
    }

    /// Best-effort `get-deploy` enrichment; failures degrade to the
    /// base fields without aborting the block.
    async fn enrich_deployment(&self, deploy: &mut DeployData) {
        let deploy_id = deploy.sig.clone();
        if deploy_id.is_empty() {
            return;
        }

        let result: Result<_, ResilienceError<NodeError>> = self
            .node_executor
            .execute(|| self.node.deploy_info(&deploy_id))
            .await;

        match result {
            Ok(response) => {
                if let Some(enriched) = &response.deploy_info {
                    merge_enrichment(deploy, enriched, response.status.as_deref());
                }
            }
            Err(err) => {
                debug!(
                    "Enrichment unavailable for deploy {}: {}",
                    abbreviate(&deploy_id),
                    err
                );
            }
        }

        sleep(self.enrich_delay).await;
    }

    /// The transactional unit: block row, bonds, deployments, transfers
    /// and, for block 0, the genesis bootstrap. Any failure rolls back
    /// the whole block.
    async fn write_block(
        &self,
        info: &BlockInfo,
        deployments: &[PreparedDeployment],
        genesis: Option<&GenesisData>,
    ) -> Result<(), StoreError> {
        let mut tx = self.store.begin().await?;

        let bonds_map = serde_json::to_value(&info.bonds).unwrap_or(serde_json::Value::Null);
        let justifications =
            serde_json::to_value(&info.justifications).unwrap_or(serde_json::Value::Null);
        let state_root = info.post_state_hash.clone();

        sqlx::query(
            "INSERT INTO blocks (block_number, block_hash, parent_hash, timestamp, proposer, \
                 state_hash, state_root_hash, pre_state_hash, finalization_status, bonds_map, \
                 justifications, fault_tolerance, seq_num, sig, sig_algorithm, shard_id, \
                 extra_bytes, version, deployment_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $6, $7, 'finalized', $8, $9, $10, $11, $12, $13, \
                 $14, $15, $16, $17)",
        )
        .bind(info.block_number)
        .bind(&info.block_hash)
        .bind(info.parent_hash())
        .bind(info.timestamp as i64)
        .bind(&info.sender)
        .bind(&state_root)
        .bind(&info.pre_state_hash)
        .bind(&bonds_map)
        .bind(&justifications)
        .bind(info.fault_tolerance)
        .bind(info.seq_num)
        .bind(&info.sig)
        .bind(&info.sig_algorithm)
        .bind(&info.shard_id)
        .bind(&info.extra_bytes)
        .bind(info.version)
        .bind(deployments.len() as i32)
        .execute(&mut *tx)
        .await?;

        for bond in &info.bonds {
            sqlx::query(
                "INSERT INTO validators (public_key, name, total_stake, status, \
                     first_seen_block, last_seen_block) \
                 VALUES ($1, $1, $2, 'active', $3, $3) \
                 ON CONFLICT (public_key) DO UPDATE SET \
                     total_stake = GREATEST(validators.total_stake, EXCLUDED.total_stake), \
                     last_seen_block = EXCLUDED.last_seen_block, \
                     status = 'active', \
                     updated_at = NOW()",
            )
            .bind(&bond.validator)
            .bind(bond.stake)
            .bind(info.block_number)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO validator_bonds (block_hash, block_number, validator_public_key, stake) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(&info.block_hash)
            .bind(info.block_number)
            .bind(&bond.validator)
            .bind(bond.stake)
            .execute(&mut *tx)
            .await?;
        }

        for prepared in deployments {
            self.insert_deployment(&mut tx, info, prepared).await?;
        }

        if let Some(genesis) = genesis {
            self.write_genesis(&mut tx, info, genesis).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn insert_deployment(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        info: &BlockInfo,
        prepared: &PreparedDeployment,
    ) -> Result<(), StoreError> {
        let deploy = &prepared.data;
        let timestamp = deploy.timestamp.unwrap_or(info.timestamp) as i64;

        sqlx::query(
            "INSERT INTO deployments (deploy_id, block_hash, block_number, deployer, term, \
                 timestamp, sig, sig_algorithm, phlo_price, phlo_limit, phlo_cost, \
                 valid_after_block_number, errored, error_message, deployment_type, seq_num, \
                 shard_id, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $1, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
                 $16, $17)",
        )
        .bind(&deploy.sig)
        .bind(&info.block_hash)
        .bind(info.block_number)
        .bind(&deploy.deployer)
        .bind(&deploy.term)
        .bind(timestamp)
        .bind(deploy.sig_algorithm.as_deref().unwrap_or("secp256k1"))
        .bind(deploy.phlo_price.unwrap_or(1))
        .bind(deploy.phlo_limit.unwrap_or(1_000_000))
        .bind(deploy.cost.unwrap_or(0))
        .bind(deploy.valid_after_block_number)
        .bind(prepared.errored)
        .bind(&prepared.error_message)
        .bind(prepared.deployment_type.as_ref())
        .bind(deploy.seq_num)
        .bind(&deploy.shard_id)
        .bind(
            deploy
                .status
                .as_deref()
                .unwrap_or(DeploymentStatus::Included.as_ref()),
        )
        .execute(&mut **tx)
        .await?;

        for transfer in &prepared.transfers {
            self.insert_transfer(tx, &deploy.sig, info.block_number, timestamp, transfer)
                .await?;
        }

        Ok(())
    }

    async fn insert_transfer(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        deploy_id: &str,
        block_number: i64,
        timestamp: i64,
        transfer: &ExtractedTransfer,
    ) -> Result<(), StoreError> {
        // the token column is derived in SQL from the dust column, so
        // amount_asi * 10^8 = amount_dust holds exactly
        sqlx::query(
            "INSERT INTO transfers (deploy_id, block_number, from_address, to_address, \
                 amount_dust, amount_asi, status, timestamp) \
             VALUES ($1, $2, $3, $4, $5, $5::numeric / 100000000, $6, $7)",
        )
        .bind(deploy_id)
        .bind(block_number)
        .bind(&transfer.from_address)
        .bind(&transfer.to_address)
        .bind(transfer.amount_dust)
        .bind(transfer.status.as_ref())
        .bind(timestamp)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Genesis bootstrap: synthetic allocation and bond deployments,
    /// their transfers, and the initial balance states.
    async fn write_genesis(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        info: &BlockInfo,
        genesis: &GenesisData,
    ) -> Result<(), StoreError> {
        let timestamp = info.timestamp as i64;

        for (index, (address, amount)) in genesis.allocations.iter().enumerate() {
            let deploy_id = format!("genesis_allocation_{}", index + 1);
            let term = format!(
                "Genesis ASI allocation to {}: {} ASI",
                address,
                format_token(*amount as u64)
            );
            self.insert_genesis_deployment(
                tx,
                info,
                &deploy_id,
                GENESIS_SOURCE_ADDRESS,
                &term,
                DeploymentType::GenesisMint,
            )
            .await?;
            self.insert_transfer(
                tx,
                &deploy_id,
                0,
                timestamp,
                &ExtractedTransfer {
                    from_address: GENESIS_SOURCE_ADDRESS.to_string(),
                    to_address: address.clone(),
                    amount_dust: *amount,
                    status: TransferStatus::GenesisMint,
                },
            )
            .await?;

            // allocations start fully unbonded
            self.insert_balance_state(tx, address, *amount, 0).await?;
        }

        let mut total_bonded: i64 = 0;
        for (index, (validator, stake)) in genesis.bonds.iter().enumerate() {
            let deploy_id = format!("genesis_bond_{}", index + 1);
            let term = format!(
                "Genesis validator bond: {} ASI staked",
                format_token(*stake as u64)
            );
            self.insert_genesis_deployment(
                tx,
                info,
                &deploy_id,
                validator,
                &term,
                DeploymentType::GenesisBond,
            )
            .await?;
            self.insert_transfer(
                tx,
                &deploy_id,
                0,
                timestamp,
                &ExtractedTransfer {
                    from_address: validator.clone(),
                    to_address: POS_VAULT_ADDRESS.to_string(),
                    amount_dust: *stake,
                    status: TransferStatus::GenesisBond,
                },
            )
            .await?;

            // validators staked everything at genesis
            self.insert_balance_state(tx, validator, 0, *stake).await?;
            total_bonded += stake;
        }

        // the PoS vault holds the sum of all bonded stake
        if total_bonded > 0 {
            self.insert_balance_state(tx, POS_VAULT_ADDRESS, 0, total_bonded)
                .await?;
        }

        debug!(
            "Genesis bootstrap wrote {} allocations and {} bonds ({} dust bonded)",
            genesis.allocations.len(),
            genesis.bonds.len(),
            total_bonded
        );
        Ok(())
    }

    async fn insert_genesis_deployment(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        info: &BlockInfo,
        deploy_id: &str,
        deployer: &str,
        term: &str,
        deployment_type: DeploymentType,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO deployments (deploy_id, block_hash, block_number, deployer, term, \
                 timestamp, sig, deployment_type, errored, status) \
             VALUES ($1, $2, 0, $3, $4, $5, $1, $6, FALSE, 'included')",
        )
        .bind(deploy_id)
        .bind(&info.block_hash)
        .bind(deployer)
        .bind(term)
        .bind(info.timestamp as i64)
        .bind(deployment_type.as_ref())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_balance_state(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        address: &str,
        unbonded_dust: i64,
        bonded_dust: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO balance_states (address, block_number, unbonded_balance_dust, \
                 unbonded_balance_asi, bonded_balance_dust, bonded_balance_asi) \
             VALUES ($1, 0, $2, $2::numeric / 100000000, $3, $3::numeric / 100000000)",
        )
        .bind(address)
        .bind(unbonded_dust)
        .bind(bonded_dust)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_block_validators(
        &self,
        block_hash: &str,
        justifications: &[Justification],
    ) -> Result<(), ResilienceError<StoreError>> {
        self.db_executor
            .execute(|| async {
                for justification in justifications {
                    if justification.validator.is_empty() {
                        continue;
                    }
                    sqlx::query(
                        "INSERT INTO block_validators (block_hash, validator_public_key) \
                         VALUES ($1, $2) ON CONFLICT DO NOTHING",
                    )
                    .bind(block_hash)
                    .bind(&justification.validator)
                    .execute(self.store.pool())
                    .await
                    .map_err(StoreError::from)?;
                }
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genesis_detail() -> BlockDetail {
        let allocation_addr_a = format!("1111{}", "a".repeat(50));
        let allocation_addr_b = format!("1111{}", "b".repeat(50));
        let validator_a = format!("04{}", "1".repeat(128));
        let validator_b = format!("04{}", "2".repeat(128));

        serde_json::from_value(serde_json::json!({
            "blockInfo": {
                "blockHash": "genesis00",
                "blockNumber": 0,
                "timestamp": 1_700_000_000_000u64,
                "sender": "",
                "bonds": [
                    {"validator": validator_a, "stake": 300},
                    {"validator": validator_b, "stake": 700},
                ],
            },
            "deploys": [
                {"sig": "d1", "deployer": "04aa", "term":
                    format!("initVault!(\"{}\", 1000) | initVault!(\"{}\", 2000)",
                        allocation_addr_a, allocation_addr_b)},
            ],
        }))
        .unwrap()
    }

    #[test]
    fn test_classify_deployment_ordering() {
        assert_eq!(
            classify_deployment("new ASIVault transfer thing"),
            DeploymentType::AsiTransfer
        );
        // without the vault marker, "transfer" alone is not a transfer
        assert_eq!(
            classify_deployment("transfer helper"),
            DeploymentType::SmartContract
        );
        assert_eq!(
            classify_deployment("bond a validator"),
            DeploymentType::ValidatorOperation
        );
        assert_eq!(
            classify_deployment("the finalizer runs"),
            DeploymentType::FinalizerContract
        );
        assert_eq!(
            classify_deployment("registry lookup for uri"),
            DeploymentType::RegistryLookup
        );
        assert_eq!(
            classify_deployment("auction round two"),
            DeploymentType::AuctionContract
        );
        assert_eq!(classify_deployment("Nil"), DeploymentType::SmartContract);
    }

    #[test]
    fn test_classification_priority_over_later_rules() {
        // contains both vault-transfer and auction markers; the first
        // rule must win
        let term = "ASIVault transfer during auction";
        assert_eq!(classify_deployment(term), DeploymentType::AsiTransfer);
    }

    #[test]
    fn test_prepare_deployment_error_fields() {
        let deploy = DeployData {
            sig: "s1".into(),
            deployer: "04aa".into(),
            term: "Nil".into(),
            system_deploy_error: Some("out of phlo".into()),
            ..Default::default()
        };
        let prepared = prepare_deployment(deploy, 1_700_000_000_000, true);
        assert!(prepared.errored);
        assert_eq!(prepared.error_message.as_deref(), Some("out of phlo"));
        assert_eq!(prepared.data.timestamp, Some(1_700_000_000_000));
    }

    #[test]
    fn test_prepare_deployment_empty_error_string_is_ignored() {
        let deploy = DeployData {
            sig: "s1".into(),
            system_deploy_error: Some(String::new()),
            ..Default::default()
        };
        let prepared = prepare_deployment(deploy, 0, false);
        assert!(!prepared.errored);
        assert!(prepared.error_message.is_none());
    }

    #[test]
    fn test_prepare_deployment_extracts_failed_transfers() {
        let from = format!("1111{}", "f".repeat(50));
        let to = format!("1111{}", "t".repeat(50));
        let deploy = DeployData {
            sig: "s1".into(),
            deployer: "04aa".into(),
            term: format!(r#"match ("{}", "{}", 42)"#, from, to),
            errored: true,
            ..Default::default()
        };
        let prepared = prepare_deployment(deploy, 0, true);
        assert_eq!(prepared.transfers.len(), 1);
        assert_eq!(prepared.transfers[0].status, TransferStatus::Failed);
        assert_eq!(prepared.transfers[0].amount_dust, 42);
    }

    #[test]
    fn test_merge_enrichment_keeps_base_when_absent() {
        let mut deploy = DeployData {
            sig: "s1".into(),
            sig_algorithm: Some("secp256k1".into()),
            timestamp: Some(1),
            ..Default::default()
        };
        merge_enrichment(&mut deploy, &DeployData::default(), None);
        assert_eq!(deploy.sig_algorithm.as_deref(), Some("secp256k1"));
        assert_eq!(deploy.timestamp, Some(1));
    }

    #[test]
    fn test_merge_enrichment_overlays_fields() {
        let mut deploy = DeployData {
            sig: "s1".into(),
            ..Default::default()
        };
        let enriched = DeployData {
            sig: "s1".into(),
            sig_algorithm: Some("ed25519".into()),
            seq_num: Some(4),
            cost: Some(1234),
            ..Default::default()
        };
        merge_enrichment(&mut deploy, &enriched, Some("included"));
        assert_eq!(deploy.sig_algorithm.as_deref(), Some("ed25519"));
        assert_eq!(deploy.seq_num, Some(4));
        assert_eq!(deploy.cost, Some(1234));
        assert_eq!(deploy.status.as_deref(), Some("included"));
    }

    #[test]
    fn test_derive_genesis_data() {
        let genesis = derive_genesis_data(&genesis_detail());

        assert_eq!(genesis.allocations.len(), 2);
        assert_eq!(genesis.bonds.len(), 2);

        // allocation and bond sums are preserved end to end
        let allocation_sum: i64 = genesis.allocations.iter().map(|(_, amount)| amount).sum();
        let bond_sum: i64 = genesis.bonds.iter().map(|(_, stake)| stake).sum();
        assert_eq!(allocation_sum, 3000);
        assert_eq!(bond_sum, 1000);
    }

    #[test]
    fn test_derive_genesis_skips_invalid_allocations() {
        let detail: BlockDetail = serde_json::from_value(serde_json::json!({
            "blockInfo": {"blockHash": "g", "blockNumber": 0},
            "deploys": [
                // bad prefix and zero amount are both ignored
                {"sig": "d1", "term": "initVault!(\"2222bogus\", 50) | initVault!(\"1111short\", 50)"},
                {"sig": "d2", "term": format!("initVault!(\"1111{}\", 0)", "c".repeat(50))},
            ],
        }))
        .unwrap();

        let genesis = derive_genesis_data(&detail);
        assert!(genesis.allocations.is_empty());
        assert!(genesis.bonds.is_empty());
    }

    #[test]
    fn test_genesis_data_ignores_zero_stake_bonds() {
        let detail: BlockDetail = serde_json::from_value(serde_json::json!({
            "blockInfo": {
                "blockHash": "g",
                "blockNumber": 0,
                "bonds": [
                    {"validator": "04aa", "stake": 0},
                    {"validator": "04bb", "stake": 10},
                ],
            },
        }))
        .unwrap();

        let genesis = derive_genesis_data(&detail);
        assert_eq!(genesis.bonds, vec![("04bb".to_string(), 10)]);
    }

    #[test]
    fn test_genesis_term_renders_exact_token_amounts() {
        assert_eq!(format_token(50_000_000_000_000), "500000.00000000");
    }
}
