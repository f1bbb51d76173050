//! Typed records for everything the node CLI can return.
//!
//! The CLI prints a mix of human readable frames and embedded JSON; the
//! gateway in the indexer crate is responsible for mapping both shapes
//! into these types. Fields the node may omit are `Option` or defaulted.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::time::TimestampMillis;

/// Summary of the last finalized block, parsed from `last-finalized-block`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedHead {
    pub block_number: i64,
    pub block_hash: String,
    #[serde(default)]
    pub timestamp: Option<TimestampMillis>,
    #[serde(default)]
    pub deploy_count: Option<u32>,
}

/// One frame of `get-blocks-by-height` / `show-main-chain` output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    pub block_number: i64,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub parent_hash: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub timestamp: Option<TimestampMillis>,
    #[serde(default)]
    pub deploy_count: Option<u32>,
    #[serde(default)]
    pub fault_tolerance: Option<f64>,
}

/// A validator bond as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bond {
    pub validator: String,
    pub stake: i64,
}

/// A justification attached to a block. Only the validator key is
/// consumed; the hash is kept for the stored JSON snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Justification {
    pub validator: String,
    #[serde(default)]
    pub latest_block_hash: Option<String>,
}

/// The `blockInfo` part of the `blocks --block-hash` JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    pub block_hash: String,
    pub block_number: i64,
    #[serde(default)]
    pub parents_hash_list: Vec<String>,
    #[serde(default)]
    pub timestamp: TimestampMillis,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub pre_state_hash: Option<String>,
    #[serde(default)]
    pub post_state_hash: Option<String>,
    #[serde(default)]
    pub bonds: Vec<Bond>,
    #[serde(default)]
    pub justifications: Vec<Justification>,
    #[serde(default)]
    pub fault_tolerance: Option<f64>,
    #[serde(default)]
    pub seq_num: Option<i32>,
    #[serde(default)]
    pub sig: Option<String>,
    #[serde(default)]
    pub sig_algorithm: Option<String>,
    #[serde(default)]
    pub shard_id: Option<String>,
    #[serde(default)]
    pub extra_bytes: Option<String>,
    #[serde(default)]
    pub version: Option<i32>,
}

impl BlockInfo {
    /// First parent, or empty for the genesis block.
    pub fn parent_hash(&self) -> &str {
        self.parents_hash_list
            .first()
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// One deployment inside a block payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployData {
    /// The signature doubles as the deploy id.
    pub sig: String,
    #[serde(default)]
    pub deployer: String,
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub timestamp: Option<TimestampMillis>,
    #[serde(default)]
    pub sig_algorithm: Option<String>,
    #[serde(default)]
    pub phlo_price: Option<i64>,
    #[serde(default)]
    pub phlo_limit: Option<i64>,
    #[serde(default)]
    pub cost: Option<i64>,
    #[serde(default)]
    pub valid_after_block_number: Option<i64>,
    #[serde(default)]
    pub errored: bool,
    #[serde(default)]
    pub system_deploy_error: Option<String>,
    #[serde(default)]
    pub seq_num: Option<i32>,
    #[serde(default)]
    pub shard_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Full block payload from `blocks --block-hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDetail {
    pub block_info: BlockInfo,
    #[serde(default)]
    pub deploys: Vec<DeployData>,
}

/// Enriched deploy payload from `get-deploy --format json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployInfoResponse {
    #[serde(default)]
    pub deploy_info: Option<DeployData>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Active validator entry from `active-validators`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveValidator {
    pub validator: String,
    pub stake: i64,
}

/// Key/value lines of `epoch-info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochInfo {
    pub current_epoch: Option<i64>,
    pub epoch_length: Option<i64>,
    pub quarantine_length: Option<i64>,
    pub blocks_until_next_epoch: Option<i64>,
}

/// Health classification printed by `network-consensus`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConsensusStatus {
    Healthy,
    Degraded,
    Critical,
    #[default]
    Unknown,
}

/// Snapshot of `network-consensus`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSnapshot {
    pub current_block: Option<i64>,
    pub total_bonded_validators: Option<i32>,
    pub active_validators: Option<i32>,
    pub validators_in_quarantine: Option<i32>,
    pub participation_rate: Option<f64>,
    pub status: ConsensusStatus,
}

/// One frame of `show-deploys` output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeploy {
    pub deploy_id: String,
    #[serde(default)]
    pub deployer: Option<String>,
    #[serde(default)]
    pub term: Option<String>,
    #[serde(default)]
    pub timestamp: Option<TimestampMillis>,
}

/// Classification of a deployment derived from its term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeploymentType {
    AsiTransfer,
    ValidatorOperation,
    FinalizerContract,
    RegistryLookup,
    AuctionContract,
    SmartContract,
    GenesisMint,
    GenesisBond,
}

/// Inclusion status of a deployment. Distinct from [`TransferStatus`],
/// the two vocabularies never mix columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    #[default]
    Included,
}

/// Outcome of an extracted transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Success,
    Failed,
    GenesisMint,
    GenesisBond,
}

/// Lifecycle status of a validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ValidatorStatus {
    Active,
    Bonded,
    Quarantine,
    Inactive,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_detail_from_node_json() {
        let payload = r#"{
            "blockInfo": {
                "blockHash": "a1b2c3",
                "blockNumber": 42,
                "parentsHashList": ["deadbeef"],
                "timestamp": 1700000000000,
                "sender": "04aabb",
                "postStateHash": "ff00",
                "bonds": [{"validator": "04aabb", "stake": 1000}],
                "justifications": [{"validator": "04aabb", "latestBlockHash": "deadbeef"}],
                "faultTolerance": -0.5
            },
            "deploys": [{
                "sig": "s1",
                "deployer": "04ccdd",
                "term": "Nil",
                "timestamp": 1700000000001,
                "errored": false
            }]
        }"#;

        let detail: BlockDetail = serde_json::from_str(payload).unwrap();
        assert_eq!(detail.block_info.block_number, 42);
        assert_eq!(detail.block_info.parent_hash(), "deadbeef");
        assert_eq!(detail.block_info.bonds.len(), 1);
        assert_eq!(detail.deploys.len(), 1);
        assert_eq!(detail.deploys[0].sig, "s1");
        assert!(!detail.deploys[0].errored);
    }

    #[test]
    fn test_block_detail_missing_optionals() {
        // The node omits most fields for early blocks
        let payload = r#"{"blockInfo": {"blockHash": "00", "blockNumber": 0}}"#;
        let detail: BlockDetail = serde_json::from_str(payload).unwrap();
        assert_eq!(detail.block_info.parent_hash(), "");
        assert!(detail.deploys.is_empty());
        assert!(detail.block_info.bonds.is_empty());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(DeploymentType::AsiTransfer.to_string(), "asi_transfer");
        assert_eq!(TransferStatus::GenesisMint.to_string(), "genesis_mint");
        assert_eq!(ConsensusStatus::Healthy.to_string(), "healthy");
        assert_eq!(ValidatorStatus::Active.to_string(), "active");
        assert_eq!(DeploymentStatus::Included.to_string(), "included");
    }
}
