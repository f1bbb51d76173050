//! Gateway to the external `node_cli` binary.
//!
//! Every chain query spawns a fresh subprocess, captures its stdout and
//! maps it into the typed records of `asi_common::chain`. The gateway is
//! the only place that knows about the CLI's argument layout and wire
//! encoding; everything above it works with typed data.

pub mod parser;

use crate::config::{Config, BLOCK_BATCH_TIMEOUT};
use crate::resilience::TransientError;
use asi_common::chain::{
    ActiveValidator, BlockDeploy, BlockDetail, BlockSummary, Bond, ConsensusSnapshot,
    DeployInfoResponse, EpochInfo, FinalizedHead,
};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node CLI not found at {0}")]
    CliNotFound(PathBuf),

    #[error("failed to spawn node CLI: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("CLI command '{command}' failed: {stderr}")]
    Cli { command: String, stderr: String },

    #[error("CLI command '{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("could not parse '{command}' output: {reason}")]
    Parse { command: String, reason: String },
}

impl TransientError for NodeError {
    fn is_transient(&self) -> bool {
        // unrecognizable output will not fix itself on retry
        !matches!(self, NodeError::Parse { .. } | NodeError::CliNotFound(_))
    }
}

/// Client for querying an ASI-Chain node through the `node_cli` binary.
///
/// Each call is a fresh, stateless process spawn; concurrency is bounded
/// by the resilience executor wrapping the calls.
pub struct NodeClient {
    cli_path: PathBuf,
    observer_host: String,
    observer_grpc_port: u16,
    observer_http_port: u16,
    command_timeout: Duration,
}

impl NodeClient {
    pub fn new(config: &Config) -> Result<Self, NodeError> {
        let cli_path = PathBuf::from(&config.rust_cli_path);
        if !Path::new(&cli_path).exists() {
            return Err(NodeError::CliNotFound(cli_path));
        }

        Ok(Self {
            cli_path,
            observer_host: config.observer_host.clone(),
            observer_grpc_port: config.observer_grpc_port,
            observer_http_port: config.observer_http_port,
            command_timeout: Duration::from_secs(config.node_timeout),
        })
    }

    async fn run_command(
        &self,
        args: &[&str],
        command_timeout: Duration,
    ) -> Result<String, NodeError> {
        let command_name = args.first().copied().unwrap_or_default().to_string();
        debug!("Running CLI command: {}", args.join(" "));

        let child = Command::new(&self.cli_path)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(NodeError::Spawn)?;

        let output = timeout(command_timeout, child.wait_with_output())
            .await
            .map_err(|_| NodeError::Timeout {
                command: command_name.clone(),
                timeout: command_timeout,
            })?
            .map_err(NodeError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(NodeError::Cli {
                command: command_name,
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse_error(command: &str, reason: impl Into<String>) -> NodeError {
        NodeError::Parse {
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    /// Last finalized block of the chain.
    pub async fn head(&self) -> Result<FinalizedHead, NodeError> {
        let http_port = self.observer_http_port.to_string();
        let stdout = self
            .run_command(
                &[
                    "last-finalized-block",
                    "-H",
                    &self.observer_host,
                    "--http-port",
                    &http_port,
                ],
                self.command_timeout,
            )
            .await?;

        parser::parse_finalized_head(&stdout)
            .ok_or_else(|| Self::parse_error("last-finalized-block", "no block fields in output"))
    }

    /// Block summaries for the inclusive height range `[start, end]`.
    pub async fn blocks_by_height(
        &self,
        start: i64,
        end: i64,
    ) -> Result<Vec<BlockSummary>, NodeError> {
        let (start_arg, end_arg) = (start.to_string(), end.to_string());
        let grpc_port = self.observer_grpc_port.to_string();
        let stdout = self
            .run_command(
                &[
                    "get-blocks-by-height",
                    "-s",
                    &start_arg,
                    "-e",
                    &end_arg,
                    "-H",
                    &self.observer_host,
                    "--grpc-port",
                    &grpc_port,
                ],
                // the range can span many frames, give it more time
                Duration::from_secs(BLOCK_BATCH_TIMEOUT),
            )
            .await?;

        let blocks = parser::parse_block_frames(&stdout);
        if blocks.is_empty() {
            return Err(Self::parse_error(
                "get-blocks-by-height",
                format!("no block frames for range {}-{}", start, end),
            ));
        }
        Ok(blocks)
    }

    /// Full block payload, including deployments, by hash.
    pub async fn block_details(&self, block_hash: &str) -> Result<BlockDetail, NodeError> {
        let http_port = self.observer_http_port.to_string();
        let stdout = self
            .run_command(
                &[
                    "blocks",
                    "--block-hash",
                    block_hash,
                    "-H",
                    &self.observer_host,
                    "--http-port",
                    &http_port,
                ],
                self.command_timeout,
            )
            .await?;

        let value = parser::extract_json(&stdout)
            .ok_or_else(|| Self::parse_error("blocks", "no JSON document in output"))?;
        serde_json::from_value(value).map_err(|e| Self::parse_error("blocks", e.to_string()))
    }

    /// Enriched deployment payload by deploy id.
    pub async fn deploy_info(&self, deploy_id: &str) -> Result<DeployInfoResponse, NodeError> {
        let http_port = self.observer_http_port.to_string();
        let stdout = self
            .run_command(
                &[
                    "get-deploy",
                    "-d",
                    deploy_id,
                    "--format",
                    "json",
                    "-H",
                    &self.observer_host,
                    "--http-port",
                    &http_port,
                ],
                self.command_timeout,
            )
            .await?;

        let value = parser::extract_json(&stdout)
            .ok_or_else(|| Self::parse_error("get-deploy", "no JSON document in output"))?;
        serde_json::from_value(value).map_err(|e| Self::parse_error("get-deploy", e.to_string()))
    }

    /// Current validator bonds. May legitimately be empty between
    /// epochs, so an empty list is not a parse failure here.
    pub async fn bonds(&self) -> Result<Vec<Bond>, NodeError> {
        let http_port = self.observer_http_port.to_string();
        let stdout = self
            .run_command(
                &["bonds", "-H", &self.observer_host, "--http-port", &http_port],
                self.command_timeout,
            )
            .await?;

        Ok(parser::parse_bonds(&stdout))
    }

    /// Validators in the current active set.
    pub async fn active_validators(&self) -> Result<Vec<ActiveValidator>, NodeError> {
        let http_port = self.observer_http_port.to_string();
        let stdout = self
            .run_command(
                &[
                    "active-validators",
                    "-H",
                    &self.observer_host,
                    "--http-port",
                    &http_port,
                ],
                self.command_timeout,
            )
            .await?;

        Ok(parser::parse_active_validators(&stdout))
    }

    /// Epoch boundaries and lengths.
    pub async fn epoch_info(&self) -> Result<EpochInfo, NodeError> {
        let grpc_port = self.observer_grpc_port.to_string();
        let http_port = self.observer_http_port.to_string();
        let stdout = self
            .run_command(
                &[
                    "epoch-info",
                    "-H",
                    &self.observer_host,
                    "--grpc-port",
                    &grpc_port,
                    "--http-port",
                    &http_port,
                ],
                self.command_timeout,
            )
            .await?;

        let info = parser::parse_epoch_info(&stdout);
        if info == EpochInfo::default() {
            return Err(Self::parse_error("epoch-info", "no epoch fields in output"));
        }
        Ok(info)
    }

    /// Consensus health snapshot.
    pub async fn network_consensus(&self) -> Result<ConsensusSnapshot, NodeError> {
        let grpc_port = self.observer_grpc_port.to_string();
        let http_port = self.observer_http_port.to_string();
        let stdout = self
            .run_command(
                &[
                    "network-consensus",
                    "-H",
                    &self.observer_host,
                    "--grpc-port",
                    &grpc_port,
                    "--http-port",
                    &http_port,
                ],
                self.command_timeout,
            )
            .await?;

        let snapshot = parser::parse_network_consensus(&stdout);
        if snapshot == ConsensusSnapshot::default() {
            return Err(Self::parse_error(
                "network-consensus",
                "no consensus fields in output",
            ));
        }
        Ok(snapshot)
    }

    /// Last `depth` blocks of the canonical main chain.
    pub async fn main_chain(&self, depth: u32) -> Result<Vec<BlockSummary>, NodeError> {
        let depth_arg = depth.to_string();
        let grpc_port = self.observer_grpc_port.to_string();
        let stdout = self
            .run_command(
                &[
                    "show-main-chain",
                    "-d",
                    &depth_arg,
                    "-H",
                    &self.observer_host,
                    "--grpc-port",
                    &grpc_port,
                ],
                self.command_timeout,
            )
            .await?;

        let blocks = parser::parse_block_frames(&stdout);
        if blocks.is_empty() {
            return Err(Self::parse_error("show-main-chain", "no block frames"));
        }
        Ok(blocks)
    }

    /// Deployments of a block by height, in frame format.
    pub async fn block_deploys(&self, block_number: i64) -> Result<Vec<BlockDeploy>, NodeError> {
        let number_arg = block_number.to_string();
        let grpc_port = self.observer_grpc_port.to_string();
        let http_port = self.observer_http_port.to_string();
        let stdout = self
            .run_command(
                &[
                    "show-deploys",
                    "-b",
                    &number_arg,
                    "-H",
                    &self.observer_host,
                    "-p",
                    &grpc_port,
                    "--http-port",
                    &http_port,
                ],
                self.command_timeout,
            )
            .await?;

        Ok(parser::parse_deploy_frames(&stdout))
    }

    /// The node is healthy when it can answer a head query.
    pub async fn health_check(&self) -> bool {
        self.head().await.is_ok()
    }
}
