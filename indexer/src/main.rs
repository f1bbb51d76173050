use anyhow::{bail, Context, Result};
use asi_indexer::config::{Config, DEPLOY_ENRICH_DELAY_MILLIS};
use asi_indexer::monitoring::{self, MonitoringContext};
use asi_indexer::node::NodeClient;
use asi_indexer::processor::BlockProcessor;
use asi_indexer::reorg::ReorgHandler;
use asi_indexer::resilience::ResilientExecutor;
use asi_indexer::store::Store;
use asi_indexer::sync::{IndexerStatus, SharedStatus, SyncEngine};
use clap::Parser;
use log::{info, warn};
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!(
        "Starting ASI-Chain indexer: observer {}:{}/{}, sync every {}s, batch size {}",
        config.observer_host,
        config.observer_grpc_port,
        config.observer_http_port,
        config.sync_interval,
        config.batch_size
    );

    // the store must be reachable before anything else starts
    let store = Arc::new(
        Store::connect(&config)
            .await
            .context("database unavailable at startup")?,
    );

    if config.reset {
        if !config.yes && !confirm_reset()? {
            bail!("database reset aborted");
        }
        store.reset().await.context("database reset failed")?;
        info!("Database reset complete");
    } else {
        store
            .create_tables()
            .await
            .context("schema bootstrap failed")?;
    }

    // a missing CLI binary is a configuration error, not a runtime one
    let node = Arc::new(NodeClient::new(&config)?);
    if !node.health_check().await {
        bail!("cannot reach the ASI-Chain node through the CLI");
    }
    info!("ASI-Chain node connection established");

    if config.start_from_block > 0 {
        info!("Configured to start syncing from block {}", config.start_from_block);
    }

    let node_executor = Arc::new(ResilientExecutor::node_operations());
    let db_executor = Arc::new(ResilientExecutor::database_operations());
    let status: SharedStatus = Arc::new(RwLock::new(IndexerStatus::default()));

    let processor = Arc::new(BlockProcessor::new(
        store.clone(),
        node.clone(),
        node_executor.clone(),
        db_executor.clone(),
        config.enable_rev_transfer_extraction,
        Duration::from_millis(DEPLOY_ENRICH_DELAY_MILLIS),
    ));
    let reorg = Arc::new(ReorgHandler::new(
        store.clone(),
        node.clone(),
        node_executor.clone(),
        db_executor.clone(),
        config.max_reorg_depth,
        config.confirmation_depth,
        Duration::from_secs(config.reorg_check_interval),
    ));
    let engine = Arc::new(SyncEngine::new(
        &config,
        store.clone(),
        node.clone(),
        processor,
        reorg.clone(),
        node_executor.clone(),
        db_executor.clone(),
        status.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let prometheus = if config.enable_metrics {
        Some(monitoring::install_metrics_recorder()?)
    } else {
        None
    };

    let monitor = if config.enable_health_check || config.enable_metrics {
        let context = Arc::new(MonitoringContext {
            store: store.clone(),
            status: status.clone(),
            node_executor: node_executor.clone(),
            db_executor: db_executor.clone(),
            reorg: reorg.clone(),
            prometheus,
        });
        let server = monitoring::monitoring_server(context, config.monitoring_port)?;
        let handle = server.handle();
        Some((tokio::spawn(server), handle))
    } else {
        None
    };

    let sync_task = tokio::spawn(engine.run(shutdown_rx.clone()));
    let reorg_task = tokio::spawn(reorg.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received, stopping services");
    let _ = shutdown_tx.send(true);

    if let Err(err) = sync_task.await {
        warn!("Sync task ended abnormally: {}", err);
    }
    if let Err(err) = reorg_task.await {
        warn!("Reorg monitor ended abnormally: {}", err);
    }
    if let Some((task, handle)) = monitor {
        handle.stop(true).await;
        let _ = task.await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Interactive confirmation for the destructive reset path.
fn confirm_reset() -> Result<bool> {
    print!("This will DELETE all indexed data. Type 'yes' to continue: ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("yes"))
}
