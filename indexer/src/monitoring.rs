//! Health and metrics HTTP surface.
//!
//! Serves `/health`, `/ready` and `/stats` for orchestration probes
//! and operators, plus the Prometheus scrape endpoint when metrics are
//! enabled. Read-only: every handler works off the shared status
//! snapshot and cheap store probes.

use crate::reorg::ReorgHandler;
use crate::resilience::ResilientExecutor;
use crate::store::Store;
use crate::sync::SharedStatus;
use actix_web::dev::Server;
use actix_web::web::Data;
use actix_web::{get, App, HttpResponse, HttpServer, Responder};
use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde_json::json;
use std::sync::Arc;

pub struct MonitoringContext {
    pub store: Arc<Store>,
    pub status: SharedStatus,
    pub node_executor: Arc<ResilientExecutor>,
    pub db_executor: Arc<ResilientExecutor>,
    pub reorg: Arc<ReorgHandler>,
    pub prometheus: Option<PrometheusHandle>,
}

/// Install the global Prometheus recorder. Call once at startup,
/// before any metric is touched.
pub fn install_metrics_recorder() -> anyhow::Result<PrometheusHandle> {
    let recorder = PrometheusBuilder::new()
        .build_recorder();
    let handle = recorder.handle();
    metrics::set_global_recorder(Box::new(recorder))
        .map_err(|e| anyhow::anyhow!("failed to set global metrics recorder: {e}"))?;
    Ok(handle)
}

#[get("/health")]
async fn health(context: Data<Arc<MonitoringContext>>) -> impl Responder {
    let database_ok = context.store.ping().await;
    let status = context.status.read().await.clone();
    let healthy = database_ok && status.running;

    let body = json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "database": database_ok,
        "indexer_running": status.running,
        "last_indexed_block": status.last_indexed_block,
        "head_block": status.head_block,
    });

    if healthy {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

#[get("/ready")]
async fn ready(context: Data<Arc<MonitoringContext>>) -> impl Responder {
    if context.status.read().await.running {
        HttpResponse::Ok().body("ready")
    } else {
        HttpResponse::ServiceUnavailable().body("starting")
    }
}

#[get("/stats")]
async fn stats(context: Data<Arc<MonitoringContext>>) -> impl Responder {
    let status = context.status.read().await.clone();
    let reorg_history = context
        .reorg
        .reorg_history(10)
        .await
        .unwrap_or_default();

    HttpResponse::Ok().json(json!({
        "indexer": status,
        "executors": [
            context.node_executor.stats(),
            context.db_executor.stats(),
        ],
        "recent_reorgs": reorg_history,
    }))
}

#[get("/metrics")]
async fn prometheus_metrics(context: Data<Arc<MonitoringContext>>) -> impl Responder {
    match &context.prometheus {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4; charset=utf-8")
            .body(handle.render()),
        None => HttpResponse::NotFound().body("Prometheus metrics are not enabled"),
    }
}

/// Build the monitoring server. The caller spawns the returned server
/// and uses its handle for graceful shutdown.
pub fn monitoring_server(
    context: Arc<MonitoringContext>,
    port: u16,
) -> anyhow::Result<Server> {
    let data = Data::new(context);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .service(health)
            .service(ready)
            .service(stats)
            .service(prometheus_metrics)
    })
    .bind(("0.0.0.0", port))
    .with_context(|| format!("failed to bind monitoring server on port {port}"))?
    .disable_signals()
    .run();

    info!("Monitoring server listening on 0.0.0.0:{}", port);
    Ok(server)
}
