//! Recovery Cron (C10) process.
//!
//! Ticks on an interval, reconciling notifications stuck in `processing`
//! or orphaned in `pending` against the coordination store's idempotency
//! record, and raising alerts for anything it can't resolve on its own.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::info;

use nc_bus::kafka::KafkaBusProducer;
use nc_config::AppConfig;
use nc_coordination::{LeaderElection, LeaderElectionConfig, StandbyGuard};
use nc_recovery::{PostgresRecoveryRepository, RecoveryCron, RecoveryCronConfig, RecoveryRepository};

#[tokio::main]
async fn main() -> Result<()> {
    nc_common::logging::init_logging("nc-recovery-cron");

    let config = AppConfig::load()?;
    info!("starting recovery cron");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    let repository: Arc<dyn RecoveryRepository> = Arc::new(PostgresRecoveryRepository::new(pool));
    repository.init_schema().await?;

    let redis_conn = nc_coordination::connect(&config.redis.url).await?;
    let idempotency = Arc::new(nc_coordination::IdempotencyRegistry::new(redis_conn));

    let bus = Arc::new(KafkaBusProducer::new(&config.kafka.brokers)?);

    let leader = build_leader_guard(&config, "recovery").await?;

    let cron = Arc::new(RecoveryCron::new(
        repository,
        idempotency,
        bus,
        RecoveryCronConfig {
            poll_interval_ms: config.recovery.poll_interval_ms,
            processing_stuck_threshold_ms: config.recovery.processing_stuck_threshold_ms,
            pending_stuck_threshold_ms: config.recovery.pending_stuck_threshold_ms,
            batch_size: config.recovery.batch_size as i64,
            max_retry_count: config.processor.max_retry_count,
            max_consecutive_failures: config.recovery.max_consecutive_failures,
        },
        leader,
    ));

    let cron_handle = {
        let cron = cron.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { cron.start(shutdown_rx).await })
    };

    let metrics_handle = spawn_health_server(config.http.port, shutdown_tx.subscribe());

    shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(std::time::Duration::from_secs(30), async {
        let _ = cron_handle.await;
        let _ = metrics_handle.await;
    })
    .await;

    info!("recovery cron shutdown complete");
    Ok(())
}

/// Starts leader election and returns a gate for the cron tick when
/// `LEADER_ELECTION_ENABLED` is set; `None` otherwise, so the cron runs
/// unconditionally.
async fn build_leader_guard(config: &AppConfig, component: &str) -> Result<Option<Arc<StandbyGuard>>> {
    if !config.leader.enabled {
        return Ok(None);
    }
    let election = Arc::new(
        LeaderElection::new(LeaderElectionConfig {
            redis_url: config.redis.url.clone(),
            lock_key: format!("{}:{component}", config.leader.lock_key),
            lock_ttl_seconds: config.leader.lock_ttl_seconds,
            heartbeat_interval_seconds: config.leader.heartbeat_interval_seconds,
            instance_id: config.worker_id.clone(),
        })
        .await?,
    );
    election.clone().start().await?;
    Ok(Some(Arc::new(StandbyGuard::new(election))))
}

fn spawn_health_server(port: u16, mut shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = axum::Router::new()
        .route("/health", axum::routing::get(health_handler))
        .route("/ready", axum::routing::get(ready_handler));

    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, "failed to bind health server");
                return;
            }
        };
        info!(%addr, "health server listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .ok();
    })
}

async fn health_handler() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "UP", "version": env!("CARGO_PKG_VERSION") }))
}

async fn ready_handler() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "READY" }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
