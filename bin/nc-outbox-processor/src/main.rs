//! Outbox Poller (C4) process.
//!
//! Claims rows from `outbox_entries`, validates each payload against the
//! Plugin Registry's per-channel schema, and publishes to the Message
//! Bus. Runs as a singleton per worker_id; multiple instances compete
//! for rows via the repository's atomic claim, so horizontal scaling is
//! just running more of this binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::info;

use nc_bus::kafka::KafkaBusProducer;
use nc_config::AppConfig;
use nc_coordination::{LeaderElection, LeaderElectionConfig, StandbyGuard};
use nc_outbox::{OutboxPoller, OutboxPollerConfig, OutboxRepository};
use nc_plugins::PluginRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    nc_common::logging::init_logging("nc-outbox-processor");

    let config = AppConfig::load()?;
    info!(worker_id = %config.worker_id, "starting outbox poller");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    let repository: Arc<dyn OutboxRepository> = Arc::new(nc_outbox::postgres::PostgresOutboxRepository::new(pool));
    repository.init_schema().await?;

    let registry = load_plugin_registry()?;

    let producer = Arc::new(KafkaBusProducer::new(&config.kafka.brokers)?);

    let leader = build_leader_guard(&config, "outbox").await?;

    let poller = Arc::new(OutboxPoller::new(
        repository,
        producer,
        Arc::new(registry),
        OutboxPollerConfig {
            poll_interval_ms: config.outbox.poll_interval_ms,
            cleanup_interval_ms: config.outbox.cleanup_interval_ms,
            batch_size: config.outbox.batch_size,
            retention_ms: config.outbox.retention_ms,
            claim_timeout_ms: config.outbox.claim_timeout_ms,
            worker_id: config.worker_id.clone(),
        },
        leader,
    ));

    let poller_handle = {
        let poller = poller.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { poller.start(shutdown_rx).await })
    };

    let metrics_handle = spawn_health_server(config.http.port, shutdown_tx.subscribe());

    shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(std::time::Duration::from_secs(30), async {
        let _ = poller_handle.await;
        let _ = metrics_handle.await;
    })
    .await;

    info!("outbox poller shutdown complete");
    Ok(())
}

/// Starts leader election and returns a gate for the poller tick when
/// `LEADER_ELECTION_ENABLED` is set; `None` otherwise, so the poller runs
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

fn load_plugin_registry() -> Result<PluginRegistry> {
    match std::env::var("PLUGIN_MANIFEST_PATH") {
        Ok(path) => {
            let contents = std::fs::read_to_string(&path)?;
            Ok(PluginRegistry::from_toml(&contents)?)
        }
        Err(_) => Ok(PluginRegistry::stub_only(&["email", "sms", "push", "whatsapp"])),
    }
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
