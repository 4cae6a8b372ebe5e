//! Delayed Queue Poller (C5) process.
//!
//! Runs two components: a bridge that consumes `delayed_notification` off
//! the bus and pushes each event into the `delayed:queue` sorted set at its
//! `scheduled_at`, and the poller that claims due members from that set and
//! republishes each to its `target_topic` — both scheduled-at-intake
//! notifications and the retry backoffs the Channel Processor pushes here.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::info;

use nc_bus::kafka::{KafkaBusConsumer, KafkaBusProducer};
use nc_common::DELAYED_TOPIC;
use nc_config::AppConfig;
use nc_coordination::{LeaderElection, LeaderElectionConfig, StandbyGuard};
use nc_delayed::{DelayedBridge, DelayedBridgeConfig, DelayedPoller, DelayedPollerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    nc_common::logging::init_logging("nc-delayed-poller");

    let config = AppConfig::load()?;
    info!(worker_id = %config.worker_id, "starting delayed queue poller");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let redis_conn = nc_coordination::connect(&config.redis.url).await?;
    let bridge_queue = Arc::new(nc_coordination::DelayedQueue::new(redis_conn.clone()));
    let producer = Arc::new(KafkaBusProducer::new(&config.kafka.brokers)?);

    let leader = build_leader_guard(&config, "delayed").await?;

    let poller = Arc::new(DelayedPoller::new(
        nc_coordination::DelayedQueue::new(redis_conn),
        producer,
        DelayedPollerConfig {
            poll_interval_ms: config.delayed.poll_interval_ms,
            batch_size: config.delayed.batch_size,
            claim_ttl_ms: config.delayed.claim_ttl_ms,
            max_poller_retries: config.delayed.max_poller_retries,
            worker_id: config.worker_id.clone(),
        },
        leader,
    ));

    let bridge_consumer = Arc::new(KafkaBusConsumer::new(&config.kafka.brokers, "delayed-bridge", DELAYED_TOPIC)?);
    let bridge = Arc::new(DelayedBridge::new(bridge_consumer, bridge_queue, DelayedBridgeConfig { poll_batch_size: config.delayed.batch_size }));

    let poller_handle = {
        let poller = poller.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { poller.start(shutdown_rx).await })
    };

    let bridge_handle = {
        let bridge = bridge.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { bridge.start(shutdown_rx).await })
    };

    let metrics_handle = spawn_health_server(config.http.port, shutdown_tx.subscribe());

    shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(std::time::Duration::from_secs(30), async {
        let _ = poller_handle.await;
        let _ = bridge_handle.await;
        let _ = metrics_handle.await;
    })
    .await;

    info!("delayed queue poller shutdown complete");
    Ok(())
}

/// Starts leader election and returns a gate for the poller tick when
/// `LEADER_ELECTION_ENABLED` is set; `None` otherwise, so the poller runs
/// unconditionally. The bridge consumer is never gated: it's a plain
/// consumer-group member, not a singleton claim loop.
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
