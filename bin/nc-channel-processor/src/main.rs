//! Channel Processor (C8) process.
//!
//! Each instance serves exactly one channel, named by the `CHANNEL`
//! environment variable — run one process per channel to scale delivery
//! independently per provider.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::info;

use nc_bus::kafka::{KafkaBusConsumer, KafkaBusProducer};
use nc_common::channel_topic;
use nc_config::AppConfig;
use nc_plugins::PluginRegistry;
use nc_processor::{ChannelProcessor, ChannelProcessorConfig, PostgresNotificationRepository};

#[tokio::main]
async fn main() -> Result<()> {
    nc_common::logging::init_logging("nc-channel-processor");

    let channel = std::env::var("CHANNEL").map_err(|_| anyhow::anyhow!("CHANNEL environment variable is required"))?;
    let config = AppConfig::load()?;
    info!(%channel, worker_id = %config.worker_id, "starting channel processor");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    let repository = Arc::new(PostgresNotificationRepository::new(pool));

    let redis_conn = nc_coordination::connect(&config.redis.url).await?;
    let idempotency = Arc::new(nc_coordination::IdempotencyRegistry::new(redis_conn.clone()));
    let rate_limiter = Arc::new(nc_coordination::RateLimiter::new(redis_conn.clone()));
    let delayed_queue = Arc::new(nc_coordination::DelayedQueue::new(redis_conn));

    let registry = load_plugin_registry()?;
    let provider = registry.primary(&channel)?;
    let fallback = registry.fallback(&channel);

    let topic = channel_topic(&channel);
    let group_id = format!("channel-{channel}");
    let consumer = Arc::new(KafkaBusConsumer::new(&config.kafka.brokers, &group_id, &topic)?);
    let producer = Arc::new(KafkaBusProducer::new(&config.kafka.brokers)?);

    let processor = Arc::new(ChannelProcessor::new(
        consumer,
        producer,
        repository,
        idempotency,
        rate_limiter,
        delayed_queue,
        provider,
        fallback,
        ChannelProcessorConfig {
            channel: channel.clone(),
            worker_id: config.worker_id.clone(),
            poll_batch_size: 50,
            max_retry_count: config.processor.max_retry_count,
            provider_timeout_ms: config.processor.provider_timeout_ms,
            idempotency_processing_ttl_secs: config.idempotency.processing_ttl_seconds,
            idempotency_terminal_ttl_secs: config.idempotency.idempotency_ttl_seconds,
        },
    ));

    let processor_handle = {
        let processor = processor.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { processor.start(shutdown_rx).await })
    };

    let metrics_handle = spawn_health_server(config.http.port, shutdown_tx.subscribe());

    shutdown_signal().await;
    info!(%channel, "shutdown signal received");
    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(std::time::Duration::from_secs(30), async {
        let _ = processor_handle.await;
        let _ = metrics_handle.await;
    })
    .await;

    info!(%channel, "channel processor shutdown complete");
    Ok(())
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
