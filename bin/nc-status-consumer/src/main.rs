//! Status Consumer (C9) process.
//!
//! Consumes `notification_status`, applies the terminal outcome to the
//! durable store, and dispatches the client's webhook when the updated
//! row carries one.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::info;

use nc_bus::kafka::KafkaBusConsumer;
use nc_common::STATUS_TOPIC;
use nc_config::AppConfig;
use nc_status::{PostgresStatusRepository, StatusConsumer, StatusConsumerConfig, WebhookDispatcher, WebhookDispatcherConfig};

#[tokio::main]
async fn main() -> Result<()> {
    nc_common::logging::init_logging("nc-status-consumer");

    let config = AppConfig::load()?;
    info!("starting status consumer");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    let repository = Arc::new(PostgresStatusRepository::new(pool));

    let webhook = Arc::new(WebhookDispatcher::new(WebhookDispatcherConfig {
        max_attempts: config.webhook.max_retries,
        per_attempt_timeout: std::time::Duration::from_millis(config.webhook.timeout_ms),
    })?);

    let consumer = Arc::new(KafkaBusConsumer::new(&config.kafka.brokers, "status-consumer", STATUS_TOPIC)?);

    let status_consumer = Arc::new(StatusConsumer::new(consumer, repository, webhook, StatusConsumerConfig { poll_batch_size: 50 }));

    let consumer_handle = {
        let status_consumer = status_consumer.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { status_consumer.start(shutdown_rx).await })
    };

    let metrics_handle = spawn_health_server(config.http.port, shutdown_tx.subscribe());

    shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(std::time::Duration::from_secs(30), async {
        let _ = consumer_handle.await;
        let _ = metrics_handle.await;
    })
    .await;

    info!("status consumer shutdown complete");
    Ok(())
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
