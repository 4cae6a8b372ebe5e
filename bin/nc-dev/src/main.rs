//! Notification Core Development Monolith.
//!
//! Runs the Outbox Poller, the delayed-topic bridge, the Delayed Queue
//! Poller, one Channel Processor per configured channel, the Status
//! Consumer, and the Recovery Cron all inside one process, wired to an
//! in-memory Message Bus and the built-in stub provider rather than Kafka
//! and real channel providers. A minimal HTTP endpoint stands in for the
//! intake adapter so a developer can seed notifications without a
//! separate service.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{error, info};

use nc_bus::memory::MemoryBus;
use nc_bus::{BusConsumer, BusProducer};
use nc_common::{channel_topic, DELAYED_TOPIC, STATUS_TOPIC};
use nc_config::AppConfig;
use nc_coordination::{LeaderElection, LeaderElectionConfig, StandbyGuard};
use nc_delayed::{DelayedBridge, DelayedBridgeConfig, DelayedPoller, DelayedPollerConfig};
use nc_intake::{IntakeStore, NewNotification, PostgresIntakeStore};
use nc_outbox::postgres::PostgresOutboxRepository;
use nc_outbox::{OutboxPoller, OutboxPollerConfig, OutboxRepository};
use nc_plugins::PluginRegistry;
use nc_processor::{ChannelProcessor, ChannelProcessorConfig, PostgresNotificationRepository};
use nc_recovery::{PostgresRecoveryRepository, RecoveryCron, RecoveryCronConfig, RecoveryRepository};
use nc_status::{PostgresStatusRepository, StatusConsumer, StatusConsumerConfig, WebhookDispatcher, WebhookDispatcherConfig};

const DEV_CHANNELS: &[&str] = &["email", "sms"];

struct AppState {
    intake: Arc<dyn IntakeStore>,
}

#[derive(Deserialize)]
struct SeedRequest {
    request_id: String,
    client_id: String,
    channel: String,
    recipient: serde_json::Value,
    content: serde_json::Value,
    #[serde(default)]
    variables: HashMap<String, String>,
    #[serde(default)]
    webhook_url: Option<String>,
    #[serde(default)]
    scheduled_at: Option<DateTime<Utc>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    nc_common::logging::init_logging("nc-dev");

    let config = AppConfig::load()?;
    info!("starting notification core dev monolith");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;

    let intake = Arc::new(PostgresIntakeStore::new(pool.clone()));
    intake.init_schema().await?;

    let outbox_repo: Arc<dyn OutboxRepository> = Arc::new(PostgresOutboxRepository::new(pool.clone()));
    outbox_repo.init_schema().await?;

    let recovery_repo: Arc<dyn RecoveryRepository> = Arc::new(PostgresRecoveryRepository::new(pool.clone()));
    recovery_repo.init_schema().await?;

    let bus = MemoryBus::new();
    let registry = Arc::new(PluginRegistry::stub_only(DEV_CHANNELS));

    let redis_conn = nc_coordination::connect(&config.redis.url).await?;
    let idempotency = Arc::new(nc_coordination::IdempotencyRegistry::new(redis_conn.clone()));
    let rate_limiter = Arc::new(nc_coordination::RateLimiter::new(redis_conn.clone()));
    let delayed_queue_for_poller = nc_coordination::DelayedQueue::new(redis_conn.clone());
    let delayed_queue_for_bridge = Arc::new(nc_coordination::DelayedQueue::new(redis_conn.clone()));

    let mut handles = Vec::new();

    let outbox_leader = build_leader_guard(&config, "outbox").await?;
    let outbox_poller = Arc::new(OutboxPoller::new(
        outbox_repo,
        Arc::new(bus.producer()),
        registry.clone(),
        OutboxPollerConfig {
            poll_interval_ms: config.outbox.poll_interval_ms,
            cleanup_interval_ms: config.outbox.cleanup_interval_ms,
            batch_size: config.outbox.batch_size,
            retention_ms: config.outbox.retention_ms,
            claim_timeout_ms: config.outbox.claim_timeout_ms,
            worker_id: config.worker_id.clone(),
        },
        outbox_leader,
    ));
    handles.push(outbox_poller.run(shutdown_tx.subscribe()));

    let delayed_leader = build_leader_guard(&config, "delayed").await?;
    let delayed_poller = Arc::new(DelayedPoller::new(
        delayed_queue_for_poller,
        Arc::new(bus.producer()),
        DelayedPollerConfig {
            poll_interval_ms: config.delayed.poll_interval_ms,
            batch_size: config.delayed.batch_size,
            claim_ttl_ms: config.delayed.claim_ttl_ms,
            max_poller_retries: config.delayed.max_poller_retries,
            worker_id: config.worker_id.clone(),
        },
        delayed_leader,
    ));
    handles.push(delayed_poller.run(shutdown_tx.subscribe()));

    let delayed_bridge = Arc::new(DelayedBridge::new(
        Arc::new(bus.consumer("delayed-bridge", DELAYED_TOPIC)),
        delayed_queue_for_bridge,
        DelayedBridgeConfig { poll_batch_size: 50 },
    ));
    handles.push(delayed_bridge.run(shutdown_tx.subscribe()));

    for channel in DEV_CHANNELS {
        let topic = channel_topic(channel);
        let consumer: Arc<dyn BusConsumer> = Arc::new(bus.consumer(&format!("channel-{channel}"), &topic));
        let producer: Arc<dyn BusProducer> = Arc::new(bus.producer());
        let repository = Arc::new(PostgresNotificationRepository::new(pool.clone()));
        let delayed_queue = Arc::new(nc_coordination::DelayedQueue::new(nc_coordination::connect(&config.redis.url).await?));
        let provider = registry.primary(channel)?;
        let fallback = registry.fallback(channel);

        let processor = Arc::new(ChannelProcessor::new(
            consumer,
            producer,
            repository,
            idempotency.clone(),
            rate_limiter.clone(),
            delayed_queue,
            provider,
            fallback,
            ChannelProcessorConfig {
                channel: channel.to_string(),
                worker_id: config.worker_id.clone(),
                poll_batch_size: 50,
                max_retry_count: config.processor.max_retry_count,
                provider_timeout_ms: config.processor.provider_timeout_ms,
                idempotency_processing_ttl_secs: config.idempotency.processing_ttl_seconds,
                idempotency_terminal_ttl_secs: config.idempotency.idempotency_ttl_seconds,
            },
        ));
        handles.push(processor.run(shutdown_tx.subscribe()));
    }

    let status_repo = Arc::new(PostgresStatusRepository::new(pool.clone()));
    let webhook = Arc::new(WebhookDispatcher::new(WebhookDispatcherConfig {
        max_attempts: config.webhook.max_retries,
        per_attempt_timeout: std::time::Duration::from_millis(config.webhook.timeout_ms),
    })?);
    let status_consumer = Arc::new(StatusConsumer::new(
        Arc::new(bus.consumer("status-consumer", STATUS_TOPIC)),
        status_repo,
        webhook,
        StatusConsumerConfig { poll_batch_size: 50 },
    ));
    handles.push(status_consumer.run(shutdown_tx.subscribe()));

    let recovery_leader = build_leader_guard(&config, "recovery").await?;
    let recovery_cron = Arc::new(RecoveryCron::new(
        recovery_repo,
        idempotency,
        Arc::new(bus.producer()),
        RecoveryCronConfig {
            poll_interval_ms: config.recovery.poll_interval_ms,
            processing_stuck_threshold_ms: config.recovery.processing_stuck_threshold_ms,
            pending_stuck_threshold_ms: config.recovery.pending_stuck_threshold_ms,
            batch_size: config.recovery.batch_size as i64,
            max_retry_count: config.processor.max_retry_count,
            max_consecutive_failures: config.recovery.max_consecutive_failures,
        },
        recovery_leader,
    ));
    handles.push(recovery_cron.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(AppState { intake });
    let app = Router::new()
        .route("/notifications", post(seed_notification))
        .route("/health", get(health_handler))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "dev HTTP server listening");
    let http_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        })
    };

    shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(std::time::Duration::from_secs(30), async {
        for handle in handles {
            let _ = handle.await;
        }
        let _ = http_handle.await;
    })
    .await;

    info!("dev monolith shutdown complete");
    Ok(())
}

trait RunnableComponent {
    fn run(self: Arc<Self>, shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()>;
}

macro_rules! impl_runnable {
    ($t:ty) => {
        impl RunnableComponent for $t {
            fn run(self: Arc<Self>, shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
                tokio::spawn(async move { self.start(shutdown).await })
            }
        }
    };
}

impl_runnable!(OutboxPoller);
impl_runnable!(DelayedPoller);
impl_runnable!(DelayedBridge);
impl_runnable!(ChannelProcessor);
impl_runnable!(StatusConsumer);
impl_runnable!(RecoveryCron);

async fn seed_notification(State(state): State<Arc<AppState>>, Json(req): Json<SeedRequest>) -> impl IntoResponse {
    let new = NewNotification {
        request_id: req.request_id,
        client_id: req.client_id,
        channel: req.channel,
        recipient: req.recipient,
        content: req.content,
        variables: req.variables,
        webhook_url: req.webhook_url,
        scheduled_at: req.scheduled_at,
    };

    match state.intake.accept(new).await {
        Ok(notification) => (StatusCode::CREATED, Json(serde_json::to_value(&notification).unwrap_or_default())).into_response(),
        Err(nc_common::NotificationError::Duplicate { request_id, channel }) => {
            (StatusCode::CONFLICT, Json(serde_json::json!({"error": "duplicate", "request_id": request_id, "channel": channel}))).into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to accept seeded notification");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"error": e.to_string()}))).into_response()
        }
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "UP" }))
}

/// Starts leader election and returns a gate for a poller's tick when
/// `LEADER_ELECTION_ENABLED` is set; `None` otherwise, so the poller runs
/// unconditionally, which is also the only sane setting for a single dev
/// process.
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
