use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use nc_bus::{BusProducer, OutboundMessage};
use nc_common::{Alert, AlertSeverity, AlertType, BusStatusOutcome, IdempotencyStatus, Notification, StatusEvent, STATUS_TOPIC};
use nc_coordination::{IdempotencyRegistry, StandbyGuard};

use crate::repository::RecoveryRepository;

#[derive(Debug, Clone)]
pub struct RecoveryCronConfig {
    pub poll_interval_ms: u64,
    pub processing_stuck_threshold_ms: i64,
    pub pending_stuck_threshold_ms: i64,
    pub batch_size: i64,
    pub max_retry_count: i32,
    pub max_consecutive_failures: u32,
}

/// §4.8: reconciles stuck-processing and orphaned-pending notifications
/// against the coordination store's idempotency record, non-overlapping
/// ticks via `MissedTickBehavior::Skip`.
pub struct RecoveryCron {
    repository: Arc<dyn RecoveryRepository>,
    idempotency: Arc<IdempotencyRegistry>,
    bus: Arc<dyn BusProducer>,
    config: RecoveryCronConfig,
    leader: Option<Arc<StandbyGuard>>,
    consecutive_failures: AtomicU32,
}

impl RecoveryCron {
    pub fn new(
        repository: Arc<dyn RecoveryRepository>,
        idempotency: Arc<IdempotencyRegistry>,
        bus: Arc<dyn BusProducer>,
        config: RecoveryCronConfig,
        leader: Option<Arc<StandbyGuard>>,
    ) -> Self {
        Self { repository, idempotency, bus, config, leader, consecutive_failures: AtomicU32::new(0) }
    }

    pub async fn start(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(interval_ms = self.config.poll_interval_ms, "recovery cron starting");
        let mut ticker = interval(Duration::from_millis(self.config.poll_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(leader) = &self.leader {
                        if !leader.should_process() {
                            continue;
                        }
                    }
                    match self.tick_once().await {
                        Ok(()) => {
                            self.consecutive_failures.store(0, Ordering::SeqCst);
                        }
                        Err(e) => {
                            let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                            error!(error = %e, failures, "recovery cron tick failed");
                            if failures >= self.config.max_consecutive_failures {
                                warn!(failures, "recovery cron exceeded consecutive failure threshold, backing off");
                                tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                            }
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("recovery cron shutting down");
                    break;
                }
            }
        }
    }

    async fn tick_once(&self) -> anyhow::Result<()> {
        self.stuck_processing_pass().await?;
        self.orphaned_pending_pass().await?;
        Ok(())
    }

    async fn stuck_processing_pass(&self) -> anyhow::Result<()> {
        let threshold = Utc::now() - chrono::Duration::milliseconds(self.config.processing_stuck_threshold_ms);
        let stuck = self.repository.claim_stuck_processing(threshold, self.config.batch_size).await?;

        for notification in stuck {
            let record = self.idempotency.get(notification.notification_id).await?;
            match record.as_ref().map(|r| r.status) {
                Some(IdempotencyStatus::Delivered) => {
                    self.repository.set_delivered(notification.notification_id).await?;
                    self.publish_status(&notification, BusStatusOutcome::Delivered, None).await;
                }
                Some(IdempotencyStatus::Failed) if notification.retry_count >= self.config.max_retry_count => {
                    self.repository.set_failed(notification.notification_id, "recovery: retries exhausted while stuck").await?;
                    self.publish_status(&notification, BusStatusOutcome::Failed, Some("retries exhausted".to_string())).await;
                }
                Some(IdempotencyStatus::Failed) => {
                    self.raise_alert(
                        &notification,
                        AlertType::StuckProcessing,
                        AlertSeverity::Warning,
                        "stuck in processing with a failed coordination record and retries remaining",
                        Some("failed"),
                    )
                    .await?;
                }
                Some(IdempotencyStatus::Processing) => {
                    self.raise_alert(
                        &notification,
                        AlertType::StuckProcessing,
                        AlertSeverity::Critical,
                        "stuck in processing, coordination record still processing",
                        Some("processing"),
                    )
                    .await?;
                }
                None => {
                    self.raise_alert(&notification, AlertType::StuckProcessing, AlertSeverity::Critical, "stuck in processing with no coordination record", None)
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn orphaned_pending_pass(&self) -> anyhow::Result<()> {
        let threshold = Utc::now() - chrono::Duration::milliseconds(self.config.pending_stuck_threshold_ms);
        let orphaned = self.repository.find_orphaned_pending(threshold, self.config.batch_size).await?;

        for notification in orphaned {
            self.raise_alert(
                &notification,
                AlertType::OrphanedPending,
                AlertSeverity::Warning,
                "pending notification never materialised into an outbox publish",
                None,
            )
            .await?;
        }
        Ok(())
    }

    async fn raise_alert(
        &self,
        notification: &Notification,
        alert_type: AlertType,
        severity: AlertSeverity,
        reason: &str,
        observed_coordination_status: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut alert = Alert::new(notification.notification_id, alert_type, severity, reason);
        alert.observed_coordination_status = observed_coordination_status.map(str::to_string);
        alert.observed_store_status = Some(notification.status.to_string());
        alert.retry_count = notification.retry_count;
        self.repository.upsert_alert(&alert).await?;
        Ok(())
    }

    async fn publish_status(&self, notification: &Notification, status: BusStatusOutcome, message: Option<String>) {
        let event = StatusEvent {
            notification_id: notification.notification_id,
            request_id: notification.request_id.clone(),
            client_id: notification.client_id.clone(),
            channel: notification.channel.clone(),
            status,
            message,
            retry_count: notification.retry_count,
            webhook_url: notification.webhook_url.clone(),
            created_at: Utc::now(),
        };
        let outbound = OutboundMessage {
            topic: STATUS_TOPIC.to_string(),
            key: notification.notification_id.to_string(),
            payload: serde_json::to_value(&event).unwrap_or_default(),
        };
        if let Err(e) = self.bus.publish(outbound).await {
            error!(notification_id = %notification.notification_id, error = %e, "recovery failed to publish status event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_are_sane() {
        let config = RecoveryCronConfig {
            poll_interval_ms: 30_000,
            processing_stuck_threshold_ms: 600_000,
            pending_stuck_threshold_ms: 1_800_000,
            batch_size: 100,
            max_retry_count: 5,
            max_consecutive_failures: 5,
        };
        assert!(config.pending_stuck_threshold_ms > config.processing_stuck_threshold_ms);
    }
}
