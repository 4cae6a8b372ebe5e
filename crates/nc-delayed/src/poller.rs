//! Claims due members from `delayed:queue`, publishes each to its
//! `target_topic`, and confirms or reschedules based on the outcome.
//! Claimed events are processed one at a time within a tick — soft
//! ordering, and it keeps a burst of due events from overwhelming a
//! downstream channel topic all at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use nc_bus::{BusProducer, OutboundMessage};
use nc_common::{BusStatusOutcome, StatusEvent, STATUS_TOPIC};
use nc_coordination::{backoff_ms, ClaimedDelayedEvent, DelayedQueue, StandbyGuard};

#[derive(Debug, Clone)]
pub struct DelayedPollerConfig {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub claim_ttl_ms: i64,
    pub max_poller_retries: u32,
    pub worker_id: String,
}

pub struct DelayedPoller {
    queue: DelayedQueue,
    bus: std::sync::Arc<dyn BusProducer>,
    config: DelayedPollerConfig,
    leader: Option<std::sync::Arc<StandbyGuard>>,
    is_polling: AtomicBool,
}

impl DelayedPoller {
    pub fn new(
        queue: DelayedQueue,
        bus: std::sync::Arc<dyn BusProducer>,
        config: DelayedPollerConfig,
        leader: Option<std::sync::Arc<StandbyGuard>>,
    ) -> Self {
        Self { queue, bus, config, leader, is_polling: AtomicBool::new(false) }
    }

    pub async fn start(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(poll_interval_ms = self.config.poll_interval_ms, batch_size = self.config.batch_size, "delayed poller starting");
        let mut tick = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Some(leader) = &self.leader {
                        if !leader.should_process() {
                            continue;
                        }
                    }
                    if self.is_polling.swap(true, Ordering::SeqCst) {
                        continue;
                    }
                    if let Err(e) = self.poll_once().await {
                        error!(error = %e, "delayed poller tick failed");
                    }
                    self.is_polling.store(false, Ordering::SeqCst);
                }
                _ = shutdown.recv() => {
                    info!("delayed poller shutting down");
                    break;
                }
            }
        }
    }

    async fn poll_once(&self) -> anyhow::Result<()> {
        let claimed = self.queue.claim_due(self.config.batch_size, self.config.claim_ttl_ms, &self.config.worker_id).await?;
        for event in claimed {
            self.process_one(event).await?;
        }
        Ok(())
    }

    async fn process_one(&self, claimed: ClaimedDelayedEvent) -> anyhow::Result<()> {
        if claimed.event.poller_retries >= self.config.max_poller_retries {
            self.publish_exhausted_status(&claimed).await;
            if !self.queue.confirm(&claimed, &self.config.worker_id).await? {
                warn!(notification_id = %claimed.event.notification_id, "claim lost while confirming exhausted retries");
            }
            return Ok(());
        }

        let message = OutboundMessage {
            topic: claimed.event.target_topic.clone(),
            key: claimed.event.notification_id.to_string(),
            payload: claimed.event.payload.clone(),
        };

        match self.bus.publish(message).await {
            Ok(()) => {
                if !self.queue.confirm(&claimed, &self.config.worker_id).await? {
                    warn!(notification_id = %claimed.event.notification_id, "claim lost while confirming publish");
                }
            }
            Err(e) => {
                error!(notification_id = %claimed.event.notification_id, error = %e, "failed to publish delayed event, rescheduling");
                let delay = backoff_ms(claimed.event.poller_retries);
                let new_due = Utc::now().timestamp_millis() + delay;
                self.queue.reschedule(&claimed, new_due).await?;
            }
        }
        Ok(())
    }

    async fn publish_exhausted_status(&self, claimed: &ClaimedDelayedEvent) {
        let channel = claimed.event.target_topic.strip_suffix("_notification").unwrap_or(&claimed.event.target_topic).to_string();
        let webhook_url = claimed.event.payload.get("webhook_url").and_then(|v| v.as_str()).map(String::from);
        let status = StatusEvent {
            notification_id: claimed.event.notification_id,
            request_id: claimed.event.request_id.clone(),
            client_id: claimed.event.client_id.clone(),
            channel,
            status: BusStatusOutcome::Failed,
            message: Some("delayed event exceeded max poller retries".to_string()),
            retry_count: claimed.event.poller_retries as i32,
            webhook_url,
            created_at: Utc::now(),
        };
        let message = OutboundMessage {
            topic: STATUS_TOPIC.to_string(),
            key: claimed.event.notification_id.to_string(),
            payload: serde_json::to_value(&status).unwrap_or_default(),
        };
        if let Err(e) = self.bus.publish(message).await {
            error!(notification_id = %claimed.event.notification_id, error = %e, "failed to publish exhausted-retry status event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_from_target_topic() {
        assert_eq!("email_notification".strip_suffix("_notification"), Some("email"));
    }
}
