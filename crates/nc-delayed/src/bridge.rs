//! Bridges the `delayed_notification` bus topic into the `delayed:queue`
//! sorted set. The Outbox Poller publishes a scheduled notification here
//! once; without this consumer nothing ever lands in the sorted set the
//! `DelayedPoller` reads from, and the notification is never delivered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use nc_bus::{BusConsumer, ConsumedMessage};
use nc_common::{channel_topic, DelayedEvent, Notification};
use nc_coordination::DelayedQueue;

#[derive(Debug, Clone)]
pub struct DelayedBridgeConfig {
    pub poll_batch_size: usize,
}

/// Consumes `delayed_notification` and pushes each notification into the
/// Redis sorted set at its `scheduled_at`, so the `DelayedPoller` can claim
/// it once due. A notification with no `scheduled_at`, or one already in
/// the past, is pushed due immediately.
pub struct DelayedBridge {
    consumer: Arc<dyn BusConsumer>,
    queue: Arc<DelayedQueue>,
    config: DelayedBridgeConfig,
    running: AtomicBool,
}

impl DelayedBridge {
    pub fn new(consumer: Arc<dyn BusConsumer>, queue: Arc<DelayedQueue>, config: DelayedBridgeConfig) -> Self {
        Self { consumer, queue, config, running: AtomicBool::new(false) }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn start(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        self.running.store(true, Ordering::SeqCst);
        info!("delayed bridge starting");

        loop {
            tokio::select! {
                messages = self.consumer.poll(self.config.poll_batch_size) => {
                    match messages {
                        Ok(messages) if messages.is_empty() => {
                            tokio::time::sleep(Duration::from_millis(200)).await;
                        }
                        Ok(messages) => {
                            for message in messages {
                                if let Err(e) = self.process_one(&message).await {
                                    error!(error = %e, "delayed bridge tick failed");
                                }
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "delayed bridge poll failed");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("delayed bridge shutting down");
                    break;
                }
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn process_one(&self, message: &ConsumedMessage) -> anyhow::Result<()> {
        let notification: Notification = match serde_json::from_value(message.payload.clone()) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "malformed delayed payload, acking and dropping");
                self.consumer.ack(message).await?;
                return Ok(());
            }
        };

        let due_at_ms = notification.scheduled_at.map(|t| t.timestamp_millis()).unwrap_or_else(|| Utc::now().timestamp_millis());

        let event = DelayedEvent {
            notification_id: notification.notification_id,
            request_id: notification.request_id.clone(),
            client_id: notification.client_id.clone(),
            target_topic: channel_topic(&notification.channel),
            payload: message.payload.clone(),
            poller_retries: 0,
        };

        self.queue.push(&event, due_at_ms).await?;
        self.consumer.ack(message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn past_scheduled_at_is_due_immediately() {
        let past = Utc::now() - chrono::Duration::seconds(5);
        assert!(past.timestamp_millis() <= Utc::now().timestamp_millis());
    }
}
