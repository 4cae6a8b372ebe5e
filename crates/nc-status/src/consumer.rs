use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use nc_bus::{BusConsumer, ConsumedMessage};
use nc_common::{BusStatusOutcome, NotificationStatus, StatusEvent, StatusOutcome, WebhookPayload};

use crate::repository::StatusRepository;
use crate::webhook::WebhookDispatcher;

#[derive(Debug, Clone)]
pub struct StatusConsumerConfig {
    pub poll_batch_size: usize,
}

/// Consumes the `notification_status` topic (§4.7): one store update per
/// event, then a best-effort webhook if the updated row carries one.
pub struct StatusConsumer {
    consumer: Arc<dyn BusConsumer>,
    repository: Arc<dyn StatusRepository>,
    webhook: Arc<WebhookDispatcher>,
    config: StatusConsumerConfig,
    running: AtomicBool,
}

impl StatusConsumer {
    pub fn new(
        consumer: Arc<dyn BusConsumer>,
        repository: Arc<dyn StatusRepository>,
        webhook: Arc<WebhookDispatcher>,
        config: StatusConsumerConfig,
    ) -> Self {
        Self { consumer, repository, webhook, config, running: AtomicBool::new(false) }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn start(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        self.running.store(true, Ordering::SeqCst);
        info!("status consumer starting");

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
                                    error!(error = %e, "status consumer tick failed");
                                }
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "status consumer poll failed");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("status consumer shutting down");
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
        let event: StatusEvent = match serde_json::from_value(message.payload.clone()) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "malformed status event, acking and dropping");
                self.consumer.ack(message).await?;
                return Ok(());
            }
        };

        let (status, webhook_status) = match event.status {
            BusStatusOutcome::Delivered => (NotificationStatus::Delivered, StatusOutcome::Delivered),
            BusStatusOutcome::Failed => (NotificationStatus::Failed, StatusOutcome::Failed),
        };

        let updated = self.repository.apply_status(event.notification_id, status, event.message.clone()).await?;

        if let Some(notification) = updated {
            if let Some(webhook_url) = notification.webhook_url.clone() {
                let payload = WebhookPayload {
                    request_id: notification.request_id,
                    client_id: notification.client_id,
                    notification_id: notification.notification_id,
                    status: webhook_status,
                    channel: notification.channel,
                    message: event.message,
                    occurred_at: Utc::now(),
                };
                if let Err(e) = self.webhook.dispatch(&webhook_url, &payload).await {
                    warn!(notification_id = %event.notification_id, error = %e, "webhook dispatch failed after retries");
                }
            }
        } else {
            warn!(notification_id = %event.notification_id, "status event for unknown notification");
        }

        self.consumer.ack(message).await?;
        Ok(())
    }
}
