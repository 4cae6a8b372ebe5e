use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use nc_bus::{BusConsumer, BusProducer, ConsumedMessage, OutboundMessage};
use nc_common::{channel_topic, BusStatusOutcome, DelayedEvent, IdempotencyStatus, Notification, StatusEvent, STATUS_TOPIC};
use nc_coordination::{backoff_ms, DelayedQueue, IdempotencyRegistry, RateLimiter};
use nc_plugins::Provider;

use crate::repository::NotificationRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Delivered,
    Retry,
    Failed,
}

/// Step 6 of §4.6, isolated as pure logic: success is terminal, a
/// retryable failure is requeued only while budget remains, everything
/// else is a terminal failure.
fn classify_outcome(outcome: &nc_common::ProviderOutcome, retry_count: i32, max_retry_count: i32) -> Outcome {
    if outcome.success {
        Outcome::Delivered
    } else if outcome.is_retryable() && retry_count < max_retry_count {
        Outcome::Retry
    } else {
        Outcome::Failed
    }
}

#[derive(Debug, Clone)]
pub struct ChannelProcessorConfig {
    pub channel: String,
    pub worker_id: String,
    pub poll_batch_size: usize,
    pub max_retry_count: i32,
    pub provider_timeout_ms: u64,
    pub idempotency_processing_ttl_secs: u64,
    pub idempotency_terminal_ttl_secs: u64,
}

/// One consumer per channel topic (§4.6). Owns the full claim → rate-limit
/// → send → outcome pipeline for a single channel; a process runs one of
/// these per channel it serves.
pub struct ChannelProcessor {
    consumer: Arc<dyn BusConsumer>,
    producer: Arc<dyn BusProducer>,
    repository: Arc<dyn NotificationRepository>,
    idempotency: Arc<IdempotencyRegistry>,
    rate_limiter: Arc<RateLimiter>,
    delayed_queue: Arc<DelayedQueue>,
    provider: Arc<dyn Provider>,
    fallback: Option<Arc<dyn Provider>>,
    config: ChannelProcessorConfig,
    running: AtomicBool,
}

impl ChannelProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        consumer: Arc<dyn BusConsumer>,
        producer: Arc<dyn BusProducer>,
        repository: Arc<dyn NotificationRepository>,
        idempotency: Arc<IdempotencyRegistry>,
        rate_limiter: Arc<RateLimiter>,
        delayed_queue: Arc<DelayedQueue>,
        provider: Arc<dyn Provider>,
        fallback: Option<Arc<dyn Provider>>,
        config: ChannelProcessorConfig,
    ) -> Self {
        Self { consumer, producer, repository, idempotency, rate_limiter, delayed_queue, provider, fallback, config, running: AtomicBool::new(false) }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn start(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        self.running.store(true, Ordering::SeqCst);
        info!(channel = %self.config.channel, "channel processor starting");

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
                                    error!(channel = %self.config.channel, error = %e, "channel processor tick failed");
                                }
                            }
                        }
                        Err(e) => {
                            error!(channel = %self.config.channel, error = %e, "channel consumer poll failed");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!(channel = %self.config.channel, "channel processor shutting down");
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
                warn!(error = %e, "malformed channel payload, acking and dropping");
                self.consumer.ack(message).await?;
                return Ok(());
            }
        };

        if let Err(reason) = self.provider.validate_payload(&message.payload) {
            warn!(notification_id = %notification.notification_id, %reason, "payload failed provider schema, marking failed");
            self.publish_status(&notification, BusStatusOutcome::Failed, Some(reason)).await;
            self.consumer.ack(message).await?;
            return Ok(());
        }

        if let Some(record) = self.idempotency.get(notification.notification_id).await? {
            if record.status != IdempotencyStatus::Processing {
                debug!(notification_id = %notification.notification_id, "already in a terminal state, acking without re-sending");
                self.consumer.ack(message).await?;
                return Ok(());
            }
            if record.worker_id != self.config.worker_id {
                debug!(notification_id = %notification.notification_id, "claimed by another worker, leaving unacked for redelivery");
                return Ok(());
            }
        }

        let claimed = self
            .idempotency
            .set_processing(notification.notification_id, &self.config.worker_id, self.config.idempotency_processing_ttl_secs)
            .await?;
        if !claimed {
            debug!(notification_id = %notification.notification_id, "claim lost to another worker between check and claim, leaving unacked for redelivery");
            return Ok(());
        }

        self.repository.mark_processing(notification.notification_id).await?;

        loop {
            let decision = self.rate_limiter.consume(&self.config.channel, self.provider.rate_limit()).await?;
            if decision.allowed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(decision.retry_after_ms.unwrap_or(100))).await;
        }

        let mut outcome = match tokio::time::timeout(Duration::from_millis(self.config.provider_timeout_ms), self.provider.send(&notification)).await
        {
            Ok(outcome) => outcome,
            Err(_) => nc_common::ProviderOutcome::failure("TIMEOUT", "provider send timed out", true),
        };

        if !outcome.success {
            if let Some(fallback) = &self.fallback {
                warn!(notification_id = %notification.notification_id, "primary provider failed, attempting fallback");
                outcome = match tokio::time::timeout(Duration::from_millis(self.config.provider_timeout_ms), fallback.send(&notification)).await {
                    Ok(fallback_outcome) => fallback_outcome,
                    Err(_) => nc_common::ProviderOutcome::failure("TIMEOUT", "fallback provider send timed out", true),
                };
            }
        }

        match classify_outcome(&outcome, notification.retry_count, self.config.max_retry_count) {
            Outcome::Delivered => {
                self.idempotency
                    .set_delivered(notification.notification_id, &self.config.worker_id, self.config.idempotency_terminal_ttl_secs)
                    .await?;
                self.publish_status(&notification, BusStatusOutcome::Delivered, None).await;
                self.consumer.ack(message).await?;
            }
            Outcome::Retry => {
                let new_retry_count = self.repository.increment_retry_count(notification.notification_id).await?;
                self.idempotency
                    .set_processing(notification.notification_id, &self.config.worker_id, self.config.idempotency_processing_ttl_secs)
                    .await?;

                let mut retried = notification.clone();
                retried.retry_count = new_retry_count;
                let delayed = DelayedEvent {
                    notification_id: notification.notification_id,
                    request_id: notification.request_id.clone(),
                    client_id: notification.client_id.clone(),
                    target_topic: channel_topic(&self.config.channel),
                    payload: serde_json::to_value(&retried)?,
                    poller_retries: 0,
                };
                let due_at_ms = Utc::now().timestamp_millis() + backoff_ms(new_retry_count as u32);
                self.delayed_queue.push(&delayed, due_at_ms).await?;
                self.consumer.ack(message).await?;
            }
            Outcome::Failed => {
                let error_message = outcome.error.as_ref().map(|e| e.message.clone());
                self.idempotency
                    .set_failed(notification.notification_id, &self.config.worker_id, self.config.idempotency_terminal_ttl_secs)
                    .await?;
                self.publish_status(&notification, BusStatusOutcome::Failed, error_message).await;
                self.consumer.ack(message).await?;
            }
        }
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
        if let Err(e) = self.producer.publish(outbound).await {
            error!(notification_id = %notification.notification_id, error = %e, "failed to publish status event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nc_common::ProviderOutcome;

    #[test]
    fn success_is_always_delivered_regardless_of_retry_budget() {
        let outcome = ProviderOutcome::success("msg-1");
        assert_eq!(classify_outcome(&outcome, 5, 3), Outcome::Delivered);
    }

    #[test]
    fn retryable_failure_retries_while_budget_remains() {
        let outcome = ProviderOutcome::failure("TIMEOUT", "provider timed out", true);
        assert_eq!(classify_outcome(&outcome, 0, 3), Outcome::Retry);
        assert_eq!(classify_outcome(&outcome, 2, 3), Outcome::Retry);
    }

    #[test]
    fn retryable_failure_is_terminal_once_budget_is_exhausted() {
        let outcome = ProviderOutcome::failure("TIMEOUT", "provider timed out", true);
        assert_eq!(classify_outcome(&outcome, 3, 3), Outcome::Failed);
        assert_eq!(classify_outcome(&outcome, 4, 3), Outcome::Failed);
    }

    #[test]
    fn non_retryable_failure_is_always_terminal() {
        let outcome = ProviderOutcome::failure("INVALID_RECIPIENT", "bad address", false);
        assert_eq!(classify_outcome(&outcome, 0, 3), Outcome::Failed);
    }
}
