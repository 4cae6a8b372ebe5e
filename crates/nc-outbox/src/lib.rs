//! Outbox Poller (C4): the transactional-outbox half of notification
//! delivery. `nc-intake` writes rows into the same table inside the
//! transaction that creates a Notification; this crate claims them,
//! validates the payload, and publishes to the Message Bus.

pub mod postgres;
pub mod repository;

pub use repository::OutboxRepository;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use nc_bus::{BusProducer, OutboundMessage};
use nc_common::SchemaValidator;
use nc_coordination::StandbyGuard;

#[derive(Debug, Clone)]
pub struct OutboxPollerConfig {
    pub poll_interval_ms: u64,
    pub cleanup_interval_ms: u64,
    pub batch_size: usize,
    pub retention_ms: i64,
    pub claim_timeout_ms: i64,
    pub worker_id: String,
}

pub struct OutboxPoller {
    repository: Arc<dyn OutboxRepository>,
    bus: Arc<dyn BusProducer>,
    validator: Arc<dyn SchemaValidator>,
    config: OutboxPollerConfig,
    leader: Option<Arc<StandbyGuard>>,
    is_polling: AtomicBool,
    running: AtomicBool,
}

impl OutboxPoller {
    /// `leader` gates the claim/publish tick on leadership when leader
    /// election is enabled; `None` runs every tick unconditionally.
    pub fn new(
        repository: Arc<dyn OutboxRepository>,
        bus: Arc<dyn BusProducer>,
        validator: Arc<dyn SchemaValidator>,
        config: OutboxPollerConfig,
        leader: Option<Arc<StandbyGuard>>,
    ) -> Self {
        Self { repository, bus, validator, config, leader, is_polling: AtomicBool::new(false), running: AtomicBool::new(false) }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs the claim/publish loop and the cleanup loop concurrently
    /// until `stop()` is observed. In-flight claims finish their current
    /// tick before the loop exits, so no row is left half-published.
    pub async fn start(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        self.running.store(true, Ordering::SeqCst);
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            "outbox poller starting"
        );

        let mut poll_tick = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        let mut cleanup_tick = tokio::time::interval(Duration::from_millis(self.config.cleanup_interval_ms));

        loop {
            tokio::select! {
                _ = poll_tick.tick() => {
                    if let Some(leader) = &self.leader {
                        if !leader.should_process() {
                            debug!("standing by, not leader");
                            continue;
                        }
                    }
                    if self.is_polling.swap(true, Ordering::SeqCst) {
                        debug!("skipping overlapping outbox poll tick");
                        continue;
                    }
                    if let Err(e) = self.poll_once().await {
                        error!(error = %e, "outbox poll tick failed");
                    }
                    self.is_polling.store(false, Ordering::SeqCst);
                }
                _ = cleanup_tick.tick() => {
                    if let Err(e) = self.cleanup_once().await {
                        error!(error = %e, "outbox cleanup tick failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("outbox poller shutting down");
                    break;
                }
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn poll_once(&self) -> anyhow::Result<()> {
        let mut claimed = Vec::new();
        for _ in 0..self.config.batch_size {
            match self.repository.claim_one(&self.config.worker_id, self.config.claim_timeout_ms).await? {
                Some(entry) => claimed.push(entry),
                None => break,
            }
        }
        if claimed.is_empty() {
            return Ok(());
        }

        let mut valid = Vec::with_capacity(claimed.len());
        for entry in claimed {
            match self.validator.validate(&entry.topic, &entry.payload) {
                Ok(()) => valid.push(entry),
                Err(reason) => {
                    warn!(outbox_id = %entry.outbox_id, topic = %entry.topic, %reason, "invalid outbox payload, leaving for review");
                }
            }
        }
        if valid.is_empty() {
            return Ok(());
        }

        let messages: Vec<OutboundMessage> = valid
            .iter()
            .map(|e| OutboundMessage { topic: e.topic.clone(), key: e.notification_id.to_string(), payload: e.payload.clone() })
            .collect();

        match self.bus.publish_batch(messages).await {
            Ok(()) => {
                let ids: Vec<_> = valid.iter().map(|e| e.outbox_id).collect();
                self.repository.mark_published(&ids).await?;
                info!(count = ids.len(), "published outbox batch");
            }
            Err(e) => {
                error!(error = %e, count = valid.len(), "failed to publish outbox batch, leaving claimed for retry");
            }
        }
        Ok(())
    }

    async fn cleanup_once(&self) -> anyhow::Result<()> {
        let cutoff = chrono::Utc::now() - chrono::Duration::milliseconds(self.config.retention_ms);
        let deleted = self.repository.delete_published_before(cutoff).await?;
        if deleted > 0 {
            info!(deleted, "pruned published outbox rows");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nc_bus::BusConsumer;
    use nc_common::{NoopSchemaValidator, OutboxEntry, OutboxStatus};
    use parking_lot::Mutex;
    use uuid::Uuid;

    struct FakeRepository {
        pending: Mutex<Vec<OutboxEntry>>,
        published: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl OutboxRepository for FakeRepository {
        async fn claim_one(&self, worker_id: &str, _claim_timeout_ms: i64) -> anyhow::Result<Option<OutboxEntry>> {
            let mut guard = self.pending.lock();
            if let Some(mut entry) = guard.pop() {
                entry.status = OutboxStatus::Processing;
                entry.claimed_by = Some(worker_id.to_string());
                Ok(Some(entry))
            } else {
                Ok(None)
            }
        }

        async fn mark_published(&self, outbox_ids: &[Uuid]) -> anyhow::Result<()> {
            self.published.lock().extend_from_slice(outbox_ids);
            Ok(())
        }

        async fn delete_published_before(&self, _cutoff: chrono::DateTime<chrono::Utc>) -> anyhow::Result<u64> {
            Ok(0)
        }

        async fn init_schema(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn sample_entry() -> OutboxEntry {
        OutboxEntry {
            outbox_id: Uuid::new_v4(),
            notification_id: Uuid::new_v4(),
            topic: "email_notification".to_string(),
            payload: serde_json::json!({"hello": "world"}),
            status: OutboxStatus::Pending,
            claimed_by: None,
            claimed_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn poll_once_publishes_and_marks_published() {
        let entry = sample_entry();
        let outbox_id = entry.outbox_id;
        let repo = Arc::new(FakeRepository { pending: Mutex::new(vec![entry]), published: Mutex::new(vec![]) });
        let bus = Arc::new(nc_bus::memory::MemoryBus::new());
        let poller = OutboxPoller::new(
            repo.clone(),
            Arc::new(bus.producer()),
            Arc::new(NoopSchemaValidator),
            OutboxPollerConfig {
                poll_interval_ms: 500,
                cleanup_interval_ms: 60_000,
                batch_size: 10,
                retention_ms: 86_400_000,
                claim_timeout_ms: 30_000,
                worker_id: "worker-test".to_string(),
            },
            None,
        );

        poller.poll_once().await.unwrap();

        assert_eq!(repo.published.lock().as_slice(), &[outbox_id]);
        let consumed = bus.consumer("channel-email", "email_notification").poll(10).await.unwrap();
        assert_eq!(consumed.len(), 1);
    }

    #[tokio::test]
    async fn poll_once_with_nothing_claimed_is_a_noop() {
        let repo = Arc::new(FakeRepository { pending: Mutex::new(vec![]), published: Mutex::new(vec![]) });
        let bus = Arc::new(nc_bus::memory::MemoryBus::new());
        let poller = OutboxPoller::new(
            repo,
            Arc::new(bus.producer()),
            Arc::new(NoopSchemaValidator),
            OutboxPollerConfig {
                poll_interval_ms: 500,
                cleanup_interval_ms: 60_000,
                batch_size: 10,
                retention_ms: 86_400_000,
                claim_timeout_ms: 30_000,
                worker_id: "worker-test".to_string(),
            },
            None,
        );
        poller.poll_once().await.unwrap();
    }
}
