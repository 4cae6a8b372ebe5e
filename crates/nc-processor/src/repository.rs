use async_trait::async_trait;
use uuid::Uuid;

/// The slice of Notification access the Channel Processor needs. `nc-intake`
/// owns the table and its full lifecycle; this is a narrower view scoped to
/// step 3 and the retry-count bump of step 6 (§4.6).
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn mark_processing(&self, notification_id: Uuid) -> anyhow::Result<()>;

    /// Increments `retry_count` and returns the new value.
    async fn increment_retry_count(&self, notification_id: Uuid) -> anyhow::Result<i32>;
}
