use async_trait::async_trait;
use uuid::Uuid;

use nc_common::{Alert, Notification};

/// The durable-store access the Recovery Cron needs (§4.8): claiming
/// stuck-processing rows, finding orphaned-pending rows, resolving
/// ghosts/exhausted retries, and upserting alerts.
#[async_trait]
pub trait RecoveryRepository: Send + Sync {
    /// Claims up to `batch_size` notifications stuck in `processing` since
    /// before `threshold`, touching `updated_at` so a second cron instance
    /// (or the next tick) does not also pick them up mid-reconciliation.
    async fn claim_stuck_processing(&self, threshold: chrono::DateTime<chrono::Utc>, batch_size: i64) -> anyhow::Result<Vec<Notification>>;

    async fn find_orphaned_pending(&self, threshold: chrono::DateTime<chrono::Utc>, batch_size: i64) -> anyhow::Result<Vec<Notification>>;

    async fn set_delivered(&self, notification_id: Uuid) -> anyhow::Result<()>;

    async fn set_failed(&self, notification_id: Uuid, error_message: &str) -> anyhow::Result<()>;

    /// Upserts keyed by `(notification_id, alert_type)`, resetting
    /// `resolved = false` on re-occurrence.
    async fn upsert_alert(&self, alert: &Alert) -> anyhow::Result<()>;

    async fn init_schema(&self) -> anyhow::Result<()>;
}
