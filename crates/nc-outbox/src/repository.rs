//! Outbox persistence (§4.2). The claim step must be atomic across
//! concurrently-running poller workers: one row is never handed to two
//! claimants at once, and a worker that crashes mid-claim releases the
//! row automatically once `OUTBOX_CLAIM_TIMEOUT_MS` elapses.

use async_trait::async_trait;
use uuid::Uuid;

use nc_common::OutboxEntry;

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Atomically finds and claims the single oldest outbox row that is
    /// `pending`, or `processing` with an expired claim, and marks it
    /// `processing` for `worker_id`. Returns `None` when nothing is due.
    async fn claim_one(&self, worker_id: &str, claim_timeout_ms: i64) -> anyhow::Result<Option<OutboxEntry>>;

    /// Marks a batch of claimed rows `published`. Called only after the
    /// bus has durably accepted every message in the batch.
    async fn mark_published(&self, outbox_ids: &[Uuid]) -> anyhow::Result<()>;

    /// Deletes `published` rows older than the retention window. Returns
    /// the number of rows removed.
    async fn delete_published_before(&self, cutoff: chrono::DateTime<chrono::Utc>) -> anyhow::Result<u64>;

    async fn init_schema(&self) -> anyhow::Result<()>;
}
