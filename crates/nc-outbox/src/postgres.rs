//! PostgreSQL-backed outbox repository.
//!
//! `claim_one` is a single `UPDATE ... WHERE id = (SELECT ... FOR UPDATE
//! SKIP LOCKED) RETURNING *` statement, so the find-and-claim step is one
//! round trip and one row lock — two pollers racing for the same row
//! never both win it, and neither blocks behind the other's claim of a
//! different row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use nc_common::{OutboxEntry, OutboxStatus};

use crate::repository::OutboxRepository;

pub struct PostgresOutboxRepository {
    pool: PgPool,
}

impl PostgresOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> anyhow::Result<OutboxEntry> {
        let status: String = row.try_get("status")?;
        let status = match status.as_str() {
            "pending" => OutboxStatus::Pending,
            "processing" => OutboxStatus::Processing,
            "published" => OutboxStatus::Published,
            other => anyhow::bail!("unknown outbox status {other}"),
        };
        Ok(OutboxEntry {
            outbox_id: row.try_get("outbox_id")?,
            notification_id: row.try_get("notification_id")?,
            topic: row.try_get("topic")?,
            payload: row.try_get("payload")?,
            status,
            claimed_by: row.try_get("claimed_by")?,
            claimed_at: row.try_get("claimed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl OutboxRepository for PostgresOutboxRepository {
    async fn claim_one(&self, worker_id: &str, claim_timeout_ms: i64) -> anyhow::Result<Option<OutboxEntry>> {
        let now = Utc::now();
        let stale_before = now - chrono::Duration::milliseconds(claim_timeout_ms);

        let row = sqlx::query(
            r#"
            UPDATE outbox_entries
            SET status = 'processing', claimed_by = $1, claimed_at = $2, updated_at = $2
            WHERE outbox_id = (
                SELECT outbox_id FROM outbox_entries
                WHERE status = 'pending'
                   OR (status = 'processing' AND claimed_at < $3)
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING outbox_id, notification_id, topic, payload, status, claimed_by, claimed_at, created_at, updated_at
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }

    async fn mark_published(&self, outbox_ids: &[Uuid]) -> anyhow::Result<()> {
        if outbox_ids.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        sqlx::query("UPDATE outbox_entries SET status = 'published', updated_at = $1 WHERE outbox_id = ANY($2)")
            .bind(now)
            .bind(outbox_ids)
            .execute(&self.pool)
            .await?;
        debug!(count = outbox_ids.len(), "marked outbox rows published");
        Ok(())
    }

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM outbox_entries WHERE status = 'published' AND updated_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_entries (
                outbox_id UUID PRIMARY KEY,
                notification_id UUID NOT NULL,
                topic TEXT NOT NULL,
                payload JSONB NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                claimed_by TEXT,
                claimed_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS idx_outbox_entries_claim ON outbox_entries(status, created_at);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
