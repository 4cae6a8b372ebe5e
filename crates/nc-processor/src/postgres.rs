//! PostgreSQL-backed view onto the `notifications` table that `nc-intake`
//! owns. `mark_processing` is unconditional (the idempotency claim already
//! gatekept concurrent delivery); `increment_retry_count` does the bump and
//! read in one round trip.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::repository::NotificationRepository;

pub struct PostgresNotificationRepository {
    pool: PgPool,
}

impl PostgresNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for PostgresNotificationRepository {
    async fn mark_processing(&self, notification_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE notifications SET status = 'processing', updated_at = $1 WHERE notification_id = $2")
            .bind(Utc::now())
            .bind(notification_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_retry_count(&self, notification_id: Uuid) -> anyhow::Result<i32> {
        let row = sqlx::query(
            "UPDATE notifications SET retry_count = retry_count + 1, updated_at = $1 WHERE notification_id = $2 RETURNING retry_count",
        )
        .bind(Utc::now())
        .bind(notification_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("retry_count")?)
    }
}
