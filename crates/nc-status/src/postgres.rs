//! PostgreSQL-backed status repository. `apply_status` is a single
//! `UPDATE ... RETURNING *`, so the post-update row — including
//! `webhook_url` — comes back in the same round trip that records the
//! terminal state.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use nc_common::{Notification, NotificationStatus};

use crate::repository::StatusRepository;

pub struct PostgresStatusRepository {
    pool: PgPool,
}

impl PostgresStatusRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> anyhow::Result<Notification> {
        let status: String = row.try_get("status")?;
        let status = match status.as_str() {
            "pending" => nc_common::NotificationStatus::Pending,
            "processing" => nc_common::NotificationStatus::Processing,
            "delivered" => nc_common::NotificationStatus::Delivered,
            "failed" => nc_common::NotificationStatus::Failed,
            other => anyhow::bail!("unknown notification status {other}"),
        };
        Ok(Notification {
            notification_id: row.try_get("notification_id")?,
            request_id: row.try_get("request_id")?,
            client_id: row.try_get("client_id")?,
            channel: row.try_get("channel")?,
            recipient: row.try_get("recipient")?,
            content: row.try_get("content")?,
            variables: serde_json::from_value(row.try_get("variables")?).unwrap_or_default(),
            webhook_url: row.try_get("webhook_url")?,
            status,
            scheduled_at: row.try_get("scheduled_at")?,
            retry_count: row.try_get("retry_count")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl StatusRepository for PostgresStatusRepository {
    async fn apply_status(
        &self,
        notification_id: Uuid,
        status: NotificationStatus,
        error_message: Option<String>,
    ) -> anyhow::Result<Option<Notification>> {
        let status_str = status.to_string();
        let row = sqlx::query(
            r#"
            UPDATE notifications
            SET status = $1, error_message = $2, updated_at = $3
            WHERE notification_id = $4
            RETURNING notification_id, request_id, client_id, channel, recipient, content,
                      variables, webhook_url, status, scheduled_at, retry_count, error_message,
                      created_at, updated_at
            "#,
        )
        .bind(status_str)
        .bind(error_message)
        .bind(Utc::now())
        .bind(notification_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_row).transpose()
    }
}
