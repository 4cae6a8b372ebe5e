//! PostgreSQL-backed intake store. `accept` runs the Notification insert
//! and the Outbox Entry insert in one transaction: either both rows land
//! or neither does, so a Channel Processor never sees a Notification with
//! no corresponding outbox handoff.

use chrono::Utc;
use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use async_trait::async_trait;
use nc_common::{channel_topic, NotificationError, NotificationStatus, DELAYED_TOPIC};

use crate::repository::{IntakeStore, NewNotification};

pub struct PostgresIntakeStore {
    pool: PgPool,
}

impl PostgresIntakeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Outbox payloads carry the Notification in full (§4.1) so downstream
/// stages never round-trip to the store before publishing.
#[derive(Serialize)]
struct NotificationPayload<'a> {
    notification_id: Uuid,
    request_id: &'a str,
    client_id: &'a str,
    channel: &'a str,
    recipient: &'a serde_json::Value,
    content: &'a serde_json::Value,
    variables: &'a std::collections::HashMap<String, String>,
    webhook_url: &'a Option<String>,
    status: NotificationStatus,
    scheduled_at: Option<chrono::DateTime<Utc>>,
    retry_count: i32,
    error_message: Option<String>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

#[async_trait]
impl IntakeStore for PostgresIntakeStore {
    async fn accept(&self, new: NewNotification) -> nc_common::Result<nc_common::Notification> {
        let mut tx = self.pool.begin().await.map_err(|e| NotificationError::Store(e.to_string()))?;

        let notification_id = Uuid::new_v4();
        let now = Utc::now();
        let variables_json = serde_json::to_value(&new.variables).map_err(|e| NotificationError::Store(e.to_string()))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO notifications (
                notification_id, request_id, client_id, channel, recipient, content, variables,
                webhook_url, status, scheduled_at, retry_count, error_message, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9, 0, NULL, $10, $10)
            ON CONFLICT (request_id, channel) DO NOTHING
            RETURNING notification_id
            "#,
        )
        .bind(notification_id)
        .bind(&new.request_id)
        .bind(&new.client_id)
        .bind(&new.channel)
        .bind(&new.recipient)
        .bind(&new.content)
        .bind(&variables_json)
        .bind(&new.webhook_url)
        .bind(new.scheduled_at)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| NotificationError::Store(e.to_string()))?;

        if inserted.is_none() {
            return Err(NotificationError::Duplicate { request_id: new.request_id, channel: new.channel });
        }

        let is_scheduled = new.scheduled_at.map(|t| t > now).unwrap_or(false);
        let topic = if is_scheduled { DELAYED_TOPIC.to_string() } else { channel_topic(&new.channel) };

        let payload = NotificationPayload {
            notification_id,
            request_id: &new.request_id,
            client_id: &new.client_id,
            channel: &new.channel,
            recipient: &new.recipient,
            content: &new.content,
            variables: &new.variables,
            webhook_url: &new.webhook_url,
            status: NotificationStatus::Pending,
            scheduled_at: new.scheduled_at,
            retry_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        let payload_json = serde_json::to_value(&payload).map_err(|e| NotificationError::Store(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO outbox_entries (outbox_id, notification_id, topic, payload, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(notification_id)
        .bind(&topic)
        .bind(&payload_json)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| NotificationError::Store(e.to_string()))?;

        tx.commit().await.map_err(|e| NotificationError::Store(e.to_string()))?;

        Ok(nc_common::Notification {
            notification_id,
            request_id: new.request_id,
            client_id: new.client_id,
            channel: new.channel,
            recipient: new.recipient,
            content: new.content,
            variables: new.variables,
            webhook_url: new.webhook_url,
            status: NotificationStatus::Pending,
            scheduled_at: new.scheduled_at,
            retry_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                notification_id UUID PRIMARY KEY,
                request_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                recipient JSONB NOT NULL,
                content JSONB NOT NULL,
                variables JSONB NOT NULL DEFAULT '{}',
                webhook_url TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                scheduled_at TIMESTAMPTZ,
                retry_count INT NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (request_id, channel)
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_processing ON notifications(status, updated_at);
            CREATE INDEX IF NOT EXISTS idx_notifications_pending ON notifications(status, created_at);

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
