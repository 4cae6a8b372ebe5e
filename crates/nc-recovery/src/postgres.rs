//! PostgreSQL-backed recovery repository. `claim_stuck_processing` uses
//! the same `UPDATE ... WHERE id IN (SELECT ... FOR UPDATE SKIP LOCKED)
//! RETURNING *` shape as the outbox claim, scaled to a batch instead of
//! one row since recovery reconciles in bulk per tick.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use nc_common::{Alert, AlertSeverity, AlertType, Notification};

use crate::repository::RecoveryRepository;

pub struct PostgresRecoveryRepository {
    pool: PgPool,
}

impl PostgresRecoveryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_notification(row: &sqlx::postgres::PgRow) -> anyhow::Result<Notification> {
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

const NOTIFICATION_COLUMNS: &str = "notification_id, request_id, client_id, channel, recipient, content, \
     variables, webhook_url, status, scheduled_at, retry_count, error_message, created_at, updated_at";

#[async_trait]
impl RecoveryRepository for PostgresRecoveryRepository {
    async fn claim_stuck_processing(&self, threshold: DateTime<Utc>, batch_size: i64) -> anyhow::Result<Vec<Notification>> {
        let query = format!(
            r#"
            UPDATE notifications
            SET updated_at = $1
            WHERE notification_id IN (
                SELECT notification_id FROM notifications
                WHERE status = 'processing' AND updated_at < $2
                ORDER BY updated_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        );
        let rows = sqlx::query(&query).bind(Utc::now()).bind(threshold).bind(batch_size).fetch_all(&self.pool).await?;
        rows.iter().map(Self::parse_notification).collect()
    }

    async fn find_orphaned_pending(&self, threshold: DateTime<Utc>, batch_size: i64) -> anyhow::Result<Vec<Notification>> {
        let query = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE status = 'pending' AND created_at < $1 ORDER BY created_at ASC LIMIT $2"
        );
        let rows = sqlx::query(&query).bind(threshold).bind(batch_size).fetch_all(&self.pool).await?;
        rows.iter().map(Self::parse_notification).collect()
    }

    async fn set_delivered(&self, notification_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE notifications SET status = 'delivered', updated_at = $1 WHERE notification_id = $2")
            .bind(Utc::now())
            .bind(notification_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_failed(&self, notification_id: Uuid, error_message: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE notifications SET status = 'failed', error_message = $1, updated_at = $2 WHERE notification_id = $3")
            .bind(error_message)
            .bind(Utc::now())
            .bind(notification_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_alert(&self, alert: &Alert) -> anyhow::Result<()> {
        let alert_type = match alert.alert_type {
            AlertType::StuckProcessing => "stuck_processing",
            AlertType::GhostDelivery => "ghost_delivery",
            AlertType::OrphanedPending => "orphaned_pending",
            AlertType::RecoveryError => "recovery_error",
        };
        let severity = match alert.severity {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        };
        sqlx::query(
            r#"
            INSERT INTO alerts (
                notification_id, alert_type, severity, reason, observed_coordination_status,
                observed_store_status, retry_count, resolved, resolved_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, false, NULL)
            ON CONFLICT (notification_id, alert_type) DO UPDATE SET
                severity = excluded.severity,
                reason = excluded.reason,
                observed_coordination_status = excluded.observed_coordination_status,
                observed_store_status = excluded.observed_store_status,
                retry_count = excluded.retry_count,
                resolved = false,
                resolved_at = NULL
            "#,
        )
        .bind(alert.notification_id)
        .bind(alert_type)
        .bind(severity)
        .bind(&alert.reason)
        .bind(&alert.observed_coordination_status)
        .bind(&alert.observed_store_status)
        .bind(alert.retry_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                notification_id UUID NOT NULL,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                reason TEXT NOT NULL,
                observed_coordination_status TEXT,
                observed_store_status TEXT,
                retry_count INT NOT NULL DEFAULT 0,
                resolved BOOLEAN NOT NULL DEFAULT false,
                resolved_at TIMESTAMPTZ,
                PRIMARY KEY (notification_id, alert_type)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
