use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use nc_common::Notification;

/// A notification derived from an accepted request, before it has an
/// identity or a store row. One of these is created per channel.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub request_id: String,
    pub client_id: String,
    pub channel: String,
    pub recipient: Value,
    pub content: Value,
    pub variables: HashMap<String, String>,
    pub webhook_url: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// §4.1: inserts the Notification and its Outbox Entry atomically.
/// Duplicate `(request_id, channel)` surfaces as
/// `NotificationError::Duplicate` rather than a generic store error.
#[async_trait]
pub trait IntakeStore: Send + Sync {
    async fn accept(&self, new: NewNotification) -> nc_common::Result<Notification>;

    async fn init_schema(&self) -> anyhow::Result<()>;
}
