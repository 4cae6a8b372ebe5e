use async_trait::async_trait;
use uuid::Uuid;

use nc_common::{Notification, NotificationStatus};

/// The Status Consumer's view onto the notifications table `nc-intake`
/// owns. `apply_status` returns the row as it stood immediately after the
/// update so the caller can read `webhook_url` back rather than trust a
/// copy carried on the status event.
#[async_trait]
pub trait StatusRepository: Send + Sync {
    async fn apply_status(
        &self,
        notification_id: Uuid,
        status: NotificationStatus,
        error_message: Option<String>,
    ) -> anyhow::Result<Option<Notification>>;
}
