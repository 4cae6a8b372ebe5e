//! Shared domain types for the notification delivery core.
//!
//! Every crate in the workspace depends on this one for the wire and
//! persisted shapes of a Notification and its satellite records. Nothing
//! here talks to a store, a bus, or the coordination layer directly.

pub mod logging;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, NotificationError>;

/// Errors surfaced across the notification core. Library code returns
/// these; binaries wrap them in `anyhow` at the call site.
#[derive(thiserror::Error, Debug)]
pub enum NotificationError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("duplicate request_id={request_id} channel={channel}")]
    Duplicate { request_id: String, channel: String },

    #[error("durable store error: {0}")]
    Store(String),

    #[error("message bus error: {0}")]
    Bus(String),

    #[error("coordination store error: {0}")]
    Coordination(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("shutdown in progress")]
    ShutdownInProgress,
}

/// The channel a notification is addressed to, e.g. `"email"`, `"whatsapp"`.
/// Kept as a plain string rather than a closed enum since channels are
/// registered dynamically by the Plugin Registry (C11).
pub type Channel = String;

/// Returns the per-channel bus topic name, e.g. `email_notification`.
pub fn channel_topic(channel: &str) -> String {
    format!("{channel}_notification")
}

pub const DELAYED_TOPIC: &str = "delayed_notification";
pub const STATUS_TOPIC: &str = "notification_status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Processing,
    Delivered,
    Failed,
}

impl NotificationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, NotificationStatus::Delivered | NotificationStatus::Failed)
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Processing => "processing",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// The logical intent for one `(request_id, channel)` pair.
///
/// Status is monotone except for the explicit operator `failed -> pending`
/// retry path; `updated_at` strictly increases on every write.
///
/// Field names are plain snake_case on the wire: this is what `nc-intake`
/// writes into an outbox payload and what the Channel Processor parses
/// back off the channel and delayed topics, so the two sides must agree
/// on casing without a rename layer in between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: Uuid,
    pub request_id: String,
    pub client_id: String,
    pub channel: String,
    pub recipient: serde_json::Value,
    pub content: serde_json::Value,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub webhook_url: Option<String>,
    pub status: NotificationStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// True when this notification was created for future delivery.
    pub fn is_scheduled(&self) -> bool {
        self.scheduled_at.map(|t| t > Utc::now()).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Published,
}

/// A durable pending handoff to the bus. Claimed by at most one Outbox
/// Poller worker at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub outbox_id: Uuid,
    pub notification_id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An in-flight scheduled event, serialised as a member of the
/// `delayed:queue` sorted set. Field names match the wire format other
/// language ports of this system already use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayedEvent {
    pub notification_id: Uuid,
    pub request_id: String,
    pub client_id: String,
    pub target_topic: String,
    pub payload: serde_json::Value,
    #[serde(rename = "_pollerRetries", default)]
    pub poller_retries: u32,
}

/// Claim lease held in `delayed:claim:{notification_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayedClaim {
    pub worker_id: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Processing,
    Delivered,
    Failed,
}

/// Per-notification coordination state held at `idem:{notification_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub status: IdempotencyStatus,
    pub worker_id: String,
    pub updated_at: DateTime<Utc>,
}

/// Per-channel token-bucket configuration. Resolved from the Plugin
/// Registry entry for the channel, or these defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_tokens: f64,
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_tokens: 100.0, refill_per_sec: 10.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: i64,
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    StuckProcessing,
    GhostDelivery,
    OrphanedPending,
    RecoveryError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// A durable operator artifact, unique on `(notification_id, alert_type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub notification_id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub reason: String,
    pub observed_coordination_status: Option<String>,
    pub observed_store_status: Option<String>,
    pub retry_count: i32,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(
        notification_id: Uuid,
        alert_type: AlertType,
        severity: AlertSeverity,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            notification_id,
            alert_type,
            severity,
            reason: reason.into(),
            observed_coordination_status: None,
            observed_store_status: None,
            retry_count: 0,
            resolved: false,
            resolved_at: None,
        }
    }
}

/// The webhook's own status rendering: `"DELIVERED"|"FAILED"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusOutcome {
    Delivered,
    Failed,
}

/// The `notification_status` bus topic's own status rendering:
/// `"delivered"|"failed"`, distinct from the webhook body's uppercase
/// `StatusOutcome` — the two external interfaces disagree on casing and
/// sharing one enum would get one of them wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusStatusOutcome {
    Delivered,
    Failed,
}

impl From<StatusOutcome> for BusStatusOutcome {
    fn from(outcome: StatusOutcome) -> Self {
        match outcome {
            StatusOutcome::Delivered => BusStatusOutcome::Delivered,
            StatusOutcome::Failed => BusStatusOutcome::Failed,
        }
    }
}

/// Terminal outcome propagated on the `notification_status` topic.
/// Field names are plain snake_case, matching the literal wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub notification_id: Uuid,
    pub request_id: String,
    pub client_id: String,
    pub channel: String,
    pub status: BusStatusOutcome,
    pub message: Option<String>,
    pub retry_count: i32,
    pub webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outbound webhook body. Field order and names are bit-exact: clients
/// depend on this shape. Fields are plain snake_case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub request_id: String,
    pub client_id: String,
    pub notification_id: Uuid,
    pub status: StatusOutcome,
    pub channel: String,
    pub message: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Error detail returned by a provider's `send` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// Outcome of a single provider `send` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOutcome {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<ProviderError>,
}

impl ProviderOutcome {
    pub fn success(message_id: impl Into<String>) -> Self {
        Self { success: true, message_id: Some(message_id.into()), error: None }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(ProviderError { code: code.into(), message: message.into(), retryable }),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().map(|e| e.retryable).unwrap_or(false)
    }
}

/// A per-process token identifying the current worker, defaulting to a
/// random value so co-located instances never collide on a claim key.
pub fn random_worker_id() -> String {
    format!("worker-{}", Uuid::new_v4())
}

/// Validates a JSON payload against a schema keyed by topic (Outbox
/// Poller) or channel (Channel Processor). The concrete registry lives
/// in `nc-plugins`; this trait is the seam so `nc-outbox` and
/// `nc-processor` don't need to depend on it directly.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, key: &str, payload: &serde_json::Value) -> std::result::Result<(), String>;
}

/// Accepts everything. Used where no Plugin Registry is wired, e.g. unit
/// tests and `nc-dev`.
pub struct NoopSchemaValidator;

impl SchemaValidator for NoopSchemaValidator {
    fn validate(&self, _key: &str, _payload: &serde_json::Value) -> std::result::Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_status_is_terminal() {
        assert!(NotificationStatus::Delivered.is_terminal());
        assert!(NotificationStatus::Failed.is_terminal());
        assert!(!NotificationStatus::Pending.is_terminal());
        assert!(!NotificationStatus::Processing.is_terminal());
    }

    #[test]
    fn channel_topic_naming() {
        assert_eq!(channel_topic("email"), "email_notification");
        assert_eq!(channel_topic("whatsapp"), "whatsapp_notification");
    }

    #[test]
    fn status_outcome_serialises_uppercase() {
        let json = serde_json::to_string(&StatusOutcome::Delivered).unwrap();
        assert_eq!(json, "\"DELIVERED\"");
    }

    #[test]
    fn bus_status_outcome_serialises_lowercase() {
        let json = serde_json::to_string(&BusStatusOutcome::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
    }

    #[test]
    fn status_event_and_webhook_payload_use_plain_snake_case_fields() {
        let event = StatusEvent {
            notification_id: Uuid::nil(),
            request_id: "r1".into(),
            client_id: "c1".into(),
            channel: "email".into(),
            status: BusStatusOutcome::Delivered,
            message: None,
            retry_count: 0,
            webhook_url: Some("https://example.com/hook".into()),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["notification_id"], serde_json::json!(Uuid::nil()));
        assert_eq!(json["webhook_url"], "https://example.com/hook");
        assert_eq!(json["status"], "delivered");

        let payload = WebhookPayload {
            request_id: "r1".into(),
            client_id: "c1".into(),
            notification_id: Uuid::nil(),
            status: StatusOutcome::Delivered,
            channel: "email".into(),
            message: None,
            occurred_at: Utc::now(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["notification_id"], serde_json::json!(Uuid::nil()));
        assert_eq!(json["status"], "DELIVERED");
    }

    #[test]
    fn delayed_event_round_trips_poller_retries_field_name() {
        let event = DelayedEvent {
            notification_id: Uuid::new_v4(),
            request_id: "r1".into(),
            client_id: "c1".into(),
            target_topic: "email_notification".into(),
            payload: serde_json::json!({}),
            poller_retries: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["_pollerRetries"], 2);
    }

    #[test]
    fn provider_outcome_retryable_helper() {
        let retryable = ProviderOutcome::failure("TIMEOUT", "provider timed out", true);
        assert!(retryable.is_retryable());
        let terminal = ProviderOutcome::failure("INVALID_RECIPIENT", "bad address", false);
        assert!(!terminal.is_retryable());
    }
}
