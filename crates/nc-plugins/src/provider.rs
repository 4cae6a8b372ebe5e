//! The provider contract (§4.9). A channel binds to exactly one primary
//! provider and an optional fallback; both implement the same trait so
//! the Channel Processor never branches on which one it's talking to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use nc_common::{Notification, ProviderOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderManifest {
    pub name: String,
    pub version: String,
    pub channel: String,
    pub required_credentials: Vec<String>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn manifest(&self) -> &ProviderManifest;

    /// Validates a notification payload before it is ever queued. Called
    /// by both the Outbox Poller (on the raw outbox payload) and the
    /// Channel Processor (on the parsed notification).
    fn validate_payload(&self, payload: &serde_json::Value) -> Result<(), String>;

    fn rate_limit(&self) -> nc_common::RateLimitConfig;

    async fn initialize(&self) -> anyhow::Result<()>;

    async fn health_check(&self) -> anyhow::Result<()>;

    async fn send(&self, notification: &Notification) -> ProviderOutcome;

    async fn shutdown(&self) -> anyhow::Result<()>;
}
