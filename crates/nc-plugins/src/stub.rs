//! A provider that always succeeds, used by `nc-dev` and unit tests so
//! the full pipeline can run without a real downstream integration.

use async_trait::async_trait;

use nc_common::{Notification, ProviderOutcome, RateLimitConfig};

use crate::provider::{Provider, ProviderManifest};

pub struct StubProvider {
    manifest: ProviderManifest,
}

impl StubProvider {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            manifest: ProviderManifest {
                name: "stub".to_string(),
                version: "1.0.0".to_string(),
                channel: channel.into(),
                required_credentials: Vec::new(),
            },
        }
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn manifest(&self) -> &ProviderManifest {
        &self.manifest
    }

    fn validate_payload(&self, _payload: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }

    fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::default()
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send(&self, notification: &Notification) -> ProviderOutcome {
        ProviderOutcome::success(format!("stub-{}", notification.notification_id))
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
