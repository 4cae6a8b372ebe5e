//! Binds channels to providers (§4.9). Loaded once at process startup
//! from a TOML document; hot-reload is not supported, processes restart
//! to pick up plugin changes.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use nc_common::SchemaValidator;

use crate::error::{PluginError, Result};
use crate::provider::Provider;
use crate::stub::StubProvider;

#[derive(Debug, Deserialize)]
pub struct PluginManifestDocument {
    pub providers: Vec<ProviderEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderEntry {
    pub channel: String,
    /// Provider kind, e.g. `"stub"`. Real deployments register additional
    /// kinds in `build_provider` as integrations are added.
    pub kind: String,
    #[serde(default)]
    pub fallback_kind: Option<String>,
}

struct ChannelBinding {
    primary: Arc<dyn Provider>,
    fallback: Option<Arc<dyn Provider>>,
}

pub struct PluginRegistry {
    bindings: HashMap<String, ChannelBinding>,
}

impl PluginRegistry {
    /// Every channel gets a stub provider. Used by `nc-dev` and tests,
    /// where no manifest document is configured.
    pub fn stub_only(channels: &[&str]) -> Self {
        let mut bindings = HashMap::new();
        for channel in channels {
            bindings.insert(
                channel.to_string(),
                ChannelBinding { primary: Arc::new(StubProvider::new(*channel)), fallback: None },
            );
        }
        Self { bindings }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let doc: PluginManifestDocument = toml::from_str(contents).map_err(|e| PluginError::Config(e.to_string()))?;
        let mut bindings = HashMap::new();
        for entry in doc.providers {
            let primary = build_provider(&entry.kind, &entry.channel)?;
            let fallback = entry.fallback_kind.as_deref().map(|kind| build_provider(kind, &entry.channel)).transpose()?;
            info!(channel = %entry.channel, kind = %entry.kind, has_fallback = fallback.is_some(), "bound channel provider");
            bindings.insert(entry.channel, ChannelBinding { primary, fallback });
        }
        Ok(Self { bindings })
    }

    pub fn primary(&self, channel: &str) -> Result<Arc<dyn Provider>> {
        self.bindings.get(channel).map(|b| b.primary.clone()).ok_or_else(|| PluginError::UnknownChannel(channel.to_string()))
    }

    pub fn fallback(&self, channel: &str) -> Option<Arc<dyn Provider>> {
        self.bindings.get(channel).and_then(|b| b.fallback.clone())
    }

    pub async fn initialize_all(&self) -> anyhow::Result<()> {
        for binding in self.bindings.values() {
            binding.primary.initialize().await?;
            if let Some(fallback) = &binding.fallback {
                fallback.initialize().await?;
            }
        }
        Ok(())
    }
}

fn build_provider(kind: &str, channel: &str) -> Result<Arc<dyn Provider>> {
    match kind {
        "stub" => Ok(Arc::new(StubProvider::new(channel))),
        other => Err(PluginError::Config(format!("unknown provider kind: {other}"))),
    }
}

/// Channel topics are `{channel}_notification`; everything else (the
/// delayed and status topics, direct channel names) validates against
/// the channel's own schema.
fn channel_from_key(key: &str) -> &str {
    key.strip_suffix("_notification").unwrap_or(key)
}

impl SchemaValidator for PluginRegistry {
    fn validate(&self, key: &str, payload: &serde_json::Value) -> std::result::Result<(), String> {
        let channel = channel_from_key(key);
        match self.bindings.get(channel) {
            Some(binding) => binding.primary.validate_payload(payload),
            None => Ok(()), // unrecognised topics (delayed/status) carry no provider schema
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_only_binds_requested_channels() {
        let registry = PluginRegistry::stub_only(&["email", "sms"]);
        assert!(registry.primary("email").is_ok());
        assert!(registry.primary("sms").is_ok());
        assert!(registry.primary("whatsapp").is_err());
    }

    #[test]
    fn schema_validator_accepts_unknown_topics() {
        let registry = PluginRegistry::stub_only(&["email"]);
        assert!(registry.validate("delayed_notification", &serde_json::json!({})).is_ok());
        assert!(registry.validate("email_notification", &serde_json::json!({})).is_ok());
    }
}
