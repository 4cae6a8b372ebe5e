//! Notification core configuration.
//!
//! TOML-based configuration with environment variable override support,
//! following the same load-then-override pattern used across this
//! workspace's other binaries.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration. Every binary loads one of these at
/// startup; each only reads the sections relevant to the component it
/// runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub outbox: OutboxConfig,
    pub delayed: DelayedConfig,
    pub idempotency: IdempotencyConfig,
    pub processor: ProcessorConfig,
    pub recovery: RecoveryConfig,
    pub webhook: WebhookConfig,
    pub leader: LeaderConfig,

    /// Identifies this process in claims and idempotency records.
    /// Defaults to a random token per process when left empty.
    pub worker_id: String,

    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            kafka: KafkaConfig::default(),
            outbox: OutboxConfig::default(),
            delayed: DelayedConfig::default(),
            idempotency: IdempotencyConfig::default(),
            processor: ProcessorConfig::default(),
            recovery: RecoveryConfig::default(),
            webhook: WebhookConfig::default(),
            leader: LeaderConfig::default(),
            worker_id: String::new(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: 9090, host: "0.0.0.0".to_string() }
    }
}

/// Durable Store (C1) connection settings. Postgres-backed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/notifications".to_string(),
            max_connections: 10,
        }
    }
}

/// Coordination Store (C3) connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { url: "redis://localhost:6379".to_string() }
    }
}

/// Message Bus (C2) connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub brokers: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self { brokers: "localhost:9092".to_string() }
    }
}

/// Outbox Poller (C4) tuning, field names mirror the spec's own
/// environment variable names (`OUTBOX_POLL_INTERVAL_MS`, etc).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub poll_interval_ms: u64,
    pub cleanup_interval_ms: u64,
    pub batch_size: usize,
    pub retention_ms: i64,
    pub claim_timeout_ms: i64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            cleanup_interval_ms: 60_000,
            batch_size: 100,
            retention_ms: 86_400_000,
            claim_timeout_ms: 30_000,
        }
    }
}

/// Delayed Queue + Poller (C5) tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayedConfig {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub max_poller_retries: u32,
    pub claim_ttl_ms: i64,
}

impl Default for DelayedConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            batch_size: 50,
            max_poller_retries: 10,
            claim_ttl_ms: 30_000,
        }
    }
}

/// Idempotency Registry (C7) TTLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub processing_ttl_seconds: u64,
    pub idempotency_ttl_seconds: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self { processing_ttl_seconds: 300, idempotency_ttl_seconds: 21_600 }
    }
}

/// Channel Processor (C8) tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub max_retry_count: i32,
    pub provider_timeout_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self { max_retry_count: 3, provider_timeout_ms: 10_000 }
    }
}

/// Recovery Cron (C10) tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub processing_stuck_threshold_ms: i64,
    pub pending_stuck_threshold_ms: i64,
    pub max_consecutive_failures: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 60_000,
            batch_size: 100,
            processing_stuck_threshold_ms: 300_000,
            pending_stuck_threshold_ms: 600_000,
            max_consecutive_failures: 5,
        }
    }
}

/// Status Consumer (C9) webhook dispatch tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000, max_retries: 3, retry_delay_ms: 1_000 }
    }
}

/// Leader election, used by pollers that should run as a single active
/// instance across a process fleet. Optional: the claim-based exclusion
/// in the outbox and delayed queue is what actually guarantees
/// correctness; this only avoids redundant polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderConfig {
    pub enabled: bool,
    pub lock_key: String,
    pub lock_ttl_seconds: u64,
    pub heartbeat_interval_seconds: u64,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lock_key: "notify:leader".to_string(),
            lock_ttl_seconds: 30,
            heartbeat_interval_seconds: 10,
        }
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_well_formed() {
        let config = AppConfig::default();
        assert_eq!(config.outbox.batch_size, 100);
        assert_eq!(config.webhook.max_retries, 3);
        assert!(!config.leader.enabled);
    }
}
