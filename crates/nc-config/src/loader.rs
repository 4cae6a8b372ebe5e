//! Configuration loader with file and environment variable support.

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

const CONFIG_PATHS: &[&str] = &["config.toml", "notification.toml", "./config/config.toml", "/etc/notification/config.toml"];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self { config_path: Some(path.into()) }
    }

    /// Load configuration from file (if found) with environment variable
    /// overrides applied on top.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("NOTIFICATION_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Apply environment variable overrides using the literal option
    /// names this system's configuration surface is specified with —
    /// no per-service prefix, since the spec enumerates exact names.
    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(val) = env::var("HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("DATABASE_URL") {
            config.database.url = val;
        }
        if let Ok(val) = env::var("REDIS_URL") {
            config.redis.url = val;
        }
        if let Ok(val) = env::var("KAFKA_BROKERS") {
            config.kafka.brokers = val;
        }

        if let Ok(val) = env::var("OUTBOX_POLL_INTERVAL_MS") {
            if let Ok(v) = val.parse() {
                config.outbox.poll_interval_ms = v;
            }
        }
        if let Ok(val) = env::var("OUTBOX_CLEANUP_INTERVAL_MS") {
            if let Ok(v) = val.parse() {
                config.outbox.cleanup_interval_ms = v;
            }
        }
        if let Ok(val) = env::var("OUTBOX_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                config.outbox.batch_size = v;
            }
        }
        if let Ok(val) = env::var("OUTBOX_RETENTION_MS") {
            if let Ok(v) = val.parse() {
                config.outbox.retention_ms = v;
            }
        }
        if let Ok(val) = env::var("OUTBOX_CLAIM_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                config.outbox.claim_timeout_ms = v;
            }
        }

        if let Ok(val) = env::var("DELAYED_POLL_INTERVAL_MS") {
            if let Ok(v) = val.parse() {
                config.delayed.poll_interval_ms = v;
            }
        }
        if let Ok(val) = env::var("DELAYED_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                config.delayed.batch_size = v;
            }
        }
        if let Ok(val) = env::var("MAX_POLLER_RETRIES") {
            if let Ok(v) = val.parse() {
                config.delayed.max_poller_retries = v;
            }
        }

        if let Ok(val) = env::var("PROCESSING_TTL_SECONDS") {
            if let Ok(v) = val.parse() {
                config.idempotency.processing_ttl_seconds = v;
            }
        }
        if let Ok(val) = env::var("IDEMPOTENCY_TTL_SECONDS") {
            if let Ok(v) = val.parse() {
                config.idempotency.idempotency_ttl_seconds = v;
            }
        }

        if let Ok(val) = env::var("MAX_RETRY_COUNT") {
            if let Ok(v) = val.parse() {
                config.processor.max_retry_count = v;
            }
        }

        if let Ok(val) = env::var("PROCESSING_STUCK_THRESHOLD_MS") {
            if let Ok(v) = val.parse() {
                config.recovery.processing_stuck_threshold_ms = v;
            }
        }
        if let Ok(val) = env::var("PENDING_STUCK_THRESHOLD_MS") {
            if let Ok(v) = val.parse() {
                config.recovery.pending_stuck_threshold_ms = v;
            }
        }
        if let Ok(val) = env::var("RECOVERY_POLL_INTERVAL_MS") {
            if let Ok(v) = val.parse() {
                config.recovery.poll_interval_ms = v;
            }
        }
        if let Ok(val) = env::var("RECOVERY_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                config.recovery.batch_size = v;
            }
        }

        if let Ok(val) = env::var("WEBHOOK_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                config.webhook.timeout_ms = v;
            }
        }
        if let Ok(val) = env::var("WEBHOOK_MAX_RETRIES") {
            if let Ok(v) = val.parse() {
                config.webhook.max_retries = v;
            }
        }
        if let Ok(val) = env::var("WEBHOOK_RETRY_DELAY_MS") {
            if let Ok(v) = val.parse() {
                config.webhook.retry_delay_ms = v;
            }
        }

        if let Ok(val) = env::var("WORKER_ID") {
            config.worker_id = val;
        }
        if let Ok(val) = env::var("DEV_MODE") {
            config.dev_mode = val.parse().unwrap_or(false);
        }

        if let Ok(val) = env::var("LEADER_ELECTION_ENABLED") {
            config.leader.enabled = val.parse().unwrap_or(false);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_file_and_no_env() {
        let loader = ConfigLoader::with_path("/nonexistent/path/config.toml");
        let config = loader.load().unwrap();
        assert_eq!(config.outbox.poll_interval_ms, 500);
    }
}
