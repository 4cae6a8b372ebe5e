//! Idempotency Registry (C7).
//!
//! Short-lived per-notification coordination state at
//! `idem:{notification_id}`. `set_processing` only succeeds if the key is
//! absent or already claimed by the same worker — a compare-and-set
//! implemented as a single Lua script, never a read-then-write.

use chrono::Utc;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use nc_common::{IdempotencyRecord, IdempotencyStatus};

use crate::error::Result;

fn key(notification_id: Uuid) -> String {
    format!("idem:{notification_id}")
}

pub struct IdempotencyRegistry {
    conn: ConnectionManager,
}

impl IdempotencyRegistry {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Claims the notification for `worker_id`. Succeeds if no record
    /// exists yet, or the existing record already names this worker.
    /// Returns `false` if another worker currently owns the claim.
    pub async fn set_processing(&self, notification_id: Uuid, worker_id: &str, ttl_seconds: u64) -> Result<bool> {
        let record = IdempotencyRecord {
            status: IdempotencyStatus::Processing,
            worker_id: worker_id.to_string(),
            updated_at: Utc::now(),
        };
        let value = serde_json::to_string(&record)?;

        let script = r#"
            local current = redis.call("GET", KEYS[1])
            if current == false then
                redis.call("SET", KEYS[1], ARGV[1], "EX", ARGV[2])
                return 1
            end
            local decoded = cjson.decode(current)
            if decoded.worker_id == ARGV[3] then
                redis.call("SET", KEYS[1], ARGV[1], "EX", ARGV[2])
                return 1
            end
            return 0
        "#;

        let mut conn = self.conn.clone();
        let result: i32 = redis::Script::new(script)
            .key(key(notification_id))
            .arg(&value)
            .arg(ttl_seconds)
            .arg(worker_id)
            .invoke_async(&mut conn)
            .await?;

        Ok(result == 1)
    }

    pub async fn set_delivered(&self, notification_id: Uuid, worker_id: &str, ttl_seconds: u64) -> Result<()> {
        self.set_terminal(notification_id, worker_id, IdempotencyStatus::Delivered, ttl_seconds).await
    }

    pub async fn set_failed(&self, notification_id: Uuid, worker_id: &str, ttl_seconds: u64) -> Result<()> {
        self.set_terminal(notification_id, worker_id, IdempotencyStatus::Failed, ttl_seconds).await
    }

    async fn set_terminal(
        &self,
        notification_id: Uuid,
        worker_id: &str,
        status: IdempotencyStatus,
        ttl_seconds: u64,
    ) -> Result<()> {
        let record = IdempotencyRecord { status, worker_id: worker_id.to_string(), updated_at: Utc::now() };
        let value = serde_json::to_string(&record)?;

        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key(notification_id))
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn get(&self, notification_id: Uuid) -> Result<Option<IdempotencyRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET").arg(key(notification_id)).query_async(&mut conn).await?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format() {
        let id = Uuid::nil();
        assert_eq!(key(id), format!("idem:{id}"));
    }
}
