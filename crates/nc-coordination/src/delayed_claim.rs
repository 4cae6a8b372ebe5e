//! Delayed Queue claim/confirm protocol (C5), backing `crates/nc-delayed`.
//!
//! `delayed:queue` is a sorted set scored by due epoch ms; each member is
//! the JSON-encoded `DelayedEvent`. A claim is a sibling TTL'd key
//! `delayed:claim:{notification_id}`. Claiming and confirming are each a
//! single Lua script so no worker can observe a half-updated state.

use chrono::Utc;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use nc_common::DelayedEvent;

use crate::error::Result;

const QUEUE_KEY: &str = "delayed:queue";

fn claim_key(notification_id: Uuid) -> String {
    format!("delayed:claim:{notification_id}")
}

/// Selects up to `batch_size` due members that do not have an unexpired
/// claim, and atomically claims each one for `worker_id`.
const CLAIM_SCRIPT: &str = r#"
    local queue_key = KEYS[1]
    local now = tonumber(ARGV[1])
    local batch_size = tonumber(ARGV[2])
    local worker_id = ARGV[3]
    local claim_ttl_ms = tonumber(ARGV[4])
    local claim_prefix = ARGV[5]

    local candidates = redis.call("ZRANGEBYSCORE", queue_key, "-inf", now, "LIMIT", 0, batch_size * 4)
    local claimed = {}
    for _, member in ipairs(candidates) do
        if #claimed >= batch_size then
            break
        end
        local decoded = cjson.decode(member)
        local claim_key = claim_prefix .. decoded.notificationId
        local existing = redis.call("GET", claim_key)
        if existing == false then
            local claim_value = cjson.encode({worker_id = worker_id, expires_at = now + claim_ttl_ms})
            redis.call("SET", claim_key, claim_value, "PX", claim_ttl_ms)
            table.insert(claimed, member)
        end
    end
    return claimed
"#;

/// Removes the member and its claim only if the claim still names this
/// worker. Returns 0 (claim lost) without touching the sorted set
/// otherwise — the open question in the source is resolved as: leave the
/// member in place so it re-fires on a later tick.
const CONFIRM_SCRIPT: &str = r#"
    local claim_key = KEYS[1]
    local queue_key = KEYS[2]
    local worker_id = ARGV[1]
    local member = ARGV[2]

    local existing = redis.call("GET", claim_key)
    if existing == false then
        return 0
    end
    local decoded = cjson.decode(existing)
    if decoded.worker_id ~= worker_id then
        return 0
    end
    redis.call("DEL", claim_key)
    redis.call("ZREM", queue_key, member)
    return 1
"#;

const RESCHEDULE_SCRIPT: &str = r#"
    local claim_key = KEYS[1]
    local queue_key = KEYS[2]
    local old_member = ARGV[1]
    local new_score = ARGV[2]
    local new_member = ARGV[3]

    redis.call("DEL", claim_key)
    redis.call("ZREM", queue_key, old_member)
    redis.call("ZADD", queue_key, new_score, new_member)
    return 1
"#;

/// A claimed sorted-set member paired with its decoded event, so confirm
/// and reschedule can ZREM the exact original string.
pub struct ClaimedDelayedEvent {
    pub raw_member: String,
    pub event: DelayedEvent,
}

pub struct DelayedQueue {
    conn: ConnectionManager,
}

impl DelayedQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Enqueues an event due at `due_at_ms` (epoch milliseconds).
    pub async fn push(&self, event: &DelayedEvent, due_at_ms: i64) -> Result<()> {
        let member = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        redis::cmd("ZADD").arg(QUEUE_KEY).arg(due_at_ms).arg(member).query_async::<()>(&mut conn).await?;
        Ok(())
    }

    pub async fn claim_due(&self, batch_size: usize, claim_ttl_ms: i64, worker_id: &str) -> Result<Vec<ClaimedDelayedEvent>> {
        let now_ms = Utc::now().timestamp_millis();
        let mut conn = self.conn.clone();

        let members: Vec<String> = redis::Script::new(CLAIM_SCRIPT)
            .key(QUEUE_KEY)
            .arg(now_ms)
            .arg(batch_size)
            .arg(worker_id)
            .arg(claim_ttl_ms)
            .arg("delayed:claim:")
            .invoke_async(&mut conn)
            .await?;

        let mut claimed = Vec::with_capacity(members.len());
        for raw_member in members {
            let event: DelayedEvent = serde_json::from_str(&raw_member)?;
            claimed.push(ClaimedDelayedEvent { raw_member, event });
        }
        Ok(claimed)
    }

    /// Confirms successful publish: removes the member and its claim.
    /// Returns `false` if the claim was lost to another worker or expired
    /// in the meantime — the member is left for a later tick.
    pub async fn confirm(&self, claimed: &ClaimedDelayedEvent, worker_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let result: i32 = redis::Script::new(CONFIRM_SCRIPT)
            .key(claim_key(claimed.event.notification_id))
            .key(QUEUE_KEY)
            .arg(worker_id)
            .arg(&claimed.raw_member)
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    /// Rewrites the member with a new due time and incremented retry
    /// count after a publish failure, and releases the claim.
    pub async fn reschedule(&self, claimed: &ClaimedDelayedEvent, new_due_at_ms: i64) -> Result<()> {
        let mut retried = claimed.event.clone();
        retried.poller_retries += 1;
        let new_member = serde_json::to_string(&retried)?;

        let mut conn = self.conn.clone();
        redis::Script::new(RESCHEDULE_SCRIPT)
            .key(claim_key(claimed.event.notification_id))
            .key(QUEUE_KEY)
            .arg(&claimed.raw_member)
            .arg(new_due_at_ms)
            .arg(new_member)
            .invoke_async::<i32>(&mut conn)
            .await?;
        Ok(())
    }
}

/// `backoff = min(5s * 2^retries, 60s)`, per §4.3.
pub fn backoff_ms(retries: u32) -> i64 {
    let capped_exp = retries.min(4); // 5s * 2^4 = 80s already exceeds the 60s cap
    let backoff = 5_000i64.saturating_mul(1i64 << capped_exp);
    backoff.min(60_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps_at_60s() {
        assert_eq!(backoff_ms(0), 5_000);
        assert_eq!(backoff_ms(1), 10_000);
        assert_eq!(backoff_ms(2), 20_000);
        assert_eq!(backoff_ms(3), 40_000);
        assert_eq!(backoff_ms(4), 60_000);
        assert_eq!(backoff_ms(10), 60_000);
    }
}
