//! Rate Limiter (C6).
//!
//! A token bucket per channel, evaluated atomically inside a single Lua
//! script so concurrent processes never read a stale token count.
//! Server time (`TIME`) is used for the refill calculation rather than a
//! client-supplied timestamp, so clock skew between worker hosts cannot
//! starve or over-admit a channel.

use redis::aio::ConnectionManager;

use nc_common::{RateLimitConfig, RateLimitDecision};

use crate::error::Result;

const CONSUME_SCRIPT: &str = r#"
    local tokens_key = KEYS[1]
    local refill_key = KEYS[2]
    local max_tokens = tonumber(ARGV[1])
    local refill_rate = tonumber(ARGV[2])

    local time = redis.call("TIME")
    local now_ms = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)

    local tokens = tonumber(redis.call("GET", tokens_key))
    if tokens == nil then tokens = max_tokens end
    local last_refill = tonumber(redis.call("GET", refill_key))
    if last_refill == nil then last_refill = now_ms end

    local elapsed_secs = (now_ms - last_refill) / 1000.0
    local new_tokens = math.min(max_tokens, tokens + elapsed_secs * refill_rate)

    if new_tokens >= 1 then
        redis.call("SET", tokens_key, new_tokens - 1)
        redis.call("SET", refill_key, now_ms)
        return {1, math.floor(new_tokens - 1), 0}
    else
        local retry_after_ms = math.floor((1 - new_tokens) * 1000.0 / refill_rate)
        return {0, 0, retry_after_ms}
    end
"#;

pub struct RateLimiter {
    conn: ConnectionManager,
}

impl RateLimiter {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn consume(&self, channel: &str, config: RateLimitConfig) -> Result<RateLimitDecision> {
        let tokens_key = format!("ratelimit:tokens:{channel}");
        let refill_key = format!("ratelimit:last_refill:{channel}");

        let mut conn = self.conn.clone();
        let (allowed, remaining, retry_after_ms): (i64, i64, i64) = redis::Script::new(CONSUME_SCRIPT)
            .key(tokens_key)
            .key(refill_key)
            .arg(config.max_tokens)
            .arg(config.refill_per_sec)
            .invoke_async(&mut conn)
            .await?;

        Ok(RateLimitDecision {
            allowed: allowed == 1,
            remaining,
            retry_after_ms: if allowed == 1 { None } else { Some(retry_after_ms as u64) },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rate_limit_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_tokens, 100.0);
        assert_eq!(config.refill_per_sec, 10.0);
    }
}
