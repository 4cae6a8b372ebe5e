//! Coordination Store (C3) primitives.
//!
//! Everything here runs against Redis and guarantees correctness through
//! atomic scripts rather than read-then-write round trips: leader
//! election (optional, an efficiency knob for singleton pollers), the
//! Idempotency Registry (C7), the token-bucket Rate Limiter (C6), and the
//! Delayed Queue claim/confirm/reschedule protocol used by `nc-delayed`.

mod delayed_claim;
mod error;
mod idempotency;
mod leader;
mod rate_limit;

pub use delayed_claim::{backoff_ms, ClaimedDelayedEvent, DelayedQueue};
pub use error::{CoordinationError, Result};
pub use idempotency::IdempotencyRegistry;
pub use leader::{LeaderElection, LeaderElectionConfig, LeadershipStatus, StandbyGuard};
pub use rate_limit::RateLimiter;

use redis::aio::ConnectionManager;

/// Opens a connection manager shared by the idempotency registry, rate
/// limiter, and delayed queue within one process.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(redis_url).map_err(|e| CoordinationError::Connection(e.to_string()))?;
    Ok(ConnectionManager::new(client).await?)
}
