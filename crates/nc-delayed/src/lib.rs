//! Delayed Queue + Poller (C5): fires notifications whose `scheduled_at`
//! has arrived, and retries the Channel Processor's computed backoff for
//! retryable provider failures (§4.3, §4.6).

pub mod bridge;
pub mod poller;

pub use bridge::{DelayedBridge, DelayedBridgeConfig};
pub use poller::{DelayedPoller, DelayedPollerConfig};
