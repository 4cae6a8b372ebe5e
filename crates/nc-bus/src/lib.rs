//! Message Bus (C2): a topic-partitioned log with at-least-once delivery,
//! consumer groups, and per-key partitioning.
//!
//! The production backend is Kafka (`kafka` module), configured for
//! idempotent, fully-acknowledged production the way a transactional
//! outbox needs: `enable.idempotence=true`, `acks=all`, a bounded
//! in-flight-requests count so ordering per partition holds. The
//! `memory` module is an in-process stand-in used by unit tests.

pub mod error;
pub mod kafka;
pub mod memory;

pub use error::{BusError, Result};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A message read back off a topic, with enough to ack/nack it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumedMessage {
    pub topic: String,
    pub key: String,
    pub payload: serde_json::Value,
    /// Backend-specific ack token (Kafka partition+offset, encoded).
    pub ack_token: String,
}

/// One topic publish.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: String,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait BusProducer: Send + Sync {
    /// Publishes a single message, partitioned by `key`.
    async fn publish(&self, message: OutboundMessage) -> Result<()>;

    /// Publishes a batch to possibly-different topics in one round of
    /// sends. Used by the Outbox Poller, which groups claimed rows by
    /// topic and publishes each group together (§4.2 step 3).
    async fn publish_batch(&self, messages: Vec<OutboundMessage>) -> Result<()> {
        for message in messages {
            self.publish(message).await?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait BusConsumer: Send + Sync {
    /// The consumer group this instance joined, e.g. `channel-email`.
    fn group_id(&self) -> &str;

    async fn poll(&self, max_messages: usize) -> Result<Vec<ConsumedMessage>>;

    async fn ack(&self, message: &ConsumedMessage) -> Result<()>;

    fn is_healthy(&self) -> bool {
        true
    }
}
