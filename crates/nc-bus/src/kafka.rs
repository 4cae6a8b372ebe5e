//! Kafka-backed `BusProducer`/`BusConsumer`.
//!
//! The producer is configured for idempotent, fully-acknowledged writes
//! so the Outbox Poller and Delayed Poller can publish without risking a
//! duplicate on retry: `enable.idempotence=true`, `acks=all`, a bounded
//! `max.in.flight.requests.per.connection` (required by idempotence).
//! Partitioning uses the caller's key, which callers set to the
//! notification id so all events for one notification land on the same
//! partition and are delivered in order.

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord};

use async_trait::async_trait;
use tracing::warn;

use crate::error::{BusError, Result};
use crate::{BusConsumer, BusProducer, ConsumedMessage, OutboundMessage};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct KafkaBusProducer {
    producer: FutureProducer,
}

impl KafkaBusProducer {
    pub fn new(brokers: &str) -> Result<Self> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5")
            .set("message.timeout.ms", "30000")
            .create()
            .map_err(|e| BusError::Kafka(e.to_string()))?;
        Ok(Self { producer })
    }
}

#[async_trait]
impl BusProducer for KafkaBusProducer {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        let payload = serde_json::to_string(&message.payload)?;
        let record = FutureRecord::to(&message.topic).key(&message.key).payload(&payload);

        self.producer
            .send(record, DELIVERY_TIMEOUT)
            .await
            .map_err(|(err, _)| BusError::Kafka(err.to_string()))?;
        Ok(())
    }
}

/// Wraps a `StreamConsumer` joined to a consumer group, one per channel
/// (`channel-<name>`, per the Channel Processor's subscription rule).
pub struct KafkaBusConsumer {
    consumer: StreamConsumer,
    group_id: String,
}

impl KafkaBusConsumer {
    pub fn new(brokers: &str, group_id: &str, topic: &str) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "10000")
            .create()
            .map_err(|e| BusError::Kafka(e.to_string()))?;

        consumer.subscribe(&[topic]).map_err(|e| BusError::Kafka(e.to_string()))?;

        Ok(Self { consumer, group_id: group_id.to_string() })
    }
}

#[async_trait]
impl BusConsumer for KafkaBusConsumer {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    async fn poll(&self, max_messages: usize) -> Result<Vec<ConsumedMessage>> {
        let mut out = Vec::with_capacity(max_messages);
        for _ in 0..max_messages {
            let recv = tokio::time::timeout(Duration::from_millis(500), self.consumer.recv()).await;
            let borrowed = match recv {
                Ok(Ok(m)) => m,
                Ok(Err(e)) => {
                    warn!(error = %e, "kafka consumer error");
                    break;
                }
                Err(_) => break, // poll window elapsed, no more messages right now
            };

            let payload = match borrowed.payload() {
                Some(bytes) => serde_json::from_slice(bytes)?,
                None => continue,
            };
            let key = borrowed.key().map(|k| String::from_utf8_lossy(k).to_string()).unwrap_or_default();
            let ack_token = format!("{}:{}:{}", borrowed.topic(), borrowed.partition(), borrowed.offset());

            out.push(ConsumedMessage { topic: borrowed.topic().to_string(), key, payload, ack_token });
        }
        Ok(out)
    }

    async fn ack(&self, message: &ConsumedMessage) -> Result<()> {
        let mut parts = message.ack_token.rsplitn(3, ':');
        let offset: i64 = parts.next().and_then(|s| s.parse().ok()).ok_or_else(|| BusError::Kafka("bad ack token".into()))?;
        let partition: i32 = parts.next().and_then(|s| s.parse().ok()).ok_or_else(|| BusError::Kafka("bad ack token".into()))?;
        let topic = parts.next().ok_or_else(|| BusError::Kafka("bad ack token".into()))?;

        let mut tpl = rdkafka::TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, rdkafka::Offset::Offset(offset + 1))
            .map_err(|e| BusError::Kafka(e.to_string()))?;
        self.consumer.commit(&tpl, CommitMode::Async).map_err(|e| BusError::Kafka(e.to_string()))?;
        Ok(())
    }
}
