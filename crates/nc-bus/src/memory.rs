//! In-process bus used by unit tests that want real `BusProducer`/
//! `BusConsumer` wiring without a Kafka broker.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::{BusConsumer, BusProducer, ConsumedMessage, OutboundMessage};

#[derive(Default)]
struct Topics {
    queues: std::collections::HashMap<String, VecDeque<ConsumedMessage>>,
}

#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Topics>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn producer(&self) -> MemoryBusProducer {
        MemoryBusProducer { inner: self.inner.clone() }
    }

    pub fn consumer(&self, group_id: &str, topic: &str) -> MemoryBusConsumer {
        MemoryBusConsumer { inner: self.inner.clone(), group_id: group_id.to_string(), topic: topic.to_string() }
    }
}

#[derive(Clone)]
pub struct MemoryBusProducer {
    inner: Arc<Mutex<Topics>>,
}

#[async_trait]
impl BusProducer for MemoryBusProducer {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        let mut guard = self.inner.lock();
        let ack_token = format!("{}:{}", message.topic, message.key);
        guard.queues.entry(message.topic.clone()).or_default().push_back(ConsumedMessage {
            topic: message.topic,
            key: message.key,
            payload: message.payload,
            ack_token,
        });
        Ok(())
    }
}

pub struct MemoryBusConsumer {
    inner: Arc<Mutex<Topics>>,
    group_id: String,
    topic: String,
}

#[async_trait]
impl BusConsumer for MemoryBusConsumer {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    async fn poll(&self, max_messages: usize) -> Result<Vec<ConsumedMessage>> {
        let mut guard = self.inner.lock();
        let queue = guard.queues.entry(self.topic.clone()).or_default();
        let mut out = Vec::new();
        while out.len() < max_messages {
            match queue.pop_front() {
                Some(m) => out.push(m),
                None => break,
            }
        }
        Ok(out)
    }

    async fn ack(&self, _message: &ConsumedMessage) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_poll_roundtrips() {
        let bus = MemoryBus::new();
        let producer = bus.producer();
        let consumer = bus.consumer("channel-email", "email_notification");

        producer
            .publish(OutboundMessage {
                topic: "email_notification".to_string(),
                key: "n-1".to_string(),
                payload: serde_json::json!({"hello": "world"}),
            })
            .await
            .unwrap();

        let messages = consumer.poll(10).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key, "n-1");
        consumer.ack(&messages[0]).await.unwrap();
    }

    #[tokio::test]
    async fn poll_on_empty_topic_returns_empty() {
        let bus = MemoryBus::new();
        let consumer = bus.consumer("channel-sms", "sms_notification");
        assert!(consumer.poll(10).await.unwrap().is_empty());
    }
}
