//! Status Consumer (C9): applies terminal outcomes from the
//! `notification_status` topic to the durable store and dispatches the
//! client's webhook, reading `webhook_url` back from the row its own
//! update just touched rather than trusting a copy on the event.

pub mod consumer;
pub mod postgres;
pub mod repository;
pub mod webhook;

pub use consumer::{StatusConsumer, StatusConsumerConfig};
pub use postgres::PostgresStatusRepository;
pub use repository::StatusRepository;
pub use webhook::{WebhookDispatcher, WebhookDispatcherConfig};
