//! Channel Processor (C8): consumes one channel's bus topic, enforces
//! idempotency and the per-channel rate limit, invokes the bound
//! provider, and routes retries through the delayed queue so backoff is
//! honoured across worker restarts.

pub mod postgres;
pub mod processor;
pub mod repository;

pub use postgres::PostgresNotificationRepository;
pub use processor::{ChannelProcessor, ChannelProcessorConfig};
pub use repository::NotificationRepository;
