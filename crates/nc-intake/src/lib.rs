//! Intake Adapter contract (C12, collaborator): the store-side half of
//! accepting a request. The adapter itself (auth, per-channel fan-out,
//! request validation) lives outside this workspace's scope; this crate
//! is the durable-store boundary it calls through — one transaction per
//! channel that inserts the Notification and its Outbox Entry together.

pub mod postgres;
pub mod repository;

pub use postgres::PostgresIntakeStore;
pub use repository::{IntakeStore, NewNotification};
