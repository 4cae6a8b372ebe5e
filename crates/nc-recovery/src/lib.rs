//! Recovery Cron (C10): scans the durable store for notifications stuck
//! in `processing` or orphaned in `pending`, cross-checks the coordination
//! store's idempotency record, reconciles ghosts and exhausted retries,
//! and raises alerts for everything it cannot resolve on its own.

pub mod cron;
pub mod postgres;
pub mod repository;

pub use cron::{RecoveryCron, RecoveryCronConfig};
pub use postgres::PostgresRecoveryRepository;
pub use repository::RecoveryRepository;
