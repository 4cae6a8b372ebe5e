//! Error types for the coordination store layer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error("redis connection error: {0}")]
    Connection(String),

    #[error("redis operation error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("lock acquisition failed: {0}")]
    LockFailed(String),

    #[error("leader election not started")]
    NotStarted,

    #[error("already running")]
    AlreadyRunning,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoordinationError>;
