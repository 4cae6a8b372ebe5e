use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("kafka error: {0}")]
    Kafka(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("bus is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, BusError>;
