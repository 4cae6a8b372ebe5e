use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("provider config error: {0}")]
    Config(String),

    #[error("provider initialization failed: {0}")]
    Initialization(String),
}

pub type Result<T> = std::result::Result<T, PluginError>;
