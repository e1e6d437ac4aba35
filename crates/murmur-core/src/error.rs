// Murmur Error Types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MurmurError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Sidecar error: {0}")]
    Sidecar(String),

    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

impl From<String> for MurmurError {
    fn from(err: String) -> Self {
        MurmurError::Config(err)
    }
}

pub type Result<T> = std::result::Result<T, MurmurError>;
