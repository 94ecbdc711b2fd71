//! Error types for message bus operations

use thiserror::Error;

/// Errors that can occur in message bus operations
#[derive(Error, Debug)]
pub enum MessageBusError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Subscribe error: {0}")]
    Subscribe(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event error: {0}")]
    Event(#[from] mediavault_types::TypesError),
}

pub type Result<T> = std::result::Result<T, MessageBusError>;
