use thiserror::Error;

use crate::chat::ChatError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Chat API error: {0}")]
    Chat(#[from] ChatError),
}

pub type Result<T> = std::result::Result<T, OutboxError>;
