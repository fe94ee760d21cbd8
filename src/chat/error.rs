use std::time::Duration;

use thiserror::Error;

/// Outcome of a failed chat-API call.
///
/// The set is closed: the consumer classifies each variant into exactly one
/// handling path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Flood control; retry no earlier than `retry_after`
    #[error("Rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    /// The edit would not change the message
    #[error("Message is not modified")]
    NotModified,

    #[error("Message not found")]
    MessageNotFound,

    /// Permanent refusal (bad request, forbidden chat, malformed markup)
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl ChatError {
    /// Errors worth retrying without spending the retry budget.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::Network(_) | ChatError::Timeout)
    }

    /// Edit outcomes that mean the target already holds the intended state.
    pub fn is_idempotent_edit(&self) -> bool {
        matches!(self, ChatError::NotModified | ChatError::MessageNotFound)
    }
}
