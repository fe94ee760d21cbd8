//! Backend trait for outbox storage.
//!
//! The outbox keeps three structures in one shared store: four FIFO
//! priority buckets, a delayed set ordered by ready-time, and a FIFO
//! dead-letter bucket. Every trait method maps to a single store primitive,
//! so no operation spans a transaction.

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{MessageRecord, Priority};
use crate::redis::PoolError;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend is temporarily unavailable (e.g., circuit breaker open)
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Redis(e) => StoreError::Redis(e),
            PoolError::CircuitOpen => StoreError::Unavailable("Circuit breaker is open".to_string()),
        }
    }
}

/// Predicate used by [`OutboxStore::remove_ready_matching`].
pub type RecordPredicate<'a> = &'a (dyn Fn(&MessageRecord) -> bool + Send + Sync);

/// Storage for outbox records.
///
/// # Thread Safety
///
/// Implementations are shared between producer tasks and the consumer
/// task, so they must be `Send + Sync`. Producers only push; the single
/// consumer pops.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Backend type identifier
    fn backend_name(&self) -> &'static str;

    /// Append a record to the tail of its priority bucket.
    async fn push_ready(&self, record: &MessageRecord) -> Result<(), StoreError>;

    /// Pop the head of one priority bucket.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Serialization` when the head payload cannot be
    /// decoded; the payload has already been removed from the bucket.
    async fn pop_ready(&self, priority: Priority) -> Result<Option<MessageRecord>, StoreError>;

    async fn ready_len(&self, priority: Priority) -> Result<usize, StoreError>;

    /// Read up to `limit` records from the head of a bucket without removing them.
    async fn peek_ready(&self, priority: Priority, limit: usize) -> Result<Vec<MessageRecord>, StoreError>;

    /// Remove every record in a bucket for which `predicate` holds, leaving
    /// the others in their relative order. Returns the number removed.
    async fn remove_ready_matching(
        &self,
        priority: Priority,
        predicate: RecordPredicate<'_>,
    ) -> Result<usize, StoreError>;

    /// Add a record to the delayed set, due at its `scheduled_for` instant
    /// (immediately if unset).
    async fn push_delayed(&self, record: &MessageRecord) -> Result<(), StoreError>;

    /// Claim the earliest-due delayed record whose instant is at or before `now`.
    async fn pop_due(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Option<MessageRecord>, StoreError>;

    async fn delayed_len(&self) -> Result<usize, StoreError>;

    /// Append a record to the dead-letter bucket.
    async fn push_dead_letter(&self, record: &MessageRecord) -> Result<(), StoreError>;

    /// Pop the oldest dead letter.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Serialization` when the payload cannot be
    /// decoded; it has been moved to the raw dead-letter list.
    async fn pop_dead_letter(&self) -> Result<Option<MessageRecord>, StoreError>;

    /// Read up to `limit` of the oldest dead letters without removing them.
    async fn peek_dead_letters(&self, limit: usize) -> Result<Vec<MessageRecord>, StoreError>;

    async fn dead_letter_len(&self) -> Result<usize, StoreError>;

    /// Payloads kept verbatim because they failed to decode. Backends that
    /// hold typed records never have any.
    async fn raw_dead_letter_len(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}
