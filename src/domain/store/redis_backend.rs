//! Redis-backed outbox store.
//!
//! Layout, all under a configurable prefix:
//! - `{prefix}msg_queue:{priority}`: one list per priority, RPUSH tail / LPOP head
//! - `{prefix}delayed_messages`: sorted set scored by due time in epoch millis
//! - `{prefix}dead_letter_queue`: list, oldest at the head
//! - `{prefix}dead_letter_raw`: list of payloads that failed to decode after
//!   being popped, kept verbatim for inspection
//!
//! Payloads are the JSON encoding of [`MessageRecord`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::message::{MessageRecord, Priority};
use crate::redis::{RedisPool, RedisPoolExt};

use super::backend::{OutboxStore, RecordPredicate, StoreError};

pub struct RedisOutboxStore {
    pool: Arc<RedisPool>,
    prefix: String,
}

impl RedisOutboxStore {
    pub fn new(pool: Arc<RedisPool>, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn bucket_key(&self, priority: Priority) -> String {
        format!("{}msg_queue:{}", self.prefix, priority.as_str())
    }

    fn delayed_key(&self) -> String {
        format!("{}delayed_messages", self.prefix)
    }

    fn dead_letter_key(&self) -> String {
        format!("{}dead_letter_queue", self.prefix)
    }

    fn raw_dead_letter_key(&self) -> String {
        format!("{}dead_letter_raw", self.prefix)
    }

    /// Decode a payload that has already left its structure. Undecodable
    /// payloads are parked verbatim in the raw dead-letter list so nothing is
    /// lost and they never cycle back through a decoding pop.
    async fn decode_claimed(&self, payload: &str, source: &str) -> Result<MessageRecord, StoreError> {
        match serde_json::from_str::<MessageRecord>(payload) {
            Ok(record) => Ok(record),
            Err(e) => {
                let raw_key = self.raw_dead_letter_key();
                tracing::error!(
                    key = %source,
                    raw_key = %raw_key,
                    error = %e,
                    "Undecodable outbox payload parked raw"
                );
                self.pool.rpush(&raw_key, payload).await?;
                Err(StoreError::Serialization(e))
            }
        }
    }

    fn decode_all(payloads: Vec<String>, source: &str) -> Vec<MessageRecord> {
        payloads
            .into_iter()
            .filter_map(|payload| match serde_json::from_str(&payload) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(key = %source, error = %e, "Skipping undecodable outbox payload");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl OutboxStore for RedisOutboxStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn push_ready(&self, record: &MessageRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record)?;
        let key = self.bucket_key(record.priority);
        self.pool.rpush(&key, &payload).await?;

        tracing::debug!(record_id = %record.id(), key = %key, "Record pushed to bucket");
        Ok(())
    }

    async fn pop_ready(&self, priority: Priority) -> Result<Option<MessageRecord>, StoreError> {
        let key = self.bucket_key(priority);
        match self.pool.lpop(&key).await? {
            Some(payload) => self.decode_claimed(&payload, &key).await.map(Some),
            None => Ok(None),
        }
    }

    async fn ready_len(&self, priority: Priority) -> Result<usize, StoreError> {
        Ok(self.pool.llen(&self.bucket_key(priority)).await?)
    }

    async fn peek_ready(&self, priority: Priority, limit: usize) -> Result<Vec<MessageRecord>, StoreError> {
        let key = self.bucket_key(priority);
        let payloads = self.pool.lrange_head(&key, limit).await?;
        Ok(Self::decode_all(payloads, &key))
    }

    async fn remove_ready_matching(
        &self,
        priority: Priority,
        predicate: RecordPredicate<'_>,
    ) -> Result<usize, StoreError> {
        // Snapshot then LREM each match, so pushes racing the scan are kept
        let key = self.bucket_key(priority);
        let payloads = self.pool.lrange_all(&key).await?;

        let mut removed = 0;
        for payload in payloads {
            let matches = match serde_json::from_str::<MessageRecord>(&payload) {
                Ok(record) => predicate(&record),
                Err(_) => false,
            };
            if matches && self.pool.lrem_one(&key, &payload).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn push_delayed(&self, record: &MessageRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record)?;
        let due = record.scheduled_for().unwrap_or_else(Utc::now);
        self.pool
            .zadd(&self.delayed_key(), due.timestamp_millis() as f64, &payload)
            .await?;

        tracing::debug!(record_id = %record.id(), due = %due, "Record pushed to delayed set");
        Ok(())
    }

    async fn pop_due(&self, now: DateTime<Utc>) -> Result<Option<MessageRecord>, StoreError> {
        let key = self.delayed_key();
        let Some(payload) = self
            .pool
            .zfirst_by_score(&key, now.timestamp_millis() as f64)
            .await?
        else {
            return Ok(None);
        };

        // Whoever removes the member owns it
        if !self.pool.zrem(&key, &payload).await? {
            return Ok(None);
        }
        self.decode_claimed(&payload, &key).await.map(Some)
    }

    async fn delayed_len(&self) -> Result<usize, StoreError> {
        Ok(self.pool.zcard(&self.delayed_key()).await?)
    }

    async fn push_dead_letter(&self, record: &MessageRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record)?;
        self.pool.rpush(&self.dead_letter_key(), &payload).await?;
        Ok(())
    }

    async fn pop_dead_letter(&self) -> Result<Option<MessageRecord>, StoreError> {
        let key = self.dead_letter_key();
        match self.pool.lpop(&key).await? {
            Some(payload) => self.decode_claimed(&payload, &key).await.map(Some),
            None => Ok(None),
        }
    }

    async fn peek_dead_letters(&self, limit: usize) -> Result<Vec<MessageRecord>, StoreError> {
        let key = self.dead_letter_key();
        let payloads = self.pool.lrange_head(&key, limit).await?;
        Ok(Self::decode_all(payloads, &key))
    }

    async fn dead_letter_len(&self) -> Result<usize, StoreError> {
        Ok(self.pool.llen(&self.dead_letter_key()).await?)
    }

    async fn raw_dead_letter_len(&self) -> Result<usize, StoreError> {
        Ok(self.pool.llen(&self.raw_dead_letter_key()).await?)
    }
}
