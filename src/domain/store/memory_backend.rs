//! In-memory outbox store.
//!
//! Same semantics as the Redis store without durability: records are lost
//! on restart. Used for tests, local runs, and as the fallback backend.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::message::{MessageRecord, Priority};

use super::backend::{OutboxStore, RecordPredicate, StoreError};

pub struct MemoryOutboxStore {
    buckets: DashMap<Priority, VecDeque<MessageRecord>>,
    /// Keyed by (due instant, insertion sequence) so equal instants stay FIFO
    delayed: Mutex<BTreeMap<(DateTime<Utc>, u64), MessageRecord>>,
    dead_letters: Mutex<VecDeque<MessageRecord>>,
    sequence: AtomicU64,
}

impl MemoryOutboxStore {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            delayed: Mutex::new(BTreeMap::new()),
            dead_letters: Mutex::new(VecDeque::new()),
            sequence: AtomicU64::new(0),
        }
    }
}

impl Default for MemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboxStore for MemoryOutboxStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn push_ready(&self, record: &MessageRecord) -> Result<(), StoreError> {
        self.buckets
            .entry(record.priority)
            .or_default()
            .push_back(record.clone());
        Ok(())
    }

    async fn pop_ready(&self, priority: Priority) -> Result<Option<MessageRecord>, StoreError> {
        Ok(self
            .buckets
            .get_mut(&priority)
            .and_then(|mut bucket| bucket.pop_front()))
    }

    async fn ready_len(&self, priority: Priority) -> Result<usize, StoreError> {
        Ok(self.buckets.get(&priority).map(|b| b.len()).unwrap_or(0))
    }

    async fn peek_ready(&self, priority: Priority, limit: usize) -> Result<Vec<MessageRecord>, StoreError> {
        Ok(self
            .buckets
            .get(&priority)
            .map(|b| b.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn remove_ready_matching(
        &self,
        priority: Priority,
        predicate: RecordPredicate<'_>,
    ) -> Result<usize, StoreError> {
        let Some(mut bucket) = self.buckets.get_mut(&priority) else {
            return Ok(0);
        };
        let before = bucket.len();
        bucket.retain(|record| !predicate(record));
        Ok(before - bucket.len())
    }

    async fn push_delayed(&self, record: &MessageRecord) -> Result<(), StoreError> {
        let due = record.scheduled_for().unwrap_or_else(Utc::now);
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.delayed.lock().await.insert((due, seq), record.clone());
        Ok(())
    }

    async fn pop_due(&self, now: DateTime<Utc>) -> Result<Option<MessageRecord>, StoreError> {
        let mut delayed = self.delayed.lock().await;
        match delayed.first_key_value() {
            Some(((due, _), _)) if *due <= now => Ok(delayed.pop_first().map(|(_, record)| record)),
            _ => Ok(None),
        }
    }

    async fn delayed_len(&self) -> Result<usize, StoreError> {
        Ok(self.delayed.lock().await.len())
    }

    async fn push_dead_letter(&self, record: &MessageRecord) -> Result<(), StoreError> {
        self.dead_letters.lock().await.push_back(record.clone());
        Ok(())
    }

    async fn pop_dead_letter(&self) -> Result<Option<MessageRecord>, StoreError> {
        Ok(self.dead_letters.lock().await.pop_front())
    }

    async fn peek_dead_letters(&self, limit: usize) -> Result<Vec<MessageRecord>, StoreError> {
        Ok(self.dead_letters.lock().await.iter().take(limit).cloned().collect())
    }

    async fn dead_letter_len(&self) -> Result<usize, StoreError> {
        Ok(self.dead_letters.lock().await.len())
    }
}
