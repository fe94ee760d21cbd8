//! Operator utilities: stats, stale-edit purge and dead-letter handling.

use futures::future::try_join_all;
use serde::Serialize;

use crate::message::{MessageRecord, Priority};
use crate::metrics::{DepthMetrics, MaintenanceMetrics, ProducerMetrics};
use crate::store::{OutboxStore, StoreError};

/// Point-in-time depth of every outbox structure. Not transactional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub urgent: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub delayed: usize,
    pub dead_letter: usize,
    /// Payloads parked verbatim after failing to decode
    pub raw_dead_letter: usize,
}

impl QueueStats {
    /// Records waiting in priority buckets
    pub fn ready(&self) -> usize {
        self.urgent + self.high + self.normal + self.low
    }

    fn set(&mut self, priority: Priority, depth: usize) {
        match priority {
            Priority::Urgent => self.urgent = depth,
            Priority::High => self.high = depth,
            Priority::Normal => self.normal = depth,
            Priority::Low => self.low = depth,
        }
    }
}

/// Edits removed per bucket by [`purge_stale_edits`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub urgent: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl PurgeReport {
    pub fn total(&self) -> usize {
        self.urgent + self.high + self.normal + self.low
    }

    fn add(&mut self, priority: Priority, removed: usize) {
        match priority {
            Priority::Urgent => self.urgent += removed,
            Priority::High => self.high += removed,
            Priority::Normal => self.normal += removed,
            Priority::Low => self.low += removed,
        }
    }
}

pub async fn queue_stats(store: &dyn OutboxStore) -> Result<QueueStats, StoreError> {
    let depths = try_join_all(Priority::DISPATCH_ORDER.iter().map(|p| store.ready_len(*p))).await?;
    let (delayed, dead_letter, raw_dead_letter) = futures::try_join!(
        store.delayed_len(),
        store.dead_letter_len(),
        store.raw_dead_letter_len()
    )?;

    let mut stats = QueueStats {
        delayed,
        dead_letter,
        raw_dead_letter,
        ..Default::default()
    };
    for (priority, depth) in Priority::DISPATCH_ORDER.iter().zip(depths) {
        stats.set(*priority, depth);
        DepthMetrics::set_depth(priority.as_str(), depth);
    }
    DepthMetrics::set_depth("delayed", delayed);
    DepthMetrics::set_depth("dead_letter", dead_letter);
    DepthMetrics::set_depth("dead_letter_raw", raw_dead_letter);

    Ok(stats)
}

/// Drop every queued edit. Edits left over from a previous run target
/// messages whose state has moved on.
pub async fn purge_stale_edits(store: &dyn OutboxStore) -> Result<PurgeReport, StoreError> {
    let mut report = PurgeReport::default();
    for priority in Priority::DISPATCH_ORDER {
        let removed = store
            .remove_ready_matching(priority, &|record: &MessageRecord| record.is_edit())
            .await?;
        report.add(priority, removed);
    }

    MaintenanceMetrics::record_purged(report.total());
    if report.total() > 0 {
        tracing::info!(
            urgent = report.urgent,
            high = report.high,
            normal = report.normal,
            low = report.low,
            "Purged stale edits"
        );
    }
    Ok(report)
}

pub async fn dead_letters(store: &dyn OutboxStore, limit: usize) -> Result<Vec<MessageRecord>, StoreError> {
    store.peek_dead_letters(limit).await
}

/// Move up to `limit` of the oldest dead letters back to their buckets with
/// a fresh retry budget.
///
/// Every popped entry counts toward `limit`. An undecodable entry is left to
/// the store's raw parking and skipped; it is not counted as requeued.
pub async fn requeue_dead_letters(store: &dyn OutboxStore, limit: usize) -> Result<usize, StoreError> {
    let mut requeued = 0;
    for _ in 0..limit {
        let mut record = match store.pop_dead_letter().await {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(StoreError::Serialization(e)) => {
                tracing::warn!(error = %e, "Skipping undecodable dead letter");
                continue;
            }
            Err(e) => return Err(e),
        };

        record.reset_for_requeue();
        if let Err(e) = store.push_ready(&record).await {
            // Back to the dead letters rather than dropped
            store.push_dead_letter(&record).await?;
            return Err(e);
        }
        ProducerMetrics::record_enqueued(record.priority.as_str());
        tracing::info!(record_id = %record.id(), priority = %record.priority, "Dead letter requeued");
        requeued += 1;
    }
    Ok(requeued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChatId, MessageCategory, RemoteMessageId};
    use crate::store::{MemoryOutboxStore, RecordPredicate};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Dead-letter list whose head entry fails to decode once.
    #[derive(Default)]
    struct CorruptHead {
        inner: MemoryOutboxStore,
        corrupt: AtomicBool,
        parked_raw: AtomicUsize,
    }

    #[async_trait]
    impl OutboxStore for CorruptHead {
        fn backend_name(&self) -> &'static str {
            "corrupt-head"
        }

        async fn push_ready(&self, record: &MessageRecord) -> Result<(), StoreError> {
            self.inner.push_ready(record).await
        }

        async fn pop_ready(&self, priority: Priority) -> Result<Option<MessageRecord>, StoreError> {
            self.inner.pop_ready(priority).await
        }

        async fn ready_len(&self, priority: Priority) -> Result<usize, StoreError> {
            self.inner.ready_len(priority).await
        }

        async fn peek_ready(&self, priority: Priority, limit: usize) -> Result<Vec<MessageRecord>, StoreError> {
            self.inner.peek_ready(priority, limit).await
        }

        async fn remove_ready_matching(
            &self,
            priority: Priority,
            predicate: RecordPredicate<'_>,
        ) -> Result<usize, StoreError> {
            self.inner.remove_ready_matching(priority, predicate).await
        }

        async fn push_delayed(&self, record: &MessageRecord) -> Result<(), StoreError> {
            self.inner.push_delayed(record).await
        }

        async fn pop_due(
            &self,
            now: chrono::DateTime<chrono::Utc>,
        ) -> Result<Option<MessageRecord>, StoreError> {
            self.inner.pop_due(now).await
        }

        async fn delayed_len(&self) -> Result<usize, StoreError> {
            self.inner.delayed_len().await
        }

        async fn push_dead_letter(&self, record: &MessageRecord) -> Result<(), StoreError> {
            self.inner.push_dead_letter(record).await
        }

        async fn pop_dead_letter(&self) -> Result<Option<MessageRecord>, StoreError> {
            if self.corrupt.swap(false, Ordering::SeqCst) {
                self.parked_raw.fetch_add(1, Ordering::SeqCst);
                let err = serde_json::from_str::<MessageRecord>("{truncated").unwrap_err();
                return Err(StoreError::Serialization(err));
            }
            self.inner.pop_dead_letter().await
        }

        async fn peek_dead_letters(&self, limit: usize) -> Result<Vec<MessageRecord>, StoreError> {
            self.inner.peek_dead_letters(limit).await
        }

        async fn dead_letter_len(&self) -> Result<usize, StoreError> {
            self.inner.dead_letter_len().await
        }

        async fn raw_dead_letter_len(&self) -> Result<usize, StoreError> {
            Ok(self.parked_raw.load(Ordering::SeqCst))
        }
    }

    fn record(body: &str, priority: Priority) -> MessageRecord {
        MessageRecord::builder(MessageCategory::StatusUpdate, ChatId(1), body)
            .priority(priority)
            .build()
            .unwrap()
    }

    fn edit(body: &str, priority: Priority) -> MessageRecord {
        MessageRecord::builder(MessageCategory::StatusUpdate, ChatId(1), body)
            .priority(priority)
            .edit(RemoteMessageId(9))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_stats_counts_every_structure() {
        let store = MemoryOutboxStore::new();
        store.push_ready(&record("a", Priority::Urgent)).await.unwrap();
        store.push_ready(&record("b", Priority::Low)).await.unwrap();
        store.push_ready(&record("c", Priority::Low)).await.unwrap();
        store.push_delayed(&record("d", Priority::Normal)).await.unwrap();
        store.push_dead_letter(&record("e", Priority::High)).await.unwrap();

        let stats = queue_stats(&store).await.unwrap();

        assert_eq!(
            stats,
            QueueStats {
                urgent: 1,
                high: 0,
                normal: 0,
                low: 2,
                delayed: 1,
                dead_letter: 1,
                raw_dead_letter: 0,
            }
        );
        assert_eq!(stats.ready(), 3);
    }

    #[tokio::test]
    async fn test_purge_reports_per_bucket() {
        let store = MemoryOutboxStore::new();
        store.push_ready(&edit("x", Priority::Urgent)).await.unwrap();
        store.push_ready(&record("keep", Priority::Normal)).await.unwrap();
        store.push_ready(&edit("y", Priority::Normal)).await.unwrap();
        store.push_ready(&edit("z", Priority::Normal)).await.unwrap();

        let report = purge_stale_edits(&store).await.unwrap();

        assert_eq!(report.urgent, 1);
        assert_eq!(report.normal, 2);
        assert_eq!(report.total(), 3);
        assert_eq!(store.ready_len(Priority::Normal).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_requeue_respects_limit() {
        let store = MemoryOutboxStore::new();
        for body in ["one", "two", "three"] {
            store.push_dead_letter(&record(body, Priority::High)).await.unwrap();
        }

        assert_eq!(requeue_dead_letters(&store, 2).await.unwrap(), 2);
        assert_eq!(store.dead_letter_len().await.unwrap(), 1);
        assert_eq!(store.ready_len(Priority::High).await.unwrap(), 2);
        assert_eq!(dead_letters(&store, 10).await.unwrap()[0].body, "three");
    }

    #[tokio::test]
    async fn test_requeue_skips_undecodable_entry() {
        let store = CorruptHead::default();
        store.corrupt.store(true, Ordering::SeqCst);
        for body in ["one", "two"] {
            store.push_dead_letter(&record(body, Priority::High)).await.unwrap();
        }

        assert_eq!(requeue_dead_letters(&store, 10).await.unwrap(), 2);

        assert_eq!(store.dead_letter_len().await.unwrap(), 0);
        assert_eq!(store.ready_len(Priority::High).await.unwrap(), 2);
        assert_eq!(queue_stats(&store).await.unwrap().raw_dead_letter, 1);
    }

    #[tokio::test]
    async fn test_requeue_counts_undecodable_entry_against_limit() {
        let store = CorruptHead::default();
        store.corrupt.store(true, Ordering::SeqCst);
        store.push_dead_letter(&record("one", Priority::High)).await.unwrap();

        assert_eq!(requeue_dead_letters(&store, 1).await.unwrap(), 0);
        assert_eq!(store.dead_letter_len().await.unwrap(), 1);
    }
}
