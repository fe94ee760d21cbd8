//! The single consumer task draining the outbox.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::chat::ChatApi;
use crate::config::QueueSettings;
use crate::message::{Priority, RecordId};
use crate::store::{OutboxStore, StoreError};

use super::dispatch::{DispatchOutcome, Dispatcher};
use super::retry::RetryPolicy;

/// Where a dispatched record was popped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSource {
    Delayed,
    Bucket(Priority),
}

/// Result of one consumer iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Dispatched {
        record_id: RecordId,
        source: TickSource,
        outcome: DispatchOutcome,
    },
    Idle,
}

/// Consumer pacing.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Sleep when nothing is ready
    pub idle_poll_interval: Duration,
    /// Pause after each successful dispatch, keeping throughput under ~30/s
    pub dispatch_interval: Duration,
    /// Sleep after a store error
    pub error_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self::from(&QueueSettings::default())
    }
}

impl From<&QueueSettings> for ConsumerConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            idle_poll_interval: settings.idle_poll_interval(),
            dispatch_interval: settings.dispatch_interval(),
            error_backoff: settings.error_backoff(),
        }
    }
}

pub struct Consumer {
    store: Arc<dyn OutboxStore>,
    dispatcher: Dispatcher,
    config: ConsumerConfig,
}

impl Consumer {
    pub fn new(store: Arc<dyn OutboxStore>, chat: Arc<dyn ChatApi>, settings: &QueueSettings) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&store), chat, RetryPolicy::from_settings(settings));
        Self {
            store,
            dispatcher,
            config: ConsumerConfig::from(settings),
        }
    }

    pub fn with_config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn tick(&self) -> Result<TickOutcome, StoreError> {
        self.tick_at(Utc::now()).await
    }

    /// One iteration: a due delayed record first, then the head of the most
    /// urgent non-empty bucket.
    ///
    /// A record held back by a failed store write is written first; nothing
    /// new is popped until that succeeds.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickOutcome, StoreError> {
        self.dispatcher.settle_unsettled().await?;

        if let Some(mut record) = self.store.pop_due(now).await? {
            record.clear_schedule();
            let record_id = record.id();
            let outcome = self.dispatcher.dispatch(record, now).await?;
            return Ok(TickOutcome::Dispatched {
                record_id,
                source: TickSource::Delayed,
                outcome,
            });
        }

        for priority in Priority::DISPATCH_ORDER {
            if let Some(record) = self.store.pop_ready(priority).await? {
                let record_id = record.id();
                let outcome = self.dispatcher.dispatch(record, now).await?;
                return Ok(TickOutcome::Dispatched {
                    record_id,
                    source: TickSource::Bucket(priority),
                    outcome,
                });
            }
        }

        Ok(TickOutcome::Idle)
    }

    /// Run until a shutdown signal arrives. Never exits on error.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(backend = self.store.backend_name(), "Outbox consumer started");

        loop {
            let result = self.tick().await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "Outbox consumer iteration failed");
            }
            let pause = self.pause_after(&result);

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        if let Err(e) = self.dispatcher.settle_unsettled().await {
            tracing::error!(error = %e, "Consumer stopped while holding a record the store did not accept");
        }
        tracing::info!("Outbox consumer stopped");
    }

    /// Only a call the chat API accepted counts against the send rate.
    fn pause_after(&self, result: &Result<TickOutcome, StoreError>) -> Duration {
        match result {
            Ok(TickOutcome::Dispatched { outcome, .. }) if outcome.is_success() => self.config.dispatch_interval,
            Ok(TickOutcome::Dispatched { .. }) => Duration::ZERO,
            Ok(TickOutcome::Idle) => self.config.idle_poll_interval,
            Err(_) => self.config.error_backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatError, EditRequest, SendRequest};
    use crate::message::{ChatId, MessageCategory, MessageRecord, RemoteMessageId};
    use crate::store::{MemoryOutboxStore, RecordPredicate};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct AlwaysOk;

    struct AlwaysRejected;

    #[async_trait]
    impl ChatApi for AlwaysRejected {
        async fn send(&self, _request: SendRequest) -> Result<RemoteMessageId, ChatError> {
            Err(ChatError::Rejected("chat not found".into()))
        }

        async fn edit(&self, _request: EditRequest) -> Result<(), ChatError> {
            Err(ChatError::Rejected("chat not found".into()))
        }

        async fn delete(&self, _chat: ChatId, _message_id: RemoteMessageId) -> Result<(), ChatError> {
            Ok(())
        }
    }

    /// Memory store whose delayed and dead-letter writes can be switched off.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryOutboxStore,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("write refused".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl OutboxStore for FlakyStore {
        fn backend_name(&self) -> &'static str {
            "flaky"
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
            self.check()?;
            self.inner.push_delayed(record).await
        }

        async fn pop_due(&self, now: DateTime<Utc>) -> Result<Option<MessageRecord>, StoreError> {
            self.inner.pop_due(now).await
        }

        async fn delayed_len(&self) -> Result<usize, StoreError> {
            self.inner.delayed_len().await
        }

        async fn push_dead_letter(&self, record: &MessageRecord) -> Result<(), StoreError> {
            self.check()?;
            self.inner.push_dead_letter(record).await
        }

        async fn pop_dead_letter(&self) -> Result<Option<MessageRecord>, StoreError> {
            self.inner.pop_dead_letter().await
        }

        async fn peek_dead_letters(&self, limit: usize) -> Result<Vec<MessageRecord>, StoreError> {
            self.inner.peek_dead_letters(limit).await
        }

        async fn dead_letter_len(&self) -> Result<usize, StoreError> {
            self.inner.dead_letter_len().await
        }
    }

    #[async_trait]
    impl ChatApi for AlwaysOk {
        async fn send(&self, _request: SendRequest) -> Result<RemoteMessageId, ChatError> {
            Ok(RemoteMessageId(1))
        }

        async fn edit(&self, _request: EditRequest) -> Result<(), ChatError> {
            Ok(())
        }

        async fn delete(&self, _chat: ChatId, _message_id: RemoteMessageId) -> Result<(), ChatError> {
            Ok(())
        }
    }

    fn consumer(store: Arc<MemoryOutboxStore>) -> Consumer {
        Consumer::new(store, Arc::new(AlwaysOk), &QueueSettings::default())
    }

    fn record(priority: Priority) -> MessageRecord {
        MessageRecord::builder(MessageCategory::Notification, ChatId(1), priority.as_str())
            .priority(priority)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_idle_when_empty() {
        let consumer = consumer(Arc::new(MemoryOutboxStore::new()));
        assert_eq!(consumer.tick().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn test_bucket_scan_order() {
        let store = Arc::new(MemoryOutboxStore::new());
        for priority in [Priority::Low, Priority::Normal, Priority::Urgent, Priority::High] {
            store.push_ready(&record(priority)).await.unwrap();
        }
        let consumer = consumer(store);

        let mut sources = Vec::new();
        while let TickOutcome::Dispatched { source, .. } = consumer.tick().await.unwrap() {
            sources.push(source);
        }

        assert_eq!(
            sources,
            Priority::DISPATCH_ORDER
                .iter()
                .map(|p| TickSource::Bucket(*p))
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_due_delayed_record_goes_first() {
        let store = Arc::new(MemoryOutboxStore::new());
        let now = Utc::now();
        let mut delayed = record(Priority::Low);
        delayed.schedule_for(now - chrono::Duration::seconds(1));
        store.push_delayed(&delayed).await.unwrap();
        store.push_ready(&record(Priority::Urgent)).await.unwrap();

        let outcome = consumer(store).tick_at(now).await.unwrap();

        assert!(matches!(
            outcome,
            TickOutcome::Dispatched { source: TickSource::Delayed, record_id, .. } if record_id == delayed.id()
        ));
    }

    #[tokio::test]
    async fn test_failed_write_back_holds_record_until_store_recovers() {
        let store = Arc::new(FlakyStore::default());
        store.push_ready(&record(Priority::Urgent)).await.unwrap();
        store.push_ready(&record(Priority::Low)).await.unwrap();
        let consumer = Consumer::new(store.clone(), Arc::new(AlwaysRejected), &QueueSettings::default());
        store.fail_writes.store(true, Ordering::SeqCst);

        assert!(consumer.tick().await.is_err());
        assert_eq!(store.ready_len(Priority::Urgent).await.unwrap(), 0);
        assert_eq!(store.delayed_len().await.unwrap(), 0);

        // Still failing: the held record blocks new pops
        assert!(consumer.tick().await.is_err());
        assert_eq!(store.ready_len(Priority::Low).await.unwrap(), 1);

        store.fail_writes.store(false, Ordering::SeqCst);
        let outcome = consumer.tick().await.unwrap();

        assert!(matches!(
            outcome,
            TickOutcome::Dispatched { source: TickSource::Bucket(Priority::Low), .. }
        ));
        assert_eq!(store.delayed_len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_record_survives_dead_letter_write_failure() {
        let store = Arc::new(FlakyStore::default());
        let doomed = MessageRecord::builder(MessageCategory::Error, ChatId(1), "boom")
            .max_retries(0)
            .build()
            .unwrap();
        store.push_ready(&doomed).await.unwrap();
        let consumer = Consumer::new(store.clone(), Arc::new(AlwaysRejected), &QueueSettings::default());
        store.fail_writes.store(true, Ordering::SeqCst);

        assert!(consumer.tick().await.is_err());
        assert_eq!(store.dead_letter_len().await.unwrap(), 0);

        store.fail_writes.store(false, Ordering::SeqCst);
        assert_eq!(consumer.tick().await.unwrap(), TickOutcome::Idle);

        let parked = store.peek_dead_letters(1).await.unwrap();
        assert_eq!(parked[0].id(), doomed.id());
        assert_eq!(parked[0].retry_count(), 1);
    }

    #[test]
    fn test_pause_only_after_accepted_calls() {
        let consumer = consumer(Arc::new(MemoryOutboxStore::new()));
        let config = consumer.config.clone();
        let dispatched = |outcome: DispatchOutcome| -> Result<TickOutcome, StoreError> {
            Ok(TickOutcome::Dispatched {
                record_id: RecordId::new(),
                source: TickSource::Bucket(Priority::Normal),
                outcome,
            })
        };

        assert_eq!(
            consumer.pause_after(&dispatched(DispatchOutcome::Delivered { message_id: None })),
            config.dispatch_interval
        );
        assert_eq!(
            consumer.pause_after(&dispatched(DispatchOutcome::Unchanged)),
            config.dispatch_interval
        );
        assert_eq!(
            consumer.pause_after(&dispatched(DispatchOutcome::RateLimited { retry_at: Utc::now() })),
            Duration::ZERO
        );
        assert_eq!(
            consumer.pause_after(&dispatched(DispatchOutcome::DeadLettered { retry_count: 3 })),
            Duration::ZERO
        );
        assert_eq!(consumer.pause_after(&Ok(TickOutcome::Idle)), config.idle_poll_interval);
        assert_eq!(
            consumer.pause_after(&Err(StoreError::Unavailable("down".to_string()))),
            config.error_backoff
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_signal() {
        let consumer = consumer(Arc::new(MemoryOutboxStore::new()));
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(consumer.run(rx));
        tokio::time::sleep(Duration::from_millis(250)).await;
        tx.send(()).unwrap();

        handle.await.unwrap();
    }

    #[test]
    fn test_config_from_settings() {
        let config = ConsumerConfig::default();
        assert_eq!(config.idle_poll_interval, Duration::from_millis(100));
        assert_eq!(config.dispatch_interval, Duration::from_millis(34));
        assert_eq!(config.error_backoff, Duration::from_secs(1));
    }
}
