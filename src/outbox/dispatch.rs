//! Translating a record into one chat-API call and settling its outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::chat::{ChatApi, ChatError, EditRequest, SendRequest};
use crate::message::{ChatId, MessageRecord, RemoteMessageId};
use crate::metrics::DispatchMetrics;
use crate::store::{OutboxStore, StoreError};

use super::retry::RetryPolicy;

/// How a dispatched record was settled.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The chat API accepted the call. `message_id` is set for new messages.
    Delivered { message_id: Option<RemoteMessageId> },
    /// Edit target was already in the intended state or is gone
    Unchanged,
    /// Flood control; rescheduled at the server-provided instant
    RateLimited { retry_at: DateTime<Utc> },
    /// Network failure; rescheduled without spending the retry budget
    TransientRetry { retry_at: DateTime<Utc> },
    /// Bounded failure with budget left
    Retrying { retry_count: u32, retry_at: DateTime<Utc> },
    /// Retry budget exhausted
    DeadLettered { retry_count: u32 },
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Delivered { .. } => "delivered",
            DispatchOutcome::Unchanged => "unchanged",
            DispatchOutcome::RateLimited { .. } => "rate_limited",
            DispatchOutcome::TransientRetry { .. } => "transient",
            DispatchOutcome::Retrying { .. } => "retrying",
            DispatchOutcome::DeadLettered { .. } => "dead_lettered",
        }
    }

    /// Whether the chat call went through, as opposed to being rescheduled
    /// or dead-lettered.
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered { .. } | DispatchOutcome::Unchanged)
    }
}

/// Store structure a settled record is written back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parking {
    Delayed,
    DeadLetter,
}

/// Performs the chat call for a popped record and applies the retry rules.
pub struct Dispatcher {
    store: Arc<dyn OutboxStore>,
    chat: Arc<dyn ChatApi>,
    retry: RetryPolicy,
    /// Record whose write-back failed; it has left the store and lives only here
    unsettled: Mutex<Option<(MessageRecord, Parking)>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn OutboxStore>, chat: Arc<dyn ChatApi>, retry: RetryPolicy) -> Self {
        Self {
            store,
            chat,
            retry,
            unsettled: Mutex::new(None),
        }
    }

    /// Retry the write-back of a record held after a store failure.
    ///
    /// The record stays held until a write succeeds, so the caller must not
    /// pop new work while this returns an error.
    pub async fn settle_unsettled(&self) -> Result<(), StoreError> {
        let mut slot = self.unsettled.lock().await;
        let Some((record, parking)) = slot.take() else {
            return Ok(());
        };

        match self.write_back(&record, parking).await {
            Ok(()) => {
                tracing::info!(record_id = %record.id(), "Held record written back to store");
                Ok(())
            }
            Err(e) => {
                *slot = Some((record, parking));
                Err(e)
            }
        }
    }

    async fn write_back(&self, record: &MessageRecord, parking: Parking) -> Result<(), StoreError> {
        match parking {
            Parking::Delayed => self.store.push_delayed(record).await,
            Parking::DeadLetter => self.store.push_dead_letter(record).await,
        }
    }

    /// Write a settled record back; on failure keep it for [`Dispatcher::settle_unsettled`].
    async fn park(&self, record: MessageRecord, parking: Parking) -> Result<(), StoreError> {
        if let Err(e) = self.write_back(&record, parking).await {
            tracing::warn!(
                record_id = %record.id(),
                error = %e,
                "Store write failed, holding record until the store recovers"
            );
            *self.unsettled.lock().await = Some((record, parking));
            return Err(e);
        }
        Ok(())
    }

    /// Dispatch a record that has already left the store.
    ///
    /// Only store failures while rescheduling or dead-lettering surface as
    /// errors; every chat outcome is absorbed. A record whose write-back
    /// fails is held by the dispatcher, never dropped.
    #[tracing::instrument(
        skip(self, record, now),
        fields(
            record_id = %record.id(),
            chat_id = %record.chat,
            priority = %record.priority,
            retry_count = record.retry_count(),
        )
    )]
    pub async fn dispatch(
        &self,
        mut record: MessageRecord,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, StoreError> {
        let started = Instant::now();
        let result = self.call(&record).await;
        DispatchMetrics::record_latency(started.elapsed().as_secs_f64());

        let outcome = match result {
            Ok(message_id) => {
                tracing::debug!(category = record.category.as_str(), "Record delivered");
                if let Some(delay) = record.auto_delete_after() {
                    let target = message_id.or(record.edit_target);
                    if let Some(target) = target {
                        self.schedule_delete(record.chat, target, delay);
                    }
                }
                DispatchOutcome::Delivered { message_id }
            }
            Err(e) if e.is_idempotent_edit() => {
                tracing::debug!(error = %e, "Edit target unchanged or gone, dropping record");
                DispatchOutcome::Unchanged
            }
            Err(ChatError::RateLimited { retry_after }) => {
                let retry_at = due_after(now, retry_after);
                tracing::info!(delay_secs = retry_after.as_secs(), "Rate limited, rescheduling");
                record.schedule_for(retry_at);
                self.park(record, Parking::Delayed).await?;
                DispatchMetrics::record_rescheduled("rate_limited");
                DispatchOutcome::RateLimited { retry_at }
            }
            Err(e) if e.is_transient() => {
                let previous = record.record_transient_failure();
                let delay = self.retry.transient_delay(previous);
                let retry_at = due_after(now, delay);
                tracing::warn!(
                    error = %e,
                    transient_failures = previous + 1,
                    delay_secs = delay.as_secs(),
                    "Network failure, rescheduling"
                );
                record.schedule_for(retry_at);
                self.park(record, Parking::Delayed).await?;
                DispatchMetrics::record_rescheduled("transient");
                DispatchOutcome::TransientRetry { retry_at }
            }
            Err(e) => self.settle_bounded_failure(record, e, now).await?,
        };

        DispatchMetrics::record_outcome(outcome.as_str());
        Ok(outcome)
    }

    /// Exactly one chat-API call: edit when the record has a target, send otherwise.
    async fn call(&self, record: &MessageRecord) -> Result<Option<RemoteMessageId>, ChatError> {
        match EditRequest::from_record(record) {
            Some(edit) => self.chat.edit(edit).await.map(|_| None),
            None => self.chat.send(SendRequest::from_record(record)).await.map(Some),
        }
    }

    async fn settle_bounded_failure(
        &self,
        mut record: MessageRecord,
        error: ChatError,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, StoreError> {
        let may_retry = record.record_bounded_failure();
        let retry_count = record.retry_count();

        if may_retry {
            let delay = self.retry.bounded_delay(retry_count);
            let retry_at = due_after(now, delay);
            tracing::warn!(
                error = %error,
                retry_count,
                delay_secs = delay.as_secs(),
                "Dispatch failed, retrying later"
            );
            record.schedule_for(retry_at);
            self.park(record, Parking::Delayed).await?;
            DispatchMetrics::record_rescheduled("failure");
            Ok(DispatchOutcome::Retrying { retry_count, retry_at })
        } else {
            tracing::error!(
                error = %error,
                retry_count,
                "Retry budget exhausted, moving record to dead letters"
            );
            record.clear_schedule();
            self.park(record, Parking::DeadLetter).await?;
            DispatchMetrics::record_dead_lettered();
            Ok(DispatchOutcome::DeadLettered { retry_count })
        }
    }

    /// Detached delete; survives consumer shutdown.
    fn schedule_delete(&self, chat: ChatId, message_id: RemoteMessageId, delay: Duration) {
        let client = Arc::clone(&self.chat);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = client.delete(chat, message_id).await {
                DispatchMetrics::record_auto_delete_failure();
                tracing::warn!(
                    chat_id = %chat,
                    message_id = %message_id,
                    error = %e,
                    "Auto-delete failed"
                );
            }
        });
    }
}

fn due_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CrossReply, MessageCategory};
    use crate::store::MemoryOutboxStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns one scripted result per call, then succeeds.
    #[derive(Default)]
    struct ScriptedChat {
        script: Mutex<Vec<Result<(), ChatError>>>,
        sends: Mutex<Vec<SendRequest>>,
        edits: Mutex<Vec<EditRequest>>,
    }

    impl ScriptedChat {
        fn failing_with(errors: Vec<ChatError>) -> Self {
            let chat = Self::default();
            *chat.script.lock().unwrap() = errors.into_iter().map(Err).rev().collect();
            chat
        }

        fn next(&self) -> Result<(), ChatError> {
            self.script.lock().unwrap().pop().unwrap_or(Ok(()))
        }
    }

    #[async_trait]
    impl ChatApi for ScriptedChat {
        async fn send(&self, request: SendRequest) -> Result<RemoteMessageId, ChatError> {
            self.sends.lock().unwrap().push(request);
            self.next().map(|_| RemoteMessageId(100))
        }

        async fn edit(&self, request: EditRequest) -> Result<(), ChatError> {
            self.edits.lock().unwrap().push(request);
            self.next()
        }

        async fn delete(&self, _chat: ChatId, _message_id: RemoteMessageId) -> Result<(), ChatError> {
            Ok(())
        }
    }

    fn setup(chat: ScriptedChat) -> (Arc<MemoryOutboxStore>, Arc<ScriptedChat>, Dispatcher) {
        let store = Arc::new(MemoryOutboxStore::new());
        let chat = Arc::new(chat);
        let dispatcher = Dispatcher::new(store.clone(), chat.clone(), RetryPolicy::default());
        (store, chat, dispatcher)
    }

    fn notification() -> MessageRecord {
        MessageRecord::builder(MessageCategory::Notification, ChatId(7), "hi")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_success() {
        let (store, chat, dispatcher) = setup(ScriptedChat::default());

        let outcome = dispatcher.dispatch(notification(), Utc::now()).await.unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                message_id: Some(RemoteMessageId(100))
            }
        );
        assert_eq!(chat.sends.lock().unwrap().len(), 1);
        assert_eq!(store.delayed_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_edit_uses_edit_call() {
        let (_store, chat, dispatcher) = setup(ScriptedChat::default());
        let record = MessageRecord::builder(MessageCategory::CrossChat, ChatId(1), "done")
            .edit(RemoteMessageId(42))
            .cross_reply(CrossReply::new(RemoteMessageId(7), ChatId(2)))
            .build()
            .unwrap();

        let outcome = dispatcher.dispatch(record, Utc::now()).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Delivered { message_id: None });
        assert!(chat.sends.lock().unwrap().is_empty());
        let edits = chat.edits.lock().unwrap();
        assert_eq!(edits[0].message_id, RemoteMessageId(42));
        assert_eq!(edits[0].thread.map(|t| t.chat), Some(ChatId(2)));
    }

    #[tokio::test]
    async fn test_rate_limit_keeps_counters() {
        let (store, _chat, dispatcher) = setup(ScriptedChat::failing_with(vec![ChatError::RateLimited {
            retry_after: Duration::from_secs(12),
        }]));
        let now = Utc::now();

        let outcome = dispatcher.dispatch(notification(), now).await.unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::RateLimited {
                retry_at: now + chrono::Duration::seconds(12)
            }
        );
        let requeued = store.pop_due(now + chrono::Duration::seconds(12)).await.unwrap().unwrap();
        assert_eq!(requeued.retry_count(), 0);
        assert_eq!(requeued.transient_failures(), 0);
    }

    #[tokio::test]
    async fn test_not_modified_is_dropped() {
        let (store, _chat, dispatcher) = setup(ScriptedChat::failing_with(vec![ChatError::NotModified]));
        let record = MessageRecord::builder(MessageCategory::StatusUpdate, ChatId(1), "same")
            .edit(RemoteMessageId(3))
            .build()
            .unwrap();

        let outcome = dispatcher.dispatch(record, Utc::now()).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Unchanged);
        assert_eq!(store.delayed_len().await.unwrap(), 0);
        assert_eq!(store.dead_letter_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_budget_dead_letters() {
        let (store, _chat, dispatcher) =
            setup(ScriptedChat::failing_with(vec![ChatError::Rejected("bad markup".into())]));
        let record = MessageRecord::builder(MessageCategory::Error, ChatId(1), "boom")
            .max_retries(0)
            .build()
            .unwrap();

        let outcome = dispatcher.dispatch(record, Utc::now()).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::DeadLettered { retry_count: 1 });
        assert_eq!(store.dead_letter_len().await.unwrap(), 1);
        assert!(store.peek_dead_letters(1).await.unwrap()[0].scheduled_for().is_none());
    }

    #[test]
    fn test_due_after_saturates() {
        let now = Utc::now();
        assert_eq!(due_after(now, Duration::from_secs(2)), now + chrono::Duration::seconds(2));
        assert_eq!(due_after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
