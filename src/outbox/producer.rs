//! Producer-facing facade over the outbox.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::chat::{ChatApi, SendRequest};
use crate::config::QueueSettings;
use crate::error::Result;
use crate::message::{
    ChatId, CrossReply, MessageCategory, MessageRecord, MessageRecordBuilder, ParseMode,
    Placeholder, Priority, RecordId, RemoteMessageId, SentMessage,
};
use crate::metrics::ProducerMetrics;
use crate::store::OutboxStore;

use super::consumer::Consumer;
use super::maintenance::{self, PurgeReport, QueueStats};

struct ConsumerHandle {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// Durable outbox for chat messages.
///
/// Producers enqueue records through the `send_*` helpers or [`Outbox::publish`];
/// a single background consumer started with [`Outbox::start_consumer`]
/// delivers them in priority order.
pub struct Outbox {
    store: Arc<dyn OutboxStore>,
    chat: Arc<dyn ChatApi>,
    settings: QueueSettings,
    consumer: Mutex<Option<ConsumerHandle>>,
    /// Set once the startup purge has run; later restarts keep queued edits
    startup_purge_done: AtomicBool,
}

impl Outbox {
    pub fn new(store: Arc<dyn OutboxStore>, chat: Arc<dyn ChatApi>, settings: QueueSettings) -> Self {
        Self {
            store,
            chat,
            settings,
            consumer: Mutex::new(None),
            startup_purge_done: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<dyn OutboxStore> {
        &self.store
    }

    fn builder(&self, category: MessageCategory, chat: ChatId, text: impl Into<String>) -> MessageRecordBuilder {
        MessageRecord::builder(category, chat, text).max_retries(self.settings.max_retries)
    }

    /// Push a record to the tail of its priority bucket.
    pub async fn publish(&self, record: MessageRecord) -> Result<RecordId> {
        self.store.push_ready(&record).await?;
        ProducerMetrics::record_enqueued(record.priority.as_str());

        tracing::debug!(
            record_id = %record.id(),
            chat_id = %record.chat,
            priority = %record.priority,
            category = record.category.as_str(),
            "Record published"
        );
        Ok(record.id())
    }

    pub async fn publish_with_placeholder(&self, record: MessageRecord) -> Result<Placeholder> {
        let chat = record.chat;
        let record_id = self.publish(record).await?;
        Ok(Placeholder { record_id, chat })
    }

    pub async fn send_reply(
        &self,
        chat: ChatId,
        text: impl Into<String>,
        reply_to: Option<RemoteMessageId>,
    ) -> Result<RecordId> {
        let mut builder = self.builder(MessageCategory::CommandReply, chat, text);
        if let Some(target) = reply_to {
            builder = builder.reply_to(target);
        }
        self.publish(builder.build()?).await
    }

    /// Queue a progress message, or an edit of one when `edit_target` is set.
    pub async fn send_status_update(
        &self,
        chat: ChatId,
        text: impl Into<String>,
        edit_target: Option<RemoteMessageId>,
    ) -> Result<RecordId> {
        let mut builder = self
            .builder(MessageCategory::StatusUpdate, chat, text)
            .suppress_link_preview(true);
        if let Some(target) = edit_target {
            builder = builder.edit(target);
        }
        self.publish(builder.build()?).await
    }

    pub async fn send_cross_chat(
        &self,
        chat: ChatId,
        text: impl Into<String>,
        thread: CrossReply,
    ) -> Result<RecordId> {
        let record = self
            .builder(MessageCategory::CrossChat, chat, text)
            .cross_reply(thread)
            .build()?;
        self.publish(record).await
    }

    pub async fn send_cross_chat_edit(
        &self,
        chat: ChatId,
        text: impl Into<String>,
        edit_target: RemoteMessageId,
        thread: CrossReply,
    ) -> Result<RecordId> {
        let record = self
            .builder(MessageCategory::CrossChat, chat, text)
            .priority(Priority::Normal)
            .edit(edit_target)
            .cross_reply(thread)
            .build()?;
        self.publish(record).await
    }

    pub async fn send_notification(
        &self,
        chat: ChatId,
        text: impl Into<String>,
        priority: Priority,
    ) -> Result<RecordId> {
        let record = self
            .builder(MessageCategory::Notification, chat, text)
            .priority(priority)
            .build()?;
        self.publish(record).await
    }

    pub async fn send_urgent_notification(&self, chat: ChatId, text: impl Into<String>) -> Result<RecordId> {
        self.send_notification(chat, text, Priority::Urgent).await
    }

    pub async fn send_error(&self, chat: ChatId, text: impl Into<String>) -> Result<RecordId> {
        let record = self
            .builder(MessageCategory::Error, chat, text)
            .priority(Priority::Urgent)
            .build()?;
        self.publish(record).await
    }

    /// Send right away, bypassing the queue, for callers that need the real
    /// message id (e.g. to edit it later). Chat errors, rate limits
    /// included, are returned to the caller.
    pub async fn send_immediate(
        &self,
        chat: ChatId,
        text: impl Into<String>,
        reply_to: Option<RemoteMessageId>,
    ) -> Result<SentMessage> {
        let mut request = SendRequest::new(chat, text);
        request.formatting = Some(ParseMode::default());
        request.reply_to = reply_to;
        request.suppress_link_preview = true;

        let message_id = self.chat.send(request).await?;
        tracing::debug!(chat_id = %chat, message_id = %message_id, "Immediate message sent");
        Ok(SentMessage { message_id, chat })
    }

    /// Queue a status update and hand back its placeholder.
    pub async fn send_immediate_status_update(
        &self,
        chat: ChatId,
        text: impl Into<String>,
    ) -> Result<Placeholder> {
        let record = self
            .builder(MessageCategory::StatusUpdate, chat, text)
            .suppress_link_preview(true)
            .build()?;
        self.publish_with_placeholder(record).await
    }

    /// Start the background consumer. A running consumer is left alone; a
    /// finished one is replaced.
    ///
    /// With `purge_stale_edits_on_start`, edits left by a previous process
    /// are dropped on the first start only. Edits queued after that belong
    /// to this process and survive a stop/start cycle.
    pub async fn start_consumer(&self) {
        let mut guard = self.consumer.lock().await;
        if guard.as_ref().is_some_and(|h| !h.task.is_finished()) {
            tracing::debug!("Outbox consumer already running");
            return;
        }

        if self.settings.purge_stale_edits_on_start && !self.startup_purge_done.load(Ordering::Acquire) {
            match maintenance::purge_stale_edits(self.store.as_ref()).await {
                Ok(_) => self.startup_purge_done.store(true, Ordering::Release),
                Err(e) => tracing::warn!(error = %e, "Stale edit purge failed, starting consumer anyway"),
            }
        }

        let consumer = Consumer::new(Arc::clone(&self.store), Arc::clone(&self.chat), &self.settings);
        let (shutdown, rx) = broadcast::channel(1);
        let task = tokio::spawn(consumer.run(rx));
        *guard = Some(ConsumerHandle { shutdown, task });
    }

    /// Signal the consumer and wait for it to finish its current iteration.
    pub async fn stop_consumer(&self) {
        let Some(handle) = self.consumer.lock().await.take() else {
            return;
        };

        let _ = handle.shutdown.send(());
        if let Err(e) = handle.task.await {
            tracing::error!(error = %e, "Outbox consumer task failed");
        }
    }

    pub async fn is_consumer_running(&self) -> bool {
        self.consumer
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        Ok(maintenance::queue_stats(self.store.as_ref()).await?)
    }

    pub async fn purge_stale_edits(&self) -> Result<PurgeReport> {
        Ok(maintenance::purge_stale_edits(self.store.as_ref()).await?)
    }

    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<MessageRecord>> {
        Ok(maintenance::dead_letters(self.store.as_ref(), limit).await?)
    }

    pub async fn requeue_dead_letters(&self, limit: usize) -> Result<usize> {
        Ok(maintenance::requeue_dead_letters(self.store.as_ref(), limit).await?)
    }
}
