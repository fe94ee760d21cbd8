use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OutboxError, Result};

use super::types::{
    ChatId, CrossReply, Keyboard, MessageCategory, ParseMode, Priority, RecordId, RemoteMessageId,
};

/// Default retry budget for bounded failures
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One intended chat-API call, as stored in the outbox.
///
/// Everything except the retry bookkeeping is fixed when the record is
/// built. `retry_count` and `transient_failures` are separate counters:
/// only bounded failures consume the retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    id: RecordId,
    pub category: MessageCategory,
    pub priority: Priority,
    pub chat: ChatId,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatting: Option<ParseMode>,
    /// Same-chat thread target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<RemoteMessageId>,
    /// Thread target in a different chat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_reply: Option<CrossReply>,
    /// Overwrite this message instead of sending a new one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_target: Option<RemoteMessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_delete_after_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<Keyboard>,
    #[serde(default)]
    pub suppress_link_preview: bool,
    #[serde(default)]
    retry_count: u32,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default)]
    transient_failures: u32,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scheduled_for: Option<DateTime<Utc>>,
    /// Producer correlation data; never read by the outbox
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl MessageRecord {
    pub fn builder(
        category: MessageCategory,
        chat: ChatId,
        body: impl Into<String>,
    ) -> MessageRecordBuilder {
        MessageRecordBuilder::new(category, chat, body)
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn transient_failures(&self) -> u32 {
        self.transient_failures
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn scheduled_for(&self) -> Option<DateTime<Utc>> {
        self.scheduled_for
    }

    pub fn is_edit(&self) -> bool {
        self.edit_target.is_some()
    }

    pub fn auto_delete_after(&self) -> Option<Duration> {
        self.auto_delete_after_secs.map(Duration::from_secs)
    }

    /// Count a bounded failure. Returns whether the budget still allows a retry.
    pub(crate) fn record_bounded_failure(&mut self) -> bool {
        self.retry_count += 1;
        self.retry_count <= self.max_retries
    }

    /// Count a network failure, returning the number of earlier ones.
    pub(crate) fn record_transient_failure(&mut self) -> u32 {
        let previous = self.transient_failures;
        self.transient_failures += 1;
        previous
    }

    pub(crate) fn schedule_for(&mut self, at: DateTime<Utc>) {
        self.scheduled_for = Some(at);
    }

    pub(crate) fn clear_schedule(&mut self) {
        self.scheduled_for = None;
    }

    /// Give a dead letter a fresh budget before an operator requeues it.
    pub(crate) fn reset_for_requeue(&mut self) {
        self.retry_count = 0;
        self.transient_failures = 0;
        self.scheduled_for = None;
    }
}

/// Builder for [`MessageRecord`].
#[derive(Debug, Clone)]
pub struct MessageRecordBuilder {
    category: MessageCategory,
    priority: Priority,
    chat: ChatId,
    body: String,
    formatting: Option<ParseMode>,
    reply_to: Option<RemoteMessageId>,
    cross_reply: Option<CrossReply>,
    edit_target: Option<RemoteMessageId>,
    auto_delete_after: Option<Duration>,
    keyboard: Option<Keyboard>,
    suppress_link_preview: bool,
    max_retries: u32,
    context: serde_json::Map<String, serde_json::Value>,
}

impl MessageRecordBuilder {
    pub fn new(category: MessageCategory, chat: ChatId, body: impl Into<String>) -> Self {
        Self {
            category,
            priority: category.default_priority(),
            chat,
            body: body.into(),
            formatting: Some(ParseMode::default()),
            reply_to: None,
            cross_reply: None,
            edit_target: None,
            auto_delete_after: None,
            keyboard: None,
            suppress_link_preview: false,
            max_retries: DEFAULT_MAX_RETRIES,
            context: serde_json::Map::new(),
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the formatting mode; `None` sends plain text
    pub fn formatting(mut self, mode: Option<ParseMode>) -> Self {
        self.formatting = mode;
        self
    }

    pub fn reply_to(mut self, message_id: RemoteMessageId) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    pub fn cross_reply(mut self, target: CrossReply) -> Self {
        self.cross_reply = Some(target);
        self
    }

    /// Edit an existing message instead of sending a new one
    pub fn edit(mut self, target: RemoteMessageId) -> Self {
        self.edit_target = Some(target);
        self
    }

    pub fn auto_delete_after(mut self, delay: Duration) -> Self {
        self.auto_delete_after = Some(delay);
        self
    }

    pub fn keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    pub fn suppress_link_preview(mut self, suppress: bool) -> Self {
        self.suppress_link_preview = suppress;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Result<MessageRecord> {
        if self.edit_target.is_some() && self.reply_to.is_some() {
            return Err(OutboxError::Validation(
                "a record cannot both edit a message and reply to one".to_string(),
            ));
        }

        Ok(MessageRecord {
            id: RecordId::new(),
            category: self.category,
            priority: self.priority,
            chat: self.chat,
            body: self.body,
            formatting: self.formatting,
            reply_to: self.reply_to,
            cross_reply: self.cross_reply,
            edit_target: self.edit_target,
            auto_delete_after_secs: self.auto_delete_after.map(|d| d.as_secs()),
            keyboard: self.keyboard,
            suppress_link_preview: self.suppress_link_preview,
            retry_count: 0,
            max_retries: self.max_retries,
            transient_failures: 0,
            created_at: Utc::now(),
            scheduled_for: None,
            context: self.context,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(chat: i64) -> MessageRecordBuilder {
        MessageRecord::builder(MessageCategory::CommandReply, ChatId(chat), "hello")
    }

    #[test]
    fn test_builder_defaults() {
        let record = reply(1).build().unwrap();

        assert_eq!(record.priority, Priority::High);
        assert_eq!(record.formatting, Some(ParseMode::Markdown));
        assert_eq!(record.retry_count(), 0);
        assert_eq!(record.max_retries(), DEFAULT_MAX_RETRIES);
        assert_eq!(record.transient_failures(), 0);
        assert!(record.scheduled_for().is_none());
        assert!(!record.is_edit());
        assert!(record.context.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = reply(1).build().unwrap();
        let b = reply(1).build().unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_edit_and_reply_are_exclusive() {
        let result = reply(1)
            .reply_to(RemoteMessageId(5))
            .edit(RemoteMessageId(6))
            .build();
        assert!(matches!(result, Err(OutboxError::Validation(_))));
    }

    #[test]
    fn test_cross_chat_edit_keeps_thread_reference() {
        let record = MessageRecord::builder(MessageCategory::CrossChat, ChatId(1), "done")
            .edit(RemoteMessageId(42))
            .cross_reply(CrossReply::new(RemoteMessageId(7), ChatId(2)))
            .build()
            .unwrap();

        assert_eq!(record.edit_target, Some(RemoteMessageId(42)));
        assert_eq!(record.cross_reply.unwrap().chat, ChatId(2));
    }

    #[test]
    fn test_bounded_failure_budget() {
        let mut record = reply(1).max_retries(2).build().unwrap();

        assert!(record.record_bounded_failure());
        assert!(record.record_bounded_failure());
        assert!(!record.record_bounded_failure());
        assert_eq!(record.retry_count(), 3);
        assert_eq!(record.transient_failures(), 0);
    }

    #[test]
    fn test_transient_failures_do_not_touch_retry_count() {
        let mut record = reply(1).build().unwrap();

        assert_eq!(record.record_transient_failure(), 0);
        assert_eq!(record.record_transient_failure(), 1);
        assert_eq!(record.transient_failures(), 2);
        assert_eq!(record.retry_count(), 0);
    }

    #[test]
    fn test_serialization_preserves_record() {
        let mut record = reply(-1001)
            .reply_to(RemoteMessageId(9))
            .keyboard(Keyboard(json!({"inline_keyboard": [[{"text": "Ok", "callback_data": "ok"}]]})))
            .auto_delete_after(Duration::from_secs(60))
            .suppress_link_preview(true)
            .context("job_id", json!("abc"))
            .build()
            .unwrap();
        record.record_bounded_failure();
        record.schedule_for(Utc::now());

        let payload = serde_json::to_string(&record).unwrap();
        let decoded: MessageRecord = serde_json::from_str(&payload).unwrap();

        assert_eq!(decoded, record);
        assert_eq!(decoded.auto_delete_after(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_missing_counters_default() {
        let payload = json!({
            "id": "3f2504e0-4f89-11d3-9a0c-0305e82c3301",
            "category": "status_update",
            "priority": "normal",
            "chat": 5,
            "body": "working",
            "created_at": "2024-01-01T00:00:00Z"
        });

        let record: MessageRecord = serde_json::from_value(payload).unwrap();
        assert_eq!(record.retry_count(), 0);
        assert_eq!(record.max_retries(), DEFAULT_MAX_RETRIES);
        assert!(!record.suppress_link_preview);
        assert!(record.formatting.is_none());
    }
}
