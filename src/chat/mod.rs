//! Chat-API client contract consumed by the outbox.
//!
//! The outbox never talks to a chat network directly; callers provide a
//! [`ChatApi`] implementation and the consumer drives it one call at a time.

mod error;

use async_trait::async_trait;

use crate::message::{ChatId, CrossReply, Keyboard, MessageRecord, ParseMode, RemoteMessageId};

pub use error::ChatError;

/// Parameters for posting a new message.
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    pub chat: ChatId,
    pub text: String,
    pub formatting: Option<ParseMode>,
    /// Same-chat thread target
    pub reply_to: Option<RemoteMessageId>,
    /// Thread target in another chat; takes precedence over `reply_to`
    pub cross_reply: Option<CrossReply>,
    pub keyboard: Option<Keyboard>,
    pub suppress_link_preview: bool,
}

impl SendRequest {
    pub fn new(chat: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat,
            text: text.into(),
            formatting: None,
            reply_to: None,
            cross_reply: None,
            keyboard: None,
            suppress_link_preview: false,
        }
    }

    pub fn from_record(record: &MessageRecord) -> Self {
        Self {
            chat: record.chat,
            text: record.body.clone(),
            formatting: record.formatting,
            reply_to: record.reply_to,
            cross_reply: record.cross_reply,
            keyboard: record.keyboard.clone(),
            suppress_link_preview: record.suppress_link_preview,
        }
    }
}

/// Parameters for overwriting an existing message.
#[derive(Debug, Clone, PartialEq)]
pub struct EditRequest {
    pub chat: ChatId,
    pub message_id: RemoteMessageId,
    pub text: String,
    pub formatting: Option<ParseMode>,
    pub keyboard: Option<Keyboard>,
    pub suppress_link_preview: bool,
    /// Cross-chat thread the edited message belongs to
    pub thread: Option<CrossReply>,
}

impl EditRequest {
    /// Build an edit from a record; `None` when the record is not an edit.
    pub fn from_record(record: &MessageRecord) -> Option<Self> {
        let message_id = record.edit_target?;
        Some(Self {
            chat: record.chat,
            message_id,
            text: record.body.clone(),
            formatting: record.formatting,
            keyboard: record.keyboard.clone(),
            suppress_link_preview: record.suppress_link_preview,
            thread: record.cross_reply,
        })
    }
}

/// Async client for the chat network.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn send(&self, request: SendRequest) -> Result<RemoteMessageId, ChatError>;

    async fn edit(&self, request: EditRequest) -> Result<(), ChatError>;

    async fn delete(&self, chat: ChatId, message_id: RemoteMessageId) -> Result<(), ChatError>;
}
