use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local identity of a queued record. Never reused, never sent to the chat API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier the chat API assigned to a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteMessageId(pub i64);

impl fmt::Display for RemoteMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Delivery priority. Ordering follows urgency: `Urgent > High > Normal > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background notifications, cleanup
    Low,
    /// Status updates, progress reports
    Normal,
    /// Command replies, user-facing updates
    High,
    /// Errors, critical notifications
    Urgent,
}

impl Priority {
    /// Buckets in the order the consumer scans them
    pub const DISPATCH_ORDER: [Priority; 4] =
        [Priority::Urgent, Priority::High, Priority::Normal, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a record is for. Only affects the default priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    CommandReply,
    StatusUpdate,
    Notification,
    CrossChat,
    Error,
}

impl MessageCategory {
    pub fn default_priority(&self) -> Priority {
        match self {
            MessageCategory::CommandReply | MessageCategory::CrossChat => Priority::High,
            MessageCategory::StatusUpdate => Priority::Normal,
            MessageCategory::Notification | MessageCategory::Error => Priority::Urgent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageCategory::CommandReply => "command_reply",
            MessageCategory::StatusUpdate => "status_update",
            MessageCategory::Notification => "notification",
            MessageCategory::CrossChat => "cross_chat",
            MessageCategory::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParseMode {
    #[default]
    Markdown,
    MarkdownV2,
    #[serde(rename = "HTML")]
    Html,
}

/// Interactive layout attached to a message, passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Keyboard(pub serde_json::Value);

/// A message in another chat that a record threads under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossReply {
    pub message_id: RemoteMessageId,
    pub chat: ChatId,
}

impl CrossReply {
    pub fn new(message_id: RemoteMessageId, chat: ChatId) -> Self {
        Self { message_id, chat }
    }
}

/// Handle for a record that has been queued but not yet delivered.
///
/// Carries only the local record id; it cannot be used as an edit target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placeholder {
    pub record_id: RecordId,
    pub chat: ChatId,
}

/// A message the chat API has confirmed, with its real remote id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: RemoteMessageId,
    pub chat: ChatId,
}
