//! Message records: the unit the outbox stores and dispatches.

mod record;
mod types;

pub use record::{MessageRecord, MessageRecordBuilder, DEFAULT_MAX_RETRIES};
pub use types::{
    ChatId, CrossReply, Keyboard, MessageCategory, ParseMode, Placeholder, Priority, RecordId,
    RemoteMessageId, SentMessage,
};
