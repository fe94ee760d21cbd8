//! The outbox: producer facade, consumer loop and maintenance utilities.
//!
//! Records flow producer → priority bucket → consumer → chat API. Failed
//! dispatches go through the delayed set and, once their budget is spent,
//! into dead letters.

pub mod consumer;
pub mod dispatch;
pub mod maintenance;
mod producer;
pub mod retry;

pub use consumer::{Consumer, ConsumerConfig, TickOutcome, TickSource};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use maintenance::{PurgeReport, QueueStats};
pub use producer::Outbox;
pub use retry::RetryPolicy;
