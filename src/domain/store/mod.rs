//! Outbox storage: priority buckets, the delayed set and dead letters.

mod backend;
mod factory;
mod memory_backend;
mod redis_backend;

pub use backend::{OutboxStore, RecordPredicate, StoreError};
pub use factory::create_store;
pub use memory_backend::MemoryOutboxStore;
pub use redis_backend::RedisOutboxStore;
