//! Outbox store factory

use std::sync::Arc;

use crate::config::QueueSettings;
use crate::redis::RedisPool;

use super::backend::OutboxStore;
use super::memory_backend::MemoryOutboxStore;
use super::redis_backend::RedisOutboxStore;

/// Create an outbox store based on configuration.
///
/// - `"redis"`: a `RedisOutboxStore` if a Redis pool is provided
/// - `"memory"` (or anything else): a `MemoryOutboxStore`
///
/// A Redis request without a pool falls back to memory with a warning.
pub fn create_store(
    settings: &QueueSettings,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn OutboxStore> {
    match settings.backend.as_str() {
        "redis" => {
            if let Some(pool) = redis_pool {
                tracing::info!(
                    backend = "redis",
                    prefix = %settings.key_prefix,
                    "Creating Redis outbox store"
                );
                Arc::new(RedisOutboxStore::new(pool, settings.key_prefix.clone()))
            } else {
                tracing::warn!("Redis backend requested but no pool provided, falling back to memory");
                Arc::new(MemoryOutboxStore::new())
            }
        }
        _ => {
            tracing::info!(backend = "memory", "Creating memory outbox store");
            Arc::new(MemoryOutboxStore::new())
        }
    }
}
