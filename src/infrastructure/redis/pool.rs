//! Redis connection pool for the outbox store.
//!
//! Wraps a multiplexed connection with circuit breaker protection and
//! exposes the list and sorted-set commands the outbox needs.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError, RedisResult};
use tokio::sync::RwLock;

use crate::config::RedisConfig;

use super::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

/// Error type for Redis pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Circuit breaker is open")]
    CircuitOpen,
}

/// Redis connection pool for outbox commands.
///
/// The multiplexed connection is shared by producers and the consumer; a
/// dropped connection is cleared so the next command reconnects.
pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    circuit_breaker: Arc<CircuitBreaker>,
    connected: AtomicBool,
    config: RedisConfig,
}

impl RedisPool {
    pub fn new(config: RedisConfig) -> Result<Self, PoolError> {
        let breaker = CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: config.circuit_breaker_failure_threshold,
            success_threshold: config.circuit_breaker_success_threshold,
            reset_timeout_ms: config.circuit_breaker_reset_timeout_seconds * 1000,
        });
        Self::with_circuit_breaker(config, Arc::new(breaker))
    }

    pub fn with_circuit_breaker(
        config: RedisConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, PoolError> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            circuit_breaker,
            connected: AtomicBool::new(false),
            config,
        })
    }

    /// Get the shared connection, connecting on first use.
    pub async fn get_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        if !self.circuit_breaker.allow_request() {
            return Err(PoolError::CircuitOpen);
        }

        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        self.connect().await
    }

    async fn connect(&self) -> Result<MultiplexedConnection, PoolError> {
        let mut conn_guard = self.connection.write().await;

        // Another task may have connected while we waited for the lock
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => {
                *conn_guard = Some(conn.clone());
                self.circuit_breaker.record_success();
                self.connected.store(true, Ordering::Release);
                tracing::info!("Outbox Redis connection established");
                Ok(conn)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                self.connected.store(false, Ordering::Release);
                tracing::error!(error = %e, "Failed to connect to Redis");
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Run one Redis command with circuit breaker bookkeeping.
    pub async fn execute<F, T, Fut>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;

        match f(conn).await {
            Ok(result) => {
                self.circuit_breaker.record_success();
                Ok(result)
            }
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    let mut conn_guard = self.connection.write().await;
                    *conn_guard = None;
                    self.connected.store(false, Ordering::Release);
                }
                self.circuit_breaker.record_failure();
                Err(PoolError::Redis(e))
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.connected.load(Ordering::Acquire) && self.circuit_breaker.state() == CircuitState::Closed
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub async fn ping(&self) -> Result<(), PoolError> {
        let _pong: String = self
            .execute(|mut conn| async move {
                let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
                Ok(pong)
            })
            .await?;
        Ok(())
    }
}

/// Typed helpers for the Redis commands used by the outbox store.
#[async_trait::async_trait]
pub trait RedisPoolExt {
    // List operations (priority buckets, dead letters)

    /// Append to the tail of a list.
    async fn rpush(&self, key: &str, value: &str) -> Result<(), PoolError>;

    /// Pop from the head of a list.
    async fn lpop(&self, key: &str) -> Result<Option<String>, PoolError>;

    async fn llen(&self, key: &str) -> Result<usize, PoolError>;

    /// Read up to `limit` entries from the head of a list.
    async fn lrange_head(&self, key: &str, limit: usize) -> Result<Vec<String>, PoolError>;

    /// Read a whole list, head first.
    async fn lrange_all(&self, key: &str) -> Result<Vec<String>, PoolError>;

    /// Remove the first occurrence of `value`; returns whether one was removed.
    async fn lrem_one(&self, key: &str, value: &str) -> Result<bool, PoolError>;

    // Sorted set operations (delayed set)

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), PoolError>;

    /// Lowest-scored member with a score at most `max`.
    async fn zfirst_by_score(&self, key: &str, max: f64) -> Result<Option<String>, PoolError>;

    /// Remove a member; returns whether it was present.
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, PoolError>;

    async fn zcard(&self, key: &str) -> Result<usize, PoolError>;
}

#[async_trait::async_trait]
impl RedisPoolExt for RedisPool {
    async fn rpush(&self, key: &str, value: &str) -> Result<(), PoolError> {
        let (key, value) = (key.to_owned(), value.to_owned());
        self.execute(|mut conn| async move { conn.rpush::<_, _, ()>(key, value).await })
            .await
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, PoolError> {
        let key = key.to_owned();
        self.execute(|mut conn| async move { conn.lpop::<_, Option<String>>(key, None).await })
            .await
    }

    async fn llen(&self, key: &str) -> Result<usize, PoolError> {
        let key = key.to_owned();
        self.execute(|mut conn| async move { conn.llen::<_, usize>(key).await })
            .await
    }

    async fn lrange_head(&self, key: &str, limit: usize) -> Result<Vec<String>, PoolError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let key = key.to_owned();
        let stop = limit as isize - 1;
        self.execute(|mut conn| async move { conn.lrange::<_, Vec<String>>(key, 0, stop).await })
            .await
    }

    async fn lrange_all(&self, key: &str) -> Result<Vec<String>, PoolError> {
        let key = key.to_owned();
        self.execute(|mut conn| async move { conn.lrange::<_, Vec<String>>(key, 0, -1).await })
            .await
    }

    async fn lrem_one(&self, key: &str, value: &str) -> Result<bool, PoolError> {
        let (key, value) = (key.to_owned(), value.to_owned());
        let removed: i64 = self
            .execute(|mut conn| async move { conn.lrem::<_, _, i64>(key, 1, value).await })
            .await?;
        Ok(removed > 0)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), PoolError> {
        let (key, member) = (key.to_owned(), member.to_owned());
        self.execute(|mut conn| async move { conn.zadd::<_, _, _, ()>(key, member, score).await })
            .await
    }

    async fn zfirst_by_score(&self, key: &str, max: f64) -> Result<Option<String>, PoolError> {
        let key = key.to_owned();
        let members: Vec<String> = self
            .execute(|mut conn| async move {
                conn.zrangebyscore_limit::<_, _, _, Vec<String>>(key, "-inf", max, 0, 1)
                    .await
            })
            .await?;
        Ok(members.into_iter().next())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, PoolError> {
        let (key, member) = (key.to_owned(), member.to_owned());
        let removed: i64 = self
            .execute(|mut conn| async move { conn.zrem::<_, _, i64>(key, member).await })
            .await?;
        Ok(removed > 0)
    }

    async fn zcard(&self, key: &str) -> Result<usize, PoolError> {
        let key = key.to_owned();
        self.execute(|mut conn| async move { conn.zcard::<_, usize>(key).await })
            .await
    }
}
