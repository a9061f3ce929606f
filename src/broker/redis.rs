//! Redis-backed broker implementation.
//!
//! Maps the [`Broker`] operations onto Redis primitives:
//!
//! - `push` → LPUSH, `blocking_pop` → BRPOP (FIFO across a single list)
//! - `get` / `set` / `delete` → GET / SET or SETEX / DEL
//!
//! BRPOP is the broker's native blocking pop, so workers wait on the queue
//! without busy-polling and each entry is delivered to exactly one of them.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{Broker, BrokerError};

/// Broker backed by a shared Redis instance.
///
/// Holds a [`ConnectionManager`], which multiplexes over one connection and
/// reconnects automatically; cloning it per operation is cheap.
pub struct RedisBroker {
    redis: ConnectionManager,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker").finish_non_exhaustive()
    }
}

impl RedisBroker {
    /// Connects to Redis and creates a new broker.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379/0")
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Connection` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(Self { redis })
    }

    /// Creates a broker from an existing ConnectionManager.
    ///
    /// Useful when sharing a connection across multiple components.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait::async_trait]
impl Broker for RedisBroker {
    async fn push(&self, queue: &str, value: &str) -> Result<(), BrokerError> {
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(queue, value).await?;
        Ok(())
    }

    async fn blocking_pop(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, BrokerError> {
        let mut conn = self.redis.clone();
        // BRPOP takes whole seconds; 0 would block forever, so floor at 1
        let timeout_secs = timeout.as_secs().max(1) as usize;

        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(queue)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        Ok(popped.map(|(_queue, value)| value))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), BrokerError> {
        let mut conn = self.redis.clone();
        match ttl {
            Some(ttl) => {
                conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                    .await?;
            }
            None => {
                conn.set::<_, _, ()>(key, value).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BrokerError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_for_invalid_url() {
        let err = tokio::runtime::Runtime::new()
            .expect("runtime should build")
            .block_on(RedisBroker::connect("not-a-redis-url"));

        match err {
            Err(BrokerError::Connection(msg)) => assert!(!msg.is_empty()),
            other => panic!("expected connection error, got {other:?}"),
        }
    }

    #[test]
    fn test_broker_error_display() {
        let err = BrokerError::Connection("refused".to_string());
        assert!(err.to_string().contains("refused"));
    }
}
