//! Broker abstraction over the shared key-value/list store.
//!
//! All coordination between the submitter and the workers goes through a
//! broker: a store supporting list push, blocking pop, and keyed get / set /
//! delete. The broker is the only shared mutable resource in the system.
//!
//! Two implementations are provided:
//!
//! - [`RedisBroker`]: the production broker, backed by Redis lists and keys
//! - [`InMemoryBroker`]: an in-process fake for tests
//!
//! Components take `Arc<dyn Broker>` rather than a concrete client so the
//! core stays testable without a running Redis.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis;

pub use self::memory::InMemoryBroker;
pub use self::redis::RedisBroker;

/// Errors that can occur during broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Failed to connect to the broker.
    #[error("Broker connection failed: {0}")]
    Connection(String),

    /// A broker operation failed after the connection was established.
    #[error("Broker operation failed: {0}")]
    Backend(#[from] ::redis::RedisError),
}

/// The store operations the relay consumes.
///
/// Jobs flow one direction through a named list (`push` by the submitter,
/// `blocking_pop` by a worker); results flow back through keyed values
/// (`set` by the worker, `get` + `delete` by the submitter).
#[async_trait]
pub trait Broker: Send + Sync {
    /// Pushes a value onto the tail of the named queue.
    async fn push(&self, queue: &str, value: &str) -> Result<(), BrokerError>;

    /// Pops the head of the named queue, blocking until a value is
    /// available or `timeout` expires.
    ///
    /// The pop is atomic: a value is delivered to exactly one caller.
    /// Returns `Ok(None)` when the timeout expired with the queue empty.
    async fn blocking_pop(&self, queue: &str, timeout: Duration)
        -> Result<Option<String>, BrokerError>;

    /// Reads the value at `key`, or `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError>;

    /// Writes `value` at `key`, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>)
        -> Result<(), BrokerError>;

    /// Deletes the value at `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), BrokerError>;
}
