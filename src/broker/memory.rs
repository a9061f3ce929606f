//! In-memory broker for tests and local development.
//!
//! Implements the same contract as the Redis broker against process-local
//! state: one FIFO list per queue name plus a key-value map with optional
//! expiry. `blocking_pop` parks on a [`Notify`] instead of busy-polling, so
//! tests exercise the same wake-on-push behavior as the real broker.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Broker, BrokerError};

#[derive(Default)]
struct Inner {
    queues: HashMap<String, VecDeque<String>>,
    store: HashMap<String, StoredValue>,
}

struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

/// Process-local broker with Redis-like semantics.
///
/// Pops are atomic under the internal mutex, so with multiple workers each
/// queue entry is still claimed by exactly one of them.
#[derive(Default)]
pub struct InMemoryBroker {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl InMemoryBroker {
    /// Creates a new empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries waiting in the named queue.
    pub fn queue_len(&self, queue: &str) -> usize {
        let inner = self.inner.lock().expect("broker lock poisoned");
        inner.queues.get(queue).map_or(0, VecDeque::len)
    }

    fn pop_now(&self, queue: &str) -> Option<String> {
        let mut inner = self.inner.lock().expect("broker lock poisoned");
        inner.queues.get_mut(queue).and_then(VecDeque::pop_front)
    }
}

#[async_trait::async_trait]
impl Broker for InMemoryBroker {
    async fn push(&self, queue: &str, value: &str) -> Result<(), BrokerError> {
        {
            let mut inner = self.inner.lock().expect("broker lock poisoned");
            inner
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(value.to_string());
        }
        // Wake every parked pop; each re-checks its own queue
        self.notify.notify_waiters();
        Ok(())
    }

    async fn blocking_pop(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, BrokerError> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register for wake-ups before checking, so a push landing
            // between the check and the wait is not missed
            let notified = self.notify.notified();

            if let Some(value) = self.pop_now(queue) {
                return Ok(Some(value));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        let mut inner = self.inner.lock().expect("broker lock poisoned");

        if let Some(stored) = inner.store.get(key) {
            if stored.expires_at.is_some_and(|at| Instant::now() >= at) {
                inner.store.remove(key);
                return Ok(None);
            }
        }

        Ok(inner.store.get(key).map(|stored| stored.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().expect("broker lock poisoned");
        inner.store.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().expect("broker lock poisoned");
        inner.store.remove(key);
        Ok(())
    }
}
