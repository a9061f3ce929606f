//! Job submission with bounded result polling.
//!
//! The submitter runs inside the request-handling path: it enqueues a job,
//! then polls the store for a result keyed by the job's id until one
//! appears or a deadline passes. Each call is an independent task-level
//! wait, so concurrent requests never serialize on each other.
//!
//! The reference system polled forever; here the wait is bounded and a
//! missing result surfaces as a typed timeout the caller can retry.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::broker::{Broker, BrokerError};
use crate::job::{Job, Prediction};

/// Default interval between result polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default upper bound on the total wait for a result.
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);

/// Errors that can occur while submitting a job and awaiting its result.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The broker could not be reached; the submission failed outright.
    #[error("Broker unavailable: {0}")]
    Broker(#[from] BrokerError),

    /// The job could not be serialized for the wire.
    #[error("Failed to encode job: {0}")]
    Encode(#[source] serde_json::Error),

    /// No result appeared within the configured maximum wait.
    #[error("No result for job {job_id} within {waited:?}")]
    Timeout { job_id: Uuid, waited: Duration },

    /// A value was present under the job's key but failed to parse.
    ///
    /// Distinct from an absent key: absence means "not done yet" and is
    /// retried, corruption is surfaced immediately.
    #[error("Result for job {job_id} is not a valid prediction: {source}")]
    CorruptResult {
        job_id: Uuid,
        #[source]
        source: serde_json::Error,
    },

    /// The worker processed the job but the computation itself failed.
    #[error("Computation failed: {0}")]
    ComputeFailed(String),
}

/// Configuration for the submitter.
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    /// Name of the shared work queue.
    pub queue_name: String,
    /// Interval between result polls.
    pub poll_interval: Duration,
    /// Upper bound on the total wait for a result.
    pub max_wait: Duration,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            queue_name: "service_queue".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }
}

impl SubmitterConfig {
    /// Creates a configuration for the named queue.
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Default::default()
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the maximum wait for a result.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

/// Submits jobs to the work queue and awaits their results.
///
/// Cheap to share: holds only the broker handle and the configuration.
pub struct Submitter {
    broker: Arc<dyn Broker>,
    config: SubmitterConfig,
}

impl Submitter {
    /// Creates a submitter over the given broker.
    pub fn new(broker: Arc<dyn Broker>, config: SubmitterConfig) -> Self {
        Self { broker, config }
    }

    /// Submits an image for classification and blocks until the result is
    /// published, or the configured maximum wait passes.
    ///
    /// On success the consumed result key is deleted (best effort) so the
    /// store never holds stale entries for completed requests.
    ///
    /// # Errors
    ///
    /// - `SubmitError::Broker` if the push or a poll cannot reach the store
    /// - `SubmitError::Timeout` if no result appears within `max_wait`
    /// - `SubmitError::CorruptResult` if the published value fails to parse
    /// - `SubmitError::ComputeFailed` if the worker reported a failed
    ///   computation
    pub async fn submit(&self, image_name: &str) -> Result<Prediction, SubmitError> {
        let job = Job::new(image_name);
        let payload = serde_json::to_string(&job).map_err(SubmitError::Encode)?;

        self.broker.push(&self.config.queue_name, &payload).await?;
        debug!(job_id = %job.id, image_name, "Job enqueued");

        let key = job.result_key();
        let deadline = Instant::now() + self.config.max_wait;

        loop {
            if let Some(raw) = self.broker.get(&key).await? {
                // Consume the key before inspecting the value; a failed
                // delete leaks one TTL'd entry at worst
                if let Err(e) = self.broker.delete(&key).await {
                    warn!(job_id = %job.id, error = %e, "Failed to delete consumed result");
                }

                let result: Prediction = serde_json::from_str(&raw)
                    .map_err(|source| SubmitError::CorruptResult { job_id: job.id, source })?;

                if let Some(error) = result.error {
                    return Err(SubmitError::ComputeFailed(error));
                }

                debug!(job_id = %job.id, prediction = %result.prediction, "Result consumed");
                return Ok(result);
            }

            if Instant::now() >= deadline {
                return Err(SubmitError::Timeout {
                    job_id: job.id,
                    waited: self.config.max_wait,
                });
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
