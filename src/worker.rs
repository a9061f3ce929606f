//! Worker loop and pool for processing classification jobs.
//!
//! Each worker runs as an independent async task: it blocking-pops the
//! shared queue, invokes the classifier, and publishes the result under the
//! job's id. Multiple workers may run against the same queue; the broker's
//! atomic pop guarantees each job is claimed by exactly one of them, so
//! horizontal scaling needs no coordination code.
//!
//! # Failure policy
//!
//! - A malformed queue entry is logged and dropped; the loop continues.
//! - A failed classification publishes a sentinel error result, so the
//!   submitter fails fast instead of waiting out its timeout.
//! - Nothing that happens to one job ever crashes the loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::compute::Classifier;
use crate::job::{Job, Prediction};

/// Default bound on a single blocking pop, so the shutdown signal is
/// observed between waits.
const DEFAULT_DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default expiry on published results. Bounds the leak when a submitter
/// crashes after pushing but before consuming.
const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(3600);

/// Errors that can occur managing the worker pool.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// Name of the shared work queue.
    pub queue_name: String,
    /// Bound on a single blocking pop before re-checking for shutdown.
    pub dequeue_timeout: Duration,
    /// Expiry applied to published results. `None` publishes without one.
    pub result_ttl: Option<Duration>,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            queue_name: "service_queue".to_string(),
            dequeue_timeout: DEFAULT_DEQUEUE_TIMEOUT,
            result_ttl: Some(DEFAULT_RESULT_TTL),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the queue name.
    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Sets the dequeue timeout.
    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    /// Sets the result expiry.
    pub fn with_result_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.result_ttl = ttl;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently processing a job.
    pub active_workers: usize,
    /// Jobs classified successfully.
    pub jobs_processed: u64,
    /// Jobs whose classification failed (sentinel published).
    pub jobs_failed: u64,
    /// Queue entries dropped because they failed to parse.
    pub malformed_entries: u64,
    /// Average time spent per job.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of jobs handled (processed + failed).
    pub fn total_handled(&self) -> u64 {
        self.jobs_processed + self.jobs_failed
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    jobs_processed: AtomicU64,
    jobs_failed: AtomicU64,
    malformed_entries: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_processed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            malformed_entries: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record_processed(&self, duration: Duration) {
        self.jobs_processed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_failed(&self, duration: Duration) {
        self.jobs_failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_malformed(&self) {
        self.malformed_entries.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let processed = self.jobs_processed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let malformed = self.malformed_entries.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total = processed + failed;
        let average_duration = if total > 0 {
            Duration::from_millis(total_duration_ms / total)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            jobs_processed: processed,
            jobs_failed: failed,
            malformed_entries: malformed,
            average_job_duration: average_duration,
        }
    }
}

/// Pool of workers sharing one broker handle and one classifier.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    broker: Arc<dyn Broker>,
    classifier: Arc<dyn Classifier>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a new worker pool over the given broker and classifier.
    pub fn new(
        config: WorkerPoolConfig,
        broker: Arc<dyn Broker>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            broker,
            classifier,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts all workers in the pool.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::AlreadyRunning` if the pool is already running.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(WorkerError::AlreadyRunning);
        }

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                broker: Arc::clone(&self.broker),
                classifier: Arc::clone(&self.classifier),
                shutdown_rx: self.shutdown_tx.subscribe(),
                queue_name: self.config.queue_name.clone(),
                dequeue_timeout: self.config.dequeue_timeout,
                result_ttl: self.config.result_ttl,
                stats: Arc::clone(&self.stats),
            };

            let handle = tokio::spawn(async move {
                worker.run().await;
            });

            self.worker_handles.push(handle);
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(
            num_workers = self.config.num_workers,
            queue = %self.config.queue_name,
            "Worker pool started"
        );

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// Workers finish their in-flight job (including publishing its result)
    /// and dequeue nothing further.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::ShutdownTimeout` if workers do not stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), WorkerError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(WorkerError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Ignore send error - workers may have already stopped
        let _ = self.shutdown_tx.send(());

        let shutdown_future = async {
            for handle in self.worker_handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await {
            Ok(()) => {
                self.is_running.store(false, Ordering::SeqCst);
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => {
                self.is_running.store(false, Ordering::SeqCst);
                Err(WorkerError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }
}

/// A single worker processing jobs from the queue.
struct Worker {
    id: String,
    broker: Arc<dyn Broker>,
    classifier: Arc<dyn Classifier>,
    shutdown_rx: broadcast::Receiver<()>,
    queue_name: String,
    dequeue_timeout: Duration,
    result_ttl: Option<Duration>,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    /// Main worker loop.
    ///
    /// Pops and processes jobs until a shutdown signal is received. The pop
    /// is bounded by `dequeue_timeout` so the signal is observed between
    /// waits; an in-flight job always finishes and publishes first.
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => {
                    // Missed signals can only be shutdowns; check again
                    continue;
                }
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self
                .broker
                .blocking_pop(&self.queue_name, self.dequeue_timeout)
                .await
            {
                Ok(Some(entry)) => {
                    self.process_entry(&entry).await;
                }
                Ok(None) => {
                    // Queue empty; the pop already waited dequeue_timeout
                    debug!(worker_id = %self.id, "No jobs available");
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to dequeue job");
                    tokio::time::sleep(self.dequeue_timeout).await;
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Processes a single queue entry.
    async fn process_entry(&self, entry: &str) {
        let job: Job = match serde_json::from_str(entry) {
            Ok(job) => job,
            Err(e) => {
                warn!(worker_id = %self.id, error = %e, "Dropping malformed queue entry");
                self.stats.record_malformed();
                return;
            }
        };

        info!(
            worker_id = %self.id,
            job_id = %job.id,
            image_name = %job.image_name,
            "Processing job"
        );

        self.stats.increment_active();
        let start = Instant::now();

        let result = match self.classifier.classify(&job.image_name).await {
            Ok((label, score)) => Prediction::new(label, score),
            Err(e) => {
                warn!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    error = %e,
                    "Classification failed, publishing error result"
                );
                Prediction::failed(e.to_string())
            }
        };

        let duration = start.elapsed();
        self.stats.decrement_active();

        if result.is_failure() {
            self.stats.record_failed(duration);
        } else {
            self.stats.record_processed(duration);
            info!(
                worker_id = %self.id,
                job_id = %job.id,
                prediction = %result.prediction,
                duration_ms = duration.as_millis() as u64,
                "Job processed"
            );
        }

        self.publish(&job, &result).await;
    }

    /// Publishes a result under the job's id.
    ///
    /// Publish failures are terminal for this one job only: the submitter
    /// times out, and the loop moves on.
    async fn publish(&self, job: &Job, result: &Prediction) {
        let payload = match serde_json::to_string(result) {
            Ok(payload) => payload,
            Err(e) => {
                error!(worker_id = %self.id, job_id = %job.id, error = %e, "Failed to encode result");
                return;
            }
        };

        if let Err(e) = self
            .broker
            .set(&job.result_key(), &payload, self.result_ttl)
            .await
        {
            error!(worker_id = %self.id, job_id = %job.id, error = %e, "Failed to publish result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::compute::{ComputeError, StaticClassifier};
    use async_trait::async_trait;

    const QUEUE: &str = "worker_test_queue";

    /// Classifier that always fails.
    struct BrokenClassifier;

    #[async_trait]
    impl Classifier for BrokenClassifier {
        async fn classify(&self, _image_name: &str) -> Result<(String, f64), ComputeError> {
            Err(ComputeError::new("no model loaded"))
        }
    }

    fn test_config() -> WorkerPoolConfig {
        WorkerPoolConfig::new(1)
            .with_queue_name(QUEUE)
            .with_dequeue_timeout(Duration::from_millis(20))
            .with_shutdown_timeout(Duration::from_secs(5))
    }

    async fn wait_for_result(broker: &InMemoryBroker, key: &str) -> Prediction {
        for _ in 0..100 {
            if let Some(raw) = broker.get(key).await.unwrap() {
                return serde_json::from_str(&raw).expect("result should parse");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no result published under {key}");
    }

    #[tokio::test]
    async fn test_worker_publishes_result_under_job_id() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut pool = WorkerPool::new(
            test_config(),
            Arc::clone(&broker) as Arc<dyn Broker>,
            Arc::new(StaticClassifier::new("tabby", 0.92)),
        );
        pool.start().unwrap();

        let job = Job::new("cat.jpg");
        broker
            .push(QUEUE, &serde_json::to_string(&job).unwrap())
            .await
            .unwrap();

        let result = wait_for_result(&broker, &job.result_key()).await;
        assert_eq!(result.prediction, "tabby");
        assert!(!result.is_failure());

        pool.shutdown().await.unwrap();
        assert_eq!(pool.stats().jobs_processed, 1);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_dropped_and_loop_continues() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut pool = WorkerPool::new(
            test_config(),
            Arc::clone(&broker) as Arc<dyn Broker>,
            Arc::new(StaticClassifier::new("tabby", 0.92)),
        );
        pool.start().unwrap();

        broker.push(QUEUE, "definitely not json").await.unwrap();

        let job = Job::new("cat.jpg");
        broker
            .push(QUEUE, &serde_json::to_string(&job).unwrap())
            .await
            .unwrap();

        // The well-formed job behind the garbage still processes
        let result = wait_for_result(&broker, &job.result_key()).await;
        assert_eq!(result.prediction, "tabby");

        pool.shutdown().await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.malformed_entries, 1);
        assert_eq!(stats.jobs_processed, 1);
    }

    #[tokio::test]
    async fn test_failed_compute_publishes_sentinel() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut pool = WorkerPool::new(
            test_config(),
            Arc::clone(&broker) as Arc<dyn Broker>,
            Arc::new(BrokenClassifier),
        );
        pool.start().unwrap();

        let job = Job::new("cat.jpg");
        broker
            .push(QUEUE, &serde_json::to_string(&job).unwrap())
            .await
            .unwrap();

        let result = wait_for_result(&broker, &job.result_key()).await;
        assert!(result.is_failure());
        assert_eq!(result.error.as_deref(), Some("no model loaded"));

        pool.shutdown().await.unwrap();
        assert_eq!(pool.stats().jobs_failed, 1);
    }

    #[tokio::test]
    async fn test_result_carries_ttl() {
        let broker = Arc::new(InMemoryBroker::new());
        let config = test_config().with_result_ttl(Some(Duration::from_millis(50)));
        let mut pool = WorkerPool::new(
            config,
            Arc::clone(&broker) as Arc<dyn Broker>,
            Arc::new(StaticClassifier::new("tabby", 0.92)),
        );
        pool.start().unwrap();

        let job = Job::new("cat.jpg");
        broker
            .push(QUEUE, &serde_json::to_string(&job).unwrap())
            .await
            .unwrap();

        // Published, then expired without any consumer
        wait_for_result(&broker, &job.result_key()).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(broker.get(&job.result_key()).await.unwrap().is_none());

        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut pool = WorkerPool::new(
            test_config(),
            broker as Arc<dyn Broker>,
            Arc::new(StaticClassifier::new("tabby", 0.92)),
        );

        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(WorkerError::AlreadyRunning)));

        pool.shutdown().await.unwrap();
        assert!(!pool.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_without_start_is_rejected() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut pool = WorkerPool::new(
            test_config(),
            broker as Arc<dyn Broker>,
            Arc::new(StaticClassifier::new("tabby", 0.92)),
        );

        assert!(matches!(pool.shutdown().await, Err(WorkerError::NotRunning)));
    }

    #[test]
    fn test_pool_config_builder() {
        let config = WorkerPoolConfig::new(4)
            .with_queue_name("custom")
            .with_dequeue_timeout(Duration::from_secs(2))
            .with_result_ttl(None)
            .with_shutdown_timeout(Duration::from_secs(10));

        assert_eq!(config.num_workers, 4);
        assert_eq!(config.queue_name, "custom");
        assert_eq!(config.dequeue_timeout, Duration::from_secs(2));
        assert!(config.result_ttl.is_none());
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_pool_stats_totals() {
        let stats = SharedPoolStats::new();
        stats.record_processed(Duration::from_millis(100));
        stats.record_processed(Duration::from_millis(200));
        stats.record_failed(Duration::from_millis(60));
        stats.record_malformed();

        let view = stats.to_pool_stats(2);
        assert_eq!(view.num_workers, 2);
        assert_eq!(view.jobs_processed, 2);
        assert_eq!(view.jobs_failed, 1);
        assert_eq!(view.malformed_entries, 1);
        assert_eq!(view.total_handled(), 3);
        assert_eq!(view.average_job_duration, Duration::from_millis(120));
    }

    #[test]
    fn test_worker_error_display() {
        assert!(WorkerError::AlreadyRunning.to_string().contains("already running"));
        assert!(WorkerError::NotRunning.to_string().contains("not running"));
        assert!(WorkerError::ShutdownTimeout(Duration::from_secs(60))
            .to_string()
            .contains("60"));
    }
}
