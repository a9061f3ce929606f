//! inferq: queue-mediated request/response relay for ML inference.
//!
//! Decouples a synchronous request front end from slow, resource-heavy
//! inference workers through a shared broker (Redis). A submitter enqueues
//! a job and polls for its result under a correlation id; workers
//! blocking-dequeue jobs, invoke an opaque classifier, and publish results
//! back under that id. The two sides never communicate directly.

// Core modules
pub mod broker;
pub mod cli;
pub mod compute;
pub mod config;
pub mod job;
pub mod submitter;
pub mod worker;

// Re-export the main types for convenience
pub use broker::{Broker, BrokerError, InMemoryBroker, RedisBroker};
pub use compute::{Classifier, ComputeError, StaticClassifier};
pub use config::{ConfigError, Settings};
pub use job::{Job, Prediction};
pub use submitter::{SubmitError, Submitter, SubmitterConfig};
pub use worker::{PoolStats, WorkerError, WorkerPool, WorkerPoolConfig};
