//! Environment-driven configuration.
//!
//! Mirrors the settings surface of the reference deployment: Redis
//! coordinates, queue name, and the timing knobs of both sides of the
//! relay. Every value has a default, so a bare environment runs against a
//! local Redis.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::submitter::SubmitterConfig;
use crate::worker::WorkerPoolConfig;

/// Errors that can occur reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that failed to parse.
    #[error("Invalid value '{value}' for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Relay settings, read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Redis host (`REDIS_HOST`).
    pub redis_host: String,
    /// Redis port (`REDIS_PORT`).
    pub redis_port: u16,
    /// Redis logical database (`REDIS_DB`).
    pub redis_db: u32,
    /// Name of the shared work queue (`REDIS_QUEUE`).
    pub queue_name: String,
    /// Submitter poll interval (`POLL_INTERVAL_MS`).
    pub poll_interval: Duration,
    /// Submitter maximum wait for a result (`SUBMIT_TIMEOUT_SECS`).
    pub submit_timeout: Duration,
    /// Expiry on published results (`RESULT_TTL_SECS`).
    pub result_ttl: Duration,
    /// Number of workers to run (`NUM_WORKERS`).
    pub num_workers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_db: 0,
            queue_name: "service_queue".to_string(),
            poll_interval: Duration::from_millis(50),
            submit_timeout: Duration::from_secs(30),
            result_ttl: Duration::from_secs(3600),
            num_workers: 1,
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    ///
    /// Unset variables fall back to defaults; set-but-malformed values are
    /// errors rather than silent fallbacks.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Reads settings through an arbitrary lookup function.
    ///
    /// Lets tests supply values without mutating the process environment.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            redis_host: lookup("REDIS_HOST").unwrap_or(defaults.redis_host),
            redis_port: parse_var(&lookup, "REDIS_PORT", defaults.redis_port)?,
            redis_db: parse_var(&lookup, "REDIS_DB", defaults.redis_db)?,
            queue_name: lookup("REDIS_QUEUE").unwrap_or(defaults.queue_name),
            poll_interval: Duration::from_millis(parse_var(
                &lookup,
                "POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            submit_timeout: Duration::from_secs(parse_var(
                &lookup,
                "SUBMIT_TIMEOUT_SECS",
                defaults.submit_timeout.as_secs(),
            )?),
            result_ttl: Duration::from_secs(parse_var(
                &lookup,
                "RESULT_TTL_SECS",
                defaults.result_ttl.as_secs(),
            )?),
            num_workers: parse_var(&lookup, "NUM_WORKERS", defaults.num_workers)?,
        })
    }

    /// Connection URL for the configured Redis instance.
    pub fn redis_url(&self) -> String {
        format!(
            "redis://{}:{}/{}",
            self.redis_host, self.redis_port, self.redis_db
        )
    }

    /// Submitter configuration derived from these settings.
    pub fn submitter_config(&self) -> SubmitterConfig {
        SubmitterConfig::new(&self.queue_name)
            .with_poll_interval(self.poll_interval)
            .with_max_wait(self.submit_timeout)
    }

    /// Worker pool configuration derived from these settings.
    pub fn worker_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.num_workers)
            .with_queue_name(&self.queue_name)
            .with_result_ttl(Some(self.result_ttl))
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var,
            value,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
