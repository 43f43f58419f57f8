//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Configuration for queue engine behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of concurrent workers.
    pub worker_count: usize,
    /// How long an idle worker waits for work before checking the lanes again.
    pub poll_interval_ms: u64,
    /// Timeout given to jobs enqueued without one (seconds).
    pub default_timeout_secs: u64,
    /// How often `await_batch` re-reads job statuses.
    pub await_poll_interval_ms: u64,
    /// Grace period used when the engine stops its workers on its own.
    pub shutdown_grace_ms: u64,
    /// Abort backend calls that outlive the job's timeout.
    pub enforce_timeouts: bool,
    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            poll_interval_ms: 500,
            default_timeout_secs: 300,
            await_poll_interval_ms: 1000,
            shutdown_grace_ms: 5000,
            enforce_timeouts: false,
            event_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `QUEUE_*` environment variables.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`, keyed by env var name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "QUEUE_WORKER_COUNT")? {
            config.worker_count = v;
        }
        if let Some(v) = parse_var(&lookup, "QUEUE_POLL_INTERVAL_MS")? {
            config.poll_interval_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "QUEUE_DEFAULT_TIMEOUT_SECS")? {
            config.default_timeout_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "QUEUE_AWAIT_POLL_INTERVAL_MS")? {
            config.await_poll_interval_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "QUEUE_SHUTDOWN_GRACE_MS")? {
            config.shutdown_grace_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "QUEUE_ENFORCE_TIMEOUTS")? {
            config.enforce_timeouts = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.worker_count == 0 {
            return Err(ValidationError::InvalidConfig(
                "worker_count must be at least 1".into(),
            ));
        }
        if self.poll_interval_ms == 0 || self.await_poll_interval_ms == 0 {
            return Err(ValidationError::InvalidConfig(
                "poll intervals must be greater than zero".into(),
            ));
        }
        if self.default_timeout_secs == 0 {
            return Err(ValidationError::ZeroTimeout);
        }
        if self.event_capacity == 0 {
            return Err(ValidationError::InvalidConfig(
                "event_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn await_poll_interval(&self) -> Duration {
        Duration::from_millis(self.await_poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ValidationError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ValidationError::InvalidConfig(format!("{key}={raw:?} is not valid"))),
    }
}
