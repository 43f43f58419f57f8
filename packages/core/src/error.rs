//! Error types shared by the engine and its callers.

use thiserror::Error;

use crate::job::JobStatusKind;

/// Rejection of a request before any job is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid priority: {0}")]
    InvalidPriority(String),

    #[error("payload must be a JSON object, got {0}")]
    PayloadNotObject(&'static str),

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure reported for one job by the execution backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(String),

    #[error("job exceeded its {0}s timeout")]
    TimedOut(u64),

    #[error("execution backend panicked: {0}")]
    Panicked(String),
}

impl ExecutionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<String> for ExecutionError {
    fn from(message: String) -> Self {
        Self::Failed(message)
    }
}

impl From<&str> for ExecutionError {
    fn from(message: &str) -> Self {
        Self::Failed(message.to_string())
    }
}

/// Failure raised by a completion callback. Logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CallbackError(pub String);

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// A status change the job state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job {job_id} cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub job_id: String,
    pub from: JobStatusKind,
    pub to: JobStatusKind,
}
