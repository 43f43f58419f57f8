//! Engine-level error types.

use queue_core::{InvalidTransition, JobId, ValidationError};

/// Errors returned by engine lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("worker pool is already running")]
    AlreadyRunning,

    #[error("failed to spawn worker pool: {0}")]
    Spawn(#[from] ractor::SpawnErr),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Unexpected internal failure inside a worker loop, outside the backend call.
#[derive(Debug, thiserror::Error)]
pub enum WorkerFault {
    #[error("job {0} is not registered")]
    UnknownJob(JobId),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

/// A batch item was rejected. Jobs enqueued before it stay queued.
#[derive(Debug, thiserror::Error)]
#[error("batch item {index} rejected: {source}")]
pub struct BatchSubmitError {
    /// Position of the rejected request.
    pub index: usize,
    /// Jobs enqueued before the rejection, in submission order.
    pub enqueued: Vec<JobId>,
    #[source]
    pub source: ValidationError,
}
