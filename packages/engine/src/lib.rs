//! Priority job queue engine.
//!
//! Jobs wait in four FIFO lanes, one per priority, and a pool of ractor
//! worker actors pulls them out highest lane first and runs them through an
//! [`ExecutionBackend`].
//!
//! # Architecture
//!
//! - `QueueEngine` - Facade for enqueueing, cancelling, querying and batching
//! - `Dispatcher` - Owns the lanes and the job registry
//! - `PoolSupervisor` - Keeps the worker pool at size and drains it on stop
//! - `WorkerActor` - Pulls jobs from the dispatcher and executes them
//!
//! # Usage
//!
//! ```ignore
//! use queue_engine::{EngineConfig, JobRequest, Priority, QueueEngine, execution_backend};
//!
//! let backend = execution_backend!(|payload| Ok(payload));
//! let engine = QueueEngine::new(EngineConfig::default(), backend)?;
//! engine.start_workers().await?;
//!
//! let job_id = engine.enqueue(JobRequest::new(json!({"prompt": "harbor at dusk"}))
//!     .with_priority(Priority::High))?;
//! let status = engine.wait_for_completion(job_id, Duration::from_secs(30)).await;
//!
//! engine.stop_workers(Duration::from_secs(5)).await;
//! ```

mod backend;
mod batch;
mod dispatcher;
mod engine;
mod error;
mod lanes;
mod messages;
mod notifier;
mod registry;
mod supervisor;
mod worker_actor;

pub use backend::{ExecuteFuture, ExecuteResult, ExecutionBackend, FnBackend};
pub use batch::BatchReport;
pub use engine::{JobRequest, QueueEngine};
pub use error::{BatchSubmitError, EngineError, WorkerFault};
pub use notifier::{CompletionCallback, JobCallback, ObserverId};

/// Re-export the domain types callers need alongside the engine.
pub use queue_core::{
    CallbackError, EngineConfig, ExecutionError, InvalidTransition, JobEvent, JobId, JobSnapshot,
    JobStatusKind, JobSummary, LaneDepths, Payload, Priority, QueueStats, ValidationError,
};
