//! Core domain types for the priority job queue.
//!
//! This crate contains the types shared by the engine and its callers:
//! - Job, JobStatus and Priority for work items
//! - JobSnapshot and JobSummary for status queries and completion callbacks
//! - QueueStats and EngineConfig
//! - Events for real-time updates

mod config;
mod error;
mod events;
mod job;
mod stats;

pub use config::EngineConfig;
pub use error::{CallbackError, ExecutionError, InvalidTransition, ValidationError};
pub use events::JobEvent;
pub use job::{Job, JobId, JobSnapshot, JobStatus, JobStatusKind, JobSummary, Payload, Priority};
pub use stats::{LaneDepths, QueueStats};
