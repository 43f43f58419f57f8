//! Job domain types for work items in the queue.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

use crate::error::{InvalidTransition, ValidationError};

/// Opaque caller-supplied data, and the shape of a backend result.
pub type Payload = Map<String, Value>;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }

    /// Last eight characters (from the random part), for log lines.
    pub fn short(&self) -> String {
        let full = self.0.to_string();
        full[full.len() - 8..].to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority level for job execution order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    /// Order in which lanes are scanned when a worker asks for work.
    pub const DISPATCH_ORDER: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Index of this priority's lane.
    pub fn lane_index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => Err(ValidationError::InvalidPriority(s.to_string())),
        }
    }
}

impl TryFrom<u8> for Priority {
    type Error = ValidationError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Normal),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Critical),
            other => Err(ValidationError::InvalidPriority(other.to_string())),
        }
    }
}

/// Flat status tag, used in snapshots, summaries and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatusKind {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatusKind {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatusKind::Completed | JobStatusKind::Failed | JobStatusKind::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatusKind::Queued => "queued",
            JobStatusKind::Processing => "processing",
            JobStatusKind::Completed => "completed",
            JobStatusKind::Failed => "failed",
            JobStatusKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status of a job in its lifecycle.
///
/// Timestamps and outcome data live on the variant that owns them, so a
/// result can only exist on a completed job and an error only on a failed one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting in its lane.
    #[default]
    Queued,
    /// Job is currently being executed by a worker.
    Processing {
        started_at: DateTime<Utc>,
        worker_id: String,
    },
    /// Job completed successfully.
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        result: Payload,
    },
    /// The execution backend reported a failure.
    Failed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        error: String,
    },
    /// Job was cancelled while still queued.
    Cancelled { completed_at: DateTime<Utc> },
}

impl JobStatus {
    pub fn kind(&self) -> JobStatusKind {
        match self {
            JobStatus::Queued => JobStatusKind::Queued,
            JobStatus::Processing { .. } => JobStatusKind::Processing,
            JobStatus::Completed { .. } => JobStatusKind::Completed,
            JobStatus::Failed { .. } => JobStatusKind::Failed,
            JobStatus::Cancelled { .. } => JobStatusKind::Cancelled,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// Returns the current time, but never earlier than `floor`.
fn stamp_after(floor: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(floor)
}

/// A job represents a unit of work to be executed by the queue engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Execution priority.
    pub priority: Priority,
    /// Job payload handed to the execution backend.
    pub payload: Payload,
    /// Advisory time budget, measured from `created_at`.
    pub timeout_secs: u64,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// Current status.
    #[serde(flatten)]
    pub status: JobStatus,
}

impl Job {
    /// Create a new queued job.
    pub fn new(payload: Payload, priority: Priority, timeout_secs: u64) -> Self {
        Self {
            id: JobId::new(),
            priority,
            payload,
            timeout_secs,
            created_at: Utc::now(),
            status: JobStatus::Queued,
        }
    }

    fn transition_error(&self, to: JobStatusKind) -> InvalidTransition {
        InvalidTransition {
            job_id: self.id.to_string(),
            from: self.status.kind(),
            to,
        }
    }

    /// QUEUED -> PROCESSING.
    pub fn start(&mut self, worker_id: impl Into<String>) -> Result<(), InvalidTransition> {
        if !matches!(self.status, JobStatus::Queued) {
            return Err(self.transition_error(JobStatusKind::Processing));
        }
        self.status = JobStatus::Processing {
            started_at: stamp_after(self.created_at),
            worker_id: worker_id.into(),
        };
        Ok(())
    }

    /// PROCESSING -> COMPLETED. Returns the processing time.
    pub fn complete(&mut self, result: Payload) -> Result<Duration, InvalidTransition> {
        let JobStatus::Processing { started_at, .. } = self.status else {
            return Err(self.transition_error(JobStatusKind::Completed));
        };
        let completed_at = stamp_after(started_at);
        self.status = JobStatus::Completed {
            started_at,
            completed_at,
            result,
        };
        Ok(elapsed(started_at, completed_at))
    }

    /// PROCESSING -> FAILED. Returns the processing time.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<Duration, InvalidTransition> {
        let JobStatus::Processing { started_at, .. } = self.status else {
            return Err(self.transition_error(JobStatusKind::Failed));
        };
        let completed_at = stamp_after(started_at);
        self.status = JobStatus::Failed {
            started_at,
            completed_at,
            error: error.into(),
        };
        Ok(elapsed(started_at, completed_at))
    }

    /// QUEUED -> CANCELLED.
    pub fn cancel(&mut self) -> Result<(), InvalidTransition> {
        if !matches!(self.status, JobStatus::Queued) {
            return Err(self.transition_error(JobStatusKind::Cancelled));
        }
        self.status = JobStatus::Cancelled {
            completed_at: stamp_after(self.created_at),
        };
        Ok(())
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match &self.status {
            JobStatus::Processing { started_at, .. }
            | JobStatus::Completed { started_at, .. }
            | JobStatus::Failed { started_at, .. } => Some(*started_at),
            JobStatus::Queued | JobStatus::Cancelled { .. } => None,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match &self.status {
            JobStatus::Completed { completed_at, .. }
            | JobStatus::Failed { completed_at, .. }
            | JobStatus::Cancelled { completed_at } => Some(*completed_at),
            JobStatus::Queued | JobStatus::Processing { .. } => None,
        }
    }

    pub fn result(&self) -> Option<&Payload> {
        match &self.status {
            JobStatus::Completed { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            JobStatus::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Time spent in PROCESSING; zero for jobs that never started.
    pub fn processing_time(&self) -> Duration {
        match (self.started_at(), self.completed_at()) {
            (Some(started), Some(completed)) => elapsed(started, completed),
            _ => Duration::ZERO,
        }
    }

    /// Point-in-time view returned by status queries.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            status: self.status.kind(),
            priority: self.priority,
            timeout_secs: self.timeout_secs,
            created_at: self.created_at,
            started_at: self.started_at(),
            completed_at: self.completed_at(),
            worker_id: match &self.status {
                JobStatus::Processing { worker_id, .. } => Some(worker_id.clone()),
                _ => None,
            },
            result: self.result().cloned(),
            error: self.error().map(str::to_string),
        }
    }

    /// Summary handed to completion callbacks.
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            status: self.status.kind(),
            result: self.result().cloned(),
            error: self.error().map(str::to_string),
            processing_time: self.processing_time(),
        }
    }
}

fn elapsed(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or_default()
}

/// Flattened status of a job as returned by `get_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatusKind,
    pub priority: Priority,
    pub timeout_secs: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// What completion callbacks receive when a job reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatusKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processing_time: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = Job::new(payload(json!({"prompt": "cat"})), Priority::High, 30);
        assert_eq!(job.status.kind(), JobStatusKind::Queued);
        assert!(job.started_at().is_none());

        job.start("worker-1").unwrap();
        assert_eq!(job.status.kind(), JobStatusKind::Processing);
        let started = job.started_at().unwrap();
        assert!(job.created_at <= started);

        job.complete(payload(json!({"images": 1}))).unwrap();
        let completed = job.completed_at().unwrap();
        assert!(started <= completed);
        assert_eq!(job.result().unwrap()["images"], json!(1));
        assert!(job.error().is_none());
        assert!(job.status.is_terminal());
    }

    #[test]
    fn test_failure_carries_error_only() {
        let mut job = Job::new(Payload::new(), Priority::Normal, 30);
        job.start("worker-1").unwrap();
        job.fail("gpu out of memory").unwrap();

        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatusKind::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("gpu out of memory"));
        assert!(snapshot.result.is_none());
        assert!(snapshot.completed_at.is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = Job::new(Payload::new(), Priority::Normal, 30);
        job.start("worker-1").unwrap();
        job.complete(payload(json!({"ok": true}))).unwrap();

        let err = job.fail("late failure").unwrap_err();
        assert_eq!(err.from, JobStatusKind::Completed);
        assert_eq!(err.to, JobStatusKind::Failed);
        assert!(job.cancel().is_err());
        assert!(job.start("worker-2").is_err());
        assert_eq!(job.result().unwrap()["ok"], json!(true));
    }

    #[test]
    fn test_cancel_only_from_queued() {
        let mut queued = Job::new(Payload::new(), Priority::Low, 30);
        queued.cancel().unwrap();
        assert_eq!(queued.status.kind(), JobStatusKind::Cancelled);
        assert!(queued.completed_at().is_some());
        assert!(queued.started_at().is_none());
        assert_eq!(queued.processing_time(), Duration::ZERO);

        let mut running = Job::new(Payload::new(), Priority::Low, 30);
        running.start("worker-1").unwrap();
        assert!(running.cancel().is_err());
        assert_eq!(running.status.kind(), JobStatusKind::Processing);
    }

    #[test]
    fn test_cannot_complete_without_starting() {
        let mut job = Job::new(Payload::new(), Priority::Low, 30);
        assert!(job.complete(Payload::new()).is_err());
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn test_short_ids_differ_within_same_millisecond() {
        let a = JobId::new();
        let b = JobId::new();
        assert_eq!(a.short().len(), 8);
        assert!(a.to_string().ends_with(&a.short()));
        assert_ne!(a.short(), b.short());
    }

    #[test]
    fn test_priority_parsing() {
        assert_eq!("CRITICAL".parse::<Priority>().unwrap(), Priority::Critical);
        assert_eq!(" high ".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!(Priority::try_from(0).unwrap(), Priority::Low);
        assert!(matches!(
            "urgent".parse::<Priority>(),
            Err(ValidationError::InvalidPriority(_))
        ));
        assert!(Priority::try_from(4).is_err());
    }

    #[test]
    fn test_dispatch_order_is_descending() {
        let order = Priority::DISPATCH_ORDER;
        assert!(order.windows(2).all(|pair| pair[0] > pair[1]));
    }

    #[test]
    fn test_status_serialization_is_tagged() {
        let mut job = Job::new(Payload::new(), Priority::Normal, 30);
        job.cancel().unwrap();
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["status"], json!("cancelled"));
        assert_eq!(value["priority"], json!("normal"));
    }
}
