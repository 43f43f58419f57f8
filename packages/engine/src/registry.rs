//! Job registry: the single source of truth for job status.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::{ExecutionError, Job, JobId, JobSnapshot, JobSummary, Payload, Priority};

use crate::error::WorkerFault;
use crate::notifier::JobCallback;

struct JobEntry {
    job: Job,
    callback: Option<JobCallback>,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub(crate) queued: u64,
    pub(crate) processed: u64,
    pub(crate) failed: u64,
    pub(crate) cancelled: u64,
    pub(crate) processing_time: Duration,
}

#[derive(Default)]
struct RegistryState {
    jobs: HashMap<JobId, JobEntry>,
    counters: Counters,
}

/// What a worker needs to run a job it has committed to.
#[derive(Debug, Clone)]
pub(crate) struct DispatchedJob {
    pub(crate) id: JobId,
    pub(crate) priority: Priority,
    pub(crate) payload: Payload,
    pub(crate) timeout_secs: u64,
    pub(crate) created_at: DateTime<Utc>,
}

/// Outcome of trying to move a dequeued job into PROCESSING.
pub(crate) enum Begin {
    Started(DispatchedJob),
    /// The job left QUEUED while it sat in its lane (e.g. cancelled).
    Skipped,
    /// The lane referenced a job the registry no longer knows.
    Missing,
}

/// A job that just reached a terminal state, with its callback detached.
pub(crate) struct Finished {
    pub(crate) summary: JobSummary,
    pub(crate) callback: Option<JobCallback>,
}

/// Map of job ID to job behind one mutex.
///
/// Every status transition, timestamp and counter update goes through this
/// lock, so a snapshot never observes half of a transition. The lock is never
/// held while user code (backend or callbacks) runs.
#[derive(Default)]
pub(crate) struct JobRegistry {
    state: Mutex<RegistryState>,
}

impl JobRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, job: Job, callback: Option<JobCallback>) {
        let mut state = self.lock();
        state.counters.queued += 1;
        state.jobs.insert(job.id, JobEntry { job, callback });
    }

    /// QUEUED -> CANCELLED. `None` if the job is unknown or already past QUEUED.
    pub(crate) fn cancel(&self, job_id: JobId) -> Option<(Priority, Finished)> {
        let mut state = self.lock();
        let entry = state.jobs.get_mut(&job_id)?;
        entry.job.cancel().ok()?;

        let priority = entry.job.priority;
        let finished = Finished {
            summary: entry.job.summary(),
            callback: entry.callback.take(),
        };
        state.counters.cancelled += 1;
        Some((priority, finished))
    }

    /// The dispatch commit point: QUEUED -> PROCESSING under the lock.
    pub(crate) fn begin(&self, job_id: JobId, worker_id: &str) -> Begin {
        let mut state = self.lock();
        let Some(entry) = state.jobs.get_mut(&job_id) else {
            return Begin::Missing;
        };
        if entry.job.start(worker_id).is_err() {
            return Begin::Skipped;
        }

        let job = &entry.job;
        Begin::Started(DispatchedJob {
            id: job.id,
            priority: job.priority,
            payload: job.payload.clone(),
            timeout_secs: job.timeout_secs,
            created_at: job.created_at,
        })
    }

    /// PROCESSING -> COMPLETED or FAILED, depending on the backend outcome.
    pub(crate) fn finish(
        &self,
        job_id: JobId,
        outcome: Result<Payload, ExecutionError>,
    ) -> Result<Finished, WorkerFault> {
        let mut state = self.lock();
        let entry = state
            .jobs
            .get_mut(&job_id)
            .ok_or(WorkerFault::UnknownJob(job_id))?;

        let failed = outcome.is_err();
        let processing_time = match outcome {
            Ok(result) => entry.job.complete(result)?,
            Err(error) => entry.job.fail(error.to_string())?,
        };

        let finished = Finished {
            summary: entry.job.summary(),
            callback: entry.callback.take(),
        };

        let counters = &mut state.counters;
        counters.processed += 1;
        counters.processing_time += processing_time;
        if failed {
            counters.failed += 1;
        }
        Ok(finished)
    }

    pub(crate) fn snapshot(&self, job_id: JobId) -> Option<JobSnapshot> {
        self.lock().jobs.get(&job_id).map(|entry| entry.job.snapshot())
    }

    /// Counters plus the number of jobs still QUEUED or PROCESSING.
    pub(crate) fn counters(&self) -> (Counters, usize) {
        let state = self.lock();
        let active = state
            .jobs
            .values()
            .filter(|entry| !entry.job.status.is_terminal())
            .count();
        (state.counters, active)
    }

    /// Forget terminal jobs that finished before `cutoff`.
    pub(crate) fn prune_finished(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let before = state.jobs.len();
        state.jobs.retain(|_, entry| {
            !(entry.job.status.is_terminal()
                && entry.job.completed_at().is_some_and(|at| at < cutoff))
        });
        before - state.jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_core::JobStatusKind;
    use serde_json::json;

    fn queued(registry: &JobRegistry) -> JobId {
        let job = Job::new(Payload::new(), Priority::Normal, 30);
        let id = job.id;
        registry.insert(job, None);
        id
    }

    #[test]
    fn test_begin_commits_only_once() {
        let registry = JobRegistry::new();
        let id = queued(&registry);

        assert!(matches!(registry.begin(id, "worker-1"), Begin::Started(_)));
        assert!(matches!(registry.begin(id, "worker-2"), Begin::Skipped));
        assert!(matches!(registry.begin(JobId::new(), "worker-1"), Begin::Missing));

        let snapshot = registry.snapshot(id).unwrap();
        assert_eq!(snapshot.worker_id.as_deref(), Some("worker-1"));
    }

    #[test]
    fn test_finish_updates_counters() {
        let registry = JobRegistry::new();
        let ok = queued(&registry);
        let bad = queued(&registry);

        registry.begin(ok, "worker-1");
        registry.begin(bad, "worker-1");
        let mut result = Payload::new();
        result.insert("ok".into(), json!(true));
        registry.finish(ok, Ok(result)).unwrap();
        let failed = registry
            .finish(bad, Err(ExecutionError::failed("nope")))
            .unwrap();
        assert_eq!(failed.summary.status, JobStatusKind::Failed);
        assert_eq!(failed.summary.error.as_deref(), Some("nope"));

        let (counters, active) = registry.counters();
        assert_eq!(counters.queued, 2);
        assert_eq!(counters.processed, 2);
        assert_eq!(counters.failed, 1);
        assert_eq!(active, 0);
    }

    #[test]
    fn test_finish_twice_is_a_fault() {
        let registry = JobRegistry::new();
        let id = queued(&registry);
        registry.begin(id, "worker-1");
        registry.finish(id, Ok(Payload::new())).unwrap();

        let err = registry.finish(id, Err(ExecutionError::failed("late")));
        assert!(matches!(err, Err(WorkerFault::Transition(_))));
        assert_eq!(
            registry.snapshot(id).unwrap().status,
            JobStatusKind::Completed
        );
    }

    #[test]
    fn test_cancel_only_queued() {
        let registry = JobRegistry::new();
        let waiting = queued(&registry);
        let running = queued(&registry);
        registry.begin(running, "worker-1");

        assert!(registry.cancel(waiting).is_some());
        assert!(registry.cancel(waiting).is_none());
        assert!(registry.cancel(running).is_none());
        assert!(registry.cancel(JobId::new()).is_none());
        assert_eq!(registry.counters().0.cancelled, 1);
    }

    #[test]
    fn test_prune_keeps_active_jobs() {
        let registry = JobRegistry::new();
        let done = queued(&registry);
        let waiting = queued(&registry);
        registry.cancel(done);

        let removed = registry.prune_finished(Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(removed, 1);
        assert!(registry.snapshot(done).is_none());
        assert!(registry.snapshot(waiting).is_some());
    }
}
