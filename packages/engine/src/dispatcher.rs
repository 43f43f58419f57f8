//! Enqueue, cancel and priority dispatch.

use std::time::Duration;

use chrono::Utc;
use queue_core::{
    ExecutionError, Job, JobEvent, JobId, JobSnapshot, JobStatusKind, Payload, QueueStats,
};
use tokio::sync::broadcast;

use crate::error::WorkerFault;
use crate::lanes::PriorityLanes;
use crate::notifier::JobCallback;
use crate::registry::{Begin, DispatchedJob, Finished, JobRegistry};

/// Owns the lanes and the registry and moves jobs between them.
pub(crate) struct Dispatcher {
    lanes: PriorityLanes,
    registry: JobRegistry,
    event_tx: broadcast::Sender<JobEvent>,
}

impl Dispatcher {
    pub(crate) fn new(event_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity);
        Self {
            lanes: PriorityLanes::new(),
            registry: JobRegistry::new(),
            event_tx,
        }
    }

    /// Broadcast an event. Having no subscribers is fine.
    pub(crate) fn broadcast(&self, event: JobEvent) {
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Register a new QUEUED job and put it at the tail of its lane.
    pub(crate) fn enqueue(&self, job: Job, callback: Option<JobCallback>) -> JobId {
        let job_id = job.id;
        let priority = job.priority;

        // Registry first, so a worker popping the ID always finds the job.
        self.registry.insert(job, callback);
        self.lanes.push(priority, job_id);

        tracing::info!(job_id = %job_id.short(), %priority, "Job added to queue");
        self.broadcast(JobEvent::JobEnqueued {
            job_id,
            priority,
            timestamp: Utc::now(),
        });
        job_id
    }

    /// Cancel a QUEUED job. The caller delivers the returned notification.
    pub(crate) fn cancel(&self, job_id: JobId) -> Option<Finished> {
        let (priority, finished) = self.registry.cancel(job_id)?;
        self.lanes.remove(priority, job_id);

        tracing::info!(job_id = %job_id.short(), "Job cancelled");
        self.broadcast(JobEvent::JobCancelled {
            job_id,
            timestamp: Utc::now(),
        });
        Some(finished)
    }

    /// Hand the next job to `worker_id`, waiting up to `wait` if the lanes are
    /// empty. Jobs that are no longer QUEUED when popped are dropped here.
    pub(crate) async fn next_job(&self, worker_id: &str, wait: Duration) -> Option<DispatchedJob> {
        loop {
            let (priority, job_id) = self.lanes.pop(wait).await?;

            match self.registry.begin(job_id, worker_id) {
                Begin::Started(job) => {
                    tracing::info!(
                        job_id = %job_id.short(),
                        %priority,
                        worker_id,
                        "Processing job"
                    );
                    self.broadcast(JobEvent::JobStarted {
                        job_id,
                        worker_id: worker_id.to_string(),
                        timestamp: Utc::now(),
                    });
                    return Some(job);
                }
                Begin::Skipped => {
                    tracing::debug!(job_id = %job_id.short(), "Skipping job that is no longer queued");
                }
                Begin::Missing => {
                    tracing::warn!(job_id = %job_id.short(), "Dequeued job missing from registry");
                }
            }
        }
    }

    /// Record the backend outcome for a PROCESSING job.
    pub(crate) fn finish(
        &self,
        job_id: JobId,
        outcome: Result<Payload, ExecutionError>,
    ) -> Result<Finished, WorkerFault> {
        let finished = self.registry.finish(job_id, outcome)?;
        let summary = &finished.summary;
        let timestamp = Utc::now();

        match summary.status {
            JobStatusKind::Failed => {
                let error = summary.error.clone().unwrap_or_default();
                tracing::error!(job_id = %job_id.short(), %error, "Job failed");
                self.broadcast(JobEvent::JobFailed {
                    job_id,
                    error,
                    timestamp,
                });
            }
            _ => {
                tracing::info!(
                    job_id = %job_id.short(),
                    elapsed_ms = summary.processing_time.as_millis() as u64,
                    "Job completed successfully"
                );
                self.broadcast(JobEvent::JobCompleted {
                    job_id,
                    duration_ms: summary.processing_time.as_millis() as u64,
                    timestamp,
                });
            }
        }
        Ok(finished)
    }

    pub(crate) fn snapshot(&self, job_id: JobId) -> Option<JobSnapshot> {
        self.registry.snapshot(job_id)
    }

    /// Registry counters plus lane depths. `worker_count` is filled in by the
    /// caller.
    pub(crate) fn stats(&self) -> QueueStats {
        let (counters, active_jobs) = self.registry.counters();
        QueueStats {
            total_queued: counters.queued,
            total_processed: counters.processed,
            total_failed: counters.failed,
            total_cancelled: counters.cancelled,
            total_processing_time: counters.processing_time,
            lane_depths: self.lanes.depths(),
            active_jobs,
            worker_count: 0,
        }
    }

    pub(crate) fn prune_finished(&self, cutoff: chrono::DateTime<Utc>) -> usize {
        self.registry.prune_finished(cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_core::Priority;

    fn job(priority: Priority) -> Job {
        Job::new(Payload::new(), priority, 30)
    }

    #[tokio::test]
    async fn test_next_job_skips_cancelled() {
        let dispatcher = Dispatcher::new(16);
        let first = dispatcher.enqueue(job(Priority::Normal), None);
        let second = dispatcher.enqueue(job(Priority::Normal), None);

        assert!(dispatcher.cancel(first).is_some());
        let next = dispatcher
            .next_job("worker-1", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(next.id, second);
        assert!(
            dispatcher
                .next_job("worker-1", Duration::from_millis(10))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_events_follow_lifecycle() {
        let dispatcher = Dispatcher::new(16);
        let mut events = dispatcher.subscribe();

        let id = dispatcher.enqueue(job(Priority::High), None);
        let dispatched = dispatcher
            .next_job("worker-1", Duration::from_millis(10))
            .await
            .unwrap();
        dispatcher
            .finish(dispatched.id, Err(ExecutionError::failed("bad prompt")))
            .unwrap();

        assert!(matches!(events.recv().await.unwrap(), JobEvent::JobEnqueued { .. }));
        assert!(matches!(events.recv().await.unwrap(), JobEvent::JobStarted { .. }));
        let failed = events.recv().await.unwrap();
        assert_eq!(failed.job_id(), Some(id));
        assert!(matches!(failed, JobEvent::JobFailed { .. }));
    }

    #[tokio::test]
    async fn test_stats_reflect_lanes_and_counters() {
        let dispatcher = Dispatcher::new(16);
        dispatcher.enqueue(job(Priority::Critical), None);
        dispatcher.enqueue(job(Priority::Low), None);
        let cancelled = dispatcher.enqueue(job(Priority::Low), None);
        dispatcher.cancel(cancelled);

        let stats = dispatcher.stats();
        assert_eq!(stats.total_queued, 3);
        assert_eq!(stats.total_cancelled, 1);
        assert_eq!(stats.lane_depths.critical, 1);
        assert_eq!(stats.lane_depths.low, 1);
        assert_eq!(stats.active_jobs, 2);
    }
}
