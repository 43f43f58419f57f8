//! Batch submission and waiting.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use queue_core::{JobId, JobSnapshot, JobSummary, Priority};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::engine::{JobRequest, QueueEngine};
use crate::error::BatchSubmitError;

/// Outcome of [`QueueEngine::run_batch_with_progress`].
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Job IDs in submission order.
    pub job_ids: Vec<JobId>,
    /// Last observed status of every job.
    pub results: HashMap<JobId, Option<JobSnapshot>>,
    /// Batch jobs that reached a terminal state before the timeout.
    pub completed: usize,
    /// `completed / job_ids.len()`, or 0 for an empty batch.
    pub completion_rate: f64,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.completed == self.job_ids.len()
    }
}

impl QueueEngine {
    /// Enqueue every request at `priority`, in order.
    ///
    /// Not atomic: if a request is rejected, the ones before it stay queued
    /// and are listed in the error.
    pub fn submit_batch<I, R>(
        &self,
        requests: I,
        priority: Priority,
    ) -> Result<Vec<JobId>, BatchSubmitError>
    where
        I: IntoIterator<Item = R>,
        R: Into<JobRequest>,
    {
        let mut job_ids = Vec::new();

        for (index, request) in requests.into_iter().enumerate() {
            match self.enqueue(request.into().with_priority(priority)) {
                Ok(job_id) => job_ids.push(job_id),
                Err(source) => {
                    tracing::warn!(index, %source, "Batch item rejected");
                    return Err(BatchSubmitError {
                        index,
                        enqueued: job_ids,
                        source,
                    });
                }
            }
        }

        tracing::info!(jobs = job_ids.len(), %priority, "Added batch of jobs");
        Ok(job_ids)
    }

    /// Poll until every job is terminal or `timeout` elapses, then report the
    /// last observed status of each. Unknown IDs map to `None` and do not hold
    /// up the wait.
    pub async fn await_batch(
        &self,
        job_ids: &[JobId],
        timeout: Duration,
    ) -> HashMap<JobId, Option<JobSnapshot>> {
        let deadline = Instant::now() + timeout;
        let interval = self.config.await_poll_interval();

        loop {
            let statuses: HashMap<JobId, Option<JobSnapshot>> = job_ids
                .iter()
                .map(|&job_id| (job_id, self.get_status(job_id)))
                .collect();

            let pending = statuses
                .values()
                .filter(|status| status.as_ref().is_some_and(|s| !s.is_terminal()))
                .count();

            let now = Instant::now();
            if pending == 0 || now >= deadline {
                if pending > 0 {
                    tracing::warn!(pending, total = job_ids.len(), "Batch wait timed out");
                }
                return statuses;
            }

            tokio::time::sleep(interval.min(deadline - now)).await;
        }
    }

    /// Single-job form of [`await_batch`](Self::await_batch).
    pub async fn wait_for_completion(&self, job_id: JobId, timeout: Duration) -> Option<JobSnapshot> {
        self.await_batch(&[job_id], timeout)
            .await
            .remove(&job_id)
            .flatten()
    }

    /// Submit a batch and report each terminal batch job to `on_progress` as
    /// `(done, total, summary)`, in completion order, until all are done or
    /// `timeout` elapses.
    ///
    /// `on_progress` runs on the calling task, not on a worker.
    pub async fn run_batch_with_progress<I, R, F>(
        &self,
        requests: I,
        priority: Priority,
        timeout: Duration,
        mut on_progress: F,
    ) -> Result<BatchReport, BatchSubmitError>
    where
        I: IntoIterator<Item = R>,
        R: Into<JobRequest>,
        F: FnMut(usize, usize, &JobSummary),
    {
        let deadline = Instant::now() + timeout;

        // Registered before submitting so no completion can slip past.
        let (tx, mut rx) = mpsc::unbounded_channel();
        let observer = self.add_completion_callback(move |summary: &JobSummary| {
            // The receiver is gone once the batch is over; nothing to do then.
            let _ = tx.send(summary.clone());
            Ok(())
        });

        let job_ids = match self.submit_batch(requests, priority) {
            Ok(job_ids) => job_ids,
            Err(e) => {
                self.remove_completion_callback(observer);
                return Err(e);
            }
        };

        let total = job_ids.len();
        let mut pending: HashSet<JobId> = job_ids.iter().copied().collect();
        let mut done = 0;

        while done < total {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(summary)) => {
                    if pending.remove(&summary.id) {
                        done += 1;
                        on_progress(done, total, &summary);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(done, total, "Batch did not finish before the timeout");
                    break;
                }
            }
        }

        self.remove_completion_callback(observer);

        let results = job_ids
            .iter()
            .map(|&job_id| (job_id, self.get_status(job_id)))
            .collect();
        let completion_rate = if total > 0 {
            done as f64 / total as f64
        } else {
            0.0
        };

        tracing::info!(done, total, "Batch finished");
        Ok(BatchReport {
            job_ids,
            results,
            completed: done,
            completion_rate,
        })
    }
}
