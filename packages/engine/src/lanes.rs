//! One FIFO lane per priority level.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use queue_core::{JobId, LaneDepths, Priority};
use tokio::sync::Notify;

/// Four independently locked FIFO lanes plus a wakeup for idle workers.
///
/// Lanes only hold job IDs; the job itself lives in the registry. None of the
/// lane operations touch the registry lock.
pub(crate) struct PriorityLanes {
    lanes: [Mutex<VecDeque<JobId>>; 4],
    notify: Notify,
}

impl PriorityLanes {
    pub(crate) fn new() -> Self {
        Self {
            lanes: Default::default(),
            notify: Notify::new(),
        }
    }

    fn lane(&self, priority: Priority) -> MutexGuard<'_, VecDeque<JobId>> {
        self.lanes[priority.lane_index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a job to the tail of its lane and wake one idle worker.
    pub(crate) fn push(&self, priority: Priority, job_id: JobId) {
        self.lane(priority).push_back(job_id);
        self.notify.notify_one();
    }

    /// Take the head of the highest-priority non-empty lane.
    pub(crate) fn try_pop(&self) -> Option<(Priority, JobId)> {
        Priority::DISPATCH_ORDER
            .into_iter()
            .find_map(|priority| self.lane(priority).pop_front().map(|id| (priority, id)))
    }

    /// Like `try_pop`, but waits up to `wait` for a push when all lanes are
    /// empty. Returns `None` if nothing showed up in time.
    pub(crate) async fn pop(&self, wait: Duration) -> Option<(Priority, JobId)> {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(found) = self.try_pop() {
            return Some(found);
        }

        let _ = tokio::time::timeout(wait, notified).await;
        self.try_pop()
    }

    /// Drop a job from its lane, e.g. after it was cancelled.
    pub(crate) fn remove(&self, priority: Priority, job_id: JobId) -> bool {
        let mut lane = self.lane(priority);
        let before = lane.len();
        lane.retain(|id| *id != job_id);
        lane.len() != before
    }

    pub(crate) fn depths(&self) -> LaneDepths {
        let mut depths = LaneDepths::default();
        for priority in Priority::DISPATCH_ORDER {
            depths.set(priority, self.lane(priority).len());
        }
        depths
    }
}
