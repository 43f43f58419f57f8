//! Queue statistics snapshots.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::Priority;

/// Number of jobs waiting in each lane.
///
/// Each lane is read separately, so under concurrent enqueue and dispatch the
/// four numbers need not describe one single instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneDepths {
    pub critical: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl LaneDepths {
    pub fn get(&self, priority: Priority) -> usize {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
        }
    }

    pub fn set(&mut self, priority: Priority, depth: usize) {
        match priority {
            Priority::Critical => self.critical = depth,
            Priority::High => self.high = depth,
            Priority::Normal => self.normal = depth,
            Priority::Low => self.low = depth,
        }
    }

    /// Jobs waiting across all lanes.
    pub fn total(&self) -> usize {
        self.critical + self.high + self.normal + self.low
    }
}

/// Aggregate statistics for one engine instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    /// Jobs accepted by `enqueue` since the engine was created.
    pub total_queued: u64,
    /// Jobs that reached COMPLETED or FAILED.
    pub total_processed: u64,
    /// Jobs that reached FAILED.
    pub total_failed: u64,
    /// Jobs cancelled before a worker picked them up.
    pub total_cancelled: u64,
    /// Sum of processing time over all processed jobs.
    pub total_processing_time: Duration,
    /// Current depth of each lane.
    pub lane_depths: LaneDepths,
    /// Jobs currently QUEUED or PROCESSING.
    pub active_jobs: usize,
    /// Workers currently registered with the pool.
    pub worker_count: usize,
}

impl QueueStats {
    /// Jobs that reached COMPLETED.
    pub fn total_completed(&self) -> u64 {
        self.total_processed.saturating_sub(self.total_failed)
    }

    /// Share of processed jobs that completed, between 0.0 and 1.0.
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_processed == 0 {
            None
        } else {
            Some(self.total_completed() as f64 / self.total_processed as f64)
        }
    }

    /// Mean processing time of processed jobs.
    pub fn avg_processing_time(&self) -> Option<Duration> {
        u32::try_from(self.total_processed)
            .ok()
            .filter(|n| *n > 0)
            .map(|n| self.total_processing_time / n)
    }
}
