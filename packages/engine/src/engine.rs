//! The engine facade callers hold on to.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::{
    CallbackError, EngineConfig, Job, JobEvent, JobId, JobSnapshot, JobSummary, Payload, Priority,
    QueueStats, ValidationError,
};
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};

use crate::backend::ExecutionBackend;
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::notifier::{CompletionNotifier, JobCallback, ObserverId};
use crate::supervisor::WorkerPool;
use crate::worker_actor::WorkerContext;

/// A unit of work to enqueue.
///
/// ```ignore
/// let request = JobRequest::new(json!({"prompt": "a red fox", "batch_size": 2}))
///     .with_priority(Priority::High)
///     .on_complete(|summary| {
///         println!("{} finished: {}", summary.id, summary.status);
///         Ok(())
///     });
/// ```
pub struct JobRequest {
    payload: Value,
    priority: Priority,
    timeout_secs: Option<u64>,
    callback: Option<JobCallback>,
}

impl JobRequest {
    /// A NORMAL priority request with the engine's default timeout.
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            payload: payload.into(),
            priority: Priority::default(),
            timeout_secs: None,
            callback: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Advisory timeout in seconds, enforced only with `enforce_timeouts`.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// Called once when the job completes, fails or is cancelled.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&JobSummary) -> Result<(), CallbackError> + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }
}

impl From<Value> for JobRequest {
    fn from(payload: Value) -> Self {
        Self::new(payload)
    }
}

impl From<Payload> for JobRequest {
    fn from(payload: Payload) -> Self {
        Self::new(payload)
    }
}

impl std::fmt::Debug for JobRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRequest")
            .field("payload", &self.payload)
            .field("priority", &self.priority)
            .field("timeout_secs", &self.timeout_secs)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Priority job queue with a supervised pool of workers.
///
/// Jobs can be enqueued, queried and cancelled whether or not workers are
/// running. All methods take `&self`; wrap the engine in an `Arc` to share it
/// between tasks.
pub struct QueueEngine {
    pub(crate) config: EngineConfig,
    pub(crate) ctx: Arc<WorkerContext>,
    pool: Mutex<Option<WorkerPool>>,
}

impl QueueEngine {
    /// Build an engine around `backend`. No workers run until
    /// [`start_workers`](Self::start_workers).
    pub fn new<B>(config: EngineConfig, backend: B) -> Result<Self, ValidationError>
    where
        B: ExecutionBackend,
    {
        Self::with_backend(config, Arc::new(backend))
    }

    /// Like [`new`](Self::new), for a backend that is already shared.
    pub fn with_backend(
        config: EngineConfig,
        backend: Arc<dyn ExecutionBackend>,
    ) -> Result<Self, ValidationError> {
        config.validate()?;

        let ctx = Arc::new(WorkerContext {
            dispatcher: Arc::new(Dispatcher::new(config.event_capacity)),
            notifier: Arc::new(CompletionNotifier::new()),
            backend,
            poll_interval: config.poll_interval(),
            enforce_timeouts: config.enforce_timeouts,
            live_workers: Arc::new(AtomicUsize::new(0)),
        });

        Ok(Self {
            config,
            ctx,
            pool: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate `request` and queue it as a new job.
    pub fn enqueue(&self, request: JobRequest) -> Result<JobId, ValidationError> {
        let payload = match request.payload {
            Value::Object(map) => map,
            other => return Err(ValidationError::PayloadNotObject(value_kind(&other))),
        };

        let timeout_secs = request
            .timeout_secs
            .unwrap_or(self.config.default_timeout_secs);
        if timeout_secs == 0 {
            return Err(ValidationError::ZeroTimeout);
        }

        let job = Job::new(payload, request.priority, timeout_secs);
        Ok(self.ctx.dispatcher.enqueue(job, request.callback))
    }

    /// Cancel a job that has not started yet.
    ///
    /// Returns `false` if the job is unknown or already past QUEUED. The
    /// job's callback and the observers run before this returns.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.ctx.dispatcher.cancel(job_id) {
            Some(finished) => {
                self.ctx
                    .notifier
                    .deliver(&finished.summary, finished.callback);
                true
            }
            None => false,
        }
    }

    pub fn get_status(&self, job_id: JobId) -> Option<JobSnapshot> {
        self.ctx.dispatcher.snapshot(job_id)
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = self.ctx.dispatcher.stats();
        stats.worker_count = self.ctx.live_workers.load(Ordering::SeqCst);
        stats
    }

    /// Register an observer called for every job that reaches a terminal
    /// state from now on.
    pub fn add_completion_callback<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&JobSummary) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.ctx.notifier.add(Arc::new(callback))
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove_completion_callback(&self, id: ObserverId) -> bool {
        self.ctx.notifier.remove(id)
    }

    /// Subscribe to job and worker events. Slow receivers lose the oldest
    /// events once `event_capacity` is exceeded.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.ctx.dispatcher.subscribe()
    }

    /// Start `worker_count` workers.
    pub async fn start_workers(&self) -> Result<(), EngineError> {
        let mut pool = self.pool.lock().await;
        if pool.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        *pool = Some(WorkerPool::start(self.ctx.clone(), self.config.worker_count).await?);
        Ok(())
    }

    /// Stop the workers after their current jobs, waiting at most `grace`.
    ///
    /// Returns `true` when every worker exited in time (or none were
    /// running). A `false` return leaves stragglers to finish in the
    /// background; the engine can be started again either way.
    pub async fn stop_workers(&self, grace: Duration) -> bool {
        let Some(pool) = self.pool.lock().await.take() else {
            return true;
        };
        pool.stop(grace).await
    }

    /// [`stop_workers`](Self::stop_workers) with the configured grace period.
    pub async fn shutdown(&self) -> bool {
        self.stop_workers(self.config.shutdown_grace()).await
    }

    /// Drop terminal jobs that finished more than `older_than` ago.
    pub fn prune_finished(&self, older_than: chrono::Duration) -> usize {
        let cutoff = Utc::now()
            .checked_sub_signed(older_than)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let pruned = self.ctx.dispatcher.prune_finished(cutoff);
        if pruned > 0 {
            tracing::info!(pruned, "Pruned finished jobs");
        }
        pruned
    }
}

impl Drop for QueueEngine {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.get_mut().take() {
            pool.drain();
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FnBackend;
    use queue_core::JobStatusKind;
    use serde_json::json;

    fn engine() -> QueueEngine {
        let backend = FnBackend::new(|payload: &Payload| {
            let payload = payload.clone();
            let future: crate::ExecuteFuture = Box::pin(async move { Ok(payload) });
            future
        });
        QueueEngine::new(EngineConfig::default(), backend).unwrap()
    }

    #[test]
    fn test_enqueue_rejects_non_object_payload() {
        let engine = engine();
        let err = engine.enqueue(JobRequest::new(json!([1, 2, 3]))).unwrap_err();
        assert_eq!(err, ValidationError::PayloadNotObject("array"));
        assert_eq!(engine.stats().total_queued, 0);
    }

    #[test]
    fn test_enqueue_rejects_zero_timeout() {
        let engine = engine();
        let err = engine
            .enqueue(JobRequest::new(json!({})).with_timeout(0))
            .unwrap_err();
        assert_eq!(err, ValidationError::ZeroTimeout);
    }

    #[test]
    fn test_enqueue_applies_default_timeout() {
        let engine = engine();
        let id = engine
            .enqueue(JobRequest::new(json!({"prompt": "lighthouse"})))
            .unwrap();
        let status = engine.get_status(id).unwrap();
        assert_eq!(status.timeout_secs, 300);
        assert_eq!(status.priority, Priority::Normal);
        assert_eq!(status.status, JobStatusKind::Queued);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = EngineConfig {
            worker_count: 0,
            ..EngineConfig::default()
        };
        let backend = FnBackend::new(|_: &Payload| {
            let future: crate::ExecuteFuture = Box::pin(async { Ok(Payload::new()) });
            future
        });
        assert!(matches!(
            QueueEngine::new(config, backend),
            Err(ValidationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_cancel_runs_job_callback() {
        let engine = engine();
        let (tx, rx) = std::sync::mpsc::channel();
        let id = engine
            .enqueue(JobRequest::new(json!({})).on_complete(move |summary| {
                tx.send(summary.status).map_err(|e| CallbackError::new(e.to_string()))
            }))
            .unwrap();

        assert!(engine.cancel(id));
        assert_eq!(rx.try_recv().unwrap(), JobStatusKind::Cancelled);
        assert!(!engine.cancel(id));
        assert_eq!(engine.stats().total_cancelled, 1);
    }

    #[test]
    fn test_prune_keeps_recent_jobs() {
        let engine = engine();
        let id = engine.enqueue(JobRequest::new(json!({}))).unwrap();
        engine.cancel(id);

        assert_eq!(engine.prune_finished(chrono::Duration::hours(1)), 0);
        assert!(engine.get_status(id).is_some());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(engine.prune_finished(chrono::Duration::zero()), 1);
        assert!(engine.get_status(id).is_none());
    }
}
