//! Completion callbacks.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use queue_core::{CallbackError, JobSummary};

/// Pool-wide observer, called for every job that reaches a terminal state.
pub type CompletionCallback = Arc<dyn Fn(&JobSummary) -> Result<(), CallbackError> + Send + Sync>;

/// Per-job callback. `FnOnce`, so it can only ever run once.
pub type JobCallback = Box<dyn FnOnce(&JobSummary) -> Result<(), CallbackError> + Send>;

/// Handle returned when registering an observer, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Fans terminal job summaries out to the job's own callback and to every
/// registered observer. A failing or panicking callback is logged and skipped.
#[derive(Default)]
pub(crate) struct CompletionNotifier {
    observers: RwLock<Vec<(ObserverId, CompletionCallback)>>,
    next_id: AtomicU64,
}

impl CompletionNotifier {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, callback: CompletionCallback) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback));
        id
    }

    pub(crate) fn remove(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    /// Run the job callback (if any), then every observer.
    ///
    /// Returns how many callbacks failed.
    pub(crate) fn deliver(&self, summary: &JobSummary, job_callback: Option<JobCallback>) -> usize {
        let mut failures = 0;

        if let Some(callback) = job_callback {
            if let Err(error) = invoke(|| callback(summary)) {
                tracing::warn!(job_id = %summary.id, %error, "Job callback failed");
                failures += 1;
            }
        }

        // Snapshot the list so observers may register or remove observers
        // without deadlocking on the lock.
        let observers: Vec<CompletionCallback> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for observer in observers {
            if let Err(error) = invoke(|| observer(summary)) {
                tracing::warn!(job_id = %summary.id, %error, "Completion callback failed");
                failures += 1;
            }
        }

        failures
    }
}

fn invoke<F>(callback: F) -> Result<(), CallbackError>
where
    F: FnOnce() -> Result<(), CallbackError>,
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(result) => result,
        Err(panic) => Err(CallbackError(format!(
            "callback panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_core::{JobId, JobStatusKind};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn summary() -> JobSummary {
        JobSummary {
            id: JobId::new(),
            status: JobStatusKind::Completed,
            result: None,
            error: None,
            processing_time: Duration::from_millis(5),
        }
    }

    fn counter(count: &Arc<AtomicUsize>) -> CompletionCallback {
        let count = count.clone();
        Arc::new(move |_: &JobSummary| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_failing_observer_does_not_block_others() {
        let notifier = CompletionNotifier::new();
        let count = Arc::new(AtomicUsize::new(0));

        notifier.add(Arc::new(|_: &JobSummary| -> Result<(), CallbackError> {
            Err(CallbackError::new("boom"))
        }));
        notifier.add(Arc::new(|_: &JobSummary| -> Result<(), CallbackError> {
            panic!("observer panicked")
        }));
        notifier.add(counter(&count));

        let failures = notifier.deliver(&summary(), None);
        assert_eq!(failures, 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_job_callback_runs_before_observers() {
        let notifier = CompletionNotifier::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        {
            let order = order.clone();
            notifier.add(Arc::new(move |_: &JobSummary| {
                order.lock().unwrap().push("observer");
                Ok(())
            }));
        }
        let job_order = order.clone();
        let job_callback: JobCallback = Box::new(move |_: &JobSummary| {
            job_order.lock().unwrap().push("job");
            Ok(())
        });

        assert_eq!(notifier.deliver(&summary(), Some(job_callback)), 0);
        assert_eq!(*order.lock().unwrap(), vec!["job", "observer"]);
    }

    #[test]
    fn test_removed_observer_is_not_called() {
        let notifier = CompletionNotifier::new();
        let count = Arc::new(AtomicUsize::new(0));
        let id = notifier.add(counter(&count));

        assert!(notifier.remove(id));
        assert!(!notifier.remove(id));
        notifier.deliver(&summary(), None);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
