//! Worker actor for executing jobs.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use queue_core::{ExecutionError, JobEvent, Payload};
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::backend::ExecutionBackend;
use crate::dispatcher::Dispatcher;
use crate::error::WorkerFault;
use crate::messages::WorkerMessage;
use crate::notifier::{CompletionNotifier, panic_message};
use crate::registry::DispatchedJob;

/// Everything a worker shares with its siblings and the engine.
pub(crate) struct WorkerContext {
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) notifier: Arc<CompletionNotifier>,
    pub(crate) backend: Arc<dyn ExecutionBackend>,
    /// Bounded wait for work before the worker polls again.
    pub(crate) poll_interval: Duration,
    pub(crate) enforce_timeouts: bool,
    /// Live workers summed over every pool, including one still draining.
    pub(crate) live_workers: Arc<AtomicUsize>,
}

/// State for the worker actor.
pub(crate) struct WorkerActorState {
    /// Unique worker ID.
    worker_id: String,
    ctx: Arc<WorkerContext>,
    /// Jobs this worker has run to a terminal state.
    jobs_run: u64,
}

/// Worker actor arguments.
pub(crate) struct WorkerArgs {
    pub(crate) worker_id: String,
    pub(crate) ctx: Arc<WorkerContext>,
}

/// Worker actor that pulls jobs from the dispatcher and executes them.
///
/// The loop is driven by `Poll` messages the worker sends to itself, so a
/// stop request is honoured between two jobs, never in the middle of one.
pub(crate) struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(worker_id = %args.worker_id, "Starting worker");
        args.ctx.dispatcher.broadcast(JobEvent::WorkerStarted {
            worker_id: args.worker_id.clone(),
            timestamp: Utc::now(),
        });

        Ok(WorkerActorState {
            worker_id: args.worker_id,
            ctx: args.ctx,
            jobs_run: 0,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        myself.send_message(WorkerMessage::Poll)?;
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            worker_id = %state.worker_id,
            jobs_run = state.jobs_run,
            "Worker stopped"
        );
        state.ctx.dispatcher.broadcast(JobEvent::WorkerStopped {
            worker_id: state.worker_id.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                match run_once(&state.worker_id, &state.ctx).await {
                    Ok(true) => state.jobs_run += 1,
                    Ok(false) => {}
                    Err(fault) => {
                        // Contained to this iteration; keep serving.
                        tracing::error!(worker_id = %state.worker_id, %fault, "Worker error");
                        tokio::time::sleep(state.ctx.poll_interval).await;
                    }
                }

                if myself.send_message(WorkerMessage::Poll).is_err() {
                    tracing::debug!(worker_id = %state.worker_id, "Worker mailbox closed");
                }
            }
        }

        Ok(())
    }
}

/// One pass of the worker loop. Returns whether a job was run.
async fn run_once(worker_id: &str, ctx: &WorkerContext) -> Result<bool, WorkerFault> {
    let Some(job) = ctx.dispatcher.next_job(worker_id, ctx.poll_interval).await else {
        return Ok(false);
    };

    let outcome = execute(ctx, &job).await;
    let finished = ctx.dispatcher.finish(job.id, outcome)?;
    ctx.notifier.deliver(&finished.summary, finished.callback);
    Ok(true)
}

/// Call the backend, turning panics and (optionally) timeouts into errors.
async fn execute(ctx: &WorkerContext, job: &DispatchedJob) -> Result<Payload, ExecutionError> {
    // A backend may panic while building its future, not only while polling it.
    let build = AssertUnwindSafe(|| ctx.backend.execute(&job.payload));
    let future = match std::panic::catch_unwind(build) {
        Ok(future) => future,
        Err(panic) => return Err(panicked(job, panic.as_ref())),
    };
    let call = AssertUnwindSafe(future).catch_unwind();

    let outcome = if ctx.enforce_timeouts {
        let elapsed = (Utc::now() - job.created_at).to_std().unwrap_or_default();
        let remaining = Duration::from_secs(job.timeout_secs).saturating_sub(elapsed);
        match tokio::time::timeout(remaining, call).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    job_id = %job.id.short(),
                    priority = %job.priority,
                    timeout_secs = job.timeout_secs,
                    "Job exceeded its timeout"
                );
                return Err(ExecutionError::TimedOut(job.timeout_secs));
            }
        }
    } else {
        call.await
    };

    outcome.unwrap_or_else(|panic| Err(panicked(job, panic.as_ref())))
}

fn panicked(job: &DispatchedJob, panic: &(dyn Any + Send)) -> ExecutionError {
    let message = panic_message(panic);
    tracing::error!(job_id = %job.id.short(), %message, "Execution backend panicked");
    ExecutionError::Panicked(message)
}
