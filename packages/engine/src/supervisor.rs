//! Supervisor actor that owns the worker actors.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use ractor::concurrency::JoinHandle;
use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, SpawnErr, SupervisionEvent};

use crate::messages::{PoolMessage, WorkerMessage};
use crate::worker_actor::{WorkerActor, WorkerArgs, WorkerContext};

struct WorkerSlot {
    worker_id: String,
    actor: ActorRef<WorkerMessage>,
}

/// State for the pool supervisor.
pub(crate) struct PoolState {
    /// Live workers by actor ID.
    workers: HashMap<ActorId, WorkerSlot>,
    ctx: Arc<WorkerContext>,
    /// Set once a drain starts; failed workers are no longer replaced.
    draining: bool,
    /// Worker counter for unique IDs.
    spawned: u64,
    /// This pool's share of the shared `live_workers` gauge.
    published: usize,
}

impl PoolState {
    /// Generate a unique worker ID.
    fn next_worker_id(&mut self) -> String {
        self.spawned += 1;
        format!("worker-{}", self.spawned)
    }

    /// Move this pool's contribution to the gauge to its current size.
    ///
    /// Other pools (a previous one still draining) add their own share, so
    /// this only ever applies the difference.
    fn publish_count(&mut self) {
        let live = self.workers.len();
        if live > self.published {
            self.ctx
                .live_workers
                .fetch_add(live - self.published, Ordering::SeqCst);
        } else {
            self.ctx
                .live_workers
                .fetch_sub(self.published - live, Ordering::SeqCst);
        }
        self.published = live;
    }
}

/// Pool supervisor arguments.
pub(crate) struct PoolArgs {
    pub(crate) size: usize,
    pub(crate) ctx: Arc<WorkerContext>,
}

async fn spawn_worker(
    myself: &ActorRef<PoolMessage>,
    state: &mut PoolState,
) -> Result<(), SpawnErr> {
    let worker_id = state.next_worker_id();
    let args = WorkerArgs {
        worker_id: worker_id.clone(),
        ctx: state.ctx.clone(),
    };

    let (actor, _handle) = Actor::spawn_linked(None, WorkerActor, args, myself.get_cell()).await?;
    state
        .workers
        .insert(actor.get_id(), WorkerSlot { worker_id, actor });
    state.publish_count();
    Ok(())
}

/// Supervisor that keeps the pool at its configured size and drains it on
/// request. Workers are linked children, so a worker that panics shows up
/// here as a supervision event and is replaced.
pub(crate) struct PoolSupervisor;

impl Actor for PoolSupervisor {
    type Msg = PoolMessage;
    type State = PoolState;
    type Arguments = PoolArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let mut state = PoolState {
            workers: HashMap::new(),
            ctx: args.ctx,
            draining: false,
            spawned: 0,
            published: 0,
        };

        for _ in 0..args.size {
            if let Err(e) = spawn_worker(&myself, &mut state).await {
                // post_stop never runs for a failed start; give back our share.
                for slot in state.workers.values() {
                    slot.actor.stop(None);
                }
                state.workers.clear();
                state.publish_count();
                return Err(ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)));
            }
        }

        tracing::info!(workers = args.size, "Started worker pool");
        Ok(state)
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.workers.clear();
        state.publish_count();
        tracing::info!("All workers stopped");
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            PoolMessage::Drain => {
                tracing::info!(workers = state.workers.len(), "Stopping worker pool");
                state.draining = true;
                for slot in state.workers.values() {
                    slot.actor.stop(Some("pool draining".to_string()));
                }
                if state.workers.is_empty() {
                    myself.stop(None);
                }
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let lost = match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                state.workers.remove(&cell.get_id()).inspect(|slot| {
                    if !state.draining {
                        tracing::warn!(
                            worker_id = %slot.worker_id,
                            ?reason,
                            "Worker exited unexpectedly"
                        );
                    }
                })
            }
            SupervisionEvent::ActorFailed(cell, error) => {
                state.workers.remove(&cell.get_id()).inspect(|slot| {
                    tracing::error!(worker_id = %slot.worker_id, %error, "Worker failed");
                })
            }
            _ => None,
        };

        if lost.is_some() {
            if state.draining {
                state.publish_count();
                if state.workers.is_empty() {
                    myself.stop(None);
                }
            } else if let Err(e) = spawn_worker(&myself, state).await {
                state.publish_count();
                tracing::error!(error = %e, "Failed to replace worker");
            }
        }

        Ok(())
    }
}

/// Handle on a running worker pool.
pub(crate) struct WorkerPool {
    supervisor: ActorRef<PoolMessage>,
    handle: JoinHandle<()>,
}

impl WorkerPool {
    /// Spawn the supervisor, which spawns `size` workers.
    pub(crate) async fn start(ctx: Arc<WorkerContext>, size: usize) -> Result<Self, SpawnErr> {
        let (supervisor, handle) = Actor::spawn(None, PoolSupervisor, PoolArgs { size, ctx }).await?;
        Ok(Self { supervisor, handle })
    }

    /// Ask every worker to stop after its current job without waiting.
    pub(crate) fn drain(&self) {
        if self.supervisor.send_message(PoolMessage::Drain).is_err() {
            tracing::debug!("Worker pool supervisor already stopped");
        }
    }

    /// Ask every worker to stop after its current job and wait up to `grace`.
    ///
    /// Returns `false` if some workers were still busy when `grace` ran out;
    /// they are left to finish on their own.
    pub(crate) async fn stop(self, grace: Duration) -> bool {
        self.drain();

        match tokio::time::timeout(grace, self.handle).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(?grace, "Worker pool did not stop within grace period");
                false
            }
        }
    }
}
