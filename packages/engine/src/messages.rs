//! Message types for actor communication.

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Ask the dispatcher for a job, run it, then poll again.
    Poll,
}

/// Messages for the PoolSupervisor.
#[derive(Debug)]
pub enum PoolMessage {
    /// Stop every worker after its current job, then stop the supervisor.
    Drain,
}
