//! Execution backend trait.

use std::future::Future;
use std::pin::Pin;

use queue_core::{ExecutionError, Payload};

/// Result type for execution backends.
pub type ExecuteResult = Result<Payload, ExecutionError>;

/// Future type for async execution backends.
pub type ExecuteFuture = Pin<Box<dyn Future<Output = ExecuteResult> + Send>>;

/// The external unit of work a job ultimately performs.
///
/// Workers call `execute` concurrently, each with its own job's payload.
pub trait ExecutionBackend: Send + Sync + 'static {
    /// Run the work described by `payload` and return its result.
    fn execute(&self, payload: &Payload) -> ExecuteFuture;
}

/// A simple function-based execution backend.
pub struct FnBackend<F>
where
    F: Fn(&Payload) -> ExecuteFuture + Send + Sync + 'static,
{
    execute: F,
}

impl<F> FnBackend<F>
where
    F: Fn(&Payload) -> ExecuteFuture + Send + Sync + 'static,
{
    /// Create a new function-based backend.
    pub fn new(execute: F) -> Self {
        Self { execute }
    }
}

impl<F> ExecutionBackend for FnBackend<F>
where
    F: Fn(&Payload) -> ExecuteFuture + Send + Sync + 'static,
{
    fn execute(&self, payload: &Payload) -> ExecuteFuture {
        (self.execute)(payload)
    }
}

/// Helper macro for creating a backend from an async block.
#[macro_export]
macro_rules! execution_backend {
    (|$payload:ident| $body:expr) => {
        $crate::FnBackend::new(|$payload: &$crate::Payload| {
            let $payload = $payload.clone();
            let future: $crate::ExecuteFuture = Box::pin(async move { $body });
            future
        })
    };
}
