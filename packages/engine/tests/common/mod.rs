#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use queue_engine::{
    EngineConfig, ExecuteFuture, ExecutionBackend, ExecutionError, JobId, JobStatusKind, Payload,
    QueueEngine,
};

/// Backend that records the `name` of every payload it starts, in order.
///
/// Payload knobs: `sleep_ms` delays the result, `fail` returns an error,
/// `panic` panics inside the future, `panic_early` panics before returning one.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    started: Arc<Mutex<Vec<String>>>,
}

impl RecordingBackend {
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

impl ExecutionBackend for RecordingBackend {
    fn execute(&self, payload: &Payload) -> ExecuteFuture {
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.started.lock().unwrap().push(name.clone());

        if payload.get("panic_early").and_then(Value::as_bool).unwrap_or(false) {
            panic!("backend refused {name}");
        }

        let sleep_ms = payload.get("sleep_ms").and_then(Value::as_u64).unwrap_or(0);
        let fail = payload.get("fail").and_then(Value::as_bool).unwrap_or(false);
        let panic = payload.get("panic").and_then(Value::as_bool).unwrap_or(false);

        Box::pin(async move {
            if sleep_ms > 0 {
                tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
            }
            if panic {
                panic!("backend exploded on {name}");
            }
            if fail {
                return Err(ExecutionError::failed(format!("{name} failed")));
            }

            let mut result = Payload::new();
            result.insert("name".to_string(), Value::String(name));
            result.insert("success".to_string(), Value::Bool(true));
            Ok(result)
        })
    }
}

/// Short intervals so tests never wait on the production defaults.
pub fn fast_config(workers: usize) -> EngineConfig {
    EngineConfig {
        worker_count: workers,
        poll_interval_ms: 20,
        await_poll_interval_ms: 10,
        shutdown_grace_ms: 2000,
        ..EngineConfig::default()
    }
}

pub fn setup_engine(workers: usize) -> (Arc<QueueEngine>, RecordingBackend) {
    setup_engine_with(fast_config(workers))
}

pub fn setup_engine_with(config: EngineConfig) -> (Arc<QueueEngine>, RecordingBackend) {
    let backend = RecordingBackend::default();
    let engine = QueueEngine::new(config, backend.clone()).unwrap();
    (Arc::new(engine), backend)
}

pub fn named(name: &str) -> Value {
    json!({ "name": name })
}

pub fn slow(name: &str, sleep_ms: u64) -> Value {
    json!({ "name": name, "sleep_ms": sleep_ms })
}

/// Poll until the job reaches `kind`. Panics after `timeout`.
pub async fn wait_for_status(engine: &QueueEngine, job_id: JobId, kind: JobStatusKind, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = engine.get_status(job_id).map(|s| s.status);
        if status == Some(kind) {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job {job_id} never reached {kind}, last seen {status:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
