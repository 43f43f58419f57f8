//! Runs the queue engine against a simulated generation backend.

mod simulated;

use std::time::Duration;

use queue_engine::{EngineConfig, JobRequest, JobStatusKind, Priority, QueueEngine};
use serde_json::json;

use simulated::SimulatedBackend;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = EngineConfig::from_env()?;
    tracing::info!(?config, "Starting queue demo");

    let engine = QueueEngine::new(config, SimulatedBackend::new(0.25))?;
    engine.add_completion_callback(|summary| {
        tracing::info!(
            job_id = %summary.id.short(),
            status = %summary.status,
            elapsed_ms = summary.processing_time.as_millis() as u64,
            "Job finished"
        );
        Ok(())
    });
    engine.start_workers().await?;

    let mut jobs = Vec::new();
    for i in 0..8 {
        let priority = if i < 2 { Priority::High } else { Priority::Normal };
        let request = JobRequest::new(json!({
            "content_type": "image",
            "prompt": format!("Test image {i}"),
            "dimensions": [512, 512],
            "batch_size": 1,
        }))
        .with_priority(priority);
        jobs.push(engine.enqueue(request)?);
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
    let stats = engine.stats();
    tracing::info!(
        queued = stats.lane_depths.total(),
        active = stats.active_jobs,
        processed = stats.total_processed,
        workers = stats.worker_count,
        "Queue stats"
    );

    let results = engine.await_batch(&jobs, Duration::from_secs(60)).await;
    let completed = results
        .values()
        .filter(|s| s.as_ref().is_some_and(|s| s.status == JobStatusKind::Completed))
        .count();
    tracing::info!(completed, total = jobs.len(), "Image jobs done");

    let videos = (1..=3).map(|batch_size| {
        json!({
            "content_type": "video",
            "prompt": format!("Clip with {batch_size} takes"),
            "batch_size": batch_size,
        })
    });
    let report = engine
        .run_batch_with_progress(videos, Priority::Low, Duration::from_secs(120), |done, total, summary| {
            tracing::info!(done, total, job_id = %summary.id.short(), "Batch progress");
        })
        .await?;
    tracing::info!(
        completion_rate = report.completion_rate,
        "Video batch done"
    );

    let stats = engine.stats();
    tracing::info!(
        processed = stats.total_processed,
        failed = stats.total_failed,
        success_rate = ?stats.success_rate(),
        avg_processing_time = ?stats.avg_processing_time(),
        "Final stats"
    );

    if !engine.shutdown().await {
        tracing::warn!("Some workers were still busy at shutdown");
    }
    Ok(())
}
