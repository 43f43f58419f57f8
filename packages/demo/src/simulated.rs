//! Stand-in for a content generation service.

use std::time::Duration;

use chrono::Utc;
use queue_engine::{ExecuteFuture, ExecutionBackend, Payload};
use serde_json::{Value, json};

/// Longest simulated generation, before scaling.
const MAX_SIMULATED_SECS: f64 = 30.0;

/// Pretends to generate images or videos, sleeping roughly as long as a real
/// model would for the requested batch size.
pub struct SimulatedBackend {
    /// Multiplier applied to every sleep, so demos don't take minutes.
    time_scale: f64,
}

impl SimulatedBackend {
    pub fn new(time_scale: f64) -> Self {
        Self { time_scale }
    }
}

/// Estimated generation time in seconds: videos cost five times as much as
/// images and larger batches cost slightly more per item.
pub fn estimated_secs(content_type: &str, batch_size: u64) -> f64 {
    let base = match content_type {
        "video" => 10.0,
        _ => 2.0,
    };
    let batch = batch_size as f64;
    base * batch * (0.8 + 0.4 * (batch / 10.0))
}

impl ExecutionBackend for SimulatedBackend {
    fn execute(&self, payload: &Payload) -> ExecuteFuture {
        let content_type = payload
            .get("content_type")
            .and_then(Value::as_str)
            .unwrap_or("image")
            .to_string();
        let batch_size = payload.get("batch_size").and_then(Value::as_u64).unwrap_or(1);

        let processing_time = estimated_secs(&content_type, batch_size);
        let sleep = Duration::from_secs_f64(processing_time.min(MAX_SIMULATED_SECS) * self.time_scale);

        Box::pin(async move {
            tracing::debug!(%content_type, batch_size, ?sleep, "Generating");
            tokio::time::sleep(sleep).await;

            let result = json!({
                "success": true,
                "output_count": batch_size,
                "processing_time": processing_time,
                "timestamp": Utc::now().to_rfc3339(),
            });
            match result {
                Value::Object(map) => Ok(map),
                _ => Ok(Payload::new()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimated_secs() {
        assert!((estimated_secs("image", 1) - 1.68).abs() < 1e-9);
        assert!((estimated_secs("video", 1) - 8.4).abs() < 1e-9);
        assert!((estimated_secs("image", 10) - 24.0).abs() < 1e-9);
        assert_eq!(estimated_secs("sketch", 2), estimated_secs("image", 2));
    }

    #[tokio::test]
    async fn test_result_shape() {
        let backend = SimulatedBackend::new(0.0);
        let mut payload = Payload::new();
        payload.insert("content_type".into(), json!("video"));
        payload.insert("batch_size".into(), json!(3));

        let result = backend.execute(&payload).await.unwrap();
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["output_count"], json!(3));
        assert!(result["processing_time"].as_f64().unwrap() > 0.0);
        assert!(result["timestamp"].is_string());
    }
}
