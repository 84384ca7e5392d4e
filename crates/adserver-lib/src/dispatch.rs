//! Inference dispatch
//!
//! Routes validated envelopes to the active detector and bounds the time
//! spent in inference.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::detector::{DetectorAdapter, PredictOptions};
use crate::error::DispatchError;
use crate::event::EventEnvelope;
use crate::model::ModelLoader;
use crate::observability::ServerMetrics;
use crate::result::DetectionResult;

/// Default bound on a single inference
pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Stateless router from envelopes to the active detector
///
/// Each call snapshots the active handle, so a concurrent reload never
/// changes the model an in-flight inference runs against.
#[derive(Clone)]
pub struct InferenceDispatcher {
    loader: Arc<ModelLoader>,
    adapter: DetectorAdapter,
    timeout: Duration,
    metrics: ServerMetrics,
}

impl InferenceDispatcher {
    pub fn new(
        loader: Arc<ModelLoader>,
        adapter: DetectorAdapter,
        timeout: Duration,
        metrics: ServerMetrics,
    ) -> Self {
        Self {
            loader,
            adapter,
            timeout,
            metrics,
        }
    }

    pub fn loader(&self) -> &Arc<ModelLoader> {
        &self.loader
    }

    pub fn adapter(&self) -> DetectorAdapter {
        self.adapter
    }

    /// Score one envelope, yielding exactly one result or one error
    pub async fn dispatch(
        &self,
        envelope: &EventEnvelope,
        options: PredictOptions,
    ) -> Result<DetectionResult, DispatchError> {
        let handle = self.loader.active().await.ok_or(DispatchError::NoModelReady)?;

        let adapter = self.adapter;
        let payload = envelope.data().to_vec();
        let event_id = envelope.id().to_string();

        debug!(event_id = %event_id, model_id = %handle.id(), "Dispatching event");

        let start = Instant::now();
        let task = tokio::task::spawn_blocking(move || {
            adapter.predict(&handle, &payload, &event_id, &options)
        });

        // The blocking task is left to finish on its own after a timeout
        let outcome = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => Err(DispatchError::Timeout(self.timeout.as_millis() as u64)),
            Ok(Err(join_error)) => Err(DispatchError::TaskFailed(join_error.to_string())),
            Ok(Ok(result)) => result.map_err(DispatchError::from),
        };

        self.metrics.observe_inference_latency(start.elapsed().as_secs_f64());

        match &outcome {
            Ok(result) => self.metrics.inc_detection(result.verdict().as_str()),
            Err(e) => {
                self.metrics.inc_inference_errors();
                warn!(event_id = %envelope.id(), error = %e, "Inference failed");
            }
        }

        outcome
    }
}
