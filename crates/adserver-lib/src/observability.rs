//! Observability infrastructure for the detection server
//!
//! Provides:
//! - Prometheus metrics (event counts, inference latency, verdicts, deliveries, model info)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    GaugeVec, Histogram, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::result::DetectionResult;

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ServerMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct ServerMetricsInner {
    events_received: IntCounter,
    events_malformed: IntCounter,
    inference_latency_seconds: Histogram,
    detections: IntCounterVec,
    inference_errors: IntCounter,
    deliveries: IntCounter,
    delivery_failures: IntCounter,
    model_reloads: IntCounterVec,
    model_info: GaugeVec,
}

impl ServerMetricsInner {
    fn new() -> Self {
        Self {
            events_received: register_int_counter!(
                "adserver_events_received_total",
                "Total number of events received"
            )
            .expect("Failed to register events_received"),

            events_malformed: register_int_counter!(
                "adserver_events_malformed_total",
                "Total number of events rejected as malformed"
            )
            .expect("Failed to register events_malformed"),

            inference_latency_seconds: register_histogram!(
                "adserver_inference_latency_seconds",
                "Time spent running detector inference",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register inference_latency_seconds"),

            detections: register_int_counter_vec!(
                "adserver_detections_total",
                "Total number of detection results by verdict",
                &["verdict"]
            )
            .expect("Failed to register detections"),

            inference_errors: register_int_counter!(
                "adserver_inference_errors_total",
                "Total number of failed inferences"
            )
            .expect("Failed to register inference_errors"),

            deliveries: register_int_counter!(
                "adserver_deliveries_total",
                "Total number of result events delivered"
            )
            .expect("Failed to register deliveries"),

            delivery_failures: register_int_counter!(
                "adserver_delivery_failures_total",
                "Total number of result events that could not be delivered"
            )
            .expect("Failed to register delivery_failures"),

            model_reloads: register_int_counter_vec!(
                "adserver_model_reloads_total",
                "Total number of model load attempts by outcome",
                &["outcome"]
            )
            .expect("Failed to register model_reloads"),

            model_info: register_gauge_vec!(
                "adserver_model_info",
                "Information about the currently active detector",
                &["name", "version", "detector_type"]
            )
            .expect("Failed to register model_info"),
        }
    }
}

/// Server metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ServerMetrics {
    _private: (),
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ServerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ServerMetricsInner {
        GLOBAL_METRICS.get_or_init(ServerMetricsInner::new)
    }

    pub fn inc_events_received(&self) {
        self.inner().events_received.inc();
    }

    pub fn inc_events_malformed(&self) {
        self.inner().events_malformed.inc();
    }

    pub fn observe_inference_latency(&self, duration_secs: f64) {
        self.inner().inference_latency_seconds.observe(duration_secs);
    }

    pub fn inc_detection(&self, verdict: &str) {
        self.inner().detections.with_label_values(&[verdict]).inc();
    }

    pub fn inc_inference_errors(&self) {
        self.inner().inference_errors.inc();
    }

    pub fn inc_deliveries(&self) {
        self.inner().deliveries.inc();
    }

    pub fn inc_delivery_failures(&self) {
        self.inner().delivery_failures.inc();
    }

    /// Count a load attempt; `success` selects the outcome label
    pub fn inc_model_reloads(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.inner().model_reloads.with_label_values(&[outcome]).inc();
    }

    /// Update active model info
    pub fn set_model_info(&self, name: &str, version: &str, detector_type: &str) {
        // Only the active model is reported
        self.inner().model_info.reset();
        self.inner()
            .model_info
            .with_label_values(&[name, version, detector_type])
            .set(1.0);
    }

    /// Total delivery failures seen by this process
    pub fn delivery_failures(&self) -> u64 {
        self.inner().delivery_failures.get()
    }
}

/// Structured logger for server events
///
/// Provides consistent JSON-formatted logging for detections,
/// model lifecycle and delivery problems.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log a detection; alerting verdicts are logged at warn level
    pub fn log_detection(&self, result: &DetectionResult) {
        if result.verdict().is_alert() {
            warn!(
                event = "detection",
                instance = %self.instance,
                event_id = %result.event_id(),
                model_id = %result.model_id(),
                verdict = %result.verdict(),
                score = result.score(),
                "Anomalous input detected"
            );
        } else {
            info!(
                event = "detection",
                instance = %self.instance,
                event_id = %result.event_id(),
                model_id = %result.model_id(),
                verdict = %result.verdict(),
                score = result.score(),
                "Input scored"
            );
        }
    }

    /// Log a rejected event
    pub fn log_rejected_event(&self, reason: &str) {
        warn!(
            event = "event_rejected",
            instance = %self.instance,
            reason = %reason,
            "Rejected inbound event"
        );
    }

    /// Log a failed result delivery
    pub fn log_delivery_failure(&self, event_id: &str, error: &str) {
        warn!(
            event = "delivery_failed",
            instance = %self.instance,
            event_id = %event_id,
            error = %error,
            "Result event could not be delivered"
        );
    }

    /// Log server startup
    pub fn log_startup(&self, version: &str, protocol: &str, storage_uri: &str) {
        info!(
            event = "server_started",
            instance = %self.instance,
            server_version = %version,
            protocol = %protocol,
            storage_uri = %storage_uri,
            "Detector server started"
        );
    }

    /// Log server shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "server_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Detector server shutting down"
        );
    }

    /// Log a model load attempt
    pub fn log_model_load(&self, storage_uri: &str, model_id: Option<&str>, error: Option<&str>) {
        match (model_id, error) {
            (Some(model_id), None) => {
                info!(
                    event = "model_loaded",
                    instance = %self.instance,
                    storage_uri = %storage_uri,
                    model_id = %model_id,
                    "Detector model loaded"
                );
            }
            (_, error) => {
                warn!(
                    event = "model_load_failed",
                    instance = %self.instance,
                    storage_uri = %storage_uri,
                    error = ?error,
                    "Detector model failed to load"
                );
            }
        }
    }
}
