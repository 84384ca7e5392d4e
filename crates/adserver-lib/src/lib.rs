//! Detector server library for CloudEvent-driven outlier and drift detection
//!
//! This crate provides the core functionality for:
//! - Loading detector artifacts from storage into swappable model handles
//! - Decoding CloudEvents and inference payload protocols
//! - Dispatching events to the active detector with bounded inference time
//! - Emitting detection results as CloudEvents
//! - Health checks and observability

pub mod detector;
pub mod dispatch;
pub mod egress;
pub mod error;
pub mod event;
pub mod health;
pub mod http;
pub mod model;
pub mod observability;
pub mod protocol;
pub mod result;

pub use detector::{Detector, DetectorAdapter, DetectorKind, OutlierType, PredictOptions};
pub use dispatch::{InferenceDispatcher, DEFAULT_INFERENCE_TIMEOUT};
pub use egress::{Ack, EventEgress, EventSink, HttpSink, HttpSinkConfig, LogSink, OutboundEvent};
pub use error::{DeliveryError, DispatchError, InferenceError, LoadError, MalformedEventError};
pub use event::{EventEnvelope, EventIngress};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use model::{ModelHandle, ModelLoader, ModelLoaderConfig, ModelStatus, ModelSummary};
pub use observability::{ServerMetrics, StructuredLogger};
pub use protocol::{Instances, Protocol};
pub use result::{DetectionResult, Verdict};
