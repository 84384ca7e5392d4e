//! HTTP surface: event ingestion, model management, health and metrics

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, QueryRejection},
        DefaultBodyLimit, Path, Query, State,
    },
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::detector::PredictOptions;
use crate::dispatch::InferenceDispatcher;
use crate::egress::{EventEgress, OutboundEvent};
use crate::error::{DispatchError, InferenceError, LoadError, MalformedEventError};
use crate::event::EventIngress;
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::model::{ModelHandle, ModelSummary};
use crate::observability::{ServerMetrics, StructuredLogger};

/// Default cap on inbound request bodies
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024; // 4MB

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ingress: EventIngress,
    pub dispatcher: InferenceDispatcher,
    pub egress: EventEgress,
    pub health_registry: HealthRegistry,
    pub metrics: ServerMetrics,
    pub logger: StructuredLogger,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(
        dispatcher: InferenceDispatcher,
        egress: EventEgress,
        health_registry: HealthRegistry,
        metrics: ServerMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            ingress: EventIngress::new(),
            dispatcher,
            egress,
            health_registry,
            metrics,
            logger,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Load and activate a model, keeping health, metrics and logs in step
    ///
    /// `None` reloads the last activated reference.
    pub async fn reload_model(
        &self,
        reference: Option<&str>,
    ) -> Result<Arc<ModelHandle>, LoadError> {
        let loader = self.dispatcher.loader();
        let outcome = loader.reload(reference).await;

        match &outcome {
            Ok(handle) => {
                let detector_type = handle.kind().map(|k| k.to_string()).unwrap_or_default();
                self.metrics.inc_model_reloads(true);
                self.metrics.set_model_info(handle.name(), handle.version(), &detector_type);
                self.logger.log_model_load(handle.storage_uri(), Some(handle.id()), None);
                self.health_registry.set_healthy(components::MODEL).await;
                self.health_registry.set_model_ready(true).await;
            }
            Err(e) => {
                let attempted = match reference {
                    Some(r) => r.to_string(),
                    None => loader
                        .latest()
                        .await
                        .map(|h| h.storage_uri().to_string())
                        .unwrap_or_default(),
                };
                let serving = loader.active().await.is_some();

                self.metrics.inc_model_reloads(false);
                self.logger.log_model_load(&attempted, None, Some(&e.to_string()));
                self.health_registry
                    .set_degraded(components::MODEL, format!("Model load failed: {}", e))
                    .await;
                self.health_registry.set_model_ready(serving).await;
            }
        }

        outcome
    }
}

/// Errors surfaced to HTTP clients as `{"error": ..., "code": ...}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    MalformedEvent(#[from] MalformedEventError),

    #[error("request body too large: {0}")]
    PayloadTooLarge(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unknown model '{0}'")]
    ModelNotFound(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MalformedEvent(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Dispatch(e) => match e {
                DispatchError::NoModelReady => StatusCode::SERVICE_UNAVAILABLE,
                DispatchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                DispatchError::Inference(InferenceError::InvalidPayload(_))
                | DispatchError::Inference(InferenceError::FeatureMismatch { .. }) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                DispatchError::Inference(InferenceError::Model(_))
                | DispatchError::TaskFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Load(e) => match e {
                LoadError::InvalidReference { .. } | LoadError::UnsupportedScheme(_) => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            },
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MalformedEvent(_) => "malformed_event",
            ApiError::PayloadTooLarge(_) => "payload_too_large",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::ModelNotFound(_) => "model_not_found",
            ApiError::Dispatch(e) => match e {
                DispatchError::NoModelReady => "no_model_ready",
                DispatchError::Timeout(_) => "inference_timeout",
                DispatchError::Inference(InferenceError::InvalidPayload(_)) => "invalid_payload",
                DispatchError::Inference(InferenceError::FeatureMismatch { .. }) => {
                    "feature_mismatch"
                }
                _ => "inference_failed",
            },
            ApiError::Load(_) => "model_load_failed",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(rejection.body_text())
        } else {
            ApiError::BadRequest(rejection.body_text())
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Model status document
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelStatusResponse {
    /// Serving handle, or the latest attempt when nothing serves
    #[serde(flatten)]
    pub model: ModelSummary,
    /// Latest load attempt when it differs from the serving handle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<ModelSummary>,
}

/// Optional body of a reload request
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ReloadRequest {
    pub storage_uri: Option<String>,
}

/// Score one CloudEvent and reply with its detection result
async fn handle_event(
    State(state): State<Arc<AppState>>,
    options: Result<Query<PredictOptions>, QueryRejection>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    state.metrics.inc_events_received();

    let Query(options) = options?;
    let body = body?;
    let envelope = match state.ingress.parse(&headers, &body) {
        Ok(envelope) => envelope,
        Err(e) => {
            state.metrics.inc_events_malformed();
            state.logger.log_rejected_event(&e.to_string());
            state
                .health_registry
                .set_degraded(components::INGRESS, format!("Rejected event: {}", e))
                .await;
            return Err(e.into());
        }
    };
    state.health_registry.set_healthy(components::INGRESS).await;

    let result = state.dispatcher.dispatch(&envelope, options).await?;
    state.logger.log_detection(&result);

    let mut response_headers = HeaderMap::new();
    if !result.is_pending() {
        match state.egress.prepare(&result, envelope.extensions()) {
            Ok(outbound) => {
                response_headers = ce_headers(&outbound);
                spawn_delivery(&state, outbound, result.event_id().to_string());
            }
            Err(e) => {
                state.metrics.inc_delivery_failures();
                state.logger.log_delivery_failure(result.event_id(), &e.to_string());
            }
        }
    } else {
        debug!(event_id = %result.event_id(), "Result pending, nothing emitted");
    }

    Ok((StatusCode::OK, response_headers, Json(result)).into_response())
}

/// Deliver on a detached task so the response never waits on the sink
fn spawn_delivery(state: &AppState, outbound: OutboundEvent, event_id: String) {
    let egress = state.egress.clone();
    let metrics = state.metrics.clone();
    let logger = state.logger.clone();
    let health = state.health_registry.clone();

    tokio::spawn(async move {
        match egress.deliver(&outbound).await {
            Ok(ack) => {
                metrics.inc_deliveries();
                health.set_healthy(components::EGRESS).await;
                debug!(
                    event_id = %event_id,
                    status = ack.status,
                    attempts = ack.attempts,
                    "Result delivered"
                );
            }
            Err(e) => {
                metrics.inc_delivery_failures();
                logger.log_delivery_failure(&event_id, &e.to_string());
                health
                    .set_degraded(components::EGRESS, format!("Delivery failed: {}", e))
                    .await;
            }
        }
    });
}

/// CloudEvent attributes of the outbound event, echoed on the response
fn ce_headers(event: &OutboundEvent) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in event.headers() {
        if !name.starts_with("ce-") {
            continue;
        }
        let name = HeaderName::from_bytes(name.as_bytes());
        if let (Ok(name), Ok(value)) = (name, HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
    headers
}

/// True when `name` addresses the model this server hosts
async fn is_served_name(state: &AppState, name: &str) -> bool {
    let loader = state.dispatcher.loader();
    if loader.display_name().await == name {
        return true;
    }
    match loader.latest().await {
        Some(latest) => latest.name() == name,
        // Nothing attempted yet: any name may claim the slot
        None => true,
    }
}

async fn model_status(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ModelStatusResponse>, ApiError> {
    if !is_served_name(&state, &name).await {
        return Err(ApiError::ModelNotFound(name));
    }

    let loader = state.dispatcher.loader();
    let active = loader.active().await;
    let latest = loader.latest().await;

    let response = match (active, latest) {
        (Some(active), Some(latest)) if active.id() != latest.id() || !latest.is_ready() => {
            ModelStatusResponse {
                model: active.summary(),
                last_attempt: Some(latest.summary()),
            }
        }
        (Some(active), _) => ModelStatusResponse {
            model: active.summary(),
            last_attempt: None,
        },
        (None, Some(latest)) => ModelStatusResponse {
            model: latest.summary(),
            last_attempt: None,
        },
        (None, None) => return Err(ApiError::Dispatch(DispatchError::NoModelReady)),
    };

    Ok(Json(response))
}

async fn reload_model(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<ModelSummary>, ApiError> {
    if !is_served_name(&state, &name).await {
        return Err(ApiError::ModelNotFound(name));
    }

    let body = body?;
    let request = if body.is_empty() {
        ReloadRequest::default()
    } else {
        serde_json::from_slice::<ReloadRequest>(&body)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?
    };

    info!(model = %name, storage_uri = ?request.storage_uri, "Reload requested");
    let handle = state.reload_model(request.storage_uri.as_deref()).await?;

    Ok(Json(handle.summary()))
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.max_body_bytes;

    Router::new()
        .route("/", post(handle_event))
        .route("/events", post(handle_event))
        .route("/v1/models/:name", get(model_status))
        .route("/v1/models/:name/reload", post(reload_model))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
pub async fn serve<F>(port: u16, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    Ok(())
}
