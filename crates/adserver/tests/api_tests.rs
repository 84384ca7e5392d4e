//! Integration tests for the detector server HTTP API

use adserver_lib::{
    health::{components, ComponentStatus, HealthRegistry},
    http::{create_router, AppState},
    observability::{ServerMetrics, StructuredLogger},
    DetectorAdapter, EventEgress, HttpSink, HttpSinkConfig, InferenceDispatcher, ModelLoader,
    ModelLoaderConfig, Protocol,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const OUTLIER_ARTIFACT: &str = r#"{
    "name": "iris-od",
    "version": "1",
    "detector_type": "outlier",
    "backend": {"type": "zscore", "mean": [5.8, 3.0], "std": [0.8, 0.4], "threshold": 3.0}
}"#;

const DRIFT_ARTIFACT: &str = r#"{
    "name": "iris-cd",
    "detector_type": "drift",
    "backend": {"type": "mean_shift", "mean": [5.8, 3.0], "std": [0.8, 0.4], "batch_size": 2}
}"#;

fn write_artifact(dir: &TempDir, body: &str) -> String {
    std::fs::write(dir.path().join("detector.json"), body).unwrap();
    dir.path().display().to_string()
}

async fn build_state(egress: EventEgress, reference: Option<&str>) -> Arc<AppState> {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::MODEL).await;
    health_registry.register(components::INGRESS).await;
    health_registry.register(components::EGRESS).await;

    let metrics = ServerMetrics::new();
    let loader = Arc::new(ModelLoader::new(ModelLoaderConfig::default()).unwrap());
    let dispatcher = InferenceDispatcher::new(
        loader,
        DetectorAdapter::new(Protocol::Tensorflow),
        Duration::from_secs(5),
        metrics.clone(),
    );

    let state = Arc::new(AppState::new(
        dispatcher,
        egress,
        health_registry,
        metrics,
        StructuredLogger::new("test"),
    ));

    if let Some(reference) = reference {
        state.reload_model(Some(reference)).await.unwrap();
    }
    state
}

async fn app_with_model(dir: &TempDir, artifact: &str) -> Router {
    let reference = write_artifact(dir, artifact);
    create_router(build_state(EventEgress::logging(), Some(&reference)).await)
}

fn binary_event(uri: &str, id: &str, data: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("ce-id", id)
        .header("ce-type", "io.seldon.serving.inference.request")
        .header("ce-source", "io.seldon.serving.iris")
        .header("ce-specversion", "1.0")
        .body(Body::from(data.to_string()))
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_healthz_and_readyz_without_model() {
    let app = create_router(build_state(EventEgress::logging(), None).await);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = json_body(response).await;
    assert_eq!(body["ready"], false);
    assert_eq!(body["reason"], "No detector model loaded");
}

#[tokio::test]
async fn test_event_without_model_is_503() {
    let app = create_router(build_state(EventEgress::logging(), None).await);

    let response = app
        .oneshot(binary_event("/", "evt-1", r#"{"instances": [[5.8, 3.0]]}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["code"], "no_model_ready");
}

#[tokio::test]
async fn test_malformed_event_is_400() {
    let dir = TempDir::new().unwrap();
    let app = app_with_model(&dir, OUTLIER_ARTIFACT).await;

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("ce-type", "io.seldon.serving.inference.request")
        .header("ce-specversion", "1.0")
        .body(Body::from(r#"{"instances": [[5.8, 3.0]]}"#))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["code"], "malformed_event");
    assert!(body["error"].as_str().unwrap().contains("id"));
}

#[tokio::test]
async fn test_invalid_query_options_are_json_400() {
    let dir = TempDir::new().unwrap();
    let app = app_with_model(&dir, OUTLIER_ARTIFACT).await;

    for uri in ["/?outlier_type=bogus", "/?return_instance_score=yes"] {
        let response = app
            .clone()
            .oneshot(binary_event(uri, "evt-query", r#"{"instances": [[5.8, 3.0]]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        let body = json_body(response).await;
        assert_eq!(body["code"], "bad_request");
        assert!(body["error"].is_string());
    }
}

#[tokio::test]
async fn test_ingress_health_follows_rejected_events() {
    let dir = TempDir::new().unwrap();
    let reference = write_artifact(&dir, OUTLIER_ARTIFACT);
    let state = build_state(EventEgress::logging(), Some(&reference)).await;
    let app = create_router(state.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("ce-type", "io.seldon.serving.inference.request")
        .header("ce-specversion", "1.0")
        .body(Body::from(r#"{"instances": [[5.8, 3.0]]}"#))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let health = state.health_registry.health().await;
    let ingress = &health.components[components::INGRESS];
    assert_eq!(ingress.status, ComponentStatus::Degraded);
    assert!(ingress.message.as_deref().unwrap().starts_with("Rejected event"));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "degraded");

    let response = app
        .oneshot(binary_event("/", "evt-ok", r#"{"instances": [[5.8, 3.0]]}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = state.health_registry.health().await;
    assert_eq!(health.components[components::INGRESS].status, ComponentStatus::Healthy);
}

#[tokio::test]
async fn test_outlier_event_scored_with_cloudevent_headers() {
    let dir = TempDir::new().unwrap();
    let app = app_with_model(&dir, OUTLIER_ARTIFACT).await;

    let response = app
        .oneshot(binary_event("/", "evt-42", r#"{"instances": [[5.8, 3.0], [12.0, 9.0]]}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("ce-causationid").unwrap(), "evt-42");
    assert_eq!(response.headers().get("ce-specversion").unwrap(), "1.0");
    assert!(response.headers().get("ce-id").is_some());

    let body = json_body(response).await;
    assert_eq!(body["verdict"], "outlier");
    assert_eq!(body["event_id"], "evt-42");
    assert_eq!(body["details"]["detector_type"], "outlier");
    assert_eq!(body["details"]["is_flagged"], json!([0, 1]));
}

#[tokio::test]
async fn test_structured_event_on_events_route() {
    let dir = TempDir::new().unwrap();
    let app = app_with_model(&dir, OUTLIER_ARTIFACT).await;

    let event = json!({
        "specversion": "1.0",
        "id": "evt-structured",
        "type": "io.seldon.serving.inference.request",
        "source": "io.seldon.serving.iris",
        "datacontenttype": "application/json",
        "data": {"instances": [[5.9, 3.1]]}
    });
    let request = Request::builder()
        .method("POST")
        .uri("/events")
        .header("content-type", "application/cloudevents+json")
        .body(Body::from(event.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["verdict"], "inlier");
    assert_eq!(body["event_id"], "evt-structured");
}

#[tokio::test]
async fn test_query_options_suppress_scores() {
    let dir = TempDir::new().unwrap();
    let app = app_with_model(&dir, OUTLIER_ARTIFACT).await;

    let response = app
        .oneshot(binary_event(
            "/?return_instance_score=false&return_feature_score=false",
            "evt-quiet",
            r#"{"instances": [[5.8, 3.0]]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["details"]["instance_score"].is_null());
    assert!(body["details"]["feature_score"].is_null());
}

#[tokio::test]
async fn test_invalid_payload_is_422() {
    let dir = TempDir::new().unwrap();
    let app = app_with_model(&dir, OUTLIER_ARTIFACT).await;

    let response = app
        .oneshot(binary_event("/", "evt-bad", r#"{"instances": [[1.0, 2.0, 3.0]]}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["code"], "feature_mismatch");
}

#[tokio::test]
async fn test_oversized_body_is_413() {
    let dir = TempDir::new().unwrap();
    let reference = write_artifact(&dir, OUTLIER_ARTIFACT);
    let state = build_state(EventEgress::logging(), Some(&reference)).await;
    let state = Arc::new((*state).clone().with_max_body_bytes(32));
    let app = create_router(state);

    let data = format!(r#"{{"instances": [{}]}}"#, vec!["[5.8, 3.0]"; 20].join(", "));
    let response = app.oneshot(binary_event("/", "evt-big", &data)).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = json_body(response).await;
    assert_eq!(body["code"], "payload_too_large");
}

#[tokio::test]
async fn test_drift_results_pending_until_batch_fills() {
    let dir = TempDir::new().unwrap();
    let app = app_with_model(&dir, DRIFT_ARTIFACT).await;

    let response = app
        .clone()
        .oneshot(binary_event("/", "evt-a", r#"{"instances": [[9.0, 6.0]]}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    // Nothing is emitted for a pending result
    assert!(response.headers().get("ce-id").is_none());
    let body = json_body(response).await;
    assert_eq!(body["verdict"], "pending");
    assert_eq!(body["details"]["buffered"], 1);

    let response = app
        .oneshot(binary_event("/", "evt-b", r#"{"instances": [[9.0, 6.0]]}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("ce-id").is_some());
    let body = json_body(response).await;
    assert_eq!(body["verdict"], "drift");
}

#[tokio::test]
async fn test_model_status_and_unknown_model() {
    let dir = TempDir::new().unwrap();
    let app = app_with_model(&dir, OUTLIER_ARTIFACT).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/v1/models/iris-od").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["name"], "iris-od");
    assert_eq!(body["ready"], true);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["version"], "1");
    assert_eq!(body["checksum"].as_str().unwrap().len(), 64);

    let response = app
        .oneshot(Request::builder().uri("/v1/models/other").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reload_makes_server_ready() {
    let dir = TempDir::new().unwrap();
    let reference = write_artifact(&dir, OUTLIER_ARTIFACT);
    let app = create_router(build_state(EventEgress::logging(), None).await);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/models/iris-od/reload")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "storage_uri": reference }).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["name"], "iris-od");
    assert_eq!(body["ready"], true);

    let response = app
        .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_failed_reload_keeps_serving_previous_model() {
    let dir = TempDir::new().unwrap();
    let app = app_with_model(&dir, OUTLIER_ARTIFACT).await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/models/iris-od/reload")
        .body(Body::from(r#"{"storage_uri": "/nonexistent/adserver/model"}"#))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["code"], "model_load_failed");

    let response = app
        .clone()
        .oneshot(binary_event("/", "evt-after", r#"{"instances": [[5.8, 3.0]]}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/v1/models/iris-od").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["ready"], true);
    assert_eq!(body["last_attempt"]["status"], "failed");
}

#[tokio::test]
async fn test_oversized_reload_body_is_413() {
    let dir = TempDir::new().unwrap();
    let reference = write_artifact(&dir, OUTLIER_ARTIFACT);
    let state = build_state(EventEgress::logging(), Some(&reference)).await;
    let state = Arc::new((*state).clone().with_max_body_bytes(16));
    let app = create_router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/models/iris-od/reload")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "storage_uri": reference }).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = json_body(response).await;
    assert_eq!(body["code"], "payload_too_large");
}

#[tokio::test]
async fn test_result_event_delivered_to_reply_url() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_header("ce-causationid", "evt-reply")
        .match_header("ce-type", "io.seldon.serving.inference.outlier")
        .with_status(202)
        .create_async()
        .await;

    let sink = HttpSink::new(HttpSinkConfig::new(server.url())).unwrap();
    let egress = EventEgress::new(
        Arc::new(sink),
        "io.seldon.serving.inference.outlier",
        "io.seldon.serving.adserver",
    );

    let dir = TempDir::new().unwrap();
    let reference = write_artifact(&dir, OUTLIER_ARTIFACT);
    let app = create_router(build_state(egress, Some(&reference)).await);

    let response = app
        .oneshot(binary_event("/", "evt-reply", r#"{"instances": [[12.0, 9.0]]}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Delivery runs on a detached task
    tokio::time::sleep(Duration::from_millis(300)).await;
    mock.assert_async().await;
}

#[tokio::test]
async fn test_delivery_failure_does_not_fail_response() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;

    let sink = HttpSink::new(
        HttpSinkConfig::new(server.url())
            .max_attempts(2)
            .initial_backoff(Duration::from_millis(1)),
    )
    .unwrap();
    let egress = EventEgress::new(Arc::new(sink), "io.seldon.serving.inference.outlier", "test");

    let dir = TempDir::new().unwrap();
    let reference = write_artifact(&dir, OUTLIER_ARTIFACT);
    let state = build_state(egress, Some(&reference)).await;
    let app = create_router(state.clone());

    let response = app
        .oneshot(binary_event("/", "evt-lost", r#"{"instances": [[12.0, 9.0]]}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["verdict"], "outlier");

    tokio::time::sleep(Duration::from_millis(300)).await;
    mock.assert_async().await;

    let health = state.health_registry.health().await;
    let egress_health = &health.components[components::EGRESS];
    assert!(egress_health.message.as_deref().unwrap().contains("Delivery failed"));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let dir = TempDir::new().unwrap();
    let app = app_with_model(&dir, OUTLIER_ARTIFACT).await;

    let _ = app
        .clone()
        .oneshot(binary_event("/", "evt-m", r#"{"instances": [[5.8, 3.0]]}"#))
        .await
        .unwrap();

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("adserver_events_received_total"));
    assert!(text.contains("adserver_inference_latency_seconds"));
}
