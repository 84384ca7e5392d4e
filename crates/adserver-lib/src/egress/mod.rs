//! Event egress for detection results
//!
//! Results leave the server as binary-mode CloudEvents:
//! - `ce-*` headers carry the attributes, the body is the result JSON
//! - `ce-causationid` links back to the envelope that was scored
//! - Extensions of the inbound envelope are propagated

mod sink;

pub use sink::{Ack, EventSink, HttpSink, HttpSinkConfig, LogSink};

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::DeliveryError;
use crate::result::DetectionResult;

/// Default `ce-type` of result events
pub const DEFAULT_EVENT_TYPE: &str = "io.seldon.serving.inference.outlier";

/// Default `ce-source` of result events
pub const DEFAULT_EVENT_SOURCE: &str = "io.seldon.serving.adserver";

/// Headers owned by the egress builder; inbound extensions never override them
const RESERVED_HEADERS: &[&str] = &[
    "ce-id",
    "ce-type",
    "ce-source",
    "ce-specversion",
    "ce-time",
    "ce-causationid",
    "content-type",
];

/// A result event ready to be sent, in binary content mode
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl OutboundEvent {
    pub fn new(headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The `ce-id` of this event
    pub fn id(&self) -> &str {
        self.header("ce-id").unwrap_or_default()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Turns detection results into outbound CloudEvents and hands them to a sink
#[derive(Clone)]
pub struct EventEgress {
    sink: Arc<dyn EventSink>,
    event_type: String,
    event_source: String,
}

impl EventEgress {
    pub fn new(
        sink: Arc<dyn EventSink>,
        event_type: impl Into<String>,
        event_source: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            event_type: event_type.into(),
            event_source: event_source.into(),
        }
    }

    /// Egress that only logs results
    pub fn logging() -> Self {
        Self::new(Arc::new(LogSink), DEFAULT_EVENT_TYPE, DEFAULT_EVENT_SOURCE)
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_source(&self) -> &str {
        &self.event_source
    }

    /// Build the outbound event for `result`
    ///
    /// Each call mints a fresh `ce-id`.
    pub fn prepare(
        &self,
        result: &DetectionResult,
        extensions: &BTreeMap<String, String>,
    ) -> Result<OutboundEvent, DeliveryError> {
        let body = serde_json::to_vec(result).map_err(|e| DeliveryError::Encode(e.to_string()))?;

        let mut headers = vec![
            ("ce-specversion".to_string(), "1.0".to_string()),
            ("ce-id".to_string(), Uuid::new_v4().to_string()),
            ("ce-type".to_string(), self.event_type.clone()),
            ("ce-source".to_string(), self.event_source.clone()),
            ("ce-time".to_string(), result.timestamp().to_rfc3339()),
            ("ce-causationid".to_string(), result.event_id().to_string()),
            ("content-type".to_string(), "application/json".to_string()),
        ];

        for (name, value) in extensions {
            let header = format!("ce-{}", name.to_ascii_lowercase());
            if !RESERVED_HEADERS.contains(&header.as_str()) {
                headers.push((header, value.clone()));
            }
        }

        Ok(OutboundEvent::new(headers, body))
    }

    /// Hand a prepared event to the sink
    pub async fn deliver(&self, event: &OutboundEvent) -> Result<Ack, DeliveryError> {
        self.sink.emit(event).await
    }

    /// Emit `result`; pending results produce no event
    pub async fn emit(
        &self,
        result: &DetectionResult,
        extensions: &BTreeMap<String, String>,
    ) -> Result<Option<Ack>, DeliveryError> {
        if result.is_pending() {
            debug!(event_id = %result.event_id(), "Pending result not emitted");
            return Ok(None);
        }

        let event = self.prepare(result, extensions)?;
        self.deliver(&event).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{DriftDetails, ResultDetails, ScoreDetails, Verdict};
    use std::time::Duration;

    fn outlier_result() -> DetectionResult {
        DetectionResult::new(
            Verdict::Outlier,
            4.2,
            "od:0123456789ab",
            "1",
            "evt-42",
            ResultDetails::Outlier(ScoreDetails {
                is_flagged: vec![1],
                instance_score: Some(vec![4.2]),
                feature_score: None,
                threshold: 3.0,
            }),
        )
    }

    fn pending_result() -> DetectionResult {
        DetectionResult::new(
            Verdict::Pending,
            0.0,
            "cd:0123456789ab",
            "1",
            "evt-43",
            ResultDetails::Drift(DriftDetails {
                is_drift: None,
                distance: None,
                p_val: None,
                threshold: None,
                buffered: 1,
                batch_size: 10,
            }),
        )
    }

    #[test]
    fn test_prepare_binary_mode_headers() {
        let egress = EventEgress::logging();
        let mut extensions = BTreeMap::new();
        extensions.insert("traceparent".to_string(), "00-abc-def-01".to_string());
        extensions.insert("causationid".to_string(), "spoofed".to_string());

        let event = egress.prepare(&outlier_result(), &extensions).unwrap();

        assert_eq!(event.header("ce-specversion"), Some("1.0"));
        assert_eq!(event.header("ce-type"), Some(DEFAULT_EVENT_TYPE));
        assert_eq!(event.header("ce-source"), Some(DEFAULT_EVENT_SOURCE));
        assert_eq!(event.header("ce-causationid"), Some("evt-42"));
        assert_eq!(event.header("ce-traceparent"), Some("00-abc-def-01"));
        assert!(Uuid::parse_str(event.id()).is_ok());
        assert_eq!(
            event.headers().iter().filter(|(n, _)| n == "ce-causationid").count(),
            1
        );

        let body: serde_json::Value = serde_json::from_slice(event.body()).unwrap();
        assert_eq!(body["verdict"], "outlier");
        assert_eq!(body["event_id"], "evt-42");
    }

    #[test]
    fn test_each_event_gets_fresh_id() {
        let egress = EventEgress::logging();
        let a = egress.prepare(&outlier_result(), &BTreeMap::new()).unwrap();
        let b = egress.prepare(&outlier_result(), &BTreeMap::new()).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_pending_results_not_emitted() {
        let egress = EventEgress::logging();
        let ack = egress.emit(&pending_result(), &BTreeMap::new()).await.unwrap();
        assert!(ack.is_none());
    }

    #[tokio::test]
    async fn test_emit_to_http_sink() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("ce-type", "org.example.outlier")
            .match_header("ce-causationid", "evt-42")
            .with_status(200)
            .create_async()
            .await;

        let config = HttpSinkConfig::new(server.url()).initial_backoff(Duration::from_millis(1));
        let sink = HttpSink::new(config).unwrap();
        let egress = EventEgress::new(Arc::new(sink), "org.example.outlier", "test");

        let ack = egress.emit(&outlier_result(), &BTreeMap::new()).await.unwrap();
        assert_eq!(ack.map(|a| a.status), Some(200));
        mock.assert_async().await;
    }
}
