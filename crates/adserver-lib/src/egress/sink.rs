//! Destinations for outbound result events

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::OutboundEvent;
use crate::error::DeliveryError;

/// Acknowledgement of a delivered event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Status reported by the sink (HTTP status, or 0 for non-HTTP sinks)
    pub status: u16,
    /// Attempts it took to deliver
    pub attempts: u32,
}

/// Something result events can be handed to
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    async fn emit(&self, event: &OutboundEvent) -> Result<Ack, DeliveryError>;
}

/// Configuration for [`HttpSink`]
#[derive(Debug, Clone)]
pub struct HttpSinkConfig {
    /// Endpoint result events are POSTed to
    pub url: String,
    /// Upper bound on delivery attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Cap on the delay between retries
    pub max_backoff: Duration,
    /// Timeout for each request
    pub request_timeout: Duration,
}

impl HttpSinkConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// POSTs binary-mode CloudEvents to a reply URL
///
/// Transport errors and 5xx responses are retried with exponential backoff
/// up to `max_attempts`; 4xx responses are final.
pub struct HttpSink {
    client: reqwest::Client,
    config: HttpSinkConfig,
}

impl HttpSink {
    pub fn new(config: HttpSinkConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DeliveryError::Unreachable {
                url: config.url.clone(),
                attempts: 0,
                reason: e.to_string(),
            })?;

        Ok(Self { client, config })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn send_once(&self, event: &OutboundEvent) -> Result<u16, String> {
        let mut request = self.client.post(&self.config.url);
        for (name, value) in event.headers() {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .body(event.body().to_vec())
            .send()
            .await
            .map_err(|e| e.to_string())?;

        Ok(response.status().as_u16())
    }
}

#[async_trait]
impl EventSink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn emit(&self, event: &OutboundEvent) -> Result<Ack, DeliveryError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.initial_backoff;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.send_once(event).await {
                Ok(status) if (200..300).contains(&status) => {
                    debug!(
                        url = %self.config.url,
                        ce_id = %event.id(),
                        attempt,
                        "Result event delivered"
                    );
                    return Ok(Ack {
                        status,
                        attempts: attempt,
                    });
                }
                Ok(status) if (400..500).contains(&status) => {
                    return Err(DeliveryError::Rejected {
                        url: self.config.url.clone(),
                        status,
                    });
                }
                Ok(status) => last_error = format!("status {}", status),
                Err(e) => last_error = e,
            }

            if attempt < max_attempts {
                warn!(
                    url = %self.config.url,
                    attempt,
                    error = %last_error,
                    next_backoff_ms = backoff.as_millis() as u64,
                    "Result delivery failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, self.config.max_backoff);
            }
        }

        Err(DeliveryError::Unreachable {
            url: self.config.url.clone(),
            attempts: max_attempts,
            reason: last_error,
        })
    }
}

/// Writes result events to the log when no reply URL is configured
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn emit(&self, event: &OutboundEvent) -> Result<Ack, DeliveryError> {
        info!(
            event = "result_event",
            ce_id = %event.id(),
            body = %String::from_utf8_lossy(event.body()),
            "Result event"
        );
        Ok(Ack {
            status: 0,
            attempts: 1,
        })
    }
}
