//! Server configuration
//!
//! Layered from built-in defaults, an optional config file and
//! `ADSERVER__<SECTION>__<KEY>` environment variables, in that order.
//! Command-line flags are applied on top by `main`.

use adserver_lib::{
    egress::{DEFAULT_EVENT_SOURCE, DEFAULT_EVENT_TYPE},
    http::DEFAULT_MAX_BODY_BYTES,
    HttpSinkConfig, ModelLoaderConfig, Protocol,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level server configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: HttpSettings,
    pub model: ModelSettings,
    pub inference: InferenceSettings,
    pub egress: EgressSettings,
    pub events: EventSettings,
}

/// HTTP listener settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub port: u16,
    /// Largest accepted request body
    pub max_body_bytes: usize,
    /// Instance name attached to structured logs
    pub instance: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            instance: std::env::var("HOSTNAME").unwrap_or_else(|_| "adserver".to_string()),
        }
    }
}

/// Detector artifact settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Name the model is served under
    pub name: Option<String>,
    /// Reference loaded at startup
    pub storage_uri: Option<String>,
    pub fetch_timeout_secs: u64,
    pub max_artifact_bytes: usize,
    /// Overrides the batch size declared by drift artifacts
    pub drift_batch_size: Option<usize>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        let loader = ModelLoaderConfig::default();
        Self {
            name: None,
            storage_uri: None,
            fetch_timeout_secs: loader.fetch_timeout.as_secs(),
            max_artifact_bytes: loader.max_artifact_bytes,
            drift_batch_size: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    /// Payload protocol (`tensorflow.http`, `seldon.http`, `kfserving.http`)
    pub protocol: String,
    pub timeout_ms: u64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            protocol: Protocol::default().to_string(),
            timeout_ms: 5000,
        }
    }
}

/// Result delivery settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EgressSettings {
    /// Results are only logged when unset
    pub reply_url: Option<String>,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for EgressSettings {
    fn default() -> Self {
        Self {
            reply_url: None,
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            request_timeout_ms: 10_000,
        }
    }
}

/// CloudEvent attributes stamped on result events
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    pub event_type: String,
    pub event_source: String,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            event_type: DEFAULT_EVENT_TYPE.to_string(),
            event_source: DEFAULT_EVENT_SOURCE.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("ADSERVER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    pub fn protocol(&self) -> Result<Protocol> {
        self.inference
            .protocol
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid inference protocol: {}", e))
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference.timeout_ms)
    }

    pub fn loader_config(&self) -> ModelLoaderConfig {
        ModelLoaderConfig {
            model_name: self.model.name.clone(),
            fetch_timeout: Duration::from_secs(self.model.fetch_timeout_secs),
            max_artifact_bytes: self.model.max_artifact_bytes,
            drift_batch_size: self.model.drift_batch_size,
        }
    }

    /// HTTP sink settings, if a reply URL is configured
    pub fn sink_config(&self) -> Option<HttpSinkConfig> {
        self.egress.reply_url.as_ref().map(|url| {
            HttpSinkConfig::new(url.clone())
                .max_attempts(self.egress.max_attempts)
                .initial_backoff(Duration::from_millis(self.egress.initial_backoff_ms))
                .max_backoff(Duration::from_millis(self.egress.max_backoff_ms))
                .request_timeout(Duration::from_millis(self.egress.request_timeout_ms))
        })
    }
}
