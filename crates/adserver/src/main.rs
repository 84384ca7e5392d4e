//! adserver - outlier, adversarial and drift detection for CloudEvents
//!
//! Receives inference requests as CloudEvents over HTTP, scores them with
//! the loaded detector and forwards the results as CloudEvents.

use adserver_lib::{
    health::{components, HealthRegistry},
    http::{self, AppState},
    observability::{ServerMetrics, StructuredLogger},
    DetectorAdapter, EventEgress, EventSink, HttpSink, InferenceDispatcher, LogSink, ModelLoader,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::ServerConfig;

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command-line flags; each overrides the matching configuration key
#[derive(Debug, Parser)]
#[command(name = "adserver", version, about = "Outlier and drift detection server for CloudEvents")]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, env = "ADSERVER_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(long)]
    http_port: Option<u16>,

    /// Name the model is served under
    #[arg(long)]
    model_name: Option<String>,

    /// Detector artifact to load at startup
    #[arg(long)]
    storage_uri: Option<String>,

    /// Payload protocol: tensorflow.http, seldon.http or kfserving.http
    #[arg(long)]
    protocol: Option<String>,

    /// ce-type of emitted result events
    #[arg(long)]
    event_type: Option<String>,

    /// ce-source of emitted result events
    #[arg(long)]
    event_source: Option<String>,

    /// URL result events are sent to
    #[arg(long)]
    reply_url: Option<String>,

    /// Bound on a single inference, in milliseconds
    #[arg(long)]
    inference_timeout_ms: Option<u64>,
}

impl Args {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(port) = self.http_port {
            config.server.port = port;
        }
        if let Some(name) = self.model_name {
            config.model.name = Some(name);
        }
        if let Some(uri) = self.storage_uri {
            config.model.storage_uri = Some(uri);
        }
        if let Some(protocol) = self.protocol {
            config.inference.protocol = protocol;
        }
        if let Some(event_type) = self.event_type {
            config.events.event_type = event_type;
        }
        if let Some(event_source) = self.event_source {
            config.events.event_source = event_source;
        }
        if let Some(url) = self.reply_url {
            config.egress.reply_url = Some(url);
        }
        if let Some(timeout) = self.inference_timeout_ms {
            config.inference.timeout_ms = timeout;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    let protocol = config.protocol()?;
    info!(port = config.server.port, protocol = %protocol, "Server configured");

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::MODEL).await;
    health_registry.register(components::INGRESS).await;
    health_registry.register(components::EGRESS).await;

    let metrics = ServerMetrics::new();
    let logger = StructuredLogger::new(&config.server.instance);

    let loader = Arc::new(
        ModelLoader::new(config.loader_config()).context("Failed to create model loader")?,
    );
    let dispatcher = InferenceDispatcher::new(
        loader,
        DetectorAdapter::new(protocol),
        config.inference_timeout(),
        metrics.clone(),
    );

    let sink: Arc<dyn EventSink> = match config.sink_config() {
        Some(sink_config) => {
            info!(reply_url = %sink_config.url, "Results will be sent to reply URL");
            Arc::new(HttpSink::new(sink_config).context("Failed to create reply sink")?)
        }
        None => {
            info!("No reply URL configured, results will be logged");
            Arc::new(LogSink)
        }
    };
    let egress = EventEgress::new(sink, &config.events.event_type, &config.events.event_source);

    let state = Arc::new(
        AppState::new(dispatcher, egress, health_registry, metrics, logger.clone())
            .with_max_body_bytes(config.server.max_body_bytes),
    );

    let storage_uri = config.model.storage_uri.clone().unwrap_or_default();
    logger.log_startup(SERVER_VERSION, &protocol.to_string(), &storage_uri);

    // A failed initial load leaves the server up but not ready
    if storage_uri.is_empty() {
        warn!("No storage URI configured, waiting for a reload request");
    } else if let Err(e) = state.reload_model(Some(&storage_uri)).await {
        warn!(error = %e, "Initial model load failed");
    }

    http::serve(config.server.port, state, shutdown_signal(logger)).await
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal(logger: StructuredLogger) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let reason = tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    };

    logger.log_shutdown(reason);
    info!("Shutting down");
}
