//! Model loader owning the active detector handle
//!
//! This module provides:
//! - Loading detector artifacts into ready [`ModelHandle`]s
//! - Activation and reload behind a single-writer lock
//! - Keeping the previous handle serving when a reload fails

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::storage::compute_checksum;
use super::{DetectorArtifact, ModelHandle, StorageResolver};
use crate::detector::Detector;
use crate::error::LoadError;

/// Storage prefix recorded for detectors activated in process
pub const IN_MEMORY_SCHEME: &str = "memory://";

/// Configuration for the model loader
#[derive(Debug, Clone)]
pub struct ModelLoaderConfig {
    /// Name the model is served under; the artifact name is used when unset
    pub model_name: Option<String>,
    /// Timeout for remote artifact fetches
    pub fetch_timeout: Duration,
    /// Maximum artifact size in bytes
    pub max_artifact_bytes: usize,
    /// Replaces the drift batch size declared by the artifact
    pub drift_batch_size: Option<usize>,
}

impl Default for ModelLoaderConfig {
    fn default() -> Self {
        Self {
            model_name: None,
            fetch_timeout: Duration::from_secs(30),
            max_artifact_bytes: 16 * 1024 * 1024, // 16MB
            drift_batch_size: None,
        }
    }
}

/// Resolves storage references to model handles and owns the active one
pub struct ModelLoader {
    config: ModelLoaderConfig,
    storage: StorageResolver,
    /// Handle currently serving inference (always ready)
    active: RwLock<Option<Arc<ModelHandle>>>,
    /// Most recent load attempt, whatever its outcome
    latest: RwLock<Option<Arc<ModelHandle>>>,
    /// Reference of the last successful activation
    last_reference: RwLock<Option<String>>,
    /// Serialises activations and reloads
    reload_lock: Mutex<()>,
}

impl ModelLoader {
    /// Create a new model loader
    pub fn new(config: ModelLoaderConfig) -> Result<Self, LoadError> {
        let storage = StorageResolver::new(config.fetch_timeout, config.max_artifact_bytes)?;

        Ok(Self {
            config,
            storage,
            active: RwLock::new(None),
            latest: RwLock::new(None),
            last_reference: RwLock::new(None),
            reload_lock: Mutex::new(()),
        })
    }

    /// Load a detector from `reference` without activating it
    ///
    /// Loading the same reference twice yields handles with the same id,
    /// checksum and detector configuration.
    pub async fn load(&self, reference: &str) -> Result<Arc<ModelHandle>, LoadError> {
        let fetched = self.storage.fetch(reference).await?;
        let artifact = DetectorArtifact::parse(&fetched.bytes)?;
        let detector = artifact.build(self.config.drift_batch_size)?;

        let name = self.config.model_name.clone().unwrap_or_else(|| artifact.name.clone());

        debug!(
            name = %name,
            backend = artifact.backend.name(),
            location = %fetched.location,
            "Built detector from artifact"
        );

        Ok(Arc::new(ModelHandle::ready(
            name,
            artifact.version,
            reference,
            fetched.checksum,
            detector,
        )))
    }

    /// Load a detector and make it the active one
    ///
    /// On failure the previously active handle, if any, keeps serving.
    pub async fn load_and_activate(&self, reference: &str) -> Result<Arc<ModelHandle>, LoadError> {
        let _guard = self.reload_lock.lock().await;

        let name = self.display_name().await;
        *self.latest.write().await = Some(Arc::new(ModelHandle::loading(name.clone(), reference)));

        match self.load(reference).await {
            Ok(handle) => {
                *self.active.write().await = Some(handle.clone());
                *self.latest.write().await = Some(handle.clone());
                *self.last_reference.write().await = Some(reference.to_string());

                info!(
                    model_id = %handle.id(),
                    version = %handle.version(),
                    storage_uri = %reference,
                    "Model activated"
                );
                Ok(handle)
            }
            Err(e) => {
                let failed = ModelHandle::failed(name, reference, e.to_string());
                *self.latest.write().await = Some(Arc::new(failed));

                let still_serving = self.active.read().await.as_ref().map(|h| h.id().to_string());
                warn!(
                    storage_uri = %reference,
                    error = %e,
                    still_serving = ?still_serving,
                    "Model load failed"
                );
                Err(e)
            }
        }
    }

    /// Activate a detector built in process rather than loaded from storage
    ///
    /// Lets embedders plug external back-ends in behind the same handle type.
    pub async fn activate_detector(
        &self,
        name: &str,
        version: &str,
        detector: Arc<dyn Detector>,
    ) -> Arc<ModelHandle> {
        let _guard = self.reload_lock.lock().await;

        let storage_uri = format!("{}{}", IN_MEMORY_SCHEME, name);
        let checksum = compute_checksum(format!("{}:{}", name, version).as_bytes());
        let handle = Arc::new(ModelHandle::ready(name, version, storage_uri, checksum, detector));

        *self.active.write().await = Some(handle.clone());
        *self.latest.write().await = Some(handle.clone());
        // A later reload must name its artifact explicitly
        *self.last_reference.write().await = None;

        info!(model_id = %handle.id(), "In-process detector activated");
        handle
    }

    /// Reload from `reference`, or from the last activated reference
    pub async fn reload(&self, reference: Option<&str>) -> Result<Arc<ModelHandle>, LoadError> {
        let reference = match reference {
            Some(r) => r.to_string(),
            None => self
                .last_reference
                .read()
                .await
                .clone()
                .ok_or_else(|| LoadError::InvalidReference {
                    reference: String::new(),
                    reason: "no storage reference given and none loaded before".to_string(),
                })?,
        };

        self.load_and_activate(&reference).await
    }

    /// Handle currently serving inference
    pub async fn active(&self) -> Option<Arc<ModelHandle>> {
        self.active.read().await.clone()
    }

    /// Most recent load attempt
    pub async fn latest(&self) -> Option<Arc<ModelHandle>> {
        self.latest.read().await.clone()
    }

    /// Drop the active handle; in-flight users keep their own reference
    pub async fn release(&self) -> Option<Arc<ModelHandle>> {
        let _guard = self.reload_lock.lock().await;
        let released = self.active.write().await.take();
        if let Some(handle) = &released {
            info!(model_id = %handle.id(), "Model released");
        }
        released
    }

    /// Name used for status reporting
    pub async fn display_name(&self) -> String {
        if let Some(name) = &self.config.model_name {
            return name.clone();
        }
        self.active
            .read()
            .await
            .as_ref()
            .map(|h| h.name().to_string())
            .unwrap_or_else(|| "detector".to_string())
    }

    pub fn config(&self) -> &ModelLoaderConfig {
        &self.config
    }
}
