//! Model lifecycle: resolving artifacts and holding the loaded detector
//!
//! This module provides:
//! - Storage resolution for `file://`, bare paths and `http(s)://` references
//! - The JSON detector artifact format and its validation
//! - [`ModelLoader`], owner of the active [`ModelHandle`]

mod artifact;
mod loader;
mod storage;

pub use artifact::{BackendSpec, DetectorArtifact};
pub use loader::{ModelLoader, ModelLoaderConfig, IN_MEMORY_SCHEME};
pub use storage::{FetchedArtifact, StorageResolver, ARTIFACT_FILE_NAME};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::detector::{Detector, DetectorKind};

/// Lifecycle state of a model handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Loading,
    Ready,
    Failed,
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelStatus::Loading => write!(f, "loading"),
            ModelStatus::Ready => write!(f, "ready"),
            ModelStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A detector loaded from storage, or the record of an attempt to load one
///
/// Handles are created by the [`ModelLoader`] only and shared read-only.
#[derive(Clone)]
pub struct ModelHandle {
    id: String,
    name: String,
    version: String,
    storage_uri: String,
    checksum: Option<String>,
    kind: Option<DetectorKind>,
    status: ModelStatus,
    detector: Option<Arc<dyn Detector>>,
    loaded_at: DateTime<Utc>,
    error: Option<String>,
}

impl ModelHandle {
    pub(crate) fn loading(name: impl Into<String>, storage_uri: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: format!("{}:loading", name),
            name,
            version: String::new(),
            storage_uri: storage_uri.into(),
            checksum: None,
            kind: None,
            status: ModelStatus::Loading,
            detector: None,
            loaded_at: Utc::now(),
            error: None,
        }
    }

    pub(crate) fn ready(
        name: impl Into<String>,
        version: impl Into<String>,
        storage_uri: impl Into<String>,
        checksum: String,
        detector: Arc<dyn Detector>,
    ) -> Self {
        let name = name.into();
        // Same artifact, same id
        let id = format!("{}:{}", name, &checksum[..checksum.len().min(12)]);
        Self {
            id,
            name,
            version: version.into(),
            storage_uri: storage_uri.into(),
            checksum: Some(checksum),
            kind: Some(detector.kind()),
            status: ModelStatus::Ready,
            detector: Some(detector),
            loaded_at: Utc::now(),
            error: None,
        }
    }

    pub(crate) fn failed(
        name: impl Into<String>,
        storage_uri: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            id: format!("{}:failed", name),
            name,
            version: String::new(),
            storage_uri: storage_uri.into(),
            checksum: None,
            kind: None,
            status: ModelStatus::Failed,
            detector: None,
            loaded_at: Utc::now(),
            error: Some(error.into()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn storage_uri(&self) -> &str {
        &self.storage_uri
    }

    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    pub fn kind(&self) -> Option<DetectorKind> {
        self.kind
    }

    pub fn status(&self) -> ModelStatus {
        self.status
    }

    pub fn is_ready(&self) -> bool {
        self.status == ModelStatus::Ready && self.detector.is_some()
    }

    /// The wrapped detector, present only when ready
    pub fn detector(&self) -> Option<&Arc<dyn Detector>> {
        self.detector.as_ref()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Serializable view for status endpoints
    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            ready: self.is_ready(),
            status: self.status,
            storage_uri: self.storage_uri.clone(),
            checksum: self.checksum.clone(),
            detector_type: self.kind,
            loaded_at: self.loaded_at.to_rfc3339(),
            error: self.error.clone(),
        }
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("id", &self.id)
            .field("storage_uri", &self.storage_uri)
            .field("status", &self.status)
            .field("kind", &self.kind)
            .field("checksum", &self.checksum)
            .finish()
    }
}

/// Status document for a model handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub ready: bool,
    pub status: ModelStatus,
    pub storage_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detector_type: Option<DetectorKind>,
    pub loaded_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
