//! Detector artifact format
//!
//! An artifact is a JSON document naming the detector and the parameters
//! of its back-end:
//!
//! ```json
//! {
//!   "name": "iris-outlier",
//!   "version": "2",
//!   "detector_type": "outlier",
//!   "backend": { "type": "zscore", "mean": [5.8, 3.0], "std": [0.8, 0.4], "threshold": 3.0 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::detector::{
    Detector, DetectorKind, MeanShiftDetector, RangeDetector, ZScoreDetector, DEFAULT_P_VAL,
    DEFAULT_ZSCORE_THRESHOLD,
};
use crate::error::LoadError;

fn default_version() -> String {
    "1".to_string()
}

fn default_zscore_threshold() -> f64 {
    DEFAULT_ZSCORE_THRESHOLD
}

fn default_p_val() -> f64 {
    DEFAULT_P_VAL
}

fn default_batch_size() -> usize {
    100
}

/// Parameters of a detector back-end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendSpec {
    Zscore {
        mean: Vec<f64>,
        std: Vec<f64>,
        #[serde(default = "default_zscore_threshold")]
        threshold: f64,
    },
    Range {
        min: Vec<f64>,
        max: Vec<f64>,
        #[serde(default)]
        threshold: f64,
    },
    MeanShift {
        mean: Vec<f64>,
        std: Vec<f64>,
        #[serde(default = "default_p_val")]
        p_val: f64,
        #[serde(default = "default_batch_size")]
        batch_size: usize,
    },
}

/// A detector description as stored on disk or served over HTTP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorArtifact {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub detector_type: DetectorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    pub backend: BackendSpec,
}

impl DetectorArtifact {
    /// Parse an artifact from raw bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, LoadError> {
        let artifact: Self =
            serde_json::from_slice(bytes).map_err(|e| LoadError::Malformed(e.to_string()))?;

        if artifact.name.trim().is_empty() {
            return Err(LoadError::Malformed("artifact name must not be empty".to_string()));
        }

        Ok(artifact)
    }

    /// Instantiate the detector this artifact describes
    ///
    /// `batch_size_override` replaces the drift batch size when set.
    pub fn build(
        &self,
        batch_size_override: Option<usize>,
    ) -> Result<Arc<dyn Detector>, LoadError> {
        let kind = self.detector_type;

        let detector: Arc<dyn Detector> = match (&self.backend, kind) {
            (BackendSpec::MeanShift { mean, std, p_val, batch_size }, DetectorKind::Drift) => {
                Arc::new(MeanShiftDetector::new(
                    mean.clone(),
                    std.clone(),
                    *p_val,
                    batch_size_override.unwrap_or(*batch_size),
                )?)
            }
            (BackendSpec::MeanShift { .. }, _) | (_, DetectorKind::Drift) => {
                return Err(LoadError::Malformed(format!(
                    "backend '{}' cannot serve {} detection",
                    self.backend.name(),
                    kind
                )))
            }
            (BackendSpec::Zscore { mean, std, threshold }, _) => {
                Arc::new(ZScoreDetector::new(kind, mean.clone(), std.clone(), *threshold)?)
            }
            (BackendSpec::Range { min, max, threshold }, _) => {
                Arc::new(RangeDetector::new(kind, min.clone(), max.clone(), *threshold)?)
            }
        };

        Ok(detector)
    }
}

impl BackendSpec {
    pub fn name(&self) -> &'static str {
        match self {
            BackendSpec::Zscore { .. } => "zscore",
            BackendSpec::Range { .. } => "range",
            BackendSpec::MeanShift { .. } => "mean_shift",
        }
    }
}
