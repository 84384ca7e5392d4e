//! Detector back-ends and the adapter that fronts them
//!
//! This module provides:
//! - The opaque [`Detector`] contract every back-end implements
//! - Reference back-ends: per-feature z-score, per-feature bounds, batch mean-shift drift
//! - [`DetectorAdapter`], turning a model handle plus payload into a detection result

mod adapter;
mod drift;
mod range;
mod zscore;

pub use adapter::DetectorAdapter;
pub use drift::{MeanShiftDetector, DEFAULT_P_VAL};
pub use range::RangeDetector;
pub use zscore::{ZScoreDetector, DEFAULT_THRESHOLD as DEFAULT_ZSCORE_THRESHOLD};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::InferenceError;
use crate::protocol::Instances;

/// What a detector decides about its input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    Outlier,
    Adversarial,
    Drift,
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorKind::Outlier => write!(f, "outlier"),
            DetectorKind::Adversarial => write!(f, "adversarial"),
            DetectorKind::Drift => write!(f, "drift"),
        }
    }
}

/// Granularity at which score detectors flag outliers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlierType {
    #[default]
    Instance,
    Feature,
}

/// Per-request options, taken from the query string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictOptions {
    pub return_instance_score: bool,
    pub return_feature_score: bool,
    pub outlier_type: OutlierType,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            return_instance_score: true,
            return_feature_score: true,
            outlier_type: OutlierType::Instance,
        }
    }
}

/// Scores produced by outlier and adversarial back-ends
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutput {
    /// One flag per instance
    pub flags: Vec<bool>,
    pub instance_scores: Vec<f64>,
    /// One row of feature scores per instance
    pub feature_scores: Vec<Vec<f64>>,
    pub threshold: f64,
}

/// Test statistics produced by drift back-ends
#[derive(Debug, Clone, PartialEq)]
pub struct DriftOutput {
    pub is_drift: bool,
    /// Per-feature standardised distance from the reference
    pub distances: Vec<f64>,
    pub p_values: Vec<f64>,
    /// Corrected significance level each p-value is compared with
    pub threshold: f64,
    pub batch_size: usize,
}

/// Raw back-end output, before it is packaged into a result
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorOutput {
    Scores(ScoreOutput),
    Drift(DriftOutput),
    /// Drift detector still filling its batch
    Pending { buffered: usize, batch_size: usize },
}

/// Uniform contract over a loaded detection model
///
/// Implementations are shared across request tasks and must not assume
/// anything about the caller beyond the batch they are handed.
pub trait Detector: Send + Sync {
    fn kind(&self) -> DetectorKind;

    /// Number of features each instance must carry
    fn num_features(&self) -> usize;

    /// Score a batch of instances
    fn predict(
        &self,
        batch: &Instances,
        options: &PredictOptions,
    ) -> Result<DetectorOutput, InferenceError>;
}

/// Reject batches whose width does not match the model
pub(crate) fn check_features(expected: usize, batch: &Instances) -> Result<(), InferenceError> {
    if batch.num_features() != expected {
        return Err(InferenceError::FeatureMismatch {
            expected,
            actual: batch.num_features(),
        });
    }
    Ok(())
}

/// Mean of a slice, zero when empty
pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
