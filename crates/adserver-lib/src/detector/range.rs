//! Per-feature bounds detection

use super::{
    check_features, Detector, DetectorKind, DetectorOutput, OutlierType, PredictOptions,
    ScoreOutput,
};
use crate::error::{InferenceError, LoadError};
use crate::protocol::Instances;

/// Flags instances with features outside an expected `[min, max]` range
///
/// A feature's score is its distance outside the range divided by the range
/// width, so a value exactly on a bound scores zero.
#[derive(Debug, Clone)]
pub struct RangeDetector {
    kind: DetectorKind,
    min: Vec<f64>,
    max: Vec<f64>,
    threshold: f64,
}

impl RangeDetector {
    pub fn new(
        kind: DetectorKind,
        min: Vec<f64>,
        max: Vec<f64>,
        threshold: f64,
    ) -> Result<Self, LoadError> {
        if kind == DetectorKind::Drift {
            return Err(LoadError::Malformed(
                "range back-end cannot serve drift detection".to_string(),
            ));
        }
        if min.is_empty() || min.len() != max.len() {
            return Err(LoadError::Malformed(format!(
                "range back-end needs matching bounds, got {} min and {} max",
                min.len(),
                max.len()
            )));
        }
        if min.iter().zip(&max).any(|(lo, hi)| !lo.is_finite() || !hi.is_finite() || hi <= lo) {
            return Err(LoadError::Malformed("each max must exceed its min".to_string()));
        }
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(LoadError::Malformed(format!("invalid threshold {}", threshold)));
        }

        Ok(Self { kind, min, max, threshold })
    }

    fn feature_scores(&self, instance: &[f64]) -> Vec<f64> {
        instance
            .iter()
            .zip(self.min.iter().zip(&self.max))
            .map(|(x, (lo, hi))| {
                let width = hi - lo;
                if x < lo {
                    (lo - x) / width
                } else if x > hi {
                    (x - hi) / width
                } else {
                    0.0
                }
            })
            .collect()
    }
}

impl Detector for RangeDetector {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn num_features(&self) -> usize {
        self.min.len()
    }

    fn predict(
        &self,
        batch: &Instances,
        options: &PredictOptions,
    ) -> Result<DetectorOutput, InferenceError> {
        check_features(self.num_features(), batch)?;

        let feature_scores: Vec<Vec<f64>> = batch
            .rows()
            .iter()
            .map(|row| self.feature_scores(row))
            .collect();
        // Worst feature decides the instance score
        let instance_scores: Vec<f64> = feature_scores
            .iter()
            .map(|scores| scores.iter().copied().fold(0.0, f64::max))
            .collect();

        let flags = match options.outlier_type {
            OutlierType::Instance => instance_scores.iter().map(|s| *s > self.threshold).collect(),
            OutlierType::Feature => feature_scores
                .iter()
                .map(|scores| scores.iter().any(|s| *s > self.threshold))
                .collect(),
        };

        Ok(DetectorOutput::Scores(ScoreOutput {
            flags,
            instance_scores,
            feature_scores,
            threshold: self.threshold,
        }))
    }
}
