//! Per-feature z-score detection
//!
//! Scores each feature by its distance from a reference mean in units of the
//! reference standard deviation, and flags instances exceeding a threshold.

use super::{
    check_features, mean, Detector, DetectorKind, DetectorOutput, OutlierType, PredictOptions,
    ScoreOutput,
};
use crate::error::{InferenceError, LoadError};
use crate::protocol::Instances;

/// Default threshold (3 sigma)
pub const DEFAULT_THRESHOLD: f64 = 3.0;

/// Flags instances whose features sit far from the reference distribution
#[derive(Debug, Clone)]
pub struct ZScoreDetector {
    kind: DetectorKind,
    mean: Vec<f64>,
    std_dev: Vec<f64>,
    threshold: f64,
}

impl ZScoreDetector {
    /// Create a detector from reference statistics
    ///
    /// Standard deviations must be positive and match the means in length.
    pub fn new(
        kind: DetectorKind,
        mean: Vec<f64>,
        std_dev: Vec<f64>,
        threshold: f64,
    ) -> Result<Self, LoadError> {
        if kind == DetectorKind::Drift {
            return Err(LoadError::Malformed(
                "zscore back-end cannot serve drift detection".to_string(),
            ));
        }
        if mean.is_empty() {
            return Err(LoadError::Malformed(
                "zscore back-end needs at least one feature".to_string(),
            ));
        }
        if mean.len() != std_dev.len() {
            return Err(LoadError::Malformed(format!(
                "zscore back-end has {} means but {} standard deviations",
                mean.len(),
                std_dev.len()
            )));
        }
        if std_dev.iter().any(|s| !s.is_finite() || *s < f64::EPSILON) {
            return Err(LoadError::Malformed("standard deviations must be positive".to_string()));
        }
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(LoadError::Malformed(format!("invalid threshold {}", threshold)));
        }

        Ok(Self {
            kind,
            mean,
            std_dev,
            threshold,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn feature_scores(&self, instance: &[f64]) -> Vec<f64> {
        instance
            .iter()
            .zip(self.mean.iter().zip(&self.std_dev))
            .map(|(x, (mu, sigma))| (x - mu).abs() / sigma)
            .collect()
    }
}

impl Detector for ZScoreDetector {
    fn kind(&self) -> DetectorKind {
        self.kind
    }

    fn num_features(&self) -> usize {
        self.mean.len()
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
        let instance_scores: Vec<f64> = feature_scores.iter().map(|scores| mean(scores)).collect();

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

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> ZScoreDetector {
        ZScoreDetector::new(DetectorKind::Outlier, vec![0.0, 10.0], vec![1.0, 2.0], 3.0).unwrap()
    }

    fn scores(output: DetectorOutput) -> ScoreOutput {
        match output {
            DetectorOutput::Scores(s) => s,
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_inlier_not_flagged() {
        let batch = Instances::new(vec![vec![0.5, 11.0]]).unwrap();
        let out = scores(detector().predict(&batch, &PredictOptions::default()).unwrap());

        assert_eq!(out.flags, vec![false]);
        assert!((out.feature_scores[0][0] - 0.5).abs() < 1e-9);
        assert!((out.feature_scores[0][1] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_outlier_flagged() {
        let batch = Instances::new(vec![vec![8.0, 22.0], vec![0.0, 10.0]]).unwrap();
        let out = scores(detector().predict(&batch, &PredictOptions::default()).unwrap());

        assert_eq!(out.flags, vec![true, false]);
        assert!((out.instance_scores[0] - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_feature_level_flagging() {
        // One extreme feature, averaged away at instance level
        let batch = Instances::new(vec![vec![5.0, 10.0]]).unwrap();
        let instance = scores(detector().predict(&batch, &PredictOptions::default()).unwrap());
        let feature = scores(
            detector()
                .predict(
                    &batch,
                    &PredictOptions {
                        outlier_type: OutlierType::Feature,
                        ..Default::default()
                    },
                )
                .unwrap(),
        );

        assert_eq!(instance.flags, vec![false]);
        assert_eq!(feature.flags, vec![true]);
    }

    #[test]
    fn test_feature_mismatch() {
        let batch = Instances::new(vec![vec![1.0, 2.0, 3.0]]).unwrap();
        let result = detector().predict(&batch, &PredictOptions::default());
        assert!(matches!(
            result,
            Err(InferenceError::FeatureMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(ZScoreDetector::new(DetectorKind::Outlier, vec![0.0], vec![0.0], 3.0).is_err());
        assert!(
            ZScoreDetector::new(DetectorKind::Outlier, vec![0.0, 1.0], vec![1.0], 3.0).is_err()
        );
        assert!(ZScoreDetector::new(DetectorKind::Outlier, vec![0.0], vec![1.0], -1.0).is_err());
        assert!(ZScoreDetector::new(DetectorKind::Drift, vec![0.0], vec![1.0], 3.0).is_err());
    }
}
