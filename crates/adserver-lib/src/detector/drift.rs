//! Batch mean-shift drift detection
//!
//! Buffers incoming instances until a batch is full, then runs a two-sided
//! z-test on each feature's batch mean against reference statistics. The
//! per-feature p-values are Bonferroni corrected.

use std::sync::Mutex;

use super::{
    check_features, mean, Detector, DetectorKind, DetectorOutput, DriftOutput, PredictOptions,
};
use crate::error::{InferenceError, LoadError};
use crate::protocol::Instances;

/// Default significance level before correction
pub const DEFAULT_P_VAL: f64 = 0.05;

/// Detects shifts in feature means across batches of instances
pub struct MeanShiftDetector {
    mean: Vec<f64>,
    std_dev: Vec<f64>,
    p_val: f64,
    batch_size: usize,
    /// Instances waiting for the batch to fill
    buffer: Mutex<Vec<Vec<f64>>>,
}

impl MeanShiftDetector {
    pub fn new(
        mean: Vec<f64>,
        std_dev: Vec<f64>,
        p_val: f64,
        batch_size: usize,
    ) -> Result<Self, LoadError> {
        if mean.is_empty() || mean.len() != std_dev.len() {
            return Err(LoadError::Malformed(format!(
                "mean_shift back-end has {} means but {} standard deviations",
                mean.len(),
                std_dev.len()
            )));
        }
        if std_dev.iter().any(|s| !s.is_finite() || *s < f64::EPSILON) {
            return Err(LoadError::Malformed("standard deviations must be positive".to_string()));
        }
        if !(p_val > 0.0 && p_val < 1.0) {
            return Err(LoadError::Malformed(format!("p_val must lie in (0, 1), got {}", p_val)));
        }
        if batch_size == 0 {
            return Err(LoadError::Malformed("batch_size must be at least 1".to_string()));
        }

        Ok(Self {
            mean,
            std_dev,
            p_val,
            batch_size,
            buffer: Mutex::new(Vec::new()),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of instances waiting for the next test
    pub fn buffered(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    fn test_batch(&self, batch: &[Vec<f64>]) -> DriftOutput {
        let n = batch.len() as f64;
        let num_features = self.mean.len();
        let corrected = self.p_val / num_features as f64;

        let mut distances = Vec::with_capacity(num_features);
        let mut p_values = Vec::with_capacity(num_features);

        for feature in 0..num_features {
            let column: Vec<f64> = batch.iter().map(|row| row[feature]).collect();
            let shift = mean(&column) - self.mean[feature];
            let z = shift / (self.std_dev[feature] / n.sqrt());

            distances.push(shift.abs() / self.std_dev[feature]);
            p_values.push(erfc(z.abs() / std::f64::consts::SQRT_2));
        }

        let is_drift = p_values.iter().any(|p| *p < corrected);

        DriftOutput {
            is_drift,
            distances,
            p_values,
            threshold: corrected,
            batch_size: batch.len(),
        }
    }
}

impl Detector for MeanShiftDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Drift
    }

    fn num_features(&self) -> usize {
        self.mean.len()
    }

    fn predict(
        &self,
        batch: &Instances,
        _options: &PredictOptions,
    ) -> Result<DetectorOutput, InferenceError> {
        check_features(self.num_features(), batch)?;

        let ready = {
            let mut buffer = self
                .buffer
                .lock()
                .map_err(|e| InferenceError::Model(format!("Lock poisoned: {}", e)))?;
            buffer.extend(batch.rows().iter().cloned());

            if buffer.len() < self.batch_size {
                return Ok(DetectorOutput::Pending {
                    buffered: buffer.len(),
                    batch_size: self.batch_size,
                });
            }
            std::mem::take(&mut *buffer)
        };

        Ok(DetectorOutput::Drift(self.test_batch(&ready)))
    }
}

/// Complementary error function
///
/// Abramowitz and Stegun 7.1.26, absolute error below 1.5e-7.
fn erfc(x: f64) -> f64 {
    if x < 0.0 {
        return 2.0 - erfc(-x);
    }
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let inner = -1.453_152_027 + t * 1.061_405_429;
    let poly = t * (0.254_829_592 + t * (-0.284_496_736 + t * (1.421_413_741 + t * inner)));
    poly * (-x * x).exp()
}
