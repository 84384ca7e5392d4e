//! Detection results produced once per processed event

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::detector::DetectorKind;

/// Categorical outcome of a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Outlier,
    Inlier,
    Adversarial,
    Benign,
    Drift,
    NoDrift,
    /// Drift batch not yet complete
    Pending,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Outlier => "outlier",
            Verdict::Inlier => "inlier",
            Verdict::Adversarial => "adversarial",
            Verdict::Benign => "benign",
            Verdict::Drift => "drift",
            Verdict::NoDrift => "no_drift",
            Verdict::Pending => "pending",
        }
    }

    /// True when the verdict should raise attention downstream
    pub fn is_alert(&self) -> bool {
        matches!(self, Verdict::Outlier | Verdict::Adversarial | Verdict::Drift)
    }

    /// Verdict for a flagged / unflagged batch from a detector of `kind`
    pub fn from_flag(kind: DetectorKind, flagged: bool) -> Self {
        match (kind, flagged) {
            (DetectorKind::Outlier, true) => Verdict::Outlier,
            (DetectorKind::Outlier, false) => Verdict::Inlier,
            (DetectorKind::Adversarial, true) => Verdict::Adversarial,
            (DetectorKind::Adversarial, false) => Verdict::Benign,
            (DetectorKind::Drift, true) => Verdict::Drift,
            (DetectorKind::Drift, false) => Verdict::NoDrift,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detector-specific body of a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "detector_type", rename_all = "lowercase")]
pub enum ResultDetails {
    Outlier(ScoreDetails),
    Adversarial(ScoreDetails),
    Drift(DriftDetails),
}

/// Per-instance flags and scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDetails {
    /// 1 when the instance is flagged, 0 otherwise
    pub is_flagged: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_score: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_score: Option<Vec<Vec<f64>>>,
    pub threshold: f64,
}

/// Drift test statistics, or the batch fill level while pending
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_drift: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p_val: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    pub buffered: usize,
    pub batch_size: usize,
}

/// Outcome of scoring one event
///
/// Immutable once built: fields are only readable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    verdict: Verdict,
    score: f64,
    model_id: String,
    model_version: String,
    event_id: String,
    timestamp: DateTime<Utc>,
    details: ResultDetails,
}

impl DetectionResult {
    pub fn new(
        verdict: Verdict,
        score: f64,
        model_id: impl Into<String>,
        model_version: impl Into<String>,
        event_id: impl Into<String>,
        details: ResultDetails,
    ) -> Self {
        Self {
            verdict,
            score,
            model_id: model_id.into(),
            model_version: model_version.into(),
            event_id: event_id.into(),
            timestamp: Utc::now(),
            details,
        }
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Id of the envelope this result answers
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn details(&self) -> &ResultDetails {
        &self.details
    }

    pub fn is_pending(&self) -> bool {
        self.verdict == Verdict::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_from_flag() {
        assert_eq!(Verdict::from_flag(DetectorKind::Outlier, true), Verdict::Outlier);
        assert_eq!(Verdict::from_flag(DetectorKind::Adversarial, false), Verdict::Benign);
        assert_eq!(Verdict::from_flag(DetectorKind::Drift, false), Verdict::NoDrift);
        assert!(Verdict::Drift.is_alert());
        assert!(!Verdict::Pending.is_alert());
    }

    #[test]
    fn test_result_serialization_shape() {
        let result = DetectionResult::new(
            Verdict::Outlier,
            4.2,
            "iris-od",
            "3",
            "evt-9",
            ResultDetails::Outlier(ScoreDetails {
                is_flagged: vec![1],
                instance_score: Some(vec![4.2]),
                feature_score: None,
                threshold: 3.0,
            }),
        );

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["verdict"], "outlier");
        assert_eq!(json["details"]["detector_type"], "outlier");
        assert_eq!(json["details"]["is_flagged"][0], 1);
        assert!(json["details"].get("feature_score").is_none());
        assert_eq!(json["event_id"], "evt-9");
    }
}
