//! Adapter packaging detector output into detection results

use super::{DetectorKind, DetectorOutput, DriftOutput, PredictOptions, ScoreOutput};
use crate::error::InferenceError;
use crate::model::ModelHandle;
use crate::protocol::Protocol;
use crate::result::{DetectionResult, DriftDetails, ResultDetails, ScoreDetails, Verdict};

/// Fronts any loaded detector with a single `predict` contract
///
/// The adapter decodes the payload with the configured protocol, runs the
/// handle's detector and turns its output into a [`DetectionResult`]. It
/// never inspects which back-end sits behind the handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectorAdapter {
    protocol: Protocol,
}

impl DetectorAdapter {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Score `payload` with the detector behind `handle`
    pub fn predict(
        &self,
        handle: &ModelHandle,
        payload: &[u8],
        event_id: &str,
        options: &PredictOptions,
    ) -> Result<DetectionResult, InferenceError> {
        let detector = handle.detector().ok_or_else(|| {
            InferenceError::Model(format!("model {} is {}", handle.id(), handle.status()))
        })?;

        let batch = self.protocol.decode(payload)?;
        let kind = detector.kind();
        let output = detector.predict(&batch, options)?;

        let (verdict, score, details) = match output {
            DetectorOutput::Scores(scores) => package_scores(kind, scores, options)?,
            DetectorOutput::Drift(drift) => package_drift(drift),
            DetectorOutput::Pending { buffered, batch_size } => (
                Verdict::Pending,
                0.0,
                ResultDetails::Drift(DriftDetails {
                    is_drift: None,
                    distance: None,
                    p_val: None,
                    threshold: None,
                    buffered,
                    batch_size,
                }),
            ),
        };

        Ok(DetectionResult::new(
            verdict,
            score,
            handle.id(),
            handle.version(),
            event_id,
            details,
        ))
    }
}

fn package_scores(
    kind: DetectorKind,
    scores: ScoreOutput,
    options: &PredictOptions,
) -> Result<(Verdict, f64, ResultDetails), InferenceError> {
    if scores.flags.len() != scores.instance_scores.len() {
        return Err(InferenceError::Model(format!(
            "detector returned {} flags for {} scores",
            scores.flags.len(),
            scores.instance_scores.len()
        )));
    }

    let verdict = Verdict::from_flag(kind, scores.flags.iter().any(|f| *f));
    let score = scores.instance_scores.iter().copied().fold(0.0, f64::max);

    let body = ScoreDetails {
        is_flagged: scores.flags.iter().map(|f| u8::from(*f)).collect(),
        instance_score: options.return_instance_score.then_some(scores.instance_scores),
        feature_score: options.return_feature_score.then_some(scores.feature_scores),
        threshold: scores.threshold,
    };

    let details = match kind {
        DetectorKind::Adversarial => ResultDetails::Adversarial(body),
        DetectorKind::Outlier => ResultDetails::Outlier(body),
        DetectorKind::Drift => {
            return Err(InferenceError::Model(
                "drift detector returned instance scores".to_string(),
            ))
        }
    };

    Ok((verdict, score, details))
}

fn package_drift(drift: DriftOutput) -> (Verdict, f64, ResultDetails) {
    let verdict = Verdict::from_flag(DetectorKind::Drift, drift.is_drift);
    let score = drift.distances.iter().copied().fold(0.0, f64::max);

    let details = ResultDetails::Drift(DriftDetails {
        is_drift: Some(u8::from(drift.is_drift)),
        distance: Some(drift.distances),
        p_val: Some(drift.p_values),
        threshold: Some(drift.threshold),
        buffered: 0,
        batch_size: drift.batch_size,
    });

    (verdict, score, details)
}
