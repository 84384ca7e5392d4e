//! Error types for each stage of the detection pipeline

use thiserror::Error;

/// Failure to resolve or materialise a detector artifact
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unsupported storage scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("invalid storage reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("artifact unreachable at {reference}: {reason}")]
    Unreachable { reference: String, reason: String },

    #[error("artifact size {size} exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("malformed artifact: {0}")]
    Malformed(String),
}

/// Failure while scoring a payload
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("expected {expected} features per instance, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },

    #[error("model failure: {0}")]
    Model(String),
}

/// Envelope that cannot be turned into a routable event
#[derive(Debug, Error)]
pub enum MalformedEventError {
    #[error("missing required attribute '{0}'")]
    MissingAttribute(&'static str),

    #[error("unsupported specversion '{0}'")]
    UnsupportedSpecVersion(String),

    #[error("invalid attribute '{name}': {reason}")]
    InvalidAttribute { name: String, reason: String },

    #[error("undecodable event body: {0}")]
    Undecodable(String),

    #[error("event carries no data")]
    EmptyData,
}

/// Failure to route an envelope to a detector
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no model is ready to serve")]
    NoModelReady,

    #[error("inference exceeded {0}ms")]
    Timeout(u64),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("inference task failed: {0}")]
    TaskFailed(String),
}

/// Failure to hand a result event to its sink
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("sink {url} unreachable after {attempts} attempt(s): {reason}")]
    Unreachable {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("sink {url} rejected event with status {status}")]
    Rejected { url: String, status: u16 },

    #[error("failed to encode result event: {0}")]
    Encode(String),
}
